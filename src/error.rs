// src/error.rs
use actix_web::{HttpResponse, ResponseError, http::StatusCode};
use serde_json::json;
use thiserror::Error;

/// Business refusals and storage faults. [`ResponseError`] picks the status code.
#[derive(Error, Debug)]
pub enum Error {
    /// Referenced song, artist, user, event or payment does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Premium-only content requested without an active subscription
    #[error("Premium content requires subscription")]
    AccessDenied { preview_duration: i32 },

    /// Offline download allowance exhausted or subscription inactive
    #[error("Offline download quota exceeded")]
    QuotaExceeded,

    /// Operation not valid for the current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized")]
    Unauthorized,

    /// Authenticated, but acting on someone else's resource
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Payment gateway refused or failed the transaction
    #[error("Payment error: {0}")]
    Payment(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn not_found(what: &str, id: impl std::fmt::Display) -> Self {
        Error::NotFound(format!("{what} {id}"))
    }
}

impl ResponseError for Error {
    fn status_code(&self) -> StatusCode {
        match self {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::AccessDenied { .. } | Error::QuotaExceeded | Error::Forbidden(_) => {
                StatusCode::FORBIDDEN
            }
            Error::InvalidState(_) | Error::BadRequest(_) => StatusCode::BAD_REQUEST,
            Error::Unauthorized => StatusCode::UNAUTHORIZED,
            Error::Payment(_) => StatusCode::PAYMENT_REQUIRED,
            Error::Database(_) | Error::Migrate(_) | Error::Config(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        let body = match self {
            Error::AccessDenied { preview_duration } => json!({
                "error": self.to_string(),
                "can_preview": *preview_duration > 0,
                "preview_duration": preview_duration,
            }),
            Error::Database(_) | Error::Migrate(_) | Error::Config(_) => {
                tracing::error!("Internal error: {}", self);
                json!({"error": "Internal server error"})
            }
            _ => json!({"error": self.to_string()}),
        };
        HttpResponse::build(self.status_code()).json(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_denied_maps_to_forbidden() {
        let err = Error::AccessDenied {
            preview_duration: 30,
        };
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn storage_faults_hide_details() {
        let err = Error::Database(sqlx::Error::PoolTimedOut);
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.error_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
