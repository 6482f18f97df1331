// src/auth.rs
use crate::config::Config;
use crate::error::{Error, Result};
use crate::models::Claims;
use actix_web::{FromRequest, HttpRequest, dev::Payload, http::header, web};
use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use std::future::{Ready, ready};
use uuid::Uuid;

/// Authenticated caller. Rejects the request with 401 when no valid bearer token is present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Principal(pub Uuid);

/// Caller that may be anonymous. Invalid or expired tokens count as anonymous.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaybePrincipal(pub Option<Uuid>);

pub fn issue_token(user_id: Uuid, secret: &str, ttl: Duration) -> Result<String> {
    let expiration = Utc::now() + ttl;
    let claims = Claims {
        sub: user_id.to_string(),
        exp: expiration.timestamp().max(0) as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_ref()),
    )
    .map_err(|e| {
        tracing::error!("Token generation error: {}", e);
        Error::Config(format!("cannot sign token: {e}"))
    })
}

pub fn verify_token(token: &str, secret: &str) -> Result<Uuid> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_ref()),
        &Validation::default(),
    )
    .map_err(|e| {
        tracing::debug!("Rejected bearer token: {}", e);
        Error::Unauthorized
    })?;
    Uuid::parse_str(&data.claims.sub).map_err(|_| Error::Unauthorized)
}

// Bearer token from the Authorization header
fn user_id_from_request(req: &HttpRequest) -> Result<Option<Uuid>> {
    let config = req
        .app_data::<web::Data<Config>>()
        .ok_or_else(|| Error::Config("application config is not registered".to_string()))?;

    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    Ok(token.and_then(|t| verify_token(t, &config.jwt_secret).ok()))
}

impl FromRequest for Principal {
    type Error = Error;
    type Future = Ready<Result<Self>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(user_id_from_request(req).and_then(|id| id.map(Principal).ok_or(Error::Unauthorized)))
    }
}

impl FromRequest for MaybePrincipal {
    type Error = Error;
    type Future = Ready<Result<Self>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(user_id_from_request(req).map(MaybePrincipal))
    }
}
