// src/config.rs
use serde::Deserialize;

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_max_connections")]
    pub database_max_connections: u32,
    /// Seconds an artist's earnings stay cached. Zero disables the cache.
    #[serde(default = "default_earnings_ttl")]
    pub earnings_cache_ttl_secs: u64,
}

fn default_bind_address() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_max_connections() -> u32 {
    10
}

fn default_earnings_ttl() -> u64 {
    60
}

impl Config {
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::from_env()
    }

    pub fn earnings_cache_ttl(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.earnings_cache_ttl_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn optional_keys_fall_back_to_defaults() {
        let config: Config = envy::from_iter(vars(&[
            ("DATABASE_URL", "postgres://localhost/music"),
            ("JWT_SECRET", "secret"),
        ]))
        .unwrap();
        assert_eq!(config.bind_address, "127.0.0.1:8080");
        assert_eq!(config.database_max_connections, 10);
        assert_eq!(config.earnings_cache_ttl().as_secs(), 60);
    }

    #[test]
    fn explicit_values_override_defaults() {
        let config: Config = envy::from_iter(vars(&[
            ("DATABASE_URL", "postgres://localhost/music"),
            ("JWT_SECRET", "secret"),
            ("BIND_ADDRESS", "0.0.0.0:9000"),
            ("EARNINGS_CACHE_TTL_SECS", "0"),
        ]))
        .unwrap();
        assert_eq!(config.bind_address, "0.0.0.0:9000");
        assert!(config.earnings_cache_ttl().is_zero());
    }

    #[test]
    fn missing_secret_is_an_error() {
        let result: Result<Config, _> =
            envy::from_iter(vars(&[("DATABASE_URL", "postgres://localhost/music")]));
        assert!(result.is_err());
    }
}
