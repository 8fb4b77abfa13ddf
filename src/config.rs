//! Server configuration, loaded from the environment (after `dotenvy`).
//!
//! The credential secret is redacted in Debug output.

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::str::FromStr;

use axum::http::HeaderValue;
use thiserror::Error;

pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:5000";

/// Credential validity window, one hour.
pub const DEFAULT_CREDENTIAL_TTL_SECONDS: i64 = 3600;

/// Per-room broadcast buffer. Receivers further behind than this skip frames.
pub const DEFAULT_RELAY_CHANNEL_CAPACITY: usize = 256;

pub const DEFAULT_DB_MAX_CONNECTIONS: u32 = 8;

#[derive(Clone)]
pub struct Config {
    /// SQLite connection URL.
    pub database_url: String,
    pub bind_address: String,
    /// HS256 secret for join credentials.
    pub jwt_secret: String,
    pub credential_ttl_seconds: i64,
    /// When true a relay connection also receives the events it published.
    pub echo_to_sender: bool,
    pub relay_channel_capacity: usize,
    pub db_max_connections: u32,
    /// Browser origin allowed to call the API with credentials. Unset means
    /// no CORS headers at all.
    pub cors_allowed_origin: Option<HeaderValue>,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("database_url", &self.database_url)
            .field("bind_address", &self.bind_address)
            .field("jwt_secret", &"[REDACTED]")
            .field("credential_ttl_seconds", &self.credential_ttl_seconds)
            .field("echo_to_sender", &self.echo_to_sender)
            .field("relay_channel_capacity", &self.relay_channel_capacity)
            .field("db_max_connections", &self.db_max_connections)
            .field("cors_allowed_origin", &self.cors_allowed_origin)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {name}: {reason}")]
    InvalidValue { name: String, reason: String },
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a map (for tests).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let database_url = required(vars, "DATABASE_URL")?;
        let jwt_secret = required(vars, "JWT_SECRET")?;

        let bind_address = vars
            .get("BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let credential_ttl_seconds: i64 =
            parse_or(vars, "CREDENTIAL_TTL_SECONDS", DEFAULT_CREDENTIAL_TTL_SECONDS)?;
        if credential_ttl_seconds <= 0 {
            return Err(invalid("CREDENTIAL_TTL_SECONDS", "must be positive"));
        }

        let echo_to_sender = match vars.get("RELAY_ECHO_TO_SENDER").map(|s| s.trim()) {
            None | Some("") => false,
            Some(v) if v.eq_ignore_ascii_case("true") || v == "1" => true,
            Some(v) if v.eq_ignore_ascii_case("false") || v == "0" => false,
            Some(v) => {
                return Err(invalid(
                    "RELAY_ECHO_TO_SENDER",
                    &format!("expected true/false, got '{v}'"),
                ))
            }
        };

        let relay_channel_capacity: usize =
            parse_or(vars, "RELAY_CHANNEL_CAPACITY", DEFAULT_RELAY_CHANNEL_CAPACITY)?;
        if relay_channel_capacity == 0 {
            return Err(invalid("RELAY_CHANNEL_CAPACITY", "must be positive"));
        }

        let db_max_connections: u32 =
            parse_or(vars, "DB_MAX_CONNECTIONS", DEFAULT_DB_MAX_CONNECTIONS)?;
        if db_max_connections == 0 {
            return Err(invalid("DB_MAX_CONNECTIONS", "must be positive"));
        }

        let cors_allowed_origin = match vars.get("CORS_ALLOWED_ORIGIN").map(|s| s.trim()) {
            None | Some("") => None,
            // credentialed requests cannot use a wildcard origin
            Some("*") => return Err(invalid("CORS_ALLOWED_ORIGIN", "must be a concrete origin, not '*'")),
            Some(v) => Some(
                HeaderValue::from_str(v)
                    .map_err(|e| invalid("CORS_ALLOWED_ORIGIN", &format!("'{v}': {e}")))?,
            ),
        };

        Ok(Config {
            database_url,
            bind_address,
            jwt_secret,
            credential_ttl_seconds,
            echo_to_sender,
            relay_channel_capacity,
            db_max_connections,
            cors_allowed_origin,
        })
    }
}

fn required(vars: &HashMap<String, String>, name: &str) -> Result<String, ConfigError> {
    vars.get(name)
        .filter(|v| !v.is_empty())
        .cloned()
        .ok_or_else(|| ConfigError::MissingEnvVar(name.to_string()))
}

fn parse_or<T>(vars: &HashMap<String, String>, name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match vars.get(name) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| invalid(name, &format!("'{raw}': {e}"))),
    }
}

fn invalid(name: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        name: name.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_vars() -> HashMap<String, String> {
        HashMap::from([
            ("DATABASE_URL".to_string(), "sqlite://test.db".to_string()),
            ("JWT_SECRET".to_string(), "s3cret".to_string()),
        ])
    }

    #[test]
    fn defaults_apply() {
        let cfg = Config::from_vars(&base_vars()).unwrap();
        assert_eq!(cfg.bind_address, DEFAULT_BIND_ADDRESS);
        assert_eq!(cfg.credential_ttl_seconds, 3600);
        assert!(!cfg.echo_to_sender);
        assert_eq!(cfg.relay_channel_capacity, DEFAULT_RELAY_CHANNEL_CAPACITY);
    }

    #[test]
    fn missing_secret_is_rejected() {
        let mut vars = base_vars();
        vars.remove("JWT_SECRET");
        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::MissingEnvVar(name)) if name == "JWT_SECRET"
        ));
    }

    #[test]
    fn echo_policy_parses() {
        let mut vars = base_vars();
        vars.insert("RELAY_ECHO_TO_SENDER".into(), "TRUE".into());
        assert!(Config::from_vars(&vars).unwrap().echo_to_sender);

        vars.insert("RELAY_ECHO_TO_SENDER".into(), "maybe".into());
        assert!(Config::from_vars(&vars).is_err());
    }

    #[test]
    fn non_positive_ttl_is_rejected() {
        let mut vars = base_vars();
        vars.insert("CREDENTIAL_TTL_SECONDS".into(), "0".into());
        assert!(Config::from_vars(&vars).is_err());
        vars.insert("CREDENTIAL_TTL_SECONDS".into(), "abc".into());
        assert!(Config::from_vars(&vars).is_err());
    }

    #[test]
    fn cors_origin_is_optional_and_concrete() {
        let mut vars = base_vars();
        assert!(Config::from_vars(&vars).unwrap().cors_allowed_origin.is_none());

        vars.insert("CORS_ALLOWED_ORIGIN".into(), "https://live-class.example".into());
        let cfg = Config::from_vars(&vars).unwrap();
        assert_eq!(cfg.cors_allowed_origin.unwrap(), "https://live-class.example");

        vars.insert("CORS_ALLOWED_ORIGIN".into(), "*".into());
        assert!(Config::from_vars(&vars).is_err());
    }

    #[test]
    fn debug_redacts_secret() {
        let cfg = Config::from_vars(&base_vars()).unwrap();
        let dbg = format!("{cfg:?}");
        assert!(dbg.contains("[REDACTED]"));
        assert!(!dbg.contains("s3cret"));
    }
}
