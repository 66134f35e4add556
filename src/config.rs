use std::env;
use std::time::Duration;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub event_buffer_size: usize,
    pub broadcast_timeout: Duration,
    pub sweep_interval: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a config from any key lookup, so parsing can be exercised
    /// without touching the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let log_format = match lookup("LOG_FORMAT").as_deref() {
            None | Some("compact") => LogFormat::Compact,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(AppError::Config(format!(
                    "invalid LOG_FORMAT: {other}, expected compact or json"
                )));
            }
        };

        let config = Self {
            http_port: parse_or_default(&lookup, "HTTP_PORT", 3000)?,
            log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            log_format,
            event_buffer_size: parse_or_default(&lookup, "EVENT_BUFFER_SIZE", 1024)?,
            broadcast_timeout: Duration::from_secs(parse_or_default(
                &lookup,
                "BROADCAST_TIMEOUT_SECS",
                300,
            )?),
            sweep_interval: Duration::from_secs(parse_or_default(
                &lookup,
                "SWEEP_INTERVAL_SECS",
                30,
            )?),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.broadcast_timeout.is_zero() {
            return Err(AppError::Config(
                "BROADCAST_TIMEOUT_SECS must be > 0".to_string(),
            ));
        }
        if self.sweep_interval.is_zero() {
            return Err(AppError::Config("SWEEP_INTERVAL_SECS must be > 0".to_string()));
        }
        // Expired orders should reach the manual queue within half a window.
        if self.sweep_interval > self.broadcast_timeout / 2 {
            return Err(AppError::Config(format!(
                "SWEEP_INTERVAL_SECS ({}) must not exceed half of BROADCAST_TIMEOUT_SECS ({})",
                self.sweep_interval.as_secs(),
                self.broadcast_timeout.as_secs()
            )));
        }
        if self.event_buffer_size == 0 {
            return Err(AppError::Config("EVENT_BUFFER_SIZE must be > 0".to_string()));
        }
        Ok(())
    }
}

fn parse_or_default<F, T>(lookup: &F, key: &str, default: T) -> Result<T, AppError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .parse::<T>()
            .map_err(|err| AppError::Config(format!("invalid {key}: {err}"))),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use super::{Config, LogFormat};
    use crate::error::AppError;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config, AppError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.http_port, 3000);
        assert_eq!(config.log_format, LogFormat::Compact);
        assert_eq!(config.broadcast_timeout, Duration::from_secs(300));
        assert_eq!(config.sweep_interval, Duration::from_secs(30));
    }

    #[test]
    fn sweep_interval_must_fit_in_half_the_window() {
        let err = config_from(&[("BROADCAST_TIMEOUT_SECS", "60"), ("SWEEP_INTERVAL_SECS", "31")])
            .unwrap_err();
        assert!(matches!(err, AppError::Config(_)));

        assert!(config_from(&[("BROADCAST_TIMEOUT_SECS", "60"), ("SWEEP_INTERVAL_SECS", "30")]).is_ok());
    }

    #[test]
    fn malformed_values_are_rejected() {
        assert!(config_from(&[("HTTP_PORT", "eighty")]).is_err());
        assert!(config_from(&[("LOG_FORMAT", "xml")]).is_err());
        assert!(config_from(&[("BROADCAST_TIMEOUT_SECS", "0")]).is_err());
    }

    #[test]
    fn json_log_format_is_recognised() {
        let config = config_from(&[("LOG_FORMAT", "json")]).unwrap();
        assert_eq!(config.log_format, LogFormat::Json);
    }
}
