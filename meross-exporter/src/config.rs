//! Exporter configuration, built once at startup from the environment.
//!
//! Every knob is an environment variable (a `.env` file is loaded by `main`
//! beforehand). Only `EMAIL` and `PASSWORD` are mandatory.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_POLLING_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_EXPORTER_PORT: u16 = 8000;
pub const DEFAULT_METADATA_PATH: &str = "/app/src/metadata.json";
pub const DEFAULT_API_BASE_URL: &str = "https://iotx-eu.meross.com";
pub const DEFAULT_CYCLE_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_MONITORED_TYPES: &[&str] = &["mss310"];

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value {value:?} for {name}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// Meross account credentials
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    // never print the password, even at debug level
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct ExporterConfig {
    pub credentials: Credentials,
    pub poll_interval: Duration,
    pub exporter_port: u16,
    pub metadata_path: PathBuf,
    pub api_base_url: String,
    pub cycle_timeout: Duration,
    pub monitored_types: Vec<String>,
}

impl ExporterConfig {
    /// Reads the configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from an arbitrary variable lookup.
    /// Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let email = get("EMAIL").ok_or(ConfigError::Missing("EMAIL"))?;
        let password = get("PASSWORD").ok_or(ConfigError::Missing("PASSWORD"))?;

        let poll_secs: u64 = parse_or(
            "POLLING_INTERVAL_SECONDS",
            get("POLLING_INTERVAL_SECONDS"),
            DEFAULT_POLLING_INTERVAL_SECS,
        )?;
        let exporter_port: u16 = parse_or("EXPORTER_PORT", get("EXPORTER_PORT"), DEFAULT_EXPORTER_PORT)?;
        let timeout_secs: u64 = parse_or(
            "CYCLE_TIMEOUT_SECONDS",
            get("CYCLE_TIMEOUT_SECONDS"),
            DEFAULT_CYCLE_TIMEOUT_SECS,
        )?;

        non_zero("POLLING_INTERVAL_SECONDS", poll_secs)?;
        non_zero("CYCLE_TIMEOUT_SECONDS", timeout_secs)?;

        let metadata_path = get("METADATA_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_METADATA_PATH));

        let api_base_url = get("MEROSS_API_BASE_URL")
            .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        let monitored_types = match get("MONITORED_DEVICE_TYPES") {
            Some(raw) => {
                let types: Vec<String> = raw
                    .split(',')
                    .map(|t| t.trim().to_string())
                    .filter(|t| !t.is_empty())
                    .collect();
                if types.is_empty() {
                    return Err(ConfigError::Invalid {
                        name: "MONITORED_DEVICE_TYPES",
                        value: raw,
                        reason: "at least one device type is required".into(),
                    });
                }
                types
            }
            None => DEFAULT_MONITORED_TYPES.iter().map(|t| t.to_string()).collect(),
        };

        Ok(Self {
            credentials: Credentials { email, password },
            poll_interval: Duration::from_secs(poll_secs),
            exporter_port,
            metadata_path,
            api_base_url,
            cycle_timeout: Duration::from_secs(timeout_secs),
            monitored_types,
        })
    }
}

fn parse_or<T>(name: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match raw {
        None => Ok(default),
        Some(value) => match value.trim().parse::<T>() {
            Ok(parsed) => Ok(parsed),
            Err(e) => Err(ConfigError::Invalid {
                name,
                reason: e.to_string(),
                value,
            }),
        },
    }
}

fn non_zero(name: &'static str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::Invalid {
            name,
            value: value.to_string(),
            reason: "must be greater than zero".into(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults_with_credentials_only() {
        let config = ExporterConfig::from_lookup(lookup(&[
            ("EMAIL", "me@example.com"),
            ("PASSWORD", "hunter2"),
        ]))
        .unwrap();

        assert_eq!(config.credentials.email, "me@example.com");
        assert_eq!(config.poll_interval, Duration::from_secs(60));
        assert_eq!(config.exporter_port, 8000);
        assert_eq!(config.metadata_path, PathBuf::from("/app/src/metadata.json"));
        assert_eq!(config.api_base_url, "https://iotx-eu.meross.com");
        assert_eq!(config.cycle_timeout, Duration::from_secs(30));
        assert_eq!(config.monitored_types, vec!["mss310".to_string()]);
    }

    #[test]
    fn test_missing_credentials_are_fatal() {
        let err = ExporterConfig::from_lookup(lookup(&[("PASSWORD", "x")])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("EMAIL")));

        let err = ExporterConfig::from_lookup(lookup(&[("EMAIL", "a@b.c"), ("PASSWORD", "  ")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Missing("PASSWORD")));
    }

    #[test]
    fn test_overrides() {
        let config = ExporterConfig::from_lookup(lookup(&[
            ("EMAIL", "me@example.com"),
            ("PASSWORD", "hunter2"),
            ("POLLING_INTERVAL_SECONDS", "15"),
            ("EXPORTER_PORT", "9105"),
            ("METADATA_PATH", "/etc/meross/metadata.json"),
            ("MEROSS_API_BASE_URL", "https://iotx-us.meross.com/"),
            ("CYCLE_TIMEOUT_SECONDS", "10"),
            ("MONITORED_DEVICE_TYPES", "mss310, mss315 ,,"),
        ]))
        .unwrap();

        assert_eq!(config.poll_interval, Duration::from_secs(15));
        assert_eq!(config.exporter_port, 9105);
        assert_eq!(config.metadata_path, PathBuf::from("/etc/meross/metadata.json"));
        assert_eq!(config.api_base_url, "https://iotx-us.meross.com");
        assert_eq!(config.cycle_timeout, Duration::from_secs(10));
        assert_eq!(config.monitored_types, vec!["mss310", "mss315"]);
    }

    #[test]
    fn test_invalid_numbers_are_rejected() {
        let err = ExporterConfig::from_lookup(lookup(&[
            ("EMAIL", "me@example.com"),
            ("PASSWORD", "hunter2"),
            ("EXPORTER_PORT", "eighty"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "EXPORTER_PORT", .. }));

        let err = ExporterConfig::from_lookup(lookup(&[
            ("EMAIL", "me@example.com"),
            ("PASSWORD", "hunter2"),
            ("POLLING_INTERVAL_SECONDS", "0"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "POLLING_INTERVAL_SECONDS", .. }));
    }

    #[test]
    fn test_empty_allow_list_is_rejected() {
        let err = ExporterConfig::from_lookup(lookup(&[
            ("EMAIL", "me@example.com"),
            ("PASSWORD", "hunter2"),
            ("MONITORED_DEVICE_TYPES", " , "),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "MONITORED_DEVICE_TYPES", .. }));
    }

    #[test]
    fn test_debug_redacts_password() {
        let creds = Credentials { email: "me@example.com".into(), password: "hunter2".into() };
        let printed = format!("{:?}", creds);
        assert!(printed.contains("me@example.com"));
        assert!(!printed.contains("hunter2"));
    }
}
