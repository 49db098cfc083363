//! Application configuration module
//!
//! Handles loading and validating configuration from environment variables.

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::models::ValidationRules;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {message}")]
    InvalidValue { var: String, message: String },
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: Ipv4Addr,
    pub port: u16,
    /// Upper bound on a single request, backups and cascade tests included
    pub request_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: Ipv4Addr::new(0, 0, 0, 0), // Bind to 0.0.0.0 for Docker
            port: 3000,
            request_timeout: Duration::from_secs(300),
        }
    }
}

/// CORS configuration
#[derive(Debug, Clone)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["http://localhost:3001".to_string()],
        }
    }
}

/// Backup storage and validation policy
#[derive(Debug, Clone)]
pub struct BackupConfig {
    pub dir: PathBuf,
    pub rules: ValidationRules,
    /// Pool size for each database connection opened through the API
    pub pool_size: usize,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./backups"),
            rules: ValidationRules::default(),
            pool_size: 5,
        }
    }
}

/// Complete application settings
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub server: ServerConfig,
    pub cors: CorsConfig,
    pub backup: BackupConfig,
}

impl Settings {
    /// Load settings from environment variables
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if it exists (ignore errors if file not found)
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from any key/value source; unset keys keep their defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Settings::default();

        let server = ServerConfig {
            host: parse_or(&lookup, "HOST", defaults.server.host)?,
            port: parse_or(&lookup, "PORT", defaults.server.port)?,
            request_timeout: Duration::from_secs(parse_or(
                &lookup,
                "REQUEST_TIMEOUT_SECS",
                defaults.server.request_timeout.as_secs(),
            )?),
        };

        let cors = CorsConfig {
            allowed_origins: lookup("ALLOWED_ORIGINS")
                .map(|s| s.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect())
                .unwrap_or(defaults.cors.allowed_origins),
        };

        let default_rules = defaults.backup.rules;
        let max_age_hours: i64 = parse_or(
            &lookup,
            "BACKUP_MAX_AGE_HOURS",
            default_rules.max_backup_age_secs / 3600,
        )?;
        if max_age_hours <= 0 {
            return Err(invalid("BACKUP_MAX_AGE_HOURS", "must be a positive number of hours"));
        }
        let max_backup_age_secs = max_age_hours
            .checked_mul(3600)
            .ok_or_else(|| invalid("BACKUP_MAX_AGE_HOURS", "is too large"))?;

        let allowable_data_loss: f64 =
            parse_or(&lookup, "BACKUP_ALLOWABLE_DATA_LOSS", default_rules.allowable_data_loss)?;
        if !(0.0..=1.0).contains(&allowable_data_loss) {
            return Err(invalid("BACKUP_ALLOWABLE_DATA_LOSS", "must be a fraction between 0 and 1"));
        }

        let rules = ValidationRules {
            require_definition: parse_bool_or(&lookup, "BACKUP_REQUIRE_DEFINITION", default_rules.require_definition)?,
            require_data_checksum: parse_bool_or(
                &lookup,
                "BACKUP_REQUIRE_DATA_CHECKSUM",
                default_rules.require_data_checksum,
            )?,
            require_row_count: parse_bool_or(&lookup, "BACKUP_REQUIRE_ROW_COUNT", default_rules.require_row_count)?,
            require_dependencies: parse_bool_or(
                &lookup,
                "BACKUP_REQUIRE_DEPENDENCIES",
                default_rules.require_dependencies,
            )?,
            allowable_data_loss,
            max_backup_age_secs,
            require_encryption: parse_bool_or(&lookup, "BACKUP_REQUIRE_ENCRYPTION", default_rules.require_encryption)?,
            require_compression: parse_bool_or(
                &lookup,
                "BACKUP_REQUIRE_COMPRESSION",
                default_rules.require_compression,
            )?,
        };

        let pool_size: usize = parse_or(&lookup, "DB_MAX_CONNECTIONS", defaults.backup.pool_size)?;
        if pool_size == 0 {
            return Err(invalid("DB_MAX_CONNECTIONS", "must be at least 1"));
        }

        let backup = BackupConfig {
            dir: lookup("BACKUP_DIR").map(PathBuf::from).unwrap_or(defaults.backup.dir),
            rules,
            pool_size,
        };

        Ok(Self { server, cors, backup })
    }
}

fn invalid(var: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        var: var.to_string(),
        message: message.into(),
    }
}

fn parse_or<F, T>(lookup: &F, var: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(var) {
        Some(raw) => raw.trim().parse::<T>().map_err(|e| invalid(var, e.to_string())),
        None => Ok(default),
    }
}

fn parse_bool_or<F>(lookup: &F, var: &str, default: bool) -> Result<bool, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(var).map(|v| v.trim().to_lowercase()) {
        None => Ok(default),
        Some(v) => match v.as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(invalid(var, format!("expected a boolean, got '{}'", v))),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings_from(pairs: &[(&str, &str)]) -> Result<Settings, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let settings = settings_from(&[]).unwrap();
        assert_eq!(settings.server.host, Ipv4Addr::new(0, 0, 0, 0));
        assert_eq!(settings.server.port, 3000);
        assert_eq!(settings.server.request_timeout, Duration::from_secs(300));
        assert_eq!(settings.backup.dir, PathBuf::from("./backups"));
        assert_eq!(settings.backup.rules, ValidationRules::default());
    }

    #[test]
    fn test_backup_overrides() {
        let settings = settings_from(&[
            ("BACKUP_DIR", "/var/lib/backups"),
            ("BACKUP_MAX_AGE_HOURS", "6"),
            ("BACKUP_REQUIRE_DEPENDENCIES", "false"),
            ("BACKUP_ALLOWABLE_DATA_LOSS", "0.05"),
            ("ALLOWED_ORIGINS", "http://a.test, http://b.test"),
        ])
        .unwrap();

        assert_eq!(settings.backup.dir, PathBuf::from("/var/lib/backups"));
        assert_eq!(settings.backup.rules.max_backup_age_secs, 6 * 3600);
        assert!(!settings.backup.rules.require_dependencies);
        assert_eq!(settings.backup.rules.allowable_data_loss, 0.05);
        assert_eq!(settings.cors.allowed_origins, vec!["http://a.test", "http://b.test"]);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(settings_from(&[("PORT", "seventy")]).is_err());
        assert!(settings_from(&[("BACKUP_REQUIRE_ROW_COUNT", "maybe")]).is_err());
        assert!(settings_from(&[("BACKUP_ALLOWABLE_DATA_LOSS", "1.5")]).is_err());
        assert!(settings_from(&[("BACKUP_MAX_AGE_HOURS", "0")]).is_err());
    }

    #[test]
    fn test_huge_max_age_is_rejected() {
        let hours = (i64::MAX / 3600 + 1).to_string();
        let err = settings_from(&[("BACKUP_MAX_AGE_HOURS", hours.as_str())]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref var, .. } if var == "BACKUP_MAX_AGE_HOURS"));
    }
}
