// Configuration Management
//
// This crate handles all configuration loading for the gateway.
// It provides:
// - Configuration structs and deserialization
// - Environment and YAML file loading
// - Default configuration values
//
// This keeps configuration concerns separate from domain logic.

use std::path::Path;
use thiserror::Error;

pub mod types;

// Re-export all configuration types
pub use types::*;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found. Tried paths: {paths}")]
    FileNotFound { paths: String },

    #[error("Failed to read configuration file: {source}")]
    IoError {
        #[from]
        source: std::io::Error,
    },

    #[error("Failed to parse configuration: {source}")]
    ParseError {
        #[from]
        source: serde_yaml::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Main configuration loading interface
impl ApiConfig {
    /// Load configuration from YAML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: ApiConfig = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from default locations
    pub fn load() -> Result<Self, ConfigError> {
        let config_paths = ["config/config.yaml", "config.yaml", "config/default.yaml"];

        for path in &config_paths {
            if Path::new(path).exists() {
                return Self::load_from_file(path);
            }
        }

        Err(ConfigError::FileNotFound {
            paths: config_paths.join(", "),
        })
    }

    /// Checks values that deserialization alone cannot catch.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.auth.jwt_secret.is_empty() {
            return Err(ConfigError::Invalid("auth.jwt_secret must not be empty".into()));
        }
        if self.auth.api_key_secret.is_empty() {
            return Err(ConfigError::Invalid(
                "auth.api_key_secret must not be empty".into(),
            ));
        }
        self.providers
            .master_key_bytes()
            .map_err(ConfigError::Invalid)?;
        if self.providers.aggregation_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "providers.aggregation_concurrency must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

    fn write_yaml(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_minimal_yaml_applies_defaults() {
        let file = write_yaml(&format!(
            r#"
auth:
  jwt_secret: "jwt"
  api_key_secret: "hmac"
providers:
  master_key: "{KEY}"
"#
        ));

        let config = ApiConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.request_timeout_secs, 120);
        assert_eq!(config.cache.kind, CacheKind::Valkey);
        assert_eq!(config.cache.url, "redis://localhost:6379");
        assert_eq!(config.auth.access_token_ttl_secs, 15 * 60);
        assert_eq!(config.auth.refresh_token_ttl_secs, 7 * 24 * 60 * 60);
        assert_eq!(config.providers.models_ttl_secs, 600);
        assert_eq!(config.providers.provider_ttl_secs, 60);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_load_full_yaml() {
        let file = write_yaml(&format!(
            r#"
server:
  host: "127.0.0.1"
  port: 9000
logging:
  level: "debug"
  format: "json"
  modules:
    services: "trace"
auth:
  jwt_secret: "jwt"
  api_key_secret: "hmac"
  refresh_cookie_secure: false
cache:
  kind: redis
  url: "redis://cache:6380"
  password: "pw"
  db: 2
providers:
  master_key: "{KEY}"
  jan_base_url: "http://jan:8000/v1"
  jan_api_key: "jan-key"
  aggregation_concurrency: 8
"#
        ));

        let config = ApiConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.logging.modules.get("services").unwrap(), "trace");
        assert!(!config.auth.refresh_cookie_secure);
        assert_eq!(config.cache.kind, CacheKind::Redis);
        assert_eq!(config.cache.password.as_deref(), Some("pw"));
        assert_eq!(config.cache.db, 2);
        assert_eq!(config.providers.jan_api_key.as_deref(), Some("jan-key"));
        assert_eq!(config.providers.aggregation_concurrency, 8);
    }

    #[test]
    fn test_load_rejects_bad_master_key() {
        let file = write_yaml(
            r#"
auth:
  jwt_secret: "jwt"
  api_key_secret: "hmac"
providers:
  master_key: "abcd"
"#,
        );

        let err = ApiConfig::load_from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_load_rejects_malformed_yaml() {
        let file = write_yaml("server: [unterminated");
        let err = ApiConfig::load_from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn test_load_missing_file() {
        let err = ApiConfig::load_from_file("/definitely/not/here.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::IoError { .. }));
    }
}
