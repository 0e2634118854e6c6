use serde::Deserialize;
use std::{collections::HashMap, env, str::FromStr};

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    pub providers: ProvidersConfig,
}

impl ApiConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, String> {
        let config = Self {
            server: ServerConfig::from_env()?,
            logging: LoggingConfig::from_env()?,
            auth: AuthConfig::from_env()?,
            cache: CacheConfig::from_env()?,
            providers: ProvidersConfig::from_env()?,
        };
        config.validate().map_err(|e| e.to_string())?;
        Ok(config)
    }
}

/// Reads the first variable that is set, so `CACHE_*` can fall back to the
/// Redis-style `REDIS_*` names.
fn first_env(names: &[&str]) -> Option<String> {
    names.iter().find_map(|name| env::var(name).ok())
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Hard deadline applied to every request, streaming included.
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            request_timeout_secs: 120,
        }
    }
}

impl ServerConfig {
    /// Load from environment variables
    pub fn from_env() -> Result<Self, String> {
        let defaults = Self::default();
        Ok(Self {
            host: env::var("SERVER_HOST").unwrap_or(defaults.host),
            port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| defaults.port.to_string())
                .parse()
                .map_err(|_| "SERVER_PORT must be a valid port number")?,
            request_timeout_secs: env::var("REQUEST_TIMEOUT_SECS")
                .unwrap_or_else(|_| defaults.request_timeout_secs.to_string())
                .parse()
                .map_err(|_| "REQUEST_TIMEOUT_SECS must be a valid number")?,
        })
    }
}

/// Logging Configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
    pub modules: HashMap<String, String>,
}

impl LoggingConfig {
    /// Load from environment variables
    pub fn from_env() -> Result<Self, String> {
        let mut modules = HashMap::new();

        for (var, module) in [
            ("LOG_MODULE_API", "api"),
            ("LOG_MODULE_SERVICES", "services"),
            ("LOG_MODULE_CACHE", "cache"),
        ] {
            if let Ok(level) = env::var(var) {
                modules.insert(module.to_string(), level);
            }
        }

        Ok(Self {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: env::var("LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string()),
            modules,
        })
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            modules: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// HMAC secret for access and refresh tokens
    pub jwt_secret: String,
    /// HMAC secret for hashing API keys before lookup
    pub api_key_secret: String,
    #[serde(default = "default_access_token_ttl")]
    pub access_token_ttl_secs: i64,
    #[serde(default = "default_refresh_token_ttl")]
    pub refresh_token_ttl_secs: i64,
    #[serde(default = "default_true")]
    pub refresh_cookie_secure: bool,
}

fn default_access_token_ttl() -> i64 {
    15 * 60
}

fn default_refresh_token_ttl() -> i64 {
    7 * 24 * 60 * 60
}

fn default_true() -> bool {
    true
}

impl AuthConfig {
    /// Load from environment variables
    pub fn from_env() -> Result<Self, String> {
        Ok(Self {
            jwt_secret: env::var("JWT_SECRET").map_err(|_| "JWT_SECRET not set")?,
            api_key_secret: env::var("APIKEY_SECRET").map_err(|_| "APIKEY_SECRET not set")?,
            access_token_ttl_secs: default_access_token_ttl(),
            refresh_token_ttl_secs: default_refresh_token_ttl(),
            refresh_cookie_secure: env::var("REFRESH_COOKIE_SECURE")
                .unwrap_or_else(|_| "true".to_string())
                .parse()
                .map_err(|_| "REFRESH_COOKIE_SECURE must be true or false")?,
        })
    }
}

/// Which cache backing to build at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CacheKind {
    Redis,
    #[default]
    Valkey,
    Memory,
    Noop,
}

impl FromStr for CacheKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "redis" => Ok(Self::Redis),
            "valkey" => Ok(Self::Valkey),
            "memory" => Ok(Self::Memory),
            "noop" => Ok(Self::Noop),
            other => Err(format!(
                "CACHE_TYPE must be one of redis, valkey, memory, noop (got '{other}')"
            )),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub kind: CacheKind,
    pub url: String,
    pub password: Option<String>,
    pub db: i64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            kind: CacheKind::default(),
            url: "redis://localhost:6379".to_string(),
            password: None,
            db: 0,
        }
    }
}

impl CacheConfig {
    /// Load from environment variables. `REDIS_URL`, `REDIS_PASSWORD` and
    /// `REDIS_DB` are accepted as aliases.
    pub fn from_env() -> Result<Self, String> {
        let defaults = Self::default();
        let kind = match env::var("CACHE_TYPE") {
            Ok(value) => value.parse()?,
            Err(_) => defaults.kind,
        };
        let db = match first_env(&["CACHE_DB", "REDIS_DB"]) {
            Some(value) => value
                .parse()
                .map_err(|_| "CACHE_DB must be a valid number")?,
            None => defaults.db,
        };

        Ok(Self {
            kind,
            url: first_env(&["CACHE_URL", "REDIS_URL"]).unwrap_or(defaults.url),
            password: first_env(&["CACHE_PASSWORD", "REDIS_PASSWORD"])
                .filter(|p| !p.is_empty()),
            db,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProvidersConfig {
    /// Hex-encoded 32-byte key used to seal provider API keys
    pub master_key: String,
    /// Base URL of the built-in Jan provider
    #[serde(default = "default_jan_base_url")]
    pub jan_base_url: String,
    #[serde(default)]
    pub jan_api_key: Option<String>,
    #[serde(default = "default_models_ttl")]
    pub models_ttl_secs: u64,
    #[serde(default = "default_provider_ttl")]
    pub provider_ttl_secs: u64,
    #[serde(default = "default_aggregation_concurrency")]
    pub aggregation_concurrency: usize,
}

fn default_jan_base_url() -> String {
    "http://localhost:8101/v1".to_string()
}

fn default_models_ttl() -> u64 {
    10 * 60
}

fn default_provider_ttl() -> u64 {
    60
}

fn default_aggregation_concurrency() -> usize {
    4
}

impl ProvidersConfig {
    /// Load from environment variables
    pub fn from_env() -> Result<Self, String> {
        Ok(Self {
            master_key: env::var("MODEL_PROVIDER_SECRET")
                .map_err(|_| "MODEL_PROVIDER_SECRET not set")?,
            jan_base_url: env::var("JAN_INFERENCE_MODEL_URL")
                .unwrap_or_else(|_| default_jan_base_url()),
            jan_api_key: env::var("JAN_INFERENCE_API_KEY")
                .ok()
                .filter(|k| !k.is_empty()),
            models_ttl_secs: default_models_ttl(),
            provider_ttl_secs: default_provider_ttl(),
            aggregation_concurrency: env::var("PROVIDER_AGGREGATION_CONCURRENCY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or_else(default_aggregation_concurrency),
        })
    }

    /// Decodes the master key, which must be exactly 32 bytes.
    pub fn master_key_bytes(&self) -> Result<[u8; 32], String> {
        let bytes = hex::decode(self.master_key.trim())
            .map_err(|e| format!("provider master key is not valid hex: {e}"))?;
        bytes
            .try_into()
            .map_err(|b: Vec<u8>| format!("provider master key must be 32 bytes, got {}", b.len()))
    }
}
