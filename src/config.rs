//! Environment-driven configuration.
//!
//! Values come from the process environment, optionally seeded from a `.env`
//! file by the binary before [`Config::from_env`] runs.

use std::str::FromStr;

use secrecy::{ExposeSecret, SecretString};

use crate::error::ConfigError;

/// CloudAPI endpoint used when nothing else is configured.
pub const DEFAULT_TRITON_URL: &str = "https://us-sw-1.api.joyent.com/";

/// Prefix of the management key name; the datacenter is appended at runtime.
pub const DEFAULT_KEY_NAME_PREFIX: &str = "TSG_Management";

/// Modulus size of generated management keys.
// Small by historical default; raising it changes the keys we register.
pub const DEFAULT_KEY_BITS: usize = 1024;

/// Top-level service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub http: HttpConfig,
    pub database: Option<DatabaseConfig>,
    pub auth: AuthConfig,
    pub log_format: LogFormat,
}

/// HTTP listener configuration.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 3000,
        }
    }
}

/// PostgreSQL connection configuration.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    url: SecretString,
    pub pool_size: usize,
}

impl DatabaseConfig {
    pub fn new(url: impl Into<String>, pool_size: usize) -> Self {
        Self {
            url: SecretString::from(url.into()),
            pool_size,
        }
    }

    /// Connection string. Contains credentials, never log it.
    pub fn url(&self) -> &str {
        self.url.expose_secret()
    }
}

/// Settings consumed by the authentication core.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Datacenter this instance serves; makes management key names unique per DC.
    pub datacenter: String,
    /// CloudAPI in which instances are scaled. Exposed on the session.
    pub triton_url: String,
    /// CloudAPI used to verify callers and register management keys.
    pub identity_url: String,
    pub key_name_prefix: String,
    /// Only serve accounts that already have a local record.
    pub enable_whitelist: bool,
    pub key_bits: usize,
    /// Skip verification and use a fixed development identity.
    pub dev_mode: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            datacenter: "us-east-1".to_string(),
            triton_url: DEFAULT_TRITON_URL.to_string(),
            identity_url: DEFAULT_TRITON_URL.to_string(),
            key_name_prefix: DEFAULT_KEY_NAME_PREFIX.to_string(),
            enable_whitelist: false,
            key_bits: DEFAULT_KEY_BITS,
            dev_mode: false,
        }
    }
}

impl AuthConfig {
    /// Deterministic management key name, `<prefix>_<datacenter>`.
    pub fn key_name(&self) -> String {
        key_name_for_dc(&self.key_name_prefix, &self.datacenter)
    }
}

/// Name under which the management key for `datacenter` is registered.
pub fn key_name_for_dc(prefix: &str, datacenter: &str) -> String {
    format!("{}_{}", prefix, datacenter)
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" | "text" | "human" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            _ => Err(format!(
                "invalid log format '{}', expected 'pretty' or 'json'",
                s
            )),
        }
    }
}

impl Config {
    /// Build the configuration from `TSG_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let mut http = HttpConfig::default();
        if let Some(bind) = get("TSG_HTTP_BIND") {
            http.bind = bind;
        }
        if let Some(port) = get("TSG_HTTP_PORT") {
            http.port = parse_value("TSG_HTTP_PORT", &port)?;
        }

        let mut auth = AuthConfig::default();
        if let Some(dc) = get("TSG_DATACENTER") {
            auth.datacenter = dc;
        }
        if let Some(url) = get("TSG_TRITON_URL") {
            auth.triton_url = url.clone();
            auth.identity_url = url;
        }
        if let Some(url) = get("TSG_AUTH_URL") {
            auth.identity_url = url;
        }
        if let Some(prefix) = get("TSG_KEY_NAME_PREFIX") {
            auth.key_name_prefix = prefix;
        }
        if let Some(flag) = get("TSG_ENABLE_WHITELIST") {
            auth.enable_whitelist = parse_bool("TSG_ENABLE_WHITELIST", &flag)?;
        }
        if let Some(bits) = get("TSG_KEY_BITS") {
            auth.key_bits = parse_value("TSG_KEY_BITS", &bits)?;
        }
        if let Some(flag) = get("TSG_DEV_MODE") {
            auth.dev_mode = parse_bool("TSG_DEV_MODE", &flag)?;
        }

        let database = match get("TSG_DATABASE_URL") {
            Some(url) => {
                let pool_size = match get("TSG_DATABASE_POOL_SIZE") {
                    Some(size) => parse_value("TSG_DATABASE_POOL_SIZE", &size)?,
                    None => 5,
                };
                Some(DatabaseConfig::new(url, pool_size))
            }
            None if auth.dev_mode => None,
            None => return Err(ConfigError::MissingEnvVar("TSG_DATABASE_URL".to_string())),
        };

        let log_format = match get("TSG_LOG_FORMAT") {
            Some(format) => format
                .parse()
                .map_err(|message| ConfigError::InvalidValue {
                    key: "TSG_LOG_FORMAT".to_string(),
                    message,
                })?,
            None => LogFormat::default(),
        };

        Ok(Self {
            http,
            database,
            auth,
            log_format,
        })
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected a boolean, got '{}'", other),
        }),
    }
}
