use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    #[error("invalid value for {name}: {message}")]
    InvalidValue { name: String, message: String },
    #[error("failed to parse {name} as integer: {source}")]
    ParseInt {
        name: String,
        #[source]
        source: std::num::ParseIntError,
    },
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Upstream source
    pub creator_id: String,
    pub service: String,
    pub api_base: String,
    pub site_base: String,
    pub media_base: String,
    pub target_extension: String,
    pub page_size: u32,
    pub connect_timeout: Duration,

    // Rate limiting
    pub limiter_concurrency: usize,
    pub metadata_min_interval: Duration,
    pub download_min_interval: Duration,

    // Downloads
    pub download_dir: PathBuf,
    pub queue_item_delay: Duration,

    // Web Server
    pub web_host: String,
    pub web_port: u16,
    pub static_dir: PathBuf,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            // Upstream source
            creator_id: required_env("CREATOR_ID")?,
            service: env_or_default("SERVICE", "patreon"),
            api_base: trim_base(&env_or_default("UPSTREAM_API_BASE", "https://kemono.su/api/v1")),
            site_base: trim_base(&env_or_default("UPSTREAM_SITE_BASE", "https://kemono.su")),
            media_base: trim_base(&env_or_default(
                "UPSTREAM_MEDIA_BASE",
                "https://kemono.su/data",
            )),
            target_extension: normalize_extension(&env_or_default("TARGET_EXTENSION", ".pdf")),
            page_size: parse_env_u32("PAGE_SIZE", 50)?,
            connect_timeout: Duration::from_secs(parse_env_u64("CONNECT_TIMEOUT_SECS", 30)?),

            // Rate limiting
            limiter_concurrency: parse_env_usize("LIMITER_CONCURRENCY", 1)?,
            metadata_min_interval: Duration::from_millis(parse_env_u64(
                "METADATA_MIN_INTERVAL_MS",
                2000,
            )?),
            download_min_interval: Duration::from_millis(parse_env_u64(
                "DOWNLOAD_MIN_INTERVAL_MS",
                5000,
            )?),

            // Downloads
            download_dir: PathBuf::from(env_or_default("DOWNLOAD_DIR", "./downloads")),
            queue_item_delay: Duration::from_millis(parse_env_u64("QUEUE_ITEM_DELAY_MS", 5000)?),

            // Web Server
            web_host: env_or_default("WEB_HOST", "0.0.0.0"),
            web_port: parse_env_u16("WEB_PORT", 3000)?,
            static_dir: PathBuf::from(env_or_default("STATIC_DIR", "./public")),
        })
    }

    /// Configuration with zero delays and a placeholder creator, for tests.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            creator_id: "12345".to_string(),
            service: "patreon".to_string(),
            api_base: "http://127.0.0.1:9/api/v1".to_string(),
            site_base: "http://127.0.0.1:9".to_string(),
            media_base: "http://127.0.0.1:9/data".to_string(),
            target_extension: ".pdf".to_string(),
            page_size: 50,
            connect_timeout: Duration::from_secs(5),
            limiter_concurrency: 1,
            metadata_min_interval: Duration::ZERO,
            download_min_interval: Duration::ZERO,
            download_dir: PathBuf::from("./downloads"),
            queue_item_delay: Duration::ZERO,
            web_host: "127.0.0.1".to_string(),
            web_port: 3000,
            static_dir: PathBuf::from("./public"),
        }
    }

    /// Point every upstream base URL at one host, e.g. a mock server.
    #[must_use]
    pub fn with_upstream(mut self, origin: &str) -> Self {
        let origin = trim_base(origin);
        self.api_base = format!("{origin}/api/v1");
        self.media_base = format!("{origin}/data");
        self.site_base = origin;
        self
    }

    /// Validate that the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.creator_id.is_empty() {
            return Err(ConfigError::InvalidValue {
                name: "CREATOR_ID".to_string(),
                message: "cannot be empty".to_string(),
            });
        }
        if self.limiter_concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                name: "LIMITER_CONCURRENCY".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.limiter_concurrency > tokio::sync::Semaphore::MAX_PERMITS {
            return Err(ConfigError::InvalidValue {
                name: "LIMITER_CONCURRENCY".to_string(),
                message: format!("must be at most {}", tokio::sync::Semaphore::MAX_PERMITS),
            });
        }
        if self.page_size == 0 {
            return Err(ConfigError::InvalidValue {
                name: "PAGE_SIZE".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.target_extension.len() < 2 {
            return Err(ConfigError::InvalidValue {
                name: "TARGET_EXTENSION".to_string(),
                message: "must name an extension such as .pdf".to_string(),
            });
        }
        for (name, value) in [
            ("UPSTREAM_API_BASE", &self.api_base),
            ("UPSTREAM_SITE_BASE", &self.site_base),
            ("UPSTREAM_MEDIA_BASE", &self.media_base),
        ] {
            if let Err(e) = url::Url::parse(value) {
                return Err(ConfigError::InvalidValue {
                    name: name.to_string(),
                    message: format!("not a valid URL: {e}"),
                });
            }
        }
        Ok(())
    }
}

fn required_env(name: &str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::MissingEnvVar(name.to_string()))
}

fn env_or_default(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn trim_base(value: &str) -> String {
    value.trim_end_matches('/').to_string()
}

/// Lowercase the extension and make sure it starts with a dot.
fn normalize_extension(value: &str) -> String {
    let value = value.trim().to_lowercase();
    if value.starts_with('.') {
        value
    } else {
        format!(".{value}")
    }
}

fn parse_env_u64(name: &str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_u32(name: &str, default: u32) -> Result<u32, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_u16(name: &str, default: u16) -> Result<u16, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_usize(name: &str, default: usize) -> Result<usize, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}
