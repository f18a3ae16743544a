//! Runtime configuration from environment variables.

use std::env;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::content::ModelConfig;
use crate::data_sources::gemini::GEMINI_API_BASE;

/// Default port if not specified via environment variable.
pub const DEFAULT_PORT: u16 = 3000;

/// Default database path if not specified via environment variable.
pub const DEFAULT_DB_PATH: &str = "sqlite:faunasphere.db?mode=rwc";

/// Image generation can take a while; text lookups finish well within this.
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 120;

/// Server configuration.
///
/// The API key is not part of this struct; it lives in the
/// [`KeyRing`](crate::credentials::KeyRing) so it can change at runtime.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address to listen on. Loopback by default: this is a single-user API.
    pub bind: IpAddr,
    pub port: u16,
    pub database_url: String,
    pub gemini_base_url: String,
    pub models: ModelConfig,
    pub http_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: DEFAULT_PORT,
            database_url: DEFAULT_DB_PATH.to_string(),
            gemini_base_url: GEMINI_API_BASE.to_string(),
            models: ModelConfig::default(),
            http_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
        }
    }
}

impl Config {
    /// Load configuration from the process environment.
    ///
    /// Unset or unparsable values fall back to their defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let bind = lookup("FAUNASPHERE_BIND")
            .and_then(|b| b.parse().ok())
            .unwrap_or(defaults.bind);

        let port = lookup("FAUNASPHERE_PORT")
            .and_then(|p| p.parse().ok())
            .unwrap_or(defaults.port);

        let database_url = lookup("FAUNASPHERE_DATABASE_URL").unwrap_or(defaults.database_url);

        let gemini_base_url = lookup("FAUNASPHERE_GEMINI_BASE_URL")
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or(defaults.gemini_base_url);

        let models = ModelConfig {
            text_model: lookup("FAUNASPHERE_TEXT_MODEL").unwrap_or(defaults.models.text_model),
            image_model: lookup("FAUNASPHERE_IMAGE_MODEL").unwrap_or(defaults.models.image_model),
            fallback_image_model: lookup("FAUNASPHERE_FALLBACK_IMAGE_MODEL")
                .unwrap_or(defaults.models.fallback_image_model),
        };

        let http_timeout = lookup("FAUNASPHERE_HTTP_TIMEOUT_SECS")
            .and_then(|s| s.parse().ok())
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(defaults.http_timeout);

        Self {
            bind,
            port,
            database_url,
            gemini_base_url,
            models,
            http_timeout,
        }
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }
}
