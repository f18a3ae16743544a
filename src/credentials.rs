//! API key selection gate.
//!
//! The host environment decides which key the generative client uses. The
//! core only asks two questions: is a key selected, and, if not, please
//! prompt for one.

use std::env;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Environment variables consulted for a key, in priority order.
pub const API_KEY_ENV_VARS: [&str; 2] = ["GEMINI_API_KEY", "API_KEY"];

/// Host capability that owns the credential prompt.
#[async_trait]
pub trait CredentialGate: Send + Sync {
    /// Whether a usable key is currently selected.
    async fn has_selected_key(&self) -> bool;

    /// Ask the host to select a key. Returns once the prompt has been handled;
    /// a key is not guaranteed to be available afterwards.
    async fn open_select_key(&self);
}

/// Shared, swappable API key.
///
/// Cloned handles see the same key; the generative client reads it on every
/// request so a key selected at runtime takes effect immediately.
#[derive(Clone, Default)]
pub struct KeyRing {
    key: Arc<RwLock<Option<String>>>,
}

impl KeyRing {
    /// A key ring with nothing selected.
    pub fn new() -> Self {
        Self::default()
    }

    /// A key ring holding `key` (blank keys count as nothing selected).
    pub fn with_key(key: impl Into<String>) -> Self {
        Self {
            key: Arc::new(RwLock::new(normalize(key.into()))),
        }
    }

    /// A key ring seeded from the process environment.
    pub fn from_env() -> Self {
        Self {
            key: Arc::new(RwLock::new(key_from_env())),
        }
    }

    /// The selected key, if any.
    pub async fn current(&self) -> Option<String> {
        self.key.read().await.clone()
    }

    /// Select a new key. Returns whether a usable key is now selected.
    pub async fn select(&self, key: impl Into<String>) -> bool {
        let key = normalize(key.into());
        let selected = key.is_some();
        *self.key.write().await = key;
        selected
    }
}

#[async_trait]
impl CredentialGate for KeyRing {
    async fn has_selected_key(&self) -> bool {
        self.key.read().await.is_some()
    }

    async fn open_select_key(&self) {
        // Outside a browser host the prompt is the environment, re-read here.
        match key_from_env() {
            Some(key) => {
                *self.key.write().await = Some(key);
                info!("API key picked up from environment");
            }
            None => {
                warn!(
                    vars = ?API_KEY_ENV_VARS,
                    "No API key selected; set one via PUT /credential or the environment"
                );
            }
        }
    }
}

fn key_from_env() -> Option<String> {
    API_KEY_ENV_VARS
        .iter()
        .find_map(|var| env::var(var).ok().and_then(normalize))
}

fn normalize(key: String) -> Option<String> {
    let trimmed = key.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
