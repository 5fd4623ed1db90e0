//! Access-token contract consumed by the API client.
//!
//! Acquiring and refreshing tokens (OIDC login, refresh grants) belongs to
//! the host; the client only asks for the current token and reports when
//! the server rejected it.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use tracing::info;

use embaixada_common::Result;

/// Source of bearer tokens.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// A currently valid access token, or `None` when signed out.
    async fn access_token(&self) -> Result<Option<String>>;

    /// Called when the server answered 401.
    ///
    /// The host is expected to sign the user out.
    fn session_expired(&self);
}

/// Token provider holding a fixed token.
///
/// The token is dropped on the first 401 so later requests go out
/// unauthenticated until the host sets a new one.
#[derive(Debug, Default)]
pub struct StaticTokenProvider {
    token: RwLock<Option<String>>,
    expired: AtomicBool,
}

impl StaticTokenProvider {
    /// Create a provider with an optional initial token.
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: RwLock::new(token.filter(|t| !t.is_empty())),
            expired: AtomicBool::new(false),
        }
    }

    /// Read the token from an environment variable.
    pub fn from_env(var: &str) -> Self {
        Self::new(std::env::var(var).ok())
    }

    /// Replace the token after a fresh sign-in.
    pub async fn set_token(&self, token: impl Into<String>) {
        *self.token.write().await = Some(token.into());
        self.expired.store(false, Ordering::SeqCst);
    }

    /// Whether a 401 was seen since the last `set_token`.
    pub fn is_session_expired(&self) -> bool {
        self.expired.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn access_token(&self) -> Result<Option<String>> {
        if self.is_session_expired() {
            return Ok(None);
        }
        Ok(self.token.read().await.clone())
    }

    fn session_expired(&self) {
        if !self.expired.swap(true, Ordering::SeqCst) {
            info!("Session expired, discarding access token");
        }
    }
}
