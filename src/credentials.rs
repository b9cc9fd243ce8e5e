//! Session credential handling.
//!
//! Workers share one [`CredentialManager`]. Reading the current token is
//! cheap and concurrent; refreshing is single-flight: the first worker to
//! observe a rejected token refreshes it, and workers that observed the same
//! token wait for that refresh instead of starting their own.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use crate::error::{Error, Result};

/// Opaque session credential
///
/// The token value is never printed by `Debug`.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    /// Wrap a raw token
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Raw token value
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// Source of session credentials
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Currently valid credential
    async fn current_token(&self) -> Result<Credential>;

    /// Obtain a fresh credential, failing with [`Error::Auth`] if none can be issued
    async fn refresh(&self) -> Result<Credential>;
}

/// Provider for a fixed, externally obtained token
///
/// It cannot be refreshed; a batch rejected with it fails without a retry.
#[derive(Clone, Debug)]
pub struct StaticCredential {
    credential: Credential,
}

impl StaticCredential {
    /// Create a provider that always returns `token`
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            credential: Credential::new(token),
        }
    }
}

#[async_trait]
impl CredentialProvider for StaticCredential {
    async fn current_token(&self) -> Result<Credential> {
        Ok(self.credential.clone())
    }

    async fn refresh(&self) -> Result<Credential> {
        Err(Error::Auth("static credential cannot be refreshed".to_string()))
    }
}

/// Credential together with the refresh generation it belongs to
#[derive(Clone, Debug)]
pub struct Versioned {
    /// The credential
    pub credential: Credential,
    /// Incremented by every successful refresh
    pub generation: u64,
}

/// Process-wide credential cache with single-flight refresh
pub struct CredentialManager {
    provider: Arc<dyn CredentialProvider>,
    current: RwLock<Option<Versioned>>,
    refresh_lock: Mutex<()>,
}

impl CredentialManager {
    /// Create a manager around `provider`; the first token is fetched lazily
    pub fn new(provider: Arc<dyn CredentialProvider>) -> Self {
        Self {
            provider,
            current: RwLock::new(None),
            refresh_lock: Mutex::new(()),
        }
    }

    /// Current credential and its generation
    pub async fn current(&self) -> Result<Versioned> {
        if let Some(current) = self.current.read().await.as_ref() {
            return Ok(current.clone());
        }

        // First use: serialize with refreshes so only one caller hits the provider
        let _guard = self.refresh_lock.lock().await;
        if let Some(current) = self.current.read().await.as_ref() {
            return Ok(current.clone());
        }
        let credential = self.provider.current_token().await?;
        let versioned = Versioned {
            credential,
            generation: 0,
        };
        *self.current.write().await = Some(versioned.clone());
        Ok(versioned)
    }

    /// Refresh the credential after `seen_generation` was rejected
    ///
    /// If another caller already refreshed past `seen_generation`, its result
    /// is returned without contacting the provider again.
    pub async fn refresh_after(&self, seen_generation: u64) -> Result<Versioned> {
        let _guard = self.refresh_lock.lock().await;

        if let Some(current) = self.current.read().await.as_ref()
            && current.generation > seen_generation
        {
            tracing::debug!(
                generation = current.generation,
                "Credential already refreshed by another worker"
            );
            return Ok(current.clone());
        }

        tracing::info!(generation = seen_generation, "Refreshing session credential");
        let credential = self.provider.refresh().await.inspect_err(|e| {
            tracing::error!(error = %e, "Credential refresh failed");
        })?;
        let versioned = Versioned {
            credential,
            generation: seen_generation + 1,
        };
        *self.current.write().await = Some(versioned.clone());
        Ok(versioned)
    }
}

impl std::fmt::Debug for CredentialManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialManager").finish_non_exhaustive()
    }
}
