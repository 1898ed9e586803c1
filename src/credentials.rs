//! Bearer token handling
//!
//! One token is shared by every concurrent session. It is only refreshed
//! when it is about to expire, never per request.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, Utc};
use std::sync::Mutex;
use tracing::info;

/// Tokens expiring within this margin are refreshed before use
const REFRESH_MARGIN_SECS: i64 = 10;

/// A bearer token and the instant it stops being valid
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub token: String,
    /// `None` means the token never expires
    pub expires_at: Option<DateTime<Utc>>,
}

impl Credential {
    pub fn new(token: impl Into<String>, expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            token: token.into(),
            expires_at,
        }
    }

    /// Whether the token expires within the refresh margin of `now`
    pub fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at - now < Duration::seconds(REFRESH_MARGIN_SECS),
            None => false,
        }
    }
}

/// Source of fresh credentials
pub trait CredentialProvider: Send + Sync {
    fn fetch(&self) -> Result<Credential>;
}

/// Token passed on the command line; handed back unchanged
pub struct StaticCredential {
    credential: Credential,
}

impl StaticCredential {
    pub fn new(token: impl Into<String>, expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            credential: Credential::new(token, expires_at),
        }
    }
}

impl CredentialProvider for StaticCredential {
    fn fetch(&self) -> Result<Credential> {
        Ok(self.credential.clone())
    }
}

/// Caches the current credential and refreshes it near expiry
pub struct CredentialCache {
    provider: Box<dyn CredentialProvider>,
    current: Mutex<Option<Credential>>,
}

impl CredentialCache {
    pub fn new(provider: Box<dyn CredentialProvider>) -> Self {
        Self {
            provider,
            current: Mutex::new(None),
        }
    }

    /// Current token, refreshed first if missing or about to expire
    pub fn current(&self) -> Result<Credential> {
        self.current_at(Utc::now())
    }

    pub fn current_at(&self, now: DateTime<Utc>) -> Result<Credential> {
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(credential) = current.as_ref() {
            if !credential.needs_refresh(now) {
                return Ok(credential.clone());
            }
            info!("Token expires soon, requesting a new one");
        }

        let fresh = self
            .provider
            .fetch()
            .context("Failed to obtain access token")?;
        if fresh.needs_refresh(now) {
            bail!("Provider returned an expired token");
        }
        *current = Some(fresh.clone());
        Ok(fresh)
    }
}
