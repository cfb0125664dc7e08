//! Short-lived auth tokens signed from the device key.
//!
//! `TokenCache` keeps the last signed JWT and re-signs only when it has
//! expired, when a refresh is forced, or when the configured lifetime is
//! zero. `CredentialsProvider` is the cloneable handle the transport calls
//! on every physical (re)connect.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

use crate::credentials::{Claims, Credentials};
use crate::error::{CredentialError, CredentialResult};

/// Username sent with every connect. The broker ignores it; the JWT
/// password carries the device's authentication.
pub const UNUSED_USERNAME: &str = "unused";

/// `exp` claim offset used when the configured lifetime is zero.
/// Such tokens are never reused, but the broker still needs an expiry in
/// the future to accept them.
const ZERO_LIFETIME_VALIDITY: TimeDelta = TimeDelta::minutes(1);

/// A signed JWT and its validity window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub value: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Caches the last signed token for a device.
pub struct TokenCache {
    credentials: Arc<Credentials>,
    audience: String,
    lifetime: Duration,
    cached: Mutex<Option<Token>>,
}

impl TokenCache {
    /// `lifetime` of zero disables caching: every request signs a new token.
    pub fn new(credentials: Arc<Credentials>, audience: impl Into<String>, lifetime: Duration) -> Self {
        Self {
            credentials,
            audience: audience.into(),
            lifetime,
            cached: Mutex::new(None),
        }
    }

    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    /// Return the cached token if still valid, otherwise sign a new one.
    pub fn token(&self, force_refresh: bool) -> CredentialResult<Token> {
        self.token_at(Utc::now(), force_refresh)
    }

    /// Username/password pair for the broker connect packet.
    pub fn credentials(&self, force_refresh: bool) -> CredentialResult<(String, String)> {
        let token = self.token(force_refresh)?;
        Ok((UNUSED_USERNAME.to_string(), token.value))
    }

    /// The currently cached token, if any.
    pub fn cached(&self) -> Option<Token> {
        self.cached
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn token_at(&self, now: DateTime<Utc>, force_refresh: bool) -> CredentialResult<Token> {
        let lifetime = TimeDelta::from_std(self.lifetime)
            .map_err(|e| CredentialError::Signing(format!("token lifetime out of range: {e}")))?;

        if lifetime.is_zero() {
            return self.sign(now, ZERO_LIFETIME_VALIDITY);
        }

        let mut cached = self.cached.lock().unwrap_or_else(PoisonError::into_inner);
        if !force_refresh {
            if let Some(token) = cached.as_ref().filter(|t| now < t.issued_at + lifetime) {
                return Ok(token.clone());
            }
        }

        let token = self.sign(now, lifetime)?;
        tracing::debug!(
            audience = %self.audience,
            expires_at = %token.expires_at,
            forced = force_refresh,
            "auth token refreshed"
        );
        *cached = Some(token.clone());
        Ok(token)
    }

    fn sign(&self, now: DateTime<Utc>, validity: TimeDelta) -> CredentialResult<Token> {
        let expires_at = now + validity;
        let claims = Claims {
            aud: self.audience.clone(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };
        let value = self.credentials.sign(&claims)?;
        Ok(Token {
            value,
            issued_at: now,
            expires_at,
        })
    }
}

impl std::fmt::Debug for TokenCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCache")
            .field("audience", &self.audience)
            .field("lifetime", &self.lifetime)
            .finish_non_exhaustive()
    }
}

/// Hands fresh broker credentials to the transport.
///
/// Cheap to clone and safe to call from several tasks at once.
#[derive(Clone, Debug)]
pub struct CredentialsProvider {
    cache: Arc<TokenCache>,
}

impl CredentialsProvider {
    pub fn new(cache: Arc<TokenCache>) -> Self {
        Self { cache }
    }

    /// Username/password for the next connect attempt.
    pub fn credentials(&self) -> CredentialResult<(String, String)> {
        self.cache.credentials(false)
    }

    pub fn cache(&self) -> &TokenCache {
        &self.cache
    }
}
