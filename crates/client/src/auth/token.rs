// Access-token lifecycle: expiry inspection and proactive refresh.
//
// The client never assumes a fixed token lifetime; it reads the `exp`
// claim embedded in the token itself and refreshes inside a 60-second
// leeway window, before the backend would reject the token
// mid-handshake. Tokens that cannot be decoded count as expired.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::auth::store::{AuthTokens, CredentialStore};
use crate::error::AuthError;

/// Refresh this long before the declared expiry.
pub const EXPIRY_LEEWAY_SECONDS: i64 = 60;

#[derive(Debug, Deserialize)]
struct TokenClaims {
    exp: i64,
}

/// The `exp` claim of a JWT-style token, if it can be decoded.
pub fn decoded_expiry(token: &str) -> Option<i64> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return None;
    }
    let payload = URL_SAFE_NO_PAD.decode(parts[1]).ok()?;
    let claims: TokenClaims = serde_json::from_slice(&payload).ok()?;
    Some(claims.exp)
}

/// Whether a token is expired or inside the refresh leeway window.
/// Undecodable tokens are treated as expired.
pub fn is_expired(token: &str) -> bool {
    is_expired_at(token, unix_now())
}

fn is_expired_at(token: &str, now: i64) -> bool {
    match decoded_expiry(token) {
        Some(exp) => now >= exp - EXPIRY_LEEWAY_SECONDS,
        None => true,
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(i64::MAX)
}

// ── Refresh endpoint abstraction ───────────────────────────────────

/// The slice of the authentication backend needed for refresh. The
/// production implementation is `crate::rest::RestAuthApi`.
pub trait AuthApi: Send {
    /// Exchange a refresh credential for a new access token.
    ///
    /// Implementations classify failures: a rejected credential is
    /// [`AuthError::AuthRequired`], connectivity loss and server errors
    /// are [`AuthError::Network`].
    fn refresh(
        &self,
        refresh_token: &str,
    ) -> impl std::future::Future<Output = Result<String, AuthError>> + Send;
}

// ── Token manager ──────────────────────────────────────────────────

/// Owns the refresh flow over a credential store.
pub struct TokenManager<A: AuthApi> {
    credentials: Arc<dyn CredentialStore>,
    auth: A,
}

impl<A: AuthApi> TokenManager<A> {
    pub fn new(credentials: Arc<dyn CredentialStore>, auth: A) -> Self {
        Self { credentials, auth }
    }

    pub fn credentials(&self) -> Arc<dyn CredentialStore> {
        Arc::clone(&self.credentials)
    }

    /// Resolve an access token that will outlive the leeway window,
    /// refreshing proactively when the stored one is stale.
    pub async fn access_token(&self) -> Result<String, AuthError> {
        let tokens = self.credentials.load()?.ok_or(AuthError::NotAuthenticated)?;
        if !is_expired(&tokens.access_token) {
            return Ok(tokens.access_token);
        }
        debug!("access token expired or expiring soon; refreshing before use");
        self.refresh_with(tokens).await
    }

    /// Force a refresh regardless of the current token's expiry.
    pub async fn refresh(&self) -> Result<String, AuthError> {
        let tokens = self.credentials.load()?.ok_or(AuthError::NotAuthenticated)?;
        self.refresh_with(tokens).await
    }

    async fn refresh_with(&self, tokens: AuthTokens) -> Result<String, AuthError> {
        match self.auth.refresh(&tokens.refresh_token).await {
            Ok(access_token) => {
                self.credentials.store(&AuthTokens {
                    access_token: access_token.clone(),
                    refresh_token: tokens.refresh_token,
                })?;
                info!("access token refreshed");
                Ok(access_token)
            }
            Err(AuthError::AuthRequired) => {
                warn!("refresh credential rejected; clearing stored credentials");
                if let Err(error) = self.credentials.clear() {
                    warn!(%error, "failed to clear credentials after rejected refresh");
                }
                Err(AuthError::AuthRequired)
            }
            // Transient failures leave credentials intact: losing the
            // network must never log the user out.
            Err(error) => Err(error),
        }
    }
}
