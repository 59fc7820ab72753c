// Credential storage for the collaboration client.
//
// Tokens live in the OS keychain as a single serialized record. The
// store is a trait so the token manager and tests can run against an
// in-memory double. Session persistence (`crate::session`) is a
// separate, less-trusted store and never sees these values.

use serde::{Deserialize, Serialize};
use std::sync::Mutex;

use crate::error::StoreError;

const KEYRING_SERVICE: &str = "com.fresco.client";
const KEYRING_ACCOUNT: &str = "session_tokens";

/// The access/refresh token pair issued at sign-in.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthTokens {
    pub access_token: String,
    pub refresh_token: String,
}

/// Read/write access to the stored credential pair.
pub trait CredentialStore: Send + Sync {
    fn load(&self) -> Result<Option<AuthTokens>, StoreError>;
    fn store(&self, tokens: &AuthTokens) -> Result<(), StoreError>;
    fn clear(&self) -> Result<(), StoreError>;
}

fn validate(tokens: &AuthTokens) -> Result<(), StoreError> {
    if tokens.access_token.trim().is_empty() {
        return Err(StoreError::Invalid("access token must not be empty"));
    }
    if tokens.refresh_token.trim().is_empty() {
        return Err(StoreError::Invalid("refresh token must not be empty"));
    }
    Ok(())
}

// ── Keychain-backed store ──────────────────────────────────────────

/// Production store: one keychain entry holding the serialized pair.
pub struct KeyringCredentialStore {
    service: String,
    account: String,
}

impl KeyringCredentialStore {
    pub fn new() -> Self {
        Self { service: KEYRING_SERVICE.into(), account: KEYRING_ACCOUNT.into() }
    }

    fn entry(&self) -> Result<keyring::Entry, StoreError> {
        keyring::Entry::new(&self.service, &self.account)
            .map_err(|error| StoreError::Keychain(error.to_string()))
    }
}

impl Default for KeyringCredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialStore for KeyringCredentialStore {
    fn load(&self) -> Result<Option<AuthTokens>, StoreError> {
        match self.entry()?.get_password() {
            Ok(serialized) => Ok(Some(serde_json::from_str(&serialized)?)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(error) => Err(StoreError::Keychain(error.to_string())),
        }
    }

    fn store(&self, tokens: &AuthTokens) -> Result<(), StoreError> {
        validate(tokens)?;
        let serialized = serde_json::to_string(tokens)?;
        self.entry()?
            .set_password(&serialized)
            .map_err(|error| StoreError::Keychain(error.to_string()))
    }

    fn clear(&self) -> Result<(), StoreError> {
        match self.entry()?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(error) => Err(StoreError::Keychain(error.to_string())),
        }
    }
}

// ── In-memory store ────────────────────────────────────────────────

/// Volatile store for tests and embedders without a keychain.
#[derive(Default)]
pub struct MemoryCredentialStore {
    tokens: Mutex<Option<AuthTokens>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tokens(tokens: AuthTokens) -> Self {
        Self { tokens: Mutex::new(Some(tokens)) }
    }

    fn guard(&self) -> std::sync::MutexGuard<'_, Option<AuthTokens>> {
        self.tokens.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self) -> Result<Option<AuthTokens>, StoreError> {
        Ok(self.guard().clone())
    }

    fn store(&self, tokens: &AuthTokens) -> Result<(), StoreError> {
        validate(tokens)?;
        *self.guard() = Some(tokens.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        *self.guard() = None;
        Ok(())
    }
}
