// Error taxonomy for the collaboration client.
//
// Classification drives recovery: transient network failures are
// retried locally and never clear credentials; an authorization failure
// is terminal for the session and requires the user to sign in again.

use thiserror::Error;

/// Failures from the credential store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("keychain error: {0}")]
    Keychain(String),
    #[error("corrupt credential record: {0}")]
    Corrupt(#[from] serde_json::Error),
    #[error("{0}")]
    Invalid(&'static str),
}

/// Access-token resolution failures, classified by required recovery.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No credentials are stored at all.
    #[error("not authenticated")]
    NotAuthenticated,
    /// The refresh credential itself was rejected. Stored credentials
    /// have been cleared; the user must re-authenticate.
    #[error("refresh credential rejected; re-authentication required")]
    AuthRequired,
    /// Offline, timed out, or the auth endpoint answered with a server
    /// error. Credentials are left intact and the call can be retried.
    #[error("token refresh failed transiently: {0}")]
    Network(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Transport-level failures.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("websocket failure: {0}")]
    WebSocket(String),
    #[error("transport is not open")]
    NotOpen,
}

/// Failures while establishing a collaboration connection.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("collaboration origin rejected: {0}")]
    InvalidOrigin(String),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// One-shot REST action failures.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("not authenticated")]
    NotAuthenticated,
    #[error("access token rejected")]
    Unauthorized,
    #[error("request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("unexpected status {status}: {message}")]
    Status { status: u16, message: String },
    #[error(transparent)]
    Store(#[from] StoreError),
}
