// Transport abstraction for the collaboration socket.
//
// The client is generic over this trait so unit tests can script a
// transport; the production implementation (`ws`) speaks WebSocket via
// tokio-tungstenite.

pub mod ws;

use fresco_common::protocol::close::is_clean_close;

use crate::error::TransportError;

/// Why the transport closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    pub code: u16,
    pub reason: String,
}

impl CloseReason {
    /// Whether the closure was an intentional shutdown (no
    /// reconnection).
    pub fn is_clean(&self) -> bool {
        is_clean_close(self.code)
    }
}

/// One inbound transport event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    /// A text frame carrying one protocol message.
    Frame(String),
    /// The socket closed; the code decides whether reconnection runs.
    Closed(CloseReason),
}

/// A duplex text-frame transport.
///
/// Exactly one socket is live per instance; `open` on a live transport
/// is a caller bug that the connection controller's guard flags
/// prevent.
pub trait Transport: Send {
    async fn open(&mut self, url: &str) -> Result<(), TransportError>;
    async fn send(&mut self, frame: &str) -> Result<(), TransportError>;
    async fn recv(&mut self) -> Result<Incoming, TransportError>;
    /// Best-effort close with the given code.
    async fn close(&mut self, code: u16);
}

/// Strip the access token from a socket URL before it reaches a log.
pub(crate) fn redact_token(url: &str) -> String {
    match url.find("token=") {
        Some(index) => {
            let value_start = index + "token=".len();
            let value_end = url[value_start..]
                .find('&')
                .map(|offset| value_start + offset)
                .unwrap_or(url.len());
            format!("{}***{}", &url[..value_start], &url[value_end..])
        }
        None => url.to_string(),
    }
}
