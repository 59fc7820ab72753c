// Production WebSocket transport over tokio-tungstenite.

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

use fresco_common::protocol::close::ABNORMAL_CLOSURE;

use super::{redact_token, CloseReason, Incoming, Transport};
use crate::error::TransportError;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Holds at most one live socket, replaced across reconnections.
#[derive(Default)]
pub struct WsTransport {
    socket: Option<Socket>,
}

impl WsTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Transport for WsTransport {
    async fn open(&mut self, url: &str) -> Result<(), TransportError> {
        debug!(url = %redact_token(url), "opening collaboration socket");
        let (socket, _response) = connect_async(url)
            .await
            .map_err(|error| TransportError::WebSocket(error.to_string()))?;
        self.socket = Some(socket);
        Ok(())
    }

    async fn send(&mut self, frame: &str) -> Result<(), TransportError> {
        let socket = self.socket.as_mut().ok_or(TransportError::NotOpen)?;
        socket
            .send(Message::Text(frame.into()))
            .await
            .map_err(|error| TransportError::WebSocket(error.to_string()))
    }

    async fn recv(&mut self) -> Result<Incoming, TransportError> {
        loop {
            let message = {
                let socket = self.socket.as_mut().ok_or(TransportError::NotOpen)?;
                socket.next().await
            };
            match message {
                Some(Ok(Message::Text(text))) => return Ok(Incoming::Frame(text.as_str().to_owned())),
                Some(Ok(Message::Close(frame))) => {
                    self.socket = None;
                    let reason = match frame {
                        Some(frame) => CloseReason {
                            code: frame.code.into(),
                            reason: frame.reason.as_str().to_owned(),
                        },
                        None => CloseReason { code: ABNORMAL_CLOSURE, reason: String::new() },
                    };
                    return Ok(Incoming::Closed(reason));
                }
                // Pings are answered by tungstenite itself; binary
                // frames are not part of this protocol.
                Some(Ok(_)) => continue,
                Some(Err(error)) => {
                    self.socket = None;
                    return Err(TransportError::WebSocket(error.to_string()));
                }
                None => {
                    self.socket = None;
                    return Ok(Incoming::Closed(CloseReason {
                        code: ABNORMAL_CLOSURE,
                        reason: "stream ended without a close frame".into(),
                    }));
                }
            }
        }
    }

    async fn close(&mut self, code: u16) {
        if let Some(mut socket) = self.socket.take() {
            let frame = CloseFrame { code: CloseCode::from(code), reason: "".into() };
            if let Err(error) = socket.close(Some(frame)).await {
                debug!(%error, "error while closing collaboration socket");
            }
        }
    }
}
