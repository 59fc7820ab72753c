// Inbound message envelope.
//
// The server relays peer operations verbatim and decorates them with
// sender metadata (`user_id`, `username`, ...), so the inbound side of
// the protocol is open-world: a tagged `type` plus arbitrary payload
// fields. Unknown kinds must survive parsing so new server features
// don't break old clients.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use thiserror::Error;

/// Kind tag reserved for wildcard subscriptions; never a wire message.
pub const WILDCARD_KIND: &str = "all";

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("malformed message: {0}")]
    Parse(#[from] serde_json::Error),
}

/// A single inbound protocol message: `type` tag plus payload fields.
///
/// Cloning an envelope deep-copies the payload tree, which is what the
/// dispatcher relies on for handler isolation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Envelope {
    /// An envelope with no payload, used for synthetic client-side
    /// signals such as `reconnection_failed`.
    pub fn empty(kind: MessageKind) -> Self {
        Self { kind: kind.to_string(), fields: Map::new() }
    }

    /// Parse a wire frame.
    pub fn parse(raw: &str) -> Result<Self, EnvelopeError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// The parsed message kind; unrecognized tags come back as
    /// [`MessageKind::Other`].
    pub fn message_kind(&self) -> MessageKind {
        MessageKind::parse(&self.kind)
    }

    /// Look up a payload field.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
}

/// Known message kinds exchanged over the collaboration socket.
///
/// Outbound kinds mirror [`super::ws::ClientMessage`]; the rest only
/// ever arrive from the server (`user_joined`, `user_left`, ...) or are
/// synthesized locally (`reconnection_failed`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Draw,
    Cursor,
    Clear,
    Transform,
    Delete,
    TextEdit,
    PageChange,
    PresenceUpdate,
    TitleEdit,
    KickUser,
    AddPage,
    DeletePage,
    GetPageViewers,
    CanvasSnapshot,
    RequestSync,
    CanvasState,
    UserJoined,
    UserLeft,
    ReconnectionFailed,
    /// Forward-compatibility escape hatch for kinds this client does
    /// not know about.
    Other(String),
}

impl MessageKind {
    pub fn parse(tag: &str) -> Self {
        match tag {
            "draw" => Self::Draw,
            "cursor" => Self::Cursor,
            "clear" => Self::Clear,
            "transform" => Self::Transform,
            "delete" => Self::Delete,
            "text_edit" => Self::TextEdit,
            "page_change" => Self::PageChange,
            "presence_update" => Self::PresenceUpdate,
            "title_edit" => Self::TitleEdit,
            "kick_user" => Self::KickUser,
            "add_page" => Self::AddPage,
            "delete_page" => Self::DeletePage,
            "get_page_viewers" => Self::GetPageViewers,
            "canvas_snapshot" => Self::CanvasSnapshot,
            "request_sync" => Self::RequestSync,
            "canvas_state" => Self::CanvasState,
            "user_joined" => Self::UserJoined,
            "user_left" => Self::UserLeft,
            "reconnection_failed" => Self::ReconnectionFailed,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Draw => "draw",
            Self::Cursor => "cursor",
            Self::Clear => "clear",
            Self::Transform => "transform",
            Self::Delete => "delete",
            Self::TextEdit => "text_edit",
            Self::PageChange => "page_change",
            Self::PresenceUpdate => "presence_update",
            Self::TitleEdit => "title_edit",
            Self::KickUser => "kick_user",
            Self::AddPage => "add_page",
            Self::DeletePage => "delete_page",
            Self::GetPageViewers => "get_page_viewers",
            Self::CanvasSnapshot => "canvas_snapshot",
            Self::RequestSync => "request_sync",
            Self::CanvasState => "canvas_state",
            Self::UserJoined => "user_joined",
            Self::UserLeft => "user_left",
            Self::ReconnectionFailed => "reconnection_failed",
            Self::Other(tag) => tag,
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
