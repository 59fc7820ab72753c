// Core domain types shared across the Fresco crates.
//
// These mirror the collaboration backend's REST payloads. Endpoints
// whose bodies are free-form (vote tallies, story drafts) stay as
// `serde_json::Value` rather than inventing a schema the server does
// not promise.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A user currently attached to a collaboration session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Participant {
    pub user_id: i64,
    pub username: String,
    /// Server-assigned color used to render this user's cursor.
    pub cursor_color: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub joined_at: Option<DateTime<Utc>>,
}

/// The session host as embedded in session detail payloads.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionHost {
    pub id: i64,
    pub username: String,
}

/// Parameters accepted by the session-creation endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreateSessionParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub canvas_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_participants: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_hours: Option<u32>,
}

/// A freshly created collaboration session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreatedSession {
    pub session_id: String,
    /// Short human-enterable code for joining without a link.
    pub join_code: String,
    pub canvas_name: String,
    pub invite_link: String,
    pub max_participants: u32,
    pub expires_at: DateTime<Utc>,
    pub websocket_url: String,
}

/// Full detail view of an existing session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionDetails {
    pub session_id: String,
    pub join_code: String,
    pub canvas_name: String,
    pub host: SessionHost,
    pub is_host: bool,
    pub max_participants: u32,
    pub participant_count: u32,
    pub can_join: bool,
    pub is_lobby_open: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub story_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub story_draft: Option<Value>,
    #[serde(default)]
    pub participants: Vec<Participant>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub websocket_url: String,
}

/// Sessions a user hosts or participates in.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct UserSessions {
    #[serde(default)]
    pub hosted_sessions: Vec<Value>,
    #[serde(default)]
    pub participated_sessions: Vec<Value>,
}

/// The shared story draft attached to a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DraftResponse {
    pub story_draft: Value,
}
