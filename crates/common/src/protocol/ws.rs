// Outbound message types for the fresco-collab.v1 WebSocket protocol.
//
// Each variant serializes to a flat JSON object tagged by `type`, which
// is what the collaboration backend expects on the wire. Inbound traffic
// is open-world (peers and the server attach extra fields) and is handled
// by `protocol::envelope` instead.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Canvas addressing for multi-page documents.
///
/// Every drawing-surface operation carries one of these so concurrent
/// edits on different pages (or the cover image) stay isolated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageAddress {
    /// Client-local page identifier, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_id: Option<String>,
    /// Zero-based page index, to help remote clients map pages that
    /// have not been assigned ids yet.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_index: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_cover_image: Option<bool>,
}

impl PageAddress {
    pub fn page(page_id: impl Into<String>, page_index: u32) -> Self {
        Self {
            page_id: Some(page_id.into()),
            page_index: Some(page_index),
            is_cover_image: Some(false),
        }
    }

    pub fn cover() -> Self {
        Self { page_id: None, page_index: None, is_cover_image: Some(true) }
    }
}

/// A cursor location in canvas coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CursorPosition {
    pub x: f64,
    pub y: f64,
}

/// All client -> server message types in the fresco-collab.v1 protocol.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// A drawing operation (stroke, shape, ...), addressed to a page.
    Draw {
        data: Value,
        #[serde(flatten)]
        page: PageAddress,
    },

    /// Raw cursor location update. Rate limiting is the caller's job.
    Cursor {
        position: CursorPosition,
        #[serde(flatten)]
        page: PageAddress,
    },

    /// Wipe the addressed canvas.
    Clear {
        #[serde(flatten)]
        page: PageAddress,
    },

    /// Move/scale/rotate an existing canvas object.
    Transform { data: Value },

    /// Remove an existing canvas object.
    Delete { data: Value },

    /// Live text edit on a page. Carries both the local page id and the
    /// index so remote clients can map the page either way.
    TextEdit {
        page_id: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        page_index: Option<u32>,
        text: String,
    },

    /// The local user navigated to another page.
    PageChange { page_number: u32 },

    /// Presence beacon: cursor, active tool, optional activity label.
    PresenceUpdate {
        cursor_position: Option<CursorPosition>,
        current_tool: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        activity: Option<String>,
    },

    /// Live title edit. Empty titles are rejected client-side and never
    /// reach the wire.
    TitleEdit { title: String },

    /// Host-only: remove a participant from the session.
    KickUser { user_id: i64 },

    /// Insert a new page.
    AddPage {
        page_data: Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        page_index: Option<u32>,
    },

    /// Remove a page.
    DeletePage {
        #[serde(skip_serializing_if = "Option::is_none")]
        page_index: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        page_id: Option<u64>,
    },

    /// Ask the server which users are viewing which pages.
    GetPageViewers,

    /// Upload a rasterized canvas snapshot so late joiners and
    /// reconnecting peers can be bootstrapped server-side.
    CanvasSnapshot {
        page_id: String,
        is_cover_image: bool,
        canvas_data_url: String,
    },

    /// Ask peers for a full canvas sync. Sent after a successful
    /// reconnection, when operations were missed while disconnected.
    RequestSync {
        #[serde(flatten)]
        page: PageAddress,
    },

    /// Full canvas state addressed to one peer, answering `RequestSync`.
    CanvasState {
        canvas_data: Value,
        target_user_id: i64,
        #[serde(flatten)]
        page: PageAddress,
    },
}

impl ClientMessage {
    /// Serialize to the wire representation.
    pub fn to_wire(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
