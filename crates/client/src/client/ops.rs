// Outbound operation encoders.
//
// Collaboration operations are best-effort against an unreliable
// transport: when the session is not open the send is dropped with a
// diagnostic instead of an error, and the caller re-sends after
// reconnection if the operation still matters. Nothing here blocks on
// delivery.

use serde_json::Value;
use tracing::warn;

use fresco_common::protocol::ws::{ClientMessage, CursorPosition, PageAddress};

use super::{CollabClient, ConnectionState};
use crate::auth::token::AuthApi;
use crate::transport::Transport;

impl<T: Transport, A: AuthApi> CollabClient<T, A> {
    /// Send a pre-built protocol message. The escape hatch behind every
    /// encoder below; useful for experimental message kinds.
    pub async fn send_message(&mut self, message: &ClientMessage) {
        if self.state() != ConnectionState::Open {
            warn!(state = ?self.state(), "collaboration socket not open; dropping outbound message");
            return;
        }
        let frame = match message.to_wire() {
            Ok(frame) => frame,
            Err(error) => {
                warn!(%error, "failed to encode outbound message");
                return;
            }
        };
        if let Err(error) = self.transport.send(&frame).await {
            warn!(%error, "failed to write outbound message");
        }
    }

    /// Send a drawing operation, addressed so multi-page documents stay
    /// isolated.
    pub async fn send_drawing(&mut self, data: Value, page: PageAddress) {
        self.send_message(&ClientMessage::Draw { data, page }).await;
    }

    /// Send a raw cursor location. Callers are expected to rate-limit.
    pub async fn send_cursor_position(&mut self, x: f64, y: f64, page: PageAddress) {
        self.send_message(&ClientMessage::Cursor { position: CursorPosition { x, y }, page })
            .await;
    }

    /// Wipe the addressed canvas for every participant.
    pub async fn clear_canvas(&mut self, page: PageAddress) {
        self.send_message(&ClientMessage::Clear { page }).await;
    }

    pub async fn send_transform(&mut self, data: Value) {
        self.send_message(&ClientMessage::Transform { data }).await;
    }

    pub async fn send_delete(&mut self, data: Value) {
        self.send_message(&ClientMessage::Delete { data }).await;
    }

    /// Live text edit. Carries the page index as well so remote clients
    /// can map pages they know under a different local id.
    pub async fn send_text_edit(&mut self, page_id: u64, text: impl Into<String>, page_index: Option<u32>) {
        self.send_message(&ClientMessage::TextEdit { page_id, page_index, text: text.into() })
            .await;
    }

    pub async fn send_page_change(&mut self, page_number: u32) {
        self.send_message(&ClientMessage::PageChange { page_number }).await;
    }

    /// Presence beacon: cursor, active tool, optional activity label.
    pub async fn update_presence(
        &mut self,
        cursor_position: Option<CursorPosition>,
        current_tool: impl Into<String>,
        activity: Option<String>,
    ) {
        self.send_message(&ClientMessage::PresenceUpdate {
            cursor_position,
            current_tool: current_tool.into(),
            activity,
        })
        .await;
    }

    /// Live title edit. Blank titles are rejected locally so a stray
    /// empty input can never blank the title on every peer.
    pub async fn send_title_edit(&mut self, title: &str) {
        if title.trim().is_empty() {
            warn!("skipping empty title edit; peers keep the last known title");
            return;
        }
        self.send_message(&ClientMessage::TitleEdit { title: title.to_string() }).await;
    }

    /// Host-only: remove a participant over the live socket.
    pub async fn kick_user(&mut self, user_id: i64) {
        self.send_message(&ClientMessage::KickUser { user_id }).await;
    }

    pub async fn add_page(&mut self, page_data: Value, page_index: Option<u32>) {
        self.send_message(&ClientMessage::AddPage { page_data, page_index }).await;
    }

    pub async fn delete_page(&mut self, page_index: Option<u32>, page_id: Option<u64>) {
        self.send_message(&ClientMessage::DeletePage { page_index, page_id }).await;
    }

    /// Ask the server which users are viewing which pages.
    pub async fn request_page_viewers(&mut self) {
        self.send_message(&ClientMessage::GetPageViewers).await;
    }

    /// Upload a rasterized snapshot so the server can bootstrap late
    /// joiners and reconnecting peers.
    pub async fn send_canvas_snapshot(
        &mut self,
        page_id: impl Into<String>,
        is_cover_image: bool,
        canvas_data_url: impl Into<String>,
    ) {
        self.send_message(&ClientMessage::CanvasSnapshot {
            page_id: page_id.into(),
            is_cover_image,
            canvas_data_url: canvas_data_url.into(),
        })
        .await;
    }

    /// Ask peers for a full canvas sync. Send after `Reconnected`: the
    /// transport's message stream is ephemeral, so state missed while
    /// disconnected can only be recovered from a peer.
    pub async fn request_canvas_sync(&mut self, page: PageAddress) {
        self.send_message(&ClientMessage::RequestSync { page }).await;
    }

    /// Answer a peer's sync request with the full canvas state.
    pub async fn send_canvas_state(
        &mut self,
        canvas_data: Value,
        target_user_id: i64,
        page: PageAddress,
    ) {
        self.send_message(&ClientMessage::CanvasState { canvas_data, target_user_id, page }).await;
    }
}
