//! Shared playback session state and client presence models
//!
//! These are the in-memory structures behind the sync hub. All wire
//! serialization is camelCase JSON; every connected client dialect (web UI,
//! desktop, VR adapters) reads the same `sync:state` shape.

use serde::{Deserialize, Serialize};

/// Session id used when a client does not name one
pub const DEFAULT_SESSION: &str = "default";

/// Authoritative playback cursor for one session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub media_id: Option<String>,
    pub time_ms: i64,
    pub paused: bool,
    pub fps: f64,
    pub frame: i64,
    pub from_client_id: String,
    /// Server wall time of the last committed update, epoch ms. Monotonic
    /// per session.
    pub updated_at: i64,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            media_id: None,
            time_ms: 0,
            paused: true,
            fps: 30.0,
            frame: 0,
            from_client_id: String::new(),
            updated_at: 0,
        }
    }
}

/// Ephemeral coordinated-start data distributed alongside a session state.
///
/// Cleared whenever the session pauses or an unpaused update omits `playAt`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayAtEphemeral {
    pub play_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub play_at_local_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub captured_at_local_ms: Option<i64>,
}

/// Session state as seen on the wire: stored state plus ephemerals and,
/// for targeted messages, the seek-handshake passthrough fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStateView {
    #[serde(flatten)]
    pub state: SessionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub play_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub play_at_local_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub captured_at_local_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub open_in_ui: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seek_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seek_phase: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seek_want_play: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seek_target_client_id: Option<String>,
}

impl SessionStateView {
    #[must_use]
    pub fn new(state: SessionState, ephemeral: Option<&PlayAtEphemeral>) -> Self {
        Self {
            state,
            play_at: ephemeral.map(|e| e.play_at.clone()),
            play_at_local_ms: ephemeral.and_then(|e| e.play_at_local_ms),
            captured_at_local_ms: ephemeral.and_then(|e| e.captured_at_local_ms),
            open_in_ui: None,
            seek_token: None,
            seek_phase: None,
            seek_want_play: None,
            seek_target_client_id: None,
        }
    }
}

/// A connected client, possibly holding several live sockets
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientPresence {
    pub client_id: String,
    pub user_agent: String,
    pub ip_address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ui_view: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ui_media_id: Option<String>,
    pub connected_at: i64,
}

/// Per-viewer resume cursor, keyed by (client, media). Not broadcast.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerClientPlayback {
    pub time_ms: i64,
    pub fps: f64,
    pub frame: i64,
    pub updated_at: i64,
}

/// A validated request to move a session's playback cursor
#[derive(Debug, Clone, Default)]
pub struct SyncUpdate {
    pub session_id: String,
    pub client_id: String,
    pub media_id: Option<String>,
    pub time_ms: i64,
    pub paused: bool,
    pub fps: f64,
    pub frame: i64,
    pub play_at: Option<String>,
    pub play_at_local_ms: Option<i64>,
    pub captured_at_local_ms: Option<i64>,
}

/// The `sync:state` frame fanned out to every connected socket
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateBroadcast {
    #[serde(rename = "type")]
    pub message_type: String,
    pub state: SessionStateView,
    pub clients: Vec<ClientPresence>,
}

impl StateBroadcast {
    #[must_use]
    pub fn new(state: SessionStateView, clients: Vec<ClientPresence>) -> Self {
        Self {
            message_type: "sync:state".to_string(),
            state,
            clients,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_state_is_paused_at_zero() {
        let state = SessionState::default();
        assert!(state.paused);
        assert_eq!(state.time_ms, 0);
        assert_eq!(state.fps, 30.0);
        assert_eq!(state.media_id, None);
        assert_eq!(state.from_client_id, "");
    }

    #[test]
    fn test_view_serializes_flat_camel_case() {
        let view = SessionStateView::new(SessionState::default(), None);
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["mediaId"], serde_json::Value::Null);
        assert_eq!(json["timeMs"], 0);
        assert_eq!(json["paused"], true);
        // Absent ephemerals are omitted entirely
        assert!(json.get("playAt").is_none());
        assert!(json.get("seekToken").is_none());
    }

    #[test]
    fn test_view_carries_ephemerals() {
        let ephemeral = PlayAtEphemeral {
            play_at: "2026-01-01T00:00:00.000Z".to_string(),
            play_at_local_ms: Some(1_700_000_000_000),
            captured_at_local_ms: None,
        };
        let view = SessionStateView::new(SessionState::default(), Some(&ephemeral));
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["playAt"], "2026-01-01T00:00:00.000Z");
        assert_eq!(json["playAtLocalMs"], 1_700_000_000_000_i64);
        assert!(json.get("capturedAtLocalMs").is_none());
    }

    #[test]
    fn test_broadcast_frame_type_tag() {
        let frame = StateBroadcast::new(SessionStateView::new(SessionState::default(), None), vec![]);
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "sync:state");
        assert!(json["clients"].as_array().unwrap().is_empty());
    }
}
