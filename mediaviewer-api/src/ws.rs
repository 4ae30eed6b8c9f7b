//! WebSocket hub endpoint
//!
//! One socket per connection; text-JSON frames. Clients introduce themselves
//! with `sync:hello`, publish cursor moves with `sync:update` (optionally
//! targeted at a single client), surface UI presence with `client:status`
//! and measure RTT with `ws:ping`. Every connected socket receives
//! `sync:state` fan-outs; malformed inbound frames are dropped silently.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        ConnectInfo, State, WebSocketUpgrade,
    },
    http::{header, HeaderMap},
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Deserializer};
use std::net::SocketAddr;
use tokio::sync::mpsc;
use tracing::{debug, info};

use mediaviewer_core::models::{SessionState, SessionStateView, StateBroadcast, DEFAULT_SESSION};
use mediaviewer_core::sync::SyncStore;

use crate::http::sync::SyncUpdateBody;
use crate::http::{client_ip, AppState};

/// Distinguishes an absent field from an explicit `null`
fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Deserialize::deserialize(deserializer).map(Some)
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ClientMessage {
    #[serde(rename = "sync:hello")]
    #[serde(rename_all = "camelCase")]
    Hello {
        client_id: String,
        session_id: Option<String>,
    },

    #[serde(rename = "client:status")]
    #[serde(rename_all = "camelCase")]
    Status {
        #[serde(default, deserialize_with = "double_option")]
        ui_view: Option<Option<String>>,
        #[serde(default, deserialize_with = "double_option")]
        media_id: Option<Option<String>>,
    },

    #[serde(rename = "sync:update")]
    Update(SyncUpdateBody),

    #[serde(rename = "ws:ping")]
    #[serde(rename_all = "camelCase")]
    Ping {
        #[serde(default)]
        nonce: Option<serde_json::Value>,
        #[serde(default)]
        client_sent_at: Option<i64>,
    },
}

pub async fn ws_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let ip = client_ip(&headers, connect_info.as_ref().map(|c| &c.0));

    ws.on_upgrade(move |socket| handle_socket(socket, state, user_agent, ip))
}

async fn handle_socket(socket: WebSocket, state: AppState, user_agent: String, ip: String) {
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    // Greeting with server time, before any registration
    let greeting = serde_json::json!({
        "type": "hello",
        "serverTimeMs": chrono::Utc::now().timestamp_millis(),
    });
    let _ = tx.send(greeting.to_string());

    let (mut sink, mut receiver) = socket.split();

    // Writer task: drains the channel into the socket. A failed write ends
    // the task; the read loop observes the closed connection independently.
    let writer = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    // (client_id, socket_id, session_id) once the socket has said hello
    let mut registration: Option<(String, String, String)> = None;

    while let Some(message) = receiver.next().await {
        let text = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => continue, // binary/ping/pong frames are not part of the protocol
        };

        let Ok(parsed) = serde_json::from_str::<ClientMessage>(&text) else {
            debug!(ip = %ip, "Dropping malformed WebSocket frame");
            continue;
        };

        match parsed {
            ClientMessage::Hello {
                client_id,
                session_id,
            } => {
                if client_id.is_empty() {
                    continue;
                }
                let session = session_id.unwrap_or_else(|| DEFAULT_SESSION.to_string());
                registration = match registration.take() {
                    None => {
                        state.store.upsert_presence(&client_id, &user_agent, &ip);
                        let socket_id = state.store.attach_socket(&client_id, tx.clone());
                        info!(client_id = %client_id, ip = %ip, session = %session, "WebSocket client registered");
                        Some((client_id, socket_id, session.clone()))
                    }
                    Some((current, socket_id, _)) if current != client_id => {
                        // Same socket, new identity
                        state.store.rekey_socket(&current, &socket_id, &client_id);
                        state.store.upsert_presence(&client_id, &user_agent, &ip);
                        Some((client_id, socket_id, session.clone()))
                    }
                    // Repeated hello may still move the socket to another session
                    Some((current, socket_id, _)) => Some((current, socket_id, session.clone())),
                };
                state.store.broadcast_session(&session);
            }

            ClientMessage::Status { ui_view, media_id } => {
                let Some((client_id, _, session)) = &registration else {
                    continue;
                };
                state.store.set_ui_status(client_id, ui_view, media_id);
                state.store.broadcast_session(session);
            }

            ClientMessage::Update(body) => {
                handle_update(&state.store, body);
            }

            ClientMessage::Ping {
                nonce,
                client_sent_at,
            } => {
                let pong = serde_json::json!({
                    "type": "ws:pong",
                    "nonce": nonce,
                    "clientSentAt": client_sent_at,
                    "serverReceivedAt": chrono::Utc::now().timestamp_millis(),
                });
                let _ = tx.send(pong.to_string());
            }
        }
    }

    if let Some((client_id, socket_id, session)) = registration {
        let was_last = state.store.detach_socket(&client_id, &socket_id);
        info!(client_id = %client_id, was_last, "WebSocket client disconnected");
        // Presence changed either way; let everyone see the new roster
        state.store.broadcast_session(&session);
    }

    writer.abort();
}

/// Route one `sync:update`: targeted messages are unicast without touching
/// session state; everything else commits and broadcasts.
pub(crate) fn handle_update(store: &SyncStore, body: SyncUpdateBody) {
    if body.client_id.is_empty() || body.media_id.as_deref() == Some("") {
        return; // silently dropped, per the socket error contract
    }

    let Some(target) = body.to_client_id.clone() else {
        let session = body.session();
        match store.upsert_session(body.into_update()) {
            Ok(_) => {
                store.broadcast_session(&session);
            }
            Err(e) => {
                debug!(error = %e, "Dropping invalid sync:update");
            }
        }
        return;
    };

    // Targeted: a sync:state-shaped frame for one client, no commit.
    // Pause clears the schedule in this direction too.
    let scheduled = !body.paused;
    let view = SessionStateView {
        state: SessionState {
            media_id: body.media_id,
            time_ms: body.time_ms.max(0),
            paused: body.paused,
            fps: if body.fps >= 1.0 { body.fps } else { 1.0 },
            frame: body.frame.max(0),
            from_client_id: body.client_id,
            updated_at: chrono::Utc::now().timestamp_millis(),
        },
        play_at: if scheduled { body.play_at } else { None },
        play_at_local_ms: if scheduled { body.play_at_local_ms } else { None },
        captured_at_local_ms: if scheduled {
            body.captured_at_local_ms
        } else {
            None
        },
        open_in_ui: body.open_in_ui,
        seek_token: body.seek_token,
        seek_phase: body.seek_phase,
        seek_want_play: body.seek_want_play,
        seek_target_client_id: body.seek_target_client_id,
    };
    let frame = StateBroadcast::new(view, store.clients());
    store.unicast_to_client(&target, &frame);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hello() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"sync:hello","clientId":"A","sessionId":"s1"}"#)
                .unwrap();
        assert!(matches!(
            msg,
            ClientMessage::Hello { client_id, session_id }
                if client_id == "A" && session_id.as_deref() == Some("s1")
        ));
    }

    #[test]
    fn test_parse_status_distinguishes_null_from_absent() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"client:status","mediaId":null}"#).unwrap();
        let ClientMessage::Status { ui_view, media_id } = msg else {
            panic!("wrong variant");
        };
        assert_eq!(media_id, Some(None)); // explicit clear
        assert_eq!(ui_view, None); // untouched

        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"client:status","uiView":"library"}"#).unwrap();
        let ClientMessage::Status { ui_view, .. } = msg else {
            panic!("wrong variant");
        };
        assert_eq!(ui_view, Some(Some("library".to_string())));
    }

    #[test]
    fn test_parse_update_variant() {
        let msg: ClientMessage = serde_json::from_str(
            r#"{"type":"sync:update","clientId":"A","mediaId":"m1","timeMs":12345,"paused":false,"fps":30,"frame":370}"#,
        )
        .unwrap();
        let ClientMessage::Update(body) = msg else {
            panic!("wrong variant");
        };
        assert_eq!(body.time_ms, 12_345);
        assert!(!body.paused);
    }

    #[test]
    fn test_unknown_type_fails_parse() {
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"sync:unknown"}"#).is_err());
        assert!(serde_json::from_str::<ClientMessage>("not json").is_err());
    }

    #[tokio::test]
    async fn test_update_commits_and_broadcasts() {
        let store = SyncStore::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        store.upsert_presence("B", "ua", "1.1.1.1");
        store.attach_socket("B", tx);

        let body: SyncUpdateBody = serde_json::from_str(
            r#"{"clientId":"A","mediaId":"m1","timeMs":12345,"paused":false,"fps":30,"frame":370}"#,
        )
        .unwrap();
        handle_update(&store, body);

        let payload = rx.recv().await.unwrap();
        let json: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(json["state"]["timeMs"], 12_345);
        assert_eq!(json["state"]["paused"], false);
        assert_eq!(json["state"]["fromClientId"], "A");

        assert_eq!(store.get_session(DEFAULT_SESSION).state.time_ms, 12_345);
    }

    #[tokio::test]
    async fn test_targeted_update_unicasts_without_commit() {
        let store = SyncStore::new();

        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        store.upsert_presence("A", "ua", "1.1.1.1");
        store.attach_socket("A", tx_a);
        store.upsert_presence("B", "ua", "2.2.2.2");
        store.attach_socket("B", tx_b);

        // Seed server state first
        let seed: SyncUpdateBody = serde_json::from_str(
            r#"{"clientId":"A","mediaId":"m1","timeMs":12345,"paused":false,"fps":30,"frame":370}"#,
        )
        .unwrap();
        handle_update(&store, seed);
        rx_a.recv().await.unwrap();
        rx_b.recv().await.unwrap();

        // B asks A (and only A) to prepare a seek
        let targeted: SyncUpdateBody = serde_json::from_str(
            r#"{"clientId":"B","toClientId":"A","mediaId":"m1","timeMs":60000,
                "paused":false,"fps":30,"frame":1800,"seekToken":"t1","seekPhase":"prepare"}"#,
        )
        .unwrap();
        handle_update(&store, targeted);

        let payload = rx_a.recv().await.unwrap();
        let json: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(json["type"], "sync:state");
        assert_eq!(json["state"]["timeMs"], 60_000);
        assert_eq!(json["state"]["fromClientId"], "B");
        assert_eq!(json["state"]["seekToken"], "t1");
        assert_eq!(json["state"]["seekPhase"], "prepare");

        // No broadcast to anyone else, and the committed state is untouched
        assert!(rx_b.try_recv().is_err());
        assert_eq!(store.get_session(DEFAULT_SESSION).state.time_ms, 12_345);
    }

    #[tokio::test]
    async fn test_update_with_empty_client_is_dropped() {
        let store = SyncStore::new();
        let body: SyncUpdateBody =
            serde_json::from_str(r#"{"clientId":"","mediaId":"m1","timeMs":1}"#).unwrap();
        handle_update(&store, body);
        assert_eq!(store.get_session(DEFAULT_SESSION).state.time_ms, 0);
    }
}
