//! In-memory authoritative sync state store
//!
//! One coarse mutex guards every map. The lock is held only for
//! read/modify/write; serialized frames are pushed into per-socket unbounded
//! channels after the lock is released, so a misbehaving client can never
//! stall a broadcast. Nothing here persists; session state is ephemeral by
//! design.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::models::{
    ClientPresence, PerClientPlayback, PlayAtEphemeral, SessionState, SessionStateView,
    StateBroadcast, SyncUpdate,
};
use crate::{Error, Result};

pub type SocketId = String;

/// Server wall time in epoch milliseconds
fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

struct SocketHandle {
    socket_id: SocketId,
    sender: mpsc::UnboundedSender<String>,
}

#[derive(Default)]
struct SyncInner {
    sessions: HashMap<String, SessionState>,
    ephemerals: HashMap<String, PlayAtEphemeral>,
    presences: HashMap<String, ClientPresence>,
    sockets: HashMap<String, Vec<SocketHandle>>,
    playback: HashMap<(String, String), PerClientPlayback>,
}

impl SyncInner {
    fn view(&self, session_id: &str) -> SessionStateView {
        let state = self.sessions.get(session_id).cloned().unwrap_or_default();
        SessionStateView::new(state, self.ephemerals.get(session_id))
    }

    fn clients(&self) -> Vec<ClientPresence> {
        let mut clients: Vec<_> = self.presences.values().cloned().collect();
        clients.sort_by(|a, b| a.connected_at.cmp(&b.connected_at));
        clients
    }

    fn all_senders(&self) -> Vec<(String, SocketId, mpsc::UnboundedSender<String>)> {
        self.sockets
            .iter()
            .flat_map(|(client_id, handles)| {
                handles.iter().map(move |h| {
                    (client_id.clone(), h.socket_id.clone(), h.sender.clone())
                })
            })
            .collect()
    }
}

#[derive(Default)]
pub struct SyncStore {
    inner: Mutex<SyncInner>,
}

impl SyncStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored session state (or a fresh paused default) with any live
    /// coordinated-start ephemerals merged in.
    pub fn get_session(&self, session_id: &str) -> SessionStateView {
        self.inner.lock().expect("sync lock").view(session_id)
    }

    /// Validate, clamp and commit a playback cursor update.
    ///
    /// `time_ms`, `frame` clamp to ≥ 0 and `fps` to ≥ 1; an empty-string
    /// `media_id` is rejected while `None` clears the cursor's media. The
    /// committed `updated_at` is strictly monotonic per session.
    pub fn upsert_session(&self, update: SyncUpdate) -> Result<SessionStateView> {
        if update.client_id.is_empty() {
            return Err(Error::InvalidInput("clientId is required".to_string()));
        }
        if update.media_id.as_deref() == Some("") {
            return Err(Error::InvalidInput(
                "mediaId must be null or non-empty".to_string(),
            ));
        }

        let mut inner = self.inner.lock().expect("sync lock");

        let previous_updated = inner
            .sessions
            .get(&update.session_id)
            .map_or(0, |s| s.updated_at);
        let now = now_ms();
        let updated_at = if now > previous_updated { now } else { previous_updated + 1 };

        let state = SessionState {
            media_id: update.media_id,
            time_ms: update.time_ms.max(0),
            paused: update.paused,
            fps: if update.fps >= 1.0 { update.fps } else { 1.0 },
            frame: update.frame.max(0),
            from_client_id: update.client_id,
            updated_at,
        };

        if update.paused {
            inner.ephemerals.remove(&update.session_id);
        } else if let Some(play_at) = update.play_at {
            inner.ephemerals.insert(
                update.session_id.clone(),
                PlayAtEphemeral {
                    play_at,
                    play_at_local_ms: update.play_at_local_ms,
                    captured_at_local_ms: update.captured_at_local_ms,
                },
            );
        } else {
            // Unpaused update without a schedule drops any stale one
            inner.ephemerals.remove(&update.session_id);
        }

        inner.sessions.insert(update.session_id.clone(), state);
        Ok(inner.view(&update.session_id))
    }

    pub fn clear_play_at(&self, session_id: &str) {
        self.inner
            .lock()
            .expect("sync lock")
            .ephemerals
            .remove(session_id);
    }

    /// Register or refresh a client presence
    pub fn upsert_presence(&self, client_id: &str, user_agent: &str, ip_address: &str) {
        let mut inner = self.inner.lock().expect("sync lock");
        let presence = inner
            .presences
            .entry(client_id.to_string())
            .or_insert_with(|| ClientPresence {
                client_id: client_id.to_string(),
                user_agent: String::new(),
                ip_address: String::new(),
                ui_view: None,
                ui_media_id: None,
                connected_at: now_ms(),
            });
        presence.user_agent = user_agent.to_string();
        presence.ip_address = ip_address.to_string();
    }

    /// Update UI presence fields. Each outer `Some` applies its inner value
    /// (`None` clears the field); outer `None` leaves the field untouched.
    pub fn set_ui_status(
        &self,
        client_id: &str,
        ui_view: Option<Option<String>>,
        ui_media_id: Option<Option<String>>,
    ) {
        let mut inner = self.inner.lock().expect("sync lock");
        if let Some(presence) = inner.presences.get_mut(client_id) {
            if let Some(view) = ui_view {
                presence.ui_view = view;
            }
            if let Some(media_id) = ui_media_id {
                presence.ui_media_id = media_id;
            }
        }
    }

    /// Attach a socket sender to a client, returning its socket id
    pub fn attach_socket(&self, client_id: &str, sender: mpsc::UnboundedSender<String>) -> SocketId {
        let socket_id = nanoid::nanoid!(10);
        let mut inner = self.inner.lock().expect("sync lock");
        inner
            .sockets
            .entry(client_id.to_string())
            .or_default()
            .push(SocketHandle {
                socket_id: socket_id.clone(),
                sender,
            });
        socket_id
    }

    /// Move an already-attached socket to a different client id.
    ///
    /// Used when a connected socket re-identifies in a later `sync:hello`.
    /// Returns `true` if the old client lost its last socket (its presence is
    /// dropped along with it).
    pub fn rekey_socket(&self, old_client_id: &str, socket_id: &str, new_client_id: &str) -> bool {
        let mut inner = self.inner.lock().expect("sync lock");

        let Some(handles) = inner.sockets.get_mut(old_client_id) else {
            return false;
        };
        let Some(index) = handles.iter().position(|h| h.socket_id == socket_id) else {
            return false;
        };
        let mut handle = handles.remove(index);
        let old_emptied = handles.is_empty();
        if old_emptied {
            inner.sockets.remove(old_client_id);
            inner.presences.remove(old_client_id);
        }

        handle.socket_id = socket_id.to_string();
        inner
            .sockets
            .entry(new_client_id.to_string())
            .or_default()
            .push(handle);

        old_emptied
    }

    /// Detach a socket. Returns `true` when it was the client's last socket,
    /// in which case the presence is removed too.
    pub fn detach_socket(&self, client_id: &str, socket_id: &str) -> bool {
        let mut inner = self.inner.lock().expect("sync lock");

        let Some(handles) = inner.sockets.get_mut(client_id) else {
            return false;
        };
        handles.retain(|h| h.socket_id != socket_id);
        if handles.is_empty() {
            inner.sockets.remove(client_id);
            inner.presences.remove(client_id);
            true
        } else {
            false
        }
    }

    pub fn set_playback(&self, client_id: &str, media_id: &str, time_ms: i64, fps: f64, frame: i64) {
        let mut inner = self.inner.lock().expect("sync lock");
        inner.playback.insert(
            (client_id.to_string(), media_id.to_string()),
            PerClientPlayback {
                time_ms: time_ms.max(0),
                fps: if fps >= 1.0 { fps } else { 1.0 },
                frame: frame.max(0),
                updated_at: now_ms(),
            },
        );
    }

    pub fn get_playback(&self, client_id: &str, media_id: &str) -> Option<PerClientPlayback> {
        self.inner
            .lock()
            .expect("sync lock")
            .playback
            .get(&(client_id.to_string(), media_id.to_string()))
            .cloned()
    }

    pub fn clients(&self) -> Vec<ClientPresence> {
        self.inner.lock().expect("sync lock").clients()
    }

    /// Fan a session's current state out to every connected socket.
    ///
    /// The socket list is snapshotted under the lock; sends happen after
    /// release and are non-blocking. Dead sockets are pruned afterwards.
    pub fn broadcast_session(&self, session_id: &str) -> usize {
        let (frame, senders) = {
            let inner = self.inner.lock().expect("sync lock");
            let frame = StateBroadcast::new(inner.view(session_id), inner.clients());
            (frame, inner.all_senders())
        };

        let payload = match serde_json::to_string(&frame) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "Failed to serialize sync:state frame");
                return 0;
            }
        };

        let mut sent = 0;
        let mut dead = Vec::new();
        for (client_id, socket_id, sender) in senders {
            if sender.send(payload.clone()).is_ok() {
                sent += 1;
            } else {
                dead.push((client_id, socket_id));
            }
        }

        for (client_id, socket_id) in dead {
            debug!(client_id = %client_id, socket_id = %socket_id, "Pruning dead socket");
            self.detach_socket(&client_id, &socket_id);
        }

        sent
    }

    /// Send a prebuilt `sync:state`-shaped frame to all sockets of one client
    pub fn unicast_to_client(&self, target_client_id: &str, frame: &StateBroadcast) -> usize {
        let senders: Vec<_> = {
            let inner = self.inner.lock().expect("sync lock");
            inner
                .sockets
                .get(target_client_id)
                .map(|handles| {
                    handles
                        .iter()
                        .map(|h| (h.socket_id.clone(), h.sender.clone()))
                        .collect()
                })
                .unwrap_or_default()
        };

        let payload = match serde_json::to_string(frame) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "Failed to serialize targeted sync:state frame");
                return 0;
            }
        };

        let mut sent = 0;
        let mut dead = Vec::new();
        for (socket_id, sender) in senders {
            if sender.send(payload.clone()).is_ok() {
                sent += 1;
            } else {
                dead.push(socket_id);
            }
        }

        for socket_id in dead {
            self.detach_socket(target_client_id, &socket_id);
        }

        sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DEFAULT_SESSION;

    fn update(session: &str, client: &str) -> SyncUpdate {
        SyncUpdate {
            session_id: session.to_string(),
            client_id: client.to_string(),
            media_id: Some("m1".to_string()),
            time_ms: 12_345,
            paused: false,
            fps: 30.0,
            frame: 370,
            ..Default::default()
        }
    }

    #[test]
    fn test_fresh_session_is_paused_default() {
        let store = SyncStore::new();
        let view = store.get_session(DEFAULT_SESSION);
        assert!(view.state.paused);
        assert_eq!(view.state.time_ms, 0);
        assert_eq!(view.state.media_id, None);
    }

    #[test]
    fn test_upsert_then_get_returns_clamped_values() {
        let store = SyncStore::new();
        let mut u = update("s1", "A");
        u.time_ms = -50;
        u.fps = 0.0;
        u.frame = -1;

        let stored = store.upsert_session(u).unwrap();
        assert_eq!(stored.state.time_ms, 0);
        assert_eq!(stored.state.fps, 1.0);
        assert_eq!(stored.state.frame, 0);
        assert_eq!(stored.state.from_client_id, "A");

        let read_back = store.get_session("s1");
        assert_eq!(read_back.state.time_ms, 0);
        assert_eq!(read_back.state.media_id.as_deref(), Some("m1"));
    }

    #[test]
    fn test_updated_at_is_monotonic() {
        let store = SyncStore::new();
        let mut last = 0;
        for _ in 0..5 {
            let stored = store.upsert_session(update("s1", "A")).unwrap();
            assert!(stored.state.updated_at > last);
            last = stored.state.updated_at;
        }
    }

    #[test]
    fn test_empty_media_id_rejected_null_allowed() {
        let store = SyncStore::new();

        let mut bad = update("s1", "A");
        bad.media_id = Some(String::new());
        assert!(matches!(store.upsert_session(bad), Err(Error::InvalidInput(_))));

        let mut ok = update("s1", "A");
        ok.media_id = None;
        let stored = store.upsert_session(ok).unwrap();
        assert_eq!(stored.state.media_id, None);
    }

    #[test]
    fn test_missing_client_id_rejected() {
        let store = SyncStore::new();
        let mut bad = update("s1", "");
        bad.client_id = String::new();
        assert!(store.upsert_session(bad).is_err());
    }

    #[test]
    fn test_paused_update_clears_play_at() {
        let store = SyncStore::new();

        let mut playing = update("s1", "A");
        playing.play_at = Some("2026-01-01T00:00:00.000Z".to_string());
        let stored = store.upsert_session(playing).unwrap();
        assert!(stored.play_at.is_some());

        let mut paused = update("s1", "A");
        paused.paused = true;
        let stored = store.upsert_session(paused).unwrap();
        assert!(stored.play_at.is_none());
        assert!(store.get_session("s1").play_at.is_none());
    }

    #[test]
    fn test_unpaused_update_without_play_at_clears_it() {
        let store = SyncStore::new();

        let mut scheduled = update("s1", "A");
        scheduled.play_at = Some("2026-01-01T00:00:00.000Z".to_string());
        store.upsert_session(scheduled).unwrap();

        let stored = store.upsert_session(update("s1", "A")).unwrap();
        assert!(stored.play_at.is_none());
    }

    #[tokio::test]
    async fn test_broadcast_reaches_all_sockets() {
        let store = SyncStore::new();

        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        store.upsert_presence("A", "ua-a", "1.1.1.1");
        store.attach_socket("A", tx_a);
        store.upsert_presence("B", "ua-b", "2.2.2.2");
        store.attach_socket("B", tx_b);

        store.upsert_session(update(DEFAULT_SESSION, "A")).unwrap();
        let sent = store.broadcast_session(DEFAULT_SESSION);
        assert_eq!(sent, 2);

        for rx in [&mut rx_a, &mut rx_b] {
            let payload = rx.recv().await.unwrap();
            let json: serde_json::Value = serde_json::from_str(&payload).unwrap();
            assert_eq!(json["type"], "sync:state");
            assert_eq!(json["state"]["timeMs"], 12_345);
            assert_eq!(json["state"]["fromClientId"], "A");
            assert_eq!(json["clients"].as_array().unwrap().len(), 2);
        }
    }

    #[tokio::test]
    async fn test_unicast_targets_one_client_only() {
        let store = SyncStore::new();

        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        store.upsert_presence("A", "ua", "1.1.1.1");
        store.attach_socket("A", tx_a);
        store.upsert_presence("B", "ua", "2.2.2.2");
        store.attach_socket("B", tx_b);

        let frame = StateBroadcast::new(
            SessionStateView::new(SessionState::default(), None),
            store.clients(),
        );
        assert_eq!(store.unicast_to_client("A", &frame), 1);

        assert!(rx_a.recv().await.is_some());
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_last_socket_close_removes_presence() {
        let store = SyncStore::new();

        let (tx1, _rx1) = mpsc::unbounded_channel();
        let (tx2, _rx2) = mpsc::unbounded_channel();
        store.upsert_presence("A", "ua", "1.1.1.1");
        let s1 = store.attach_socket("A", tx1);
        let s2 = store.attach_socket("A", tx2);

        assert!(!store.detach_socket("A", &s1));
        assert_eq!(store.clients().len(), 1);

        assert!(store.detach_socket("A", &s2));
        assert!(store.clients().is_empty());
    }

    #[tokio::test]
    async fn test_rekey_moves_socket_between_clients() {
        let store = SyncStore::new();

        let (tx, mut rx) = mpsc::unbounded_channel();
        store.upsert_presence("old", "ua", "1.1.1.1");
        let socket_id = store.attach_socket("old", tx);

        let old_dropped = store.rekey_socket("old", &socket_id, "new");
        assert!(old_dropped);
        assert!(store.clients().is_empty());

        store.upsert_presence("new", "ua", "1.1.1.1");
        let frame = StateBroadcast::new(
            SessionStateView::new(SessionState::default(), None),
            store.clients(),
        );
        assert_eq!(store.unicast_to_client("new", &frame), 1);
        assert!(rx.recv().await.is_some());
    }

    #[test]
    fn test_per_client_playback_cursor() {
        let store = SyncStore::new();
        store.set_playback("A", "m1", 5_000, 30.0, 150);

        let cursor = store.get_playback("A", "m1").unwrap();
        assert_eq!(cursor.time_ms, 5_000);
        assert_eq!(cursor.frame, 150);

        assert!(store.get_playback("A", "m2").is_none());
        assert!(store.get_playback("B", "m1").is_none());
    }

    #[tokio::test]
    async fn test_broadcast_prunes_dead_sockets() {
        let store = SyncStore::new();

        let (tx_live, _rx_live) = mpsc::unbounded_channel();
        let (tx_dead, rx_dead) = mpsc::unbounded_channel();
        store.upsert_presence("live", "ua", "1.1.1.1");
        store.attach_socket("live", tx_live);
        store.upsert_presence("dead", "ua", "2.2.2.2");
        store.attach_socket("dead", tx_dead);
        drop(rx_dead);

        let sent = store.broadcast_session(DEFAULT_SESSION);
        assert_eq!(sent, 1);
        // Dead client pruned entirely
        assert_eq!(store.clients().len(), 1);
        assert_eq!(store.clients()[0].client_id, "live");
    }
}
