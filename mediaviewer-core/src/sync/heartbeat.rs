//! DeoVR heartbeat inference
//!
//! DeoVR issues no explicit playback events; this module reconstructs
//! play/pause/position from the shape of its byte-range requests. Each
//! `(session, client)` pair tracks a wall-clock origin such that
//! `time = now - started_at` while playing. Requests bump an in-flight
//! counter; when it drains to zero a short debounce decides between a seek
//! (a new request arrives) and a real pause. A periodic tick republishes
//! progress and detects stalled bytes; a background sweep forgets silent
//! streams.
//!
//! All time arithmetic uses the tokio clock so the state machine can be
//! driven under `tokio::time::pause()` in tests.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::models::SyncUpdate;
use crate::sync::SyncStore;

/// `(session_id, client_key)`, where the client key is derived from the peer IP
type StreamKey = (String, String);

type StreamMap = DashMap<StreamKey, DeovrStreamState>;

#[derive(Debug)]
struct DeovrStreamState {
    media_id: String,
    /// Wall-clock origin: `last_time = now - started_at` while playing
    started_at: Instant,
    last_time_ms: i64,
    paused: bool,
    /// Open Range requests for this stream
    in_flight: u32,
    last_data_at: Instant,
    last_seen: Instant,
    last_publish_at: Option<Instant>,
    /// Invalidates pause-debounce timers armed before the latest activity
    generation: u64,
}

impl DeovrStreamState {
    fn fresh(media_id: &str, now: Instant) -> Self {
        Self {
            media_id: media_id.to_string(),
            started_at: now,
            last_time_ms: 0,
            paused: false,
            in_flight: 1,
            last_data_at: now,
            last_seen: now,
            last_publish_at: None,
            generation: 0,
        }
    }

    fn resume(&mut self, now: Instant) {
        self.started_at = now - Duration::from_millis(self.last_time_ms.max(0) as u64);
        self.paused = false;
    }
}

/// Turns DeoVR Range-request traffic into sync updates
pub struct HeartbeatInferrer {
    store: Arc<SyncStore>,
    states: Arc<StreamMap>,
}

impl HeartbeatInferrer {
    /// Frame rate assumed for inferred updates
    pub const FPS: f64 = 30.0;
    /// Minimum interval between emitted "playing" updates
    pub const PUBLISH_MIN: Duration = Duration::from_millis(750);
    /// Grace period after the last in-flight request ends
    pub const INSTANT_PAUSE_DEBOUNCE: Duration = Duration::from_millis(125);
    /// Bytes stalled on an open request for this long means paused
    pub const IDLE_PAUSE: Duration = Duration::from_millis(650);
    /// Periodic "still playing" publish interval
    pub const TICK: Duration = Duration::from_millis(1000);
    /// Evict stream state after this much total silence
    pub const FORGET: Duration = Duration::from_secs(60);
    /// How often the eviction sweep runs
    pub const SWEEP: Duration = Duration::from_secs(5);

    #[must_use]
    pub fn new(store: Arc<SyncStore>) -> Arc<Self> {
        Arc::new(Self {
            store,
            states: Arc::new(DashMap::new()),
        })
    }

    /// Spawn the periodic tick and eviction sweep tasks
    pub fn start(&self) {
        let states = Arc::clone(&self.states);
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Self::TICK);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                tick(&states, &store);
            }
        });

        let states = Arc::clone(&self.states);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Self::SWEEP);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                let now = Instant::now();
                states.retain(|_, state| now - state.last_seen <= Self::FORGET);
            }
        });
    }

    /// Number of currently tracked streams
    #[must_use]
    pub fn tracked_streams(&self) -> usize {
        self.states.len()
    }

    /// A Range request for `media_id` arrived from this client
    pub fn on_request(&self, session_id: &str, client_key: &str, media_id: &str) {
        let key = (session_id.to_string(), client_key.to_string());
        let now = Instant::now();

        let mut force_publish = false;
        {
            let mut state = self.states.entry(key.clone()).or_insert_with(|| {
                force_publish = true;
                DeovrStreamState::fresh(media_id, now)
            });

            if state.media_id != media_id {
                // Media switch: discard the old stream state entirely
                *state = DeovrStreamState::fresh(media_id, now);
                force_publish = true;
            } else if !force_publish {
                state.generation += 1; // cancels any pending pause debounce
                state.in_flight += 1;
                if state.paused {
                    state.resume(now);
                }
                state.last_time_ms = (now - state.started_at).as_millis() as i64;
                state.last_data_at = now;
                state.last_seen = now;
            }
        }

        try_publish_playing(&self.states, &self.store, &key, force_publish);
    }

    /// Response bytes were written for this client's stream
    pub fn on_data(&self, session_id: &str, client_key: &str) {
        let key = (session_id.to_string(), client_key.to_string());
        let now = Instant::now();

        let mut resumed = false;
        if let Some(mut state) = self.states.get_mut(&key) {
            state.last_data_at = now;
            state.last_seen = now;
            if state.paused {
                // Network resumed streaming: the player is consuming again
                state.resume(now);
                resumed = true;
            }
        }

        if resumed {
            try_publish_playing(&self.states, &self.store, &key, false);
        }
    }

    /// A Range response finished or was torn down
    pub fn on_close(&self, session_id: &str, client_key: &str) {
        let key = (session_id.to_string(), client_key.to_string());
        let now = Instant::now();

        let mut armed_generation = None;
        if let Some(mut state) = self.states.get_mut(&key) {
            state.in_flight = state.in_flight.saturating_sub(1);
            state.last_seen = now;
            if state.in_flight == 0 && !state.paused {
                // Freeze the position here; the debounce decides if it sticks
                state.last_time_ms = (now - state.started_at).as_millis() as i64;
                state.generation += 1;
                armed_generation = Some(state.generation);
            }
        }

        if let Some(generation) = armed_generation {
            let states = Arc::clone(&self.states);
            let store = Arc::clone(&self.store);
            tokio::spawn(async move {
                tokio::time::sleep(Self::INSTANT_PAUSE_DEBOUNCE).await;
                fire_pause_debounce(&states, &store, &key, generation);
            });
        }
    }
}

fn fire_pause_debounce(states: &StreamMap, store: &SyncStore, key: &StreamKey, generation: u64) {
    let mut snapshot = None;
    if let Some(mut state) = states.get_mut(key) {
        if state.generation == generation && state.in_flight == 0 && !state.paused {
            state.paused = true;
            snapshot = Some((state.media_id.clone(), state.last_time_ms));
        }
    }

    if let Some((media_id, time_ms)) = snapshot {
        debug!(client = %key.1, media_id = %media_id, time_ms, "DeoVR stream idle, inferring pause");
        publish(store, &key.0, &key.1, &media_id, time_ms, true);
    }
}

/// Periodic pass over all playing streams: refresh positions, publish
/// rate-limited progress, and force-pause streams whose bytes stalled while
/// a long request stays open.
fn tick(states: &StreamMap, store: &SyncStore) {
    let now = Instant::now();
    let mut publishes = Vec::new();

    for mut entry in states.iter_mut() {
        let key = entry.key().clone();
        let state = entry.value_mut();
        if state.paused || state.in_flight == 0 {
            continue;
        }

        if now - state.last_data_at >= HeartbeatInferrer::IDLE_PAUSE {
            state.paused = true;
            state.last_time_ms = (state.last_data_at - state.started_at).as_millis() as i64;
            publishes.push((key, state.media_id.clone(), state.last_time_ms, true));
        } else {
            state.last_time_ms = (now - state.started_at).as_millis() as i64;
            let due = state
                .last_publish_at
                .map_or(true, |t| now - t >= HeartbeatInferrer::PUBLISH_MIN);
            if due {
                state.last_publish_at = Some(now);
                publishes.push((key, state.media_id.clone(), state.last_time_ms, false));
            }
        }
    }

    for (key, media_id, time_ms, paused) in publishes {
        publish(store, &key.0, &key.1, &media_id, time_ms, paused);
    }
}

/// Publish a playing update, honoring the rate limit unless forced
fn try_publish_playing(states: &StreamMap, store: &SyncStore, key: &StreamKey, force: bool) {
    let now = Instant::now();
    let mut snapshot = None;

    if let Some(mut state) = states.get_mut(key) {
        let due = force
            || state
                .last_publish_at
                .map_or(true, |t| now - t >= HeartbeatInferrer::PUBLISH_MIN);
        if due {
            state.last_publish_at = Some(now);
            snapshot = Some((state.media_id.clone(), state.last_time_ms));
        }
    }

    if let Some((media_id, time_ms)) = snapshot {
        publish(store, &key.0, &key.1, &media_id, time_ms, false);
    }
}

fn publish(
    store: &SyncStore,
    session_id: &str,
    client_key: &str,
    media_id: &str,
    time_ms: i64,
    paused: bool,
) {
    let update = SyncUpdate {
        session_id: session_id.to_string(),
        client_id: format!("vr:deovr:{client_key}"),
        media_id: Some(media_id.to_string()),
        time_ms,
        paused,
        fps: HeartbeatInferrer::FPS,
        frame: time_ms.max(0) * 30 / 1000,
        ..Default::default()
    };

    match store.upsert_session(update) {
        Ok(_) => {
            store.broadcast_session(session_id);
        }
        Err(e) => {
            warn!(error = %e, session_id, "Failed to commit inferred DeoVR update");
        }
    }
}
