//! Sync, playback-cursor and scan control endpoints
//!
//! Thin shell over the sync store and scanner: validate, commit, broadcast.

use axum::{
    extract::{Query, State},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use tracing::{error, info};

use mediaviewer_core::models::{SessionStateView, SyncUpdate, DEFAULT_SESSION};

use crate::http::{AppError, AppResult, AppState};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionQuery {
    pub session_id: Option<String>,
}

/// Body accepted by `PUT /api/sync` and the WebSocket `sync:update` message
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncUpdateBody {
    pub session_id: Option<String>,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub media_id: Option<String>,
    #[serde(default)]
    pub time_ms: i64,
    #[serde(default = "default_paused")]
    pub paused: bool,
    #[serde(default = "default_fps")]
    pub fps: f64,
    #[serde(default)]
    pub frame: i64,
    pub play_at: Option<String>,
    pub play_at_local_ms: Option<i64>,
    pub captured_at_local_ms: Option<i64>,
    pub to_client_id: Option<String>,
    pub open_in_ui: Option<bool>,
    pub seek_token: Option<String>,
    pub seek_phase: Option<String>,
    pub seek_want_play: Option<bool>,
    pub seek_target_client_id: Option<String>,
}

const fn default_paused() -> bool {
    true
}

const fn default_fps() -> f64 {
    30.0
}

impl SyncUpdateBody {
    pub fn session(&self) -> String {
        self.session_id
            .clone()
            .unwrap_or_else(|| DEFAULT_SESSION.to_string())
    }

    pub fn into_update(self) -> SyncUpdate {
        let session_id = self.session();
        SyncUpdate {
            session_id,
            client_id: self.client_id,
            media_id: self.media_id,
            time_ms: self.time_ms,
            paused: self.paused,
            fps: self.fps,
            frame: self.frame,
            play_at: self.play_at,
            play_at_local_ms: self.play_at_local_ms,
            captured_at_local_ms: self.captured_at_local_ms,
        }
    }
}

pub async fn get_sync(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
) -> Json<SessionStateView> {
    let session_id = query
        .session_id
        .unwrap_or_else(|| DEFAULT_SESSION.to_string());
    Json(state.store.get_session(&session_id))
}

pub async fn put_sync(
    State(state): State<AppState>,
    Json(body): Json<SyncUpdateBody>,
) -> AppResult<Json<SessionStateView>> {
    let session_id = body.session();
    let stored = state.store.upsert_session(body.into_update())?;
    state.store.broadcast_session(&session_id);
    Ok(Json(stored))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackQuery {
    pub client_id: String,
    pub media_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackBody {
    pub client_id: String,
    pub media_id: String,
    #[serde(default)]
    pub time_ms: i64,
    #[serde(default = "default_fps")]
    pub fps: f64,
    #[serde(default)]
    pub frame: i64,
}

/// Per-viewer resume cursor; `null` when none has been recorded
pub async fn get_playback(
    State(state): State<AppState>,
    Query(query): Query<PlaybackQuery>,
) -> impl IntoResponse {
    Json(state.store.get_playback(&query.client_id, &query.media_id))
}

pub async fn put_playback(
    State(state): State<AppState>,
    Json(body): Json<PlaybackBody>,
) -> AppResult<impl IntoResponse> {
    if body.client_id.is_empty() {
        return Err(AppError::bad_request("clientId is required"));
    }
    if body.media_id.is_empty() {
        return Err(AppError::bad_request("mediaId is required"));
    }

    state
        .store
        .set_playback(&body.client_id, &body.media_id, body.time_ms, body.fps, body.frame);
    Ok(Json(
        state.store.get_playback(&body.client_id, &body.media_id),
    ))
}

/// Kick off a background rescan; 409 while one is already running
pub async fn post_scan(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    if state.scanner.is_scanning() {
        return Err(AppError::conflict("scan already in progress"));
    }

    let scanner = state.scanner.clone();
    tokio::spawn(async move {
        match scanner.rescan().await {
            Ok(scanned) => info!(scanned, "Background scan finished"),
            Err(e) => error!(error = %e, "Background scan failed"),
        }
    });

    Ok(Json(serde_json::json!({ "ok": true })))
}

pub async fn get_scan_progress(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.scanner.progress())
}

pub async fn post_cache_clear(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    state.thumbs.clear_cache().await?;
    Ok(Json(serde_json::json!({ "ok": true })))
}
