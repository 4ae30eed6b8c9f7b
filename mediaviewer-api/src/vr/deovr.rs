//! DeoVR library dialect
//!
//! DeoVR fetches `/deovr` for the scene list and `/deovr/video/:id` when a
//! scene opens. It reports nothing back explicitly: opening a video only
//! publishes a hint update; actual play/pause/position is inferred from the
//! Range request pattern once streaming begins.

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use serde_json::{json, Value};

use mediaviewer_core::models::{SyncUpdate, VrStereo, DEFAULT_SESSION};

use crate::http::{AppError, AppResult, AppState};
use crate::vr::{fnv1a_32, fov_for, request_base_url, stereo_for, LIBRARY_LIMIT};

pub async fn library(State(state): State<AppState>, headers: HeaderMap) -> AppResult<Json<Value>> {
    let base = request_base_url(&headers);
    let items = state.repo.list_vr(LIBRARY_LIMIT).await?;

    let list: Vec<Value> = items
        .iter()
        .map(|item| {
            json!({
                "title": item.title,
                "videoLength": 0,
                "thumbnailUrl": format!("{base}/api/media/{}/thumb", item.id),
                "video_url": format!("{base}/deovr/video/{}", item.id),
            })
        })
        .collect();

    Ok(Json(json!({
        "authorized": "0",
        "scenes": [{ "name": "Library", "list": list }],
    })))
}

pub async fn video(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let item = state
        .repo
        .get(&id.into())
        .await?
        .ok_or_else(|| AppError::not_found("Media not found"))?;

    let base = request_base_url(&headers);
    let fov = fov_for(&item);
    let stereo_mode = match stereo_for(&item) {
        VrStereo::Sbs => "sbs",
        VrStereo::Tb => "tb",
        VrStereo::Mono => "off",
    };
    let screen_type = if fov == 180 { "dome" } else { "sphere" };
    let video_length_secs = item
        .duration_ms
        .map_or(0, |ms| ((ms as f64) / 1000.0).round() as i64);

    // Opening counts as an intent to play; the heartbeat refines it once
    // bytes start moving.
    let hint = SyncUpdate {
        session_id: DEFAULT_SESSION.to_string(),
        client_id: "vr:deovr".to_string(),
        media_id: Some(item.id.as_str().to_string()),
        time_ms: 0,
        paused: false,
        fps: 30.0,
        frame: 0,
        ..Default::default()
    };
    if state.store.upsert_session(hint).is_ok() {
        state.store.broadcast_session(DEFAULT_SESSION);
    }

    Ok(Json(json!({
        "id": fnv1a_32(item.id.as_str()),
        "title": item.title,
        "videoLength": video_length_secs,
        "is3d": true,
        "screenType": screen_type,
        "stereoMode": stereo_mode,
        "thumbnailUrl": format!("{base}/api/media/{}/thumb", item.id),
        "encodings": [{
            "name": "h264",
            "videoSources": [{
                "resolution": 1080,
                "url": format!("{base}/api/media/{}/stream", item.id),
            }],
        }],
    })))
}
