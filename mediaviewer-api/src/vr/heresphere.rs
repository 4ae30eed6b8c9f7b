//! HereSphere library dialect
//!
//! Unlike DeoVR, HereSphere reports playback explicitly: every response
//! carries `HereSphere-JSON-Version: 1`, per-video JSON advertises an
//! `eventServer` URL, and the player POSTs play/pause/seek events there.

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderMap, Response, StatusCode},
};
use serde::Deserialize;
use serde_json::{json, Value};

use mediaviewer_core::models::{MediaItem, SyncUpdate, DEFAULT_SESSION};

use crate::http::{AppError, AppResult, AppState};
use crate::vr::{fov_for, request_base_url, stereo_for, LIBRARY_LIMIT};

const JSON_VERSION_HEADER: &str = "HereSphere-JSON-Version";

/// Build a JSON response stamped with the dialect version header
fn hs_json(status: StatusCode, value: &Value) -> AppResult<Response<Body>> {
    Ok(Response::builder()
        .status(status)
        .header(JSON_VERSION_HEADER, "1")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(value.to_string()))?)
}

pub async fn library(State(state): State<AppState>, headers: HeaderMap) -> AppResult<Response<Body>> {
    let base = request_base_url(&headers);
    let items = state.repo.list_vr(LIBRARY_LIMIT).await?;

    let list: Vec<Value> = items
        .iter()
        .map(|item| json!(format!("{base}/heresphere/video/{}", item.id)))
        .collect();

    hs_json(
        StatusCode::OK,
        &json!({
            "access": 1,
            "library": [{ "name": "Library", "list": list }],
        }),
    )
}

pub async fn video(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> AppResult<Response<Body>> {
    let item = state
        .repo
        .get(&id.into())
        .await?
        .ok_or_else(|| AppError::not_found("Media not found"))?;

    let base = request_base_url(&headers);

    publish_event_update(&state, &item, 0, false, None);

    let mut body = json!({
        "access": 1,
        "title": item.title,
        "description": item.rel_path,
        "thumbnailImage": format!("{base}/api/media/{}/thumb", item.id),
        "eventServer": format!("{base}/heresphere/event"),
        "duration": item.duration_ms.unwrap_or(0),
        "projection": "equirectangular",
        "stereo": stereo_for(&item).to_string(),
        "fov": fov_for(&item),
        "media": [{
            "name": "h264",
            "sources": [{
                "resolution": 1080,
                "url": format!("{base}/api/media/{}/stream", item.id),
            }],
        }],
    });

    if item.has_funscript {
        body["scripts"] = json!([{
            "name": format!("{}.funscript", item.filename),
            "url": format!("{base}/api/media/{}/funscript", item.id),
        }]);
    }

    hs_json(StatusCode::OK, &body)
}

/// HereSphere playback event codes: 0 = open, 1 = play, 2 = pause, 3 = close.
/// Unknown codes are treated as "playing".
fn event_is_paused(event: i64) -> bool {
    matches!(event, 0 | 2 | 3)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HereSphereEvent {
    /// The deeplink URL of the video the event refers to
    #[serde(default)]
    pub id: String,
    /// Playback position in milliseconds
    #[serde(default)]
    pub time: f64,
    #[serde(default = "default_event")]
    pub event: i64,
    pub connection_key: Option<String>,
}

const fn default_event() -> i64 {
    1
}

/// Pull the media id out of a `…/heresphere/video/:id` deeplink
fn extract_media_id(deeplink: &str) -> Option<&str> {
    let (_, tail) = deeplink.split_once("/heresphere/video/")?;
    let id = tail
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default();
    (!id.is_empty()).then_some(id)
}

pub async fn event(
    State(state): State<AppState>,
    axum::Json(event): axum::Json<HereSphereEvent>,
) -> AppResult<Response<Body>> {
    let Some(media_id) = extract_media_id(&event.id) else {
        return Err(AppError::bad_request("id does not reference a video"));
    };

    let item = state
        .repo
        .get(&media_id.into())
        .await?
        .ok_or_else(|| AppError::not_found("Media not found"))?;

    publish_event_update(
        &state,
        &item,
        event.time as i64,
        event_is_paused(event.event),
        event.connection_key.as_deref(),
    );

    Ok(Response::builder()
        .status(StatusCode::NO_CONTENT)
        .header(JSON_VERSION_HEADER, "1")
        .body(Body::empty())?)
}

pub async fn auth() -> AppResult<Response<Body>> {
    hs_json(
        StatusCode::OK,
        &json!({ "access": 1, "auth-token": "local" }),
    )
}

pub async fn scan(State(state): State<AppState>, headers: HeaderMap) -> AppResult<Response<Body>> {
    let base = request_base_url(&headers);
    let items = state.repo.list_vr(LIBRARY_LIMIT).await?;

    let scan_data: Vec<Value> = items
        .iter()
        .map(|item| {
            json!({
                "link": format!("{base}/heresphere/video/{}", item.id),
                "title": item.title,
                "duration": 0,
                "tags": [],
            })
        })
        .collect();

    hs_json(StatusCode::OK, &json!({ "scanData": scan_data }))
}

fn publish_event_update(
    state: &AppState,
    item: &MediaItem,
    time_ms: i64,
    paused: bool,
    connection_key: Option<&str>,
) {
    let client_id = match connection_key {
        Some(key) if !key.is_empty() => format!("vr:heresphere:{key}"),
        _ => "vr:heresphere".to_string(),
    };

    let update = SyncUpdate {
        session_id: DEFAULT_SESSION.to_string(),
        client_id,
        media_id: Some(item.id.as_str().to_string()),
        time_ms,
        paused,
        fps: 30.0,
        frame: time_ms.max(0) * 30 / 1000,
        ..Default::default()
    };

    if state.store.upsert_session(update).is_ok() {
        state.store.broadcast_session(DEFAULT_SESSION);
    }
}
