//! VR player adapters
//!
//! DeoVR and HereSphere speak different JSON library dialects over the same
//! catalog. Both get absolute URLs built from the requesting host
//! (trust-proxy aware), both are capped to the most recent VR videos, and
//! both open with a hint update so the session cursor follows the headset.

pub mod deovr;
pub mod heresphere;

use axum::{
    body::Body,
    extract::{Path, Query},
    http::{header, HeaderMap, Response, StatusCode},
};
use serde::Deserialize;

use mediaviewer_core::models::{MediaItem, VrStereo};
use mediaviewer_core::scanner::classify;

use crate::http::AppResult;

/// Library listings stop at the most-recently-modified N VR videos
pub const LIBRARY_LIMIT: u32 = 1000;

/// FNV-1a 32-bit over a string, masked to a positive integer.
///
/// DeoVR insists on numeric scene ids; this keeps them stable across
/// restarts without storing anything.
#[must_use]
pub fn fnv1a_32(input: &str) -> i64 {
    let mut hash: u32 = 0x811c_9dc5;
    for byte in input.as_bytes() {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(16_777_619);
    }
    i64::from(hash & 0x7fff_ffff)
}

/// Absolute URL base for the requesting client, honoring reverse-proxy
/// headers before the Host header.
#[must_use]
pub fn request_base_url(headers: &HeaderMap) -> String {
    let first = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };

    let proto = first("x-forwarded-proto").unwrap_or_else(|| "http".to_string());
    let host = first("x-forwarded-host")
        .or_else(|| {
            headers
                .get(header::HOST)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        })
        .unwrap_or_else(|| "localhost".to_string());

    format!("{proto}://{host}")
}

/// Stereo layout: stored value, else filename tokens, else mono
#[must_use]
pub fn stereo_for(item: &MediaItem) -> VrStereo {
    item.vr_stereo
        .or_else(|| classify::classify_tokens(&item.rel_path).stereo)
        .unwrap_or(VrStereo::Mono)
}

/// FOV: stored value, else filename tokens, else 360
#[must_use]
pub fn fov_for(item: &MediaItem) -> u32 {
    item.vr_fov
        .or_else(|| classify::classify_tokens(&item.rel_path).fov)
        .unwrap_or(360)
}

#[derive(Debug, Deserialize)]
pub struct PlaceholderQuery {
    #[serde(default)]
    pub err: u8,
}

/// Lightweight placeholder thumbnail, also used as the 302 target when the
/// real generator fails.
pub async fn placeholder_svg_handler(
    Path(id): Path<String>,
    Query(query): Query<PlaceholderQuery>,
) -> AppResult<Response<Body>> {
    let label = id.strip_suffix(".svg").unwrap_or(&id);
    let svg = placeholder_svg(label, query.err == 1);

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "image/svg+xml; charset=utf-8")
        .header(header::CACHE_CONTROL, "public, max-age=3600")
        .body(Body::from(svg))?)
}

fn placeholder_svg(label: &str, errored: bool) -> String {
    let fill = if errored { "#5a3030" } else { "#30405a" };
    let glyph = if errored { "!" } else { "▶" };
    format!(
        r##"<svg xmlns="http://www.w3.org/2000/svg" width="480" height="270" viewBox="0 0 480 270">
<rect width="480" height="270" fill="{fill}"/>
<text x="240" y="125" font-family="sans-serif" font-size="64" fill="#ffffff" text-anchor="middle">{glyph}</text>
<text x="240" y="200" font-family="sans-serif" font-size="20" fill="#c0c0c0" text-anchor="middle">{label}</text>
</svg>"##
    )
}

#[cfg(test)]
pub(crate) mod testing {
    use std::path::PathBuf;
    use std::sync::Arc;

    use mediaviewer_core::models::{MediaType, NewMediaItem};
    use mediaviewer_core::repository::MediaRepository;
    use mediaviewer_core::scanner::Scanner;
    use mediaviewer_core::sync::{HeartbeatInferrer, SyncStore};
    use mediaviewer_core::thumbs::Thumbnailer;
    use mediaviewer_core::Config;

    use crate::http::AppState;

    pub async fn state() -> AppState {
        let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
        let repo = MediaRepository::new(pool);
        repo.init_schema().await.unwrap();

        let store = Arc::new(SyncStore::new());
        let heartbeat = HeartbeatInferrer::new(Arc::clone(&store));
        let config = Arc::new(Config::default());

        AppState {
            scanner: Arc::new(Scanner::new(
                repo.clone(),
                config.media.root.clone(),
                config.tools.ffprobe_path.clone(),
            )),
            thumbs: Arc::new(Thumbnailer::new(
                config.tools.ffmpeg_path.clone(),
                PathBuf::from("/tmp/mediaviewer-test-thumbs"),
            )),
            config,
            repo,
            store,
            heartbeat,
        }
    }

    pub fn vr_item(rel_path: &str, duration_ms: Option<i64>) -> NewMediaItem {
        let filename = rel_path.rsplit('/').next().unwrap().to_string();
        let (stem, ext) = filename.rsplit_once('.').unwrap();
        NewMediaItem {
            rel_path: rel_path.to_string(),
            filename: filename.clone(),
            title: stem.to_string(),
            ext: ext.to_string(),
            media_type: MediaType::Video,
            size_bytes: 1024,
            modified_ms: 1_700_000_000_000,
            duration_ms,
            width: None,
            height: None,
            has_funscript: false,
            funscript_action_count: None,
            funscript_avg_speed: None,
            is_vr: true,
            vr_fov: Some(180),
            vr_stereo: Some(mediaviewer_core::models::VrStereo::Sbs),
            vr_projection: None,
        }
    }
}
