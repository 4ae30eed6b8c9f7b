// Module: http
// HTTP/JSON API surface: catalog, sync, streaming and scan control

pub mod error;
pub mod media;
pub mod stream;
pub mod sync;

use axum::{
    http::{HeaderMap, HeaderValue},
    routing::{get, post},
    Json, Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;

use mediaviewer_core::{
    repository::MediaRepository,
    scanner::Scanner,
    sync::{HeartbeatInferrer, SyncStore},
    thumbs::Thumbnailer,
    Config,
};

pub use error::{AppError, AppResult};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub repo: MediaRepository,
    pub store: Arc<SyncStore>,
    pub heartbeat: Arc<HeartbeatInferrer>,
    pub scanner: Arc<Scanner>,
    pub thumbs: Arc<Thumbnailer>,
}

/// Create the HTTP router with all routes.
///
/// The VR adapter groups and `/thumb` are registered as explicit routes so
/// the static-UI fallback can never shadow them.
pub fn create_router(state: AppState) -> Router {
    let public_dir = state.config.server.public_dir.clone();
    let index = public_dir.join("index.html");

    let cors = match &state.config.server.cors_origin {
        Some(origin) => {
            let origin = origin
                .parse::<HeaderValue>()
                .unwrap_or_else(|_| HeaderValue::from_static("*"));
            CorsLayer::new()
                .allow_origin(origin)
                .allow_methods(Any)
                .allow_headers(Any)
        }
        None => CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    };

    Router::new()
        // Health check
        .route("/health", get(health_check))
        .route("/api/health", get(health_check))
        // Sync state
        .route("/api/sync", get(sync::get_sync).put(sync::put_sync))
        .route(
            "/api/playback",
            get(sync::get_playback).put(sync::put_playback),
        )
        // Scan control
        .route("/api/scan", post(sync::post_scan))
        .route("/api/scan/progress", get(sync::get_scan_progress))
        .route("/api/cache/clear", post(sync::post_cache_clear))
        // Media catalog
        .route("/api/media", get(media::list_media))
        .route("/api/media/:id", get(media::get_media))
        .route("/api/media/:id/stream", get(stream::stream_media))
        .route("/api/media/:id/thumb", get(media::get_thumb))
        .route("/api/media/:id/funscript", get(media::get_funscript))
        .route("/api/media/:id/fileinfo", get(media::get_fileinfo))
        .route("/api/media/:id/probe", get(media::probe_media))
        // WebSocket hub
        .route("/ws", get(crate::ws::ws_handler))
        // DeoVR dialect
        .route("/deovr", get(crate::vr::deovr::library).post(crate::vr::deovr::library))
        .route(
            "/deovr/video/:id",
            get(crate::vr::deovr::video).post(crate::vr::deovr::video),
        )
        // HereSphere dialect
        .route(
            "/heresphere",
            get(crate::vr::heresphere::library).post(crate::vr::heresphere::library),
        )
        .route(
            "/heresphere/video/:id",
            get(crate::vr::heresphere::video).post(crate::vr::heresphere::video),
        )
        .route("/heresphere/event", post(crate::vr::heresphere::event))
        .route(
            "/heresphere/auth",
            get(crate::vr::heresphere::auth).post(crate::vr::heresphere::auth),
        )
        .route(
            "/heresphere/scan",
            get(crate::vr::heresphere::scan).post(crate::vr::heresphere::scan),
        )
        // Placeholder thumbnails
        .route("/thumb/:id", get(crate::vr::placeholder_svg_handler))
        // Static UI + SPA catch-all
        .fallback_service(
            ServeDir::new(&public_dir)
                .append_index_html_on_directories(true)
                .not_found_service(ServeFile::new(index)),
        )
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Health check endpoint
async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "ok": true }))
}

/// Client IP, honoring the first `X-Forwarded-For` entry
pub fn client_ip(headers: &HeaderMap, addr: Option<&SocketAddr>) -> String {
    if let Some(forwarded) = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return forwarded.to_string();
    }
    addr.map_or_else(|| "unknown".to_string(), |a| a.ip().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_ip_prefers_first_forwarded_entry() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "10.0.0.7, 192.168.1.1".parse().unwrap());
        let addr: SocketAddr = "127.0.0.1:9999".parse().unwrap();
        assert_eq!(client_ip(&headers, Some(&addr)), "10.0.0.7");
    }

    #[test]
    fn test_client_ip_falls_back_to_peer() {
        let headers = HeaderMap::new();
        let addr: SocketAddr = "192.168.5.5:1234".parse().unwrap();
        assert_eq!(client_ip(&headers, Some(&addr)), "192.168.5.5");
        assert_eq!(client_ip(&headers, None), "unknown");
    }
}
