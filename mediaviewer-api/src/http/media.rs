//! Media catalog HTTP API
//!
//! Paginated search plus the per-item companions: metadata, on-demand probe,
//! funscript sidecar and thumbnails.

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, Response, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;

use mediaviewer_core::models::{MediaFilters, MediaItem, MediaSort, MediaType, PageParams};
use mediaviewer_core::{funscript, scanner};

use crate::http::{AppError, AppResult, AppState};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaListQuery {
    pub query: Option<String>,
    pub media_type: Option<String>,
    pub has_funscript: Option<bool>,
    pub is_vr: Option<bool>,
    pub min_duration_ms: Option<i64>,
    pub max_duration_ms: Option<i64>,
    pub min_speed: Option<f64>,
    pub max_speed: Option<f64>,
    pub min_width: Option<i64>,
    pub max_width: Option<i64>,
    pub min_height: Option<i64>,
    pub max_height: Option<i64>,
    pub sort: Option<String>,
    pub dir: Option<String>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

fn closed_range<T: Copy>(min: Option<T>, max: Option<T>, floor: T, ceiling: T) -> Option<(T, T)> {
    if min.is_none() && max.is_none() {
        return None;
    }
    Some((min.unwrap_or(floor), max.unwrap_or(ceiling)))
}

impl MediaListQuery {
    fn filters(&self) -> AppResult<MediaFilters> {
        let media_type = self
            .media_type
            .as_deref()
            .map(|raw| raw.parse::<MediaType>().map_err(AppError::bad_request))
            .transpose()?;

        Ok(MediaFilters {
            query: self.query.clone().filter(|q| !q.is_empty()),
            media_type,
            has_funscript: self.has_funscript,
            is_vr: self.is_vr,
            duration_ms: closed_range(self.min_duration_ms, self.max_duration_ms, 0, i64::MAX),
            funscript_avg_speed: closed_range(self.min_speed, self.max_speed, 0.0, f64::MAX),
            width: closed_range(self.min_width, self.max_width, 0, i64::MAX),
            height: closed_range(self.min_height, self.max_height, 0, i64::MAX),
        })
    }

    fn sort(&self) -> AppResult<MediaSort> {
        let mut sort = MediaSort::default();
        if let Some(field) = self.sort.as_deref() {
            sort.field = field.parse().map_err(AppError::bad_request)?;
        }
        if let Some(dir) = self.dir.as_deref() {
            sort.dir = dir.parse().map_err(AppError::bad_request)?;
        }
        Ok(sort)
    }
}

/// Paginated catalog search
pub async fn list_media(
    State(state): State<AppState>,
    Query(query): Query<MediaListQuery>,
) -> AppResult<impl IntoResponse> {
    let filters = query.filters()?;
    let sort = query.sort()?;
    let page = PageParams::new(query.page, query.page_size);

    let result = state.repo.search(&filters, sort, page).await?;
    Ok(Json(result))
}

pub async fn get_media(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<MediaItem>> {
    let item = state
        .repo
        .get(&id.into())
        .await?
        .ok_or_else(|| AppError::not_found("Media not found"))?;
    Ok(Json(item))
}

/// Catalog row plus a live stat of the backing file
pub async fn get_fileinfo(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let item = state
        .repo
        .get(&id.into())
        .await?
        .ok_or_else(|| AppError::not_found("Media not found"))?;

    let abs_path = state.config.media.root.join(&item.rel_path);
    let stat = tokio::fs::metadata(&abs_path).await.ok();

    Ok(Json(serde_json::json!({
        "item": item,
        "exists": stat.is_some(),
        "sizeBytes": stat.as_ref().map(std::fs::Metadata::len),
        "modifiedMs": stat
            .as_ref()
            .and_then(|m| m.modified().ok())
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as i64),
    })))
}

/// On-demand ffprobe of the backing file
pub async fn probe_media(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let item = state
        .repo
        .get(&id.into())
        .await?
        .ok_or_else(|| AppError::not_found("Media not found"))?;

    let abs_path = state.config.media.root.join(&item.rel_path);
    let probed = scanner::probe_file(&state.config.tools.ffprobe_path, &abs_path).await?;
    Ok(Json(probed))
}

/// Sidecar funscript passthrough, 404 when absent
pub async fn get_funscript(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let item = state
        .repo
        .get(&id.into())
        .await?
        .ok_or_else(|| AppError::not_found("Media not found"))?;

    let abs_path = state.config.media.root.join(&item.rel_path);
    let script = tokio::task::spawn_blocking(move || funscript::load_sidecar(&abs_path))
        .await
        .map_err(|e| AppError::internal_server_error(format!("sidecar read failed: {e}")))??
        .ok_or_else(|| AppError::not_found("No funscript for this media"))?;

    Ok(Json(script))
}

/// Cached thumbnail; on generator failure, a 302 to the placeholder SVG
pub async fn get_thumb(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Response<Body>> {
    let item = state
        .repo
        .get(&id.clone().into())
        .await?
        .ok_or_else(|| AppError::not_found("Media not found"))?;

    let abs_path = state.config.media.root.join(&item.rel_path);
    let is_video = item.media_type == MediaType::Video;

    match state
        .thumbs
        .thumbnail(item.id.as_str(), &abs_path, is_video)
        .await
    {
        Ok(thumb_path) => {
            let bytes = tokio::fs::read(&thumb_path)
                .await
                .map_err(|e| AppError::internal_server_error(format!("thumb read failed: {e}")))?;
            Ok(Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, "image/jpeg")
                .header(header::CACHE_CONTROL, "public, max-age=86400")
                .body(Body::from(bytes))?)
        }
        Err(_) => Ok(Response::builder()
            .status(StatusCode::FOUND)
            .header(header::LOCATION, format!("/thumb/{id}.svg?err=1"))
            .body(Body::empty())?),
    }
}
