//! Byte-range media streaming
//!
//! Serves catalog files with single-range HTTP semantics, an optional
//! on-demand H.264 transcode for desktop compatibility, and the DeoVR
//! heartbeat hook: requests from a VR user agent are reported to the
//! inferrer, and their body streams report every written chunk and the
//! final teardown.

use axum::{
    body::Body,
    extract::{ConnectInfo, Path, Query, State},
    http::{header, HeaderMap, Method, Response, StatusCode},
};
use bytes::Bytes;
use futures::Stream;
use serde::Deserialize;
use std::io::SeekFrom;
use std::net::SocketAddr;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncSeekExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

use mediaviewer_core::models::{MediaItem, MediaType, DEFAULT_SESSION};
use mediaviewer_core::sync::HeartbeatInferrer;

use crate::http::{client_ip, AppError, AppResult, AppState};

/// Parsed `Range` header for a file of known size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeSpec {
    /// No (parseable) range: serve the whole file
    Full,
    /// Clamped inclusive byte range
    Satisfiable { start: u64, end: u64 },
    /// Syntactically valid but outside the file
    Unsatisfiable,
}

/// Parse a single-range `bytes=start-end?` header, clamping to `[0, size-1]`.
///
/// Anything that does not match that single form is treated as "no range";
/// a start at or past the file end is unsatisfiable.
#[must_use]
pub fn parse_range(header: Option<&str>, size: u64) -> RangeSpec {
    let Some(raw) = header else {
        return RangeSpec::Full;
    };
    let Some(spec) = raw.trim().strip_prefix("bytes=") else {
        return RangeSpec::Full;
    };
    // Single range only; multipart ranges are not supported
    if spec.contains(',') {
        return RangeSpec::Full;
    }
    let Some((start_raw, end_raw)) = spec.split_once('-') else {
        return RangeSpec::Full;
    };
    let Ok(start) = start_raw.trim().parse::<u64>() else {
        return RangeSpec::Full;
    };

    if size == 0 || start >= size {
        return RangeSpec::Unsatisfiable;
    }

    let end = match end_raw.trim() {
        "" => size - 1,
        raw => match raw.parse::<u64>() {
            Ok(end) => end.min(size - 1),
            Err(_) => return RangeSpec::Full,
        },
    };

    if end < start {
        return RangeSpec::Unsatisfiable;
    }

    RangeSpec::Satisfiable { start, end }
}

/// Content-Type from the explicit extension map, then a library sniff,
/// then `application/octet-stream`.
#[must_use]
pub fn content_type_for(item: &MediaItem) -> String {
    match item.ext.as_str() {
        "mp4" | "m4v" => "video/mp4".to_string(),
        "mov" => "video/quicktime".to_string(),
        "mkv" => "video/x-matroska".to_string(),
        "webm" => "video/webm".to_string(),
        "avi" => "video/x-msvideo".to_string(),
        "jpg" | "jpeg" => "image/jpeg".to_string(),
        "png" => "image/png".to_string(),
        "gif" => "image/gif".to_string(),
        "webp" => "image/webp".to_string(),
        "bmp" => "image/bmp".to_string(),
        _ => mime_guess::from_path(&item.filename)
            .first()
            .map_or_else(|| "application/octet-stream".to_string(), |m| m.to_string()),
    }
}

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    pub transcode: Option<String>,
    #[serde(rename = "mvFrom")]
    pub mv_from: Option<String>,
    #[serde(rename = "sessionId")]
    pub session_id: Option<String>,
}

/// Does this request come from a DeoVR player (and not the desktop shell)?
fn is_deovr_request(user_agent: &str, query: &StreamQuery, ua_token: &str) -> bool {
    if query.mv_from.as_deref() == Some("desktop") {
        return false;
    }
    user_agent.to_ascii_lowercase().contains(ua_token)
        || query.mv_from.as_deref() == Some("deovr")
}

pub async fn stream_media(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<StreamQuery>,
    method: Method,
    headers: HeaderMap,
    connect_info: Option<ConnectInfo<SocketAddr>>,
) -> AppResult<Response<Body>> {
    let item = state
        .repo
        .get(&id.clone().into())
        .await?
        .ok_or_else(|| AppError::not_found("Media not found"))?;

    let abs_path = state.config.media.root.join(&item.rel_path);
    let metadata = tokio::fs::metadata(&abs_path)
        .await
        .map_err(|_| AppError::not_found("Media file missing on disk"))?;
    let size = metadata.len();

    // Desktop compatibility path: remux through ffmpeg, no range support
    if query.transcode.as_deref() == Some("h264") && item.media_type == MediaType::Video {
        return transcode_response(&state.config.tools.ffmpeg_path, &abs_path);
    }

    let content_type = content_type_for(&item);
    let range = parse_range(
        headers.get(header::RANGE).and_then(|v| v.to_str().ok()),
        size,
    );

    if range == RangeSpec::Unsatisfiable {
        return Ok(Response::builder()
            .status(StatusCode::RANGE_NOT_SATISFIABLE)
            .header(header::CONTENT_RANGE, format!("bytes */{size}"))
            .header(header::CONTENT_TYPE, content_type)
            .header(header::CONTENT_DISPOSITION, "inline")
            .header(header::ACCEPT_RANGES, "bytes")
            .header(header::CACHE_CONTROL, "no-store")
            .body(Body::empty())?);
    }

    let (status, start, end) = match range {
        RangeSpec::Full => (StatusCode::OK, 0, size.saturating_sub(1)),
        RangeSpec::Satisfiable { start, end } => (StatusCode::PARTIAL_CONTENT, start, end),
        RangeSpec::Unsatisfiable => unreachable!(),
    };
    let content_length = if size == 0 { 0 } else { end - start + 1 };

    let mut builder = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CONTENT_DISPOSITION, "inline")
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::CACHE_CONTROL, "no-store")
        .header(header::CONTENT_LENGTH, content_length);
    if status == StatusCode::PARTIAL_CONTENT {
        builder = builder.header(header::CONTENT_RANGE, format!("bytes {start}-{end}/{size}"));
    }

    if method == Method::HEAD {
        return Ok(builder.body(Body::empty())?);
    }

    let mut file = tokio::fs::File::open(&abs_path)
        .await
        .map_err(|_| AppError::not_found("Media file missing on disk"))?;
    if start > 0 {
        file.seek(SeekFrom::Start(start))
            .await
            .map_err(|e| AppError::internal_server_error(format!("seek failed: {e}")))?;
    }
    let reader = file.take(content_length);
    let stream = ReaderStream::new(reader);

    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if is_deovr_request(user_agent, &query, &state.config.tools.deovr_ua_token) {
        let session_id = query
            .session_id
            .clone()
            .unwrap_or_else(|| DEFAULT_SESSION.to_string());
        let client_key = client_ip(&headers, connect_info.as_ref().map(|c| &c.0));

        state
            .heartbeat
            .on_request(&session_id, &client_key, item.id.as_str());

        let observed = HeartbeatStream {
            inner: stream,
            heartbeat: Arc::clone(&state.heartbeat),
            session_id,
            client_key,
        };
        return Ok(builder.body(Body::from_stream(observed))?);
    }

    Ok(builder.body(Body::from_stream(stream))?)
}

/// Wraps a body stream so the heartbeat inferrer observes written bytes and
/// the response teardown.
struct HeartbeatStream<S> {
    inner: S,
    heartbeat: Arc<HeartbeatInferrer>,
    session_id: String,
    client_key: String,
}

impl<S> Stream for HeartbeatStream<S>
where
    S: Stream<Item = std::io::Result<Bytes>> + Unpin,
{
    type Item = std::io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        let polled = Pin::new(&mut this.inner).poll_next(cx);
        if let Poll::Ready(Some(Ok(_))) = &polled {
            this.heartbeat.on_data(&this.session_id, &this.client_key);
        }
        polled
    }
}

impl<S> Drop for HeartbeatStream<S> {
    fn drop(&mut self) {
        self.heartbeat.on_close(&self.session_id, &self.client_key);
    }
}

/// Spawn ffmpeg producing fragmented MP4 on stdout and stream it out.
///
/// The child is killed when the response body is dropped.
fn transcode_response(ffmpeg_path: &str, source: &std::path::Path) -> AppResult<Response<Body>> {
    let mut child = Command::new(ffmpeg_path)
        .arg("-v")
        .arg("error")
        .arg("-i")
        .arg(source)
        .arg("-c:v")
        .arg("libx264")
        .arg("-preset")
        .arg("veryfast")
        .arg("-crf")
        .arg("23")
        .arg("-pix_fmt")
        .arg("yuv420p")
        .arg("-c:a")
        .arg("aac")
        .arg("-b:a")
        .arg("160k")
        .arg("-movflags")
        .arg("frag_keyframe+empty_moov+default_base_moof")
        .arg("-f")
        .arg("mp4")
        .arg("pipe:1")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| AppError::internal_server_error(format!("ffmpeg spawn failed: {e}")))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::internal_server_error("ffmpeg stdout unavailable"))?;

    // Drain stderr so the child never blocks on a full pipe
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(target: "transcode", "{line}");
            }
        });
    }

    let stream = TranscodeStream {
        inner: ReaderStream::new(stdout),
        child,
    };

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "video/mp4")
        .header(header::CONTENT_DISPOSITION, "inline")
        .header(header::CACHE_CONTROL, "no-store")
        .body(Body::from_stream(stream))?)
}

struct TranscodeStream {
    inner: ReaderStream<ChildStdout>,
    child: Child,
}

impl Stream for TranscodeStream {
    type Item = std::io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

impl Drop for TranscodeStream {
    fn drop(&mut self) {
        if let Err(e) = self.child.start_kill() {
            warn!(error = %e, "Failed to kill transcode child");
        }
    }
}
