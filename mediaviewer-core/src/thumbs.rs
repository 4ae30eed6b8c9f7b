//! Thumbnail generation via ffmpeg frame grabs
//!
//! Results are cached on disk keyed by media id. Failures leave a marker
//! file honored for fifteen minutes so a broken source is not re-probed on
//! every gallery render.

use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::{Error, Result};

/// How long a recorded failure suppresses retries
const FAIL_MARKER_TTL: Duration = Duration::from_secs(15 * 60);
/// Seek offset into videos before grabbing the frame
const VIDEO_SEEK_SECONDS: u32 = 3;
/// Output width; height follows the aspect ratio
const THUMB_WIDTH: u32 = 480;

pub struct Thumbnailer {
    ffmpeg_path: String,
    cache_dir: PathBuf,
}

impl Thumbnailer {
    #[must_use]
    pub fn new(ffmpeg_path: String, cache_dir: PathBuf) -> Self {
        Self {
            ffmpeg_path,
            cache_dir,
        }
    }

    #[must_use]
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Produce (or reuse) a JPEG thumbnail for a media file.
    ///
    /// Returns the cached file path. A recent failure short-circuits with an
    /// error until its marker expires.
    pub async fn thumbnail(&self, media_id: &str, source: &Path, is_video: bool) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.cache_dir).await?;

        let output = self.cache_dir.join(format!("{media_id}.jpg"));
        if tokio::fs::try_exists(&output).await.unwrap_or(false) {
            return Ok(output);
        }

        let marker = self.cache_dir.join(format!("{media_id}.fail"));
        if marker_is_fresh(&marker).await {
            return Err(Error::External(
                "thumbnail generation failed recently, not retrying yet".to_string(),
            ));
        }

        let mut cmd = Command::new(&self.ffmpeg_path);
        cmd.arg("-v").arg("error");
        if is_video {
            cmd.arg("-ss").arg(VIDEO_SEEK_SECONDS.to_string());
        }
        cmd.arg("-i")
            .arg(source)
            .arg("-frames:v")
            .arg("1")
            .arg("-vf")
            .arg(format!("scale={THUMB_WIDTH}:-2"))
            .arg("-q:v")
            .arg("5")
            .arg("-y")
            .arg(&output);

        let result = cmd.output().await;
        let failed = match &result {
            Ok(out) if out.status.success() => !tokio::fs::try_exists(&output).await.unwrap_or(false),
            Ok(out) => {
                warn!(
                    media_id,
                    status = %out.status,
                    stderr = %String::from_utf8_lossy(&out.stderr).trim(),
                    "ffmpeg thumbnail grab failed"
                );
                true
            }
            Err(e) => {
                warn!(media_id, error = %e, "ffmpeg spawn failed");
                true
            }
        };

        if failed {
            if let Err(e) = tokio::fs::write(&marker, b"").await {
                debug!(media_id, error = %e, "Could not write thumbnail fail marker");
            }
            return Err(Error::External(format!(
                "thumbnail generation failed for {media_id}"
            )));
        }

        Ok(output)
    }

    /// Recursively delete the thumbnail cache directory
    pub async fn clear_cache(&self) -> Result<()> {
        match tokio::fs::remove_dir_all(&self.cache_dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Io(e)),
        }
    }
}

async fn marker_is_fresh(marker: &Path) -> bool {
    let Ok(metadata) = tokio::fs::metadata(marker).await else {
        return false;
    };
    metadata
        .modified()
        .ok()
        .and_then(|t| t.elapsed().ok())
        .is_some_and(|age| age < FAIL_MARKER_TTL)
}

#[cfg(test)]
mod tests {
    use super::*;

    const NO_FFMPEG: &str = "/nonexistent/ffmpeg-bin";

    #[tokio::test]
    async fn test_failure_writes_marker_and_suppresses_retry() {
        let dir = tempfile::tempdir().unwrap();
        let thumbs = Thumbnailer::new(NO_FFMPEG.to_string(), dir.path().join("cache"));

        let source = dir.path().join("clip.mp4");
        tokio::fs::write(&source, b"x").await.unwrap();

        let err = thumbs.thumbnail("abc", &source, true).await.unwrap_err();
        assert!(matches!(err, Error::External(_)));
        assert!(dir.path().join("cache/abc.fail").exists());

        // Marker short-circuits the second attempt
        let err = thumbs.thumbnail("abc", &source, true).await.unwrap_err();
        assert!(err.to_string().contains("recently"));
    }

    #[tokio::test]
    async fn test_cached_thumbnail_is_reused() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("cache");
        tokio::fs::create_dir_all(&cache).await.unwrap();
        tokio::fs::write(cache.join("xyz.jpg"), b"jpeg bytes").await.unwrap();

        let thumbs = Thumbnailer::new(NO_FFMPEG.to_string(), cache.clone());
        let path = thumbs
            .thumbnail("xyz", Path::new("/does/not/matter.mp4"), true)
            .await
            .unwrap();
        assert_eq!(path, cache.join("xyz.jpg"));
    }

    #[tokio::test]
    async fn test_clear_cache_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("cache");
        let thumbs = Thumbnailer::new(NO_FFMPEG.to_string(), cache.clone());

        tokio::fs::create_dir_all(&cache).await.unwrap();
        tokio::fs::write(cache.join("a.jpg"), b"x").await.unwrap();

        thumbs.clear_cache().await.unwrap();
        assert!(!cache.exists());
        // Second clear on a missing dir is fine
        thumbs.clear_cache().await.unwrap();
    }
}
