//! Media tree scanner
//!
//! `rescan` walks the media root, probes video containers, classifies VR,
//! records funscript sidecar stats and upserts the catalog, then deletes rows
//! whose files vanished from disk. Exactly one scan runs at a time.

pub mod classify;
pub mod probe;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use crate::models::{MediaType, NewMediaItem};
use crate::repository::MediaRepository;
use crate::{funscript, Error, Result};

pub use probe::{probe_file, ProbeResult};

const VIDEO_EXTENSIONS: &[&str] = &["mp4", "m4v", "mov", "mkv", "webm", "avi"];
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp", "bmp"];

/// How many `stat`s run concurrently during cleanup
const CLEANUP_CONCURRENCY: usize = 32;
/// Rows deleted per cleanup statement
const DELETE_CHUNK: usize = 500;
/// Progress is reported every this many files
const PROGRESS_EVERY: u64 = 10;

/// Scan status exposed over HTTP
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanProgress {
    pub is_scanning: bool,
    pub scanned: u64,
    pub message: String,
}

impl Default for ScanProgress {
    fn default() -> Self {
        Self {
            is_scanning: false,
            scanned: 0,
            message: "idle".to_string(),
        }
    }
}

/// One walkable media file, collected by the blocking walk pass
struct FoundFile {
    abs_path: PathBuf,
    rel_path: String,
    filename: String,
    title: String,
    ext: String,
    media_type: MediaType,
    size_bytes: i64,
    modified_ms: i64,
    funscript_action_count: Option<i64>,
    funscript_avg_speed: Option<f64>,
    has_funscript: bool,
}

pub struct Scanner {
    repo: MediaRepository,
    media_root: PathBuf,
    ffprobe_path: String,
    scanning: AtomicBool,
    progress: Arc<Mutex<ScanProgress>>,
}

impl Scanner {
    #[must_use]
    pub fn new(repo: MediaRepository, media_root: PathBuf, ffprobe_path: String) -> Self {
        Self {
            repo,
            media_root,
            ffprobe_path,
            scanning: AtomicBool::new(false),
            progress: Arc::new(Mutex::new(ScanProgress::default())),
        }
    }

    #[must_use]
    pub fn progress(&self) -> ScanProgress {
        self.progress.lock().expect("progress lock").clone()
    }

    #[must_use]
    pub fn is_scanning(&self) -> bool {
        self.scanning.load(Ordering::SeqCst)
    }

    fn report(&self, scanned: u64, message: impl Into<String>) {
        let mut progress = self.progress.lock().expect("progress lock");
        progress.scanned = scanned;
        progress.message = message.into();
    }

    /// Walk the media root and reconcile the catalog with what is on disk.
    ///
    /// Returns the number of indexed files. A second call while one is
    /// running fails with [`Error::Busy`].
    pub async fn rescan(&self) -> Result<u64> {
        if self
            .scanning
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::Busy("scan already in progress".to_string()));
        }
        self.progress.lock().expect("progress lock").is_scanning = true;

        let result = self.run().await;

        let mut progress = self.progress.lock().expect("progress lock");
        progress.is_scanning = false;
        if let Err(e) = &result {
            progress.message = format!("scan failed: {e}");
        }
        drop(progress);
        self.scanning.store(false, Ordering::SeqCst);

        result
    }

    async fn run(&self) -> Result<u64> {
        self.report(0, "Walking media tree");

        let root = self.media_root.clone();
        let progress = Arc::clone(&self.progress);
        let found = tokio::task::spawn_blocking(move || walk_media_root(&root, &progress))
            .await
            .map_err(|e| Error::Internal(format!("scan walk task failed: {e}")))??;

        info!(files = found.len(), "Media walk complete, indexing");

        let mut scanned: u64 = 0;
        for file in found {
            let item = self.build_item(file).await;
            self.repo.upsert(&item).await?;
            scanned += 1;
            if scanned % PROGRESS_EVERY == 0 {
                self.report(scanned, "Indexing media");
            }
        }

        let removed = self.cleanup(scanned).await?;

        info!(scanned, removed, "Scan complete");
        self.report(scanned, format!("Scan complete: {scanned} files, {removed} removed"));
        Ok(scanned)
    }

    async fn build_item(&self, file: FoundFile) -> NewMediaItem {
        let mut item = NewMediaItem {
            rel_path: file.rel_path,
            filename: file.filename,
            title: file.title,
            ext: file.ext,
            media_type: file.media_type,
            size_bytes: file.size_bytes,
            modified_ms: file.modified_ms,
            duration_ms: None,
            width: None,
            height: None,
            has_funscript: file.has_funscript,
            funscript_action_count: file.funscript_action_count,
            funscript_avg_speed: file.funscript_avg_speed,
            is_vr: false,
            vr_fov: None,
            vr_stereo: None,
            vr_projection: None,
        };

        if item.media_type != MediaType::Video {
            return item;
        }

        let probed = match probe::probe_file(&self.ffprobe_path, &file.abs_path).await {
            Ok(probed) => Some(probed),
            Err(e) => {
                debug!(path = %file.abs_path.display(), error = %e, "Probe failed, continuing without metadata");
                None
            }
        };

        if let Some(probed) = &probed {
            item.duration_ms = probed.duration_ms;
            item.width = probed.width;
            item.height = probed.height;
        }

        // Probe side-data wins; heuristics only apply when it says nothing
        if let Some(vr) = probed.as_ref().and_then(|p| p.vr.clone()) {
            item.is_vr = true;
            item.vr_fov = vr.fov.or(Some(360));
            item.vr_stereo = vr.stereo;
            item.vr_projection = vr.projection;
            return item;
        }

        if let (Some(width), Some(height)) = (item.width, item.height) {
            let by_dimensions = classify::classify_dimensions(width, height);
            if by_dimensions.is_vr {
                item.is_vr = true;
                item.vr_fov = by_dimensions.fov;
                // Layout still comes from naming when the geometry matched
                item.vr_stereo = classify::classify_tokens(&item.rel_path).stereo;
                return item;
            }
        }

        let by_tokens = classify::classify_tokens(&item.rel_path);
        if by_tokens.is_vr {
            item.is_vr = true;
            item.vr_fov = by_tokens.fov;
            item.vr_stereo = by_tokens.stereo;
        }

        item
    }

    /// Delete catalog rows whose files are gone, with bounded-concurrency
    /// stats. Permission errors count as "present" so a transient ACL problem
    /// cannot mass-delete the catalog.
    async fn cleanup(&self, scanned: u64) -> Result<u64> {
        self.report(scanned, "Checking for removed files");

        let rel_paths = self.repo.list_rel_paths().await?;
        let root = self.media_root.clone();

        let missing: Vec<String> = stream::iter(rel_paths.into_iter().map(|rel| {
            let abs = root.join(&rel);
            async move {
                match tokio::fs::metadata(&abs).await {
                    Ok(_) => None,
                    Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => None,
                    Err(_) => Some(rel),
                }
            }
        }))
        .buffer_unordered(CLEANUP_CONCURRENCY)
        .filter_map(futures::future::ready)
        .collect()
        .await;

        let mut removed: u64 = 0;
        for chunk in missing.chunks(DELETE_CHUNK) {
            removed += self.repo.delete_by_rel_paths(chunk).await?;
            self.report(scanned, format!("Removed {removed} vanished files"));
        }

        Ok(removed)
    }
}

fn classify_extension(ext: &str) -> Option<MediaType> {
    if VIDEO_EXTENSIONS.contains(&ext) {
        Some(MediaType::Video)
    } else if IMAGE_EXTENSIONS.contains(&ext) {
        Some(MediaType::Image)
    } else {
        None
    }
}

/// Recursive blocking walk of the media root
fn walk_media_root(root: &Path, progress: &Mutex<ScanProgress>) -> Result<Vec<FoundFile>> {
    let mut found = Vec::new();
    walk_directory(root, root, progress, &mut found)?;
    Ok(found)
}

fn walk_directory(
    root: &Path,
    dir: &Path,
    progress: &Mutex<ScanProgress>,
    found: &mut Vec<FoundFile>,
) -> Result<()> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(path = %dir.display(), error = %e, "Skipping unreadable directory");
            return Ok(());
        }
    };

    for entry in entries {
        let entry = entry?;
        let path = entry.path();

        if path.is_dir() {
            walk_directory(root, &path, progress, found)?;
            continue;
        }
        if !path.is_file() {
            continue;
        }

        let Some(file) = inspect_file(root, &path) else {
            continue;
        };
        found.push(file);

        if found.len() as u64 % PROGRESS_EVERY == 0 {
            let mut p = progress.lock().expect("progress lock");
            p.scanned = found.len() as u64;
            p.message = "Walking media tree".to_string();
        }
    }

    Ok(())
}

fn inspect_file(root: &Path, path: &Path) -> Option<FoundFile> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    let media_type = classify_extension(&ext)?;

    let rel = path.strip_prefix(root).ok()?;
    let mut segments = Vec::new();
    for component in rel.components() {
        let segment = component.as_os_str().to_str()?;
        if segment == ".." {
            return None;
        }
        segments.push(segment);
    }
    let rel_path = segments.join("/");

    let metadata = match std::fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "stat failed, skipping");
            return None;
        }
    };
    let modified_ms = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map_or(0, |d| d.as_millis() as i64);

    let filename = path.file_name()?.to_str()?.to_string();
    let title = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(&filename)
        .to_string();

    let mut file = FoundFile {
        abs_path: path.to_path_buf(),
        rel_path,
        filename,
        title,
        ext,
        media_type,
        size_bytes: metadata.len() as i64,
        modified_ms,
        funscript_action_count: None,
        funscript_avg_speed: None,
        has_funscript: false,
    };

    if media_type == MediaType::Video {
        match funscript::load_sidecar(path) {
            Ok(Some(script)) => {
                file.has_funscript = true;
                file.funscript_action_count = Some(script.action_count());
                file.funscript_avg_speed = script.avg_speed();
            }
            Ok(None) => {}
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Unreadable funscript sidecar, ignoring");
            }
        }
    }

    Some(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::VrStereo;
    use sqlx::SqlitePool;

    const NO_FFPROBE: &str = "/nonexistent/ffprobe-bin";

    async fn test_scanner(root: &Path) -> Scanner {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        let repo = MediaRepository::new(pool);
        repo.init_schema().await.unwrap();
        Scanner::new(repo, root.to_path_buf(), NO_FFPROBE.to_string())
    }

    #[tokio::test]
    async fn test_rescan_indexes_media_and_skips_others() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("movie.mp4"), b"fake video").unwrap();
        std::fs::write(dir.path().join("photo.jpg"), b"fake image").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"not media").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/clip.webm"), b"fake video").unwrap();

        let scanner = test_scanner(dir.path()).await;
        let scanned = scanner.rescan().await.unwrap();
        assert_eq!(scanned, 3);

        let item = scanner
            .repo
            .get_by_rel_path("sub/clip.webm")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(item.media_type, MediaType::Video);
        assert_eq!(item.title, "clip");
        assert!(scanner.repo.get_by_rel_path("notes.txt").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rescan_classifies_vr_by_tokens() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("movie_LR_180.mp4"), b"x").unwrap();
        std::fs::write(dir.path().join("vacation.mp4"), b"x").unwrap();

        let scanner = test_scanner(dir.path()).await;
        scanner.rescan().await.unwrap();

        let vr = scanner
            .repo
            .get_by_rel_path("movie_LR_180.mp4")
            .await
            .unwrap()
            .unwrap();
        assert!(vr.is_vr);
        assert_eq!(vr.vr_fov, Some(180));
        assert_eq!(vr.vr_stereo, Some(VrStereo::Sbs));

        let flat = scanner
            .repo
            .get_by_rel_path("vacation.mp4")
            .await
            .unwrap()
            .unwrap();
        assert!(!flat.is_vr);
    }

    #[tokio::test]
    async fn test_rescan_picks_up_funscript_stats() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ride.mp4"), b"x").unwrap();
        std::fs::write(
            dir.path().join("ride.funscript"),
            r#"{"actions":[{"at":0,"pos":0},{"at":1000,"pos":100}]}"#,
        )
        .unwrap();

        let scanner = test_scanner(dir.path()).await;
        scanner.rescan().await.unwrap();

        let item = scanner.repo.get_by_rel_path("ride.mp4").await.unwrap().unwrap();
        assert!(item.has_funscript);
        assert_eq!(item.funscript_action_count, Some(2));
        assert_eq!(item.funscript_avg_speed, Some(100.0));
    }

    #[tokio::test]
    async fn test_rescan_cleanup_removes_vanished_rows() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.mp4"), b"x").unwrap();

        let scanner = test_scanner(dir.path()).await;

        // A row whose file never existed on disk
        scanner
            .repo
            .upsert(&NewMediaItem {
                rel_path: "b.mp4".to_string(),
                filename: "b.mp4".to_string(),
                title: "b".to_string(),
                ext: "mp4".to_string(),
                media_type: MediaType::Video,
                size_bytes: 1,
                modified_ms: 0,
                duration_ms: None,
                width: None,
                height: None,
                has_funscript: false,
                funscript_action_count: None,
                funscript_avg_speed: None,
                is_vr: false,
                vr_fov: None,
                vr_stereo: None,
                vr_projection: None,
            })
            .await
            .unwrap();

        scanner.rescan().await.unwrap();

        assert!(scanner.repo.get_by_rel_path("a.mp4").await.unwrap().is_some());
        assert!(scanner.repo.get_by_rel_path("b.mp4").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_second_scan_while_running_is_busy() {
        let dir = tempfile::tempdir().unwrap();
        let scanner = test_scanner(dir.path()).await;

        scanner.scanning.store(true, Ordering::SeqCst);
        assert!(matches!(scanner.rescan().await, Err(Error::Busy(_))));
        scanner.scanning.store(false, Ordering::SeqCst);

        assert_eq!(scanner.rescan().await.unwrap(), 0);
        let progress = scanner.progress();
        assert!(!progress.is_scanning);
        assert!(progress.message.contains("Scan complete"));
    }
}
