//! Funscript sidecar loading and statistics
//!
//! For `<stem>.<ext>` the haptic script lives at `<stem>.funscript` in the
//! same directory: JSON of shape `{version?, inverted?, range?, actions:[{at,pos}]}`
//! with actions sorted by `at`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::{Error, Result};

/// One haptic command: position 0..100 at `at` milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunscriptAction {
    pub at: i64,
    pub pos: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Funscript {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inverted: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range: Option<i64>,
    #[serde(default)]
    pub actions: Vec<FunscriptAction>,
}

impl Funscript {
    /// Number of actions in the script
    #[must_use]
    pub fn action_count(&self) -> i64 {
        self.actions.len() as i64
    }

    /// Average stroke speed in percent-of-range per second:
    /// `Σ|Δpos| / Σ|Δt| × 1000`, skipping non-positive Δt pairs.
    #[must_use]
    pub fn avg_speed(&self) -> Option<f64> {
        let mut total_pos: f64 = 0.0;
        let mut total_ms: f64 = 0.0;

        for pair in self.actions.windows(2) {
            let dt = pair[1].at - pair[0].at;
            if dt <= 0 {
                continue;
            }
            total_pos += (pair[1].pos - pair[0].pos).abs() as f64;
            total_ms += dt as f64;
        }

        if total_ms > 0.0 {
            Some(total_pos / total_ms * 1000.0)
        } else {
            None
        }
    }
}

/// Sidecar path for a media file: same directory, same stem, `.funscript`
#[must_use]
pub fn sidecar_path(media_path: &Path) -> PathBuf {
    media_path.with_extension("funscript")
}

/// Load the sidecar script for a media file, if present.
///
/// A missing file is `Ok(None)`; an unreadable or malformed one is an error
/// the caller is expected to degrade on.
pub fn load_sidecar(media_path: &Path) -> Result<Option<Funscript>> {
    let path = sidecar_path(media_path);
    let raw = match std::fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(Error::Io(e)),
    };

    let script: Funscript = serde_json::from_str(&raw)?;
    Ok(Some(script))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn script(actions: &[(i64, i64)]) -> Funscript {
        Funscript {
            version: None,
            inverted: None,
            range: None,
            actions: actions
                .iter()
                .map(|&(at, pos)| FunscriptAction { at, pos })
                .collect(),
        }
    }

    #[test]
    fn test_avg_speed_simple() {
        // 0→100 over one second: 100 %/s
        let s = script(&[(0, 0), (1000, 100)]);
        assert_eq!(s.avg_speed(), Some(100.0));
    }

    #[test]
    fn test_avg_speed_skips_non_positive_dt() {
        // The duplicate timestamp pair contributes nothing
        let s = script(&[(0, 0), (1000, 100), (1000, 0), (2000, 100)]);
        assert_eq!(s.avg_speed(), Some(100.0));
    }

    #[test]
    fn test_avg_speed_empty_and_single() {
        assert_eq!(script(&[]).avg_speed(), None);
        assert_eq!(script(&[(0, 50)]).avg_speed(), None);
    }

    #[test]
    fn test_sidecar_path() {
        let p = sidecar_path(Path::new("/media/vr/clip_180_LR.mp4"));
        assert_eq!(p, Path::new("/media/vr/clip_180_LR.funscript"));
    }

    #[test]
    fn test_load_sidecar_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let media = dir.path().join("a.mp4");
        assert!(load_sidecar(&media).unwrap().is_none());
    }

    #[test]
    fn test_load_sidecar_parses() {
        let dir = tempfile::tempdir().unwrap();
        let media = dir.path().join("a.mp4");
        std::fs::write(
            dir.path().join("a.funscript"),
            r#"{"version":"1.0","actions":[{"at":0,"pos":10},{"at":500,"pos":90}]}"#,
        )
        .unwrap();

        let script = load_sidecar(&media).unwrap().unwrap();
        assert_eq!(script.action_count(), 2);
        assert_eq!(script.version.as_deref(), Some("1.0"));
    }

    #[test]
    fn test_load_sidecar_malformed_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let media = dir.path().join("a.mp4");
        std::fs::write(dir.path().join("a.funscript"), "not json").unwrap();
        assert!(load_sidecar(&media).is_err());
    }
}
