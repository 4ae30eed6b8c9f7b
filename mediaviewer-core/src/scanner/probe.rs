//! ffprobe invocation and container metadata parsing
//!
//! Probes are best-effort: any failure (missing binary, non-zero exit,
//! unparseable output) degrades to "no metadata" and never fails a scan.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::process::Command;

use crate::models::VrStereo;
use crate::{Error, Result};

/// VR hints found in container side-data
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeVr {
    pub fov: Option<u32>,
    pub stereo: Option<VrStereo>,
    pub projection: Option<String>,
}

/// Parsed ffprobe output for one file
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeResult {
    pub duration_ms: Option<i64>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    /// Present only when the container carries spherical/stereo3d side-data
    pub vr: Option<ProbeVr>,
}

#[derive(Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
    format: Option<FfprobeFormat>,
}

#[derive(Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    width: Option<i64>,
    height: Option<i64>,
    #[serde(default)]
    side_data_list: Vec<serde_json::Value>,
}

#[derive(Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

/// Run ffprobe against a file and parse its JSON output
pub async fn probe_file(ffprobe_path: &str, path: &Path) -> Result<ProbeResult> {
    let output = Command::new(ffprobe_path)
        .arg("-v")
        .arg("error")
        .arg("-print_format")
        .arg("json")
        .arg("-show_format")
        .arg("-show_streams")
        .arg(path)
        .output()
        .await
        .map_err(|e| Error::External(format!("ffprobe spawn failed: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::External(format!(
            "ffprobe exited with {}: {}",
            output.status,
            stderr.trim()
        )));
    }

    let raw = String::from_utf8_lossy(&output.stdout);
    parse_ffprobe_json(&raw)
}

/// Parse raw ffprobe JSON into a [`ProbeResult`]
pub fn parse_ffprobe_json(raw: &str) -> Result<ProbeResult> {
    let parsed: FfprobeOutput = serde_json::from_str(raw)?;

    let mut result = ProbeResult::default();

    if let Some(duration) = parsed
        .format
        .as_ref()
        .and_then(|f| f.duration.as_deref())
        .and_then(|d| d.parse::<f64>().ok())
    {
        result.duration_ms = Some((duration * 1000.0).round() as i64);
    }

    let Some(video) = parsed
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
    else {
        return Ok(result);
    };

    result.width = video.width;
    result.height = video.height;

    let mut vr = ProbeVr::default();
    let mut has_side_data = false;

    for side_data in &video.side_data_list {
        let kind = side_data
            .get("side_data_type")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_ascii_lowercase();

        if kind.contains("spherical") {
            has_side_data = true;
            vr.projection = side_data
                .get("projection")
                .and_then(|v| v.as_str())
                .map(str::to_string);

            let bound_left = side_data.get("bound_left").and_then(serde_json::Value::as_f64);
            let bound_right = side_data.get("bound_right").and_then(serde_json::Value::as_f64);
            vr.fov = match (bound_left, bound_right) {
                (Some(left), Some(right)) if right - left <= 0.75 => Some(180),
                _ => Some(360),
            };
        } else if kind.contains("stereo 3d") || kind.contains("stereo3d") {
            has_side_data = true;
            let layout = side_data
                .get("type")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_ascii_lowercase();
            vr.stereo = if layout.contains("side by side") {
                Some(VrStereo::Sbs)
            } else if layout.contains("top and bottom") || layout.contains("top-bottom") {
                Some(VrStereo::Tb)
            } else {
                Some(VrStereo::Mono)
            };
        }
    }

    if has_side_data {
        result.vr = Some(vr);
    }

    Ok(result)
}
