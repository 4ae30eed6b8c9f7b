use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::id::MediaId;

/// Broad media kind derived from the file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    Video,
    Image,
    Other,
}

impl FromStr for MediaType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "video" => Ok(Self::Video),
            "image" => Ok(Self::Image),
            "other" => Ok(Self::Other),
            _ => Err(format!("Unknown media type: {s}")),
        }
    }
}

impl std::fmt::Display for MediaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Video => write!(f, "video"),
            Self::Image => write!(f, "image"),
            Self::Other => write!(f, "other"),
        }
    }
}

/// Eye layout of a stereoscopic VR video
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VrStereo {
    Sbs,
    Tb,
    Mono,
}

impl FromStr for VrStereo {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sbs" => Ok(Self::Sbs),
            "tb" => Ok(Self::Tb),
            "mono" => Ok(Self::Mono),
            _ => Err(format!("Unknown stereo layout: {s}")),
        }
    }
}

impl std::fmt::Display for VrStereo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sbs => write!(f, "sbs"),
            Self::Tb => write!(f, "tb"),
            Self::Mono => write!(f, "mono"),
        }
    }
}

/// One indexed media file
///
/// Rows are created and updated only by the scanner; request handlers treat
/// them as read-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaItem {
    pub id: MediaId,
    /// Path relative to the media root, `/`-separated, unique.
    pub rel_path: String,
    pub filename: String,
    pub title: String,
    pub ext: String,
    pub media_type: MediaType,
    pub size_bytes: i64,
    pub modified_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<i64>,
    pub has_funscript: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub funscript_action_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub funscript_avg_speed: Option<f64>,
    pub is_vr: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vr_fov: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vr_stereo: Option<VrStereo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vr_projection: Option<String>,
}

/// Scanner output for a single file, upserted into the catalog by `rel_path`
#[derive(Debug, Clone)]
pub struct NewMediaItem {
    pub rel_path: String,
    pub filename: String,
    pub title: String,
    pub ext: String,
    pub media_type: MediaType,
    pub size_bytes: i64,
    pub modified_ms: i64,
    pub duration_ms: Option<i64>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub has_funscript: bool,
    pub funscript_action_count: Option<i64>,
    pub funscript_avg_speed: Option<f64>,
    pub is_vr: bool,
    pub vr_fov: Option<u32>,
    pub vr_stereo: Option<VrStereo>,
    pub vr_projection: Option<String>,
}

/// Search filters for the paginated catalog query
#[derive(Debug, Clone, Default)]
pub struct MediaFilters {
    /// Substring match against filename or title, case-insensitive.
    pub query: Option<String>,
    pub media_type: Option<MediaType>,
    pub has_funscript: Option<bool>,
    pub is_vr: Option<bool>,
    pub duration_ms: Option<(i64, i64)>,
    pub funscript_avg_speed: Option<(f64, f64)>,
    pub width: Option<(i64, i64)>,
    pub height: Option<(i64, i64)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortField {
    #[default]
    Modified,
    Title,
    Filename,
    Duration,
    Speed,
    Resolution,
}

impl FromStr for SortField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "modified" => Ok(Self::Modified),
            "title" => Ok(Self::Title),
            "filename" => Ok(Self::Filename),
            "duration" => Ok(Self::Duration),
            "speed" => Ok(Self::Speed),
            "resolution" => Ok(Self::Resolution),
            _ => Err(format!("Unknown sort field: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDir {
    Asc,
    #[default]
    Desc,
}

impl FromStr for SortDir {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "asc" => Ok(Self::Asc),
            "desc" => Ok(Self::Desc),
            _ => Err(format!("Unknown sort direction: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MediaSort {
    pub field: SortField,
    pub dir: SortDir,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_type_round_trip() {
        for t in [MediaType::Video, MediaType::Image, MediaType::Other] {
            assert_eq!(t.to_string().parse::<MediaType>().unwrap(), t);
        }
        assert!("audio".parse::<MediaType>().is_err());
    }

    #[test]
    fn test_stereo_round_trip() {
        for s in [VrStereo::Sbs, VrStereo::Tb, VrStereo::Mono] {
            assert_eq!(s.to_string().parse::<VrStereo>().unwrap(), s);
        }
    }

    #[test]
    fn test_sort_parsing() {
        assert_eq!("modified".parse::<SortField>().unwrap(), SortField::Modified);
        assert_eq!("RESOLUTION".parse::<SortField>().unwrap(), SortField::Resolution);
        assert_eq!("asc".parse::<SortDir>().unwrap(), SortDir::Asc);
        assert!("sideways".parse::<SortDir>().is_err());
    }
}
