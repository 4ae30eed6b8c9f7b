//! VR classification heuristics
//!
//! The probe's container side-data always wins; these heuristics only apply
//! when the probe did not flag VR. Dimension matching runs before the
//! path/filename token scan.

use crate::models::VrStereo;

/// Outcome of a heuristic pass
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct VrHeuristic {
    pub is_vr: bool,
    pub fov: Option<u32>,
    pub stereo: Option<VrStereo>,
}

/// Frame-geometry heuristic: equirectangular masters are huge and have
/// telltale aspect ratios. 2:1 at ≥3000×1500 reads as 360°, 1:1 at
/// ≥2500×2500 as a packed 180° stereo pair.
#[must_use]
pub fn classify_dimensions(width: i64, height: i64) -> VrHeuristic {
    if width <= 0 || height <= 0 {
        return VrHeuristic::default();
    }

    let ratio = width as f64 / height as f64;
    if (ratio - 2.0).abs() <= 0.1 && width >= 3000 && height >= 1500 {
        return VrHeuristic {
            is_vr: true,
            fov: Some(360),
            stereo: None,
        };
    }
    if (ratio - 1.0).abs() <= 0.1 && width >= 2500 && height >= 2500 {
        return VrHeuristic {
            is_vr: true,
            fov: Some(180),
            stereo: None,
        };
    }

    VrHeuristic::default()
}

const STEREO_SBS_TOKENS: &[&str] = &["lr", "rl", "sbs", "3dh"];
const STEREO_TB_TOKENS: &[&str] = &["tb", "bt", "ou", "overunder", "3dv"];

/// Path/filename token heuristic with word-boundary tokens.
///
/// Tokens are alphanumeric runs of the `/`-separated rel path; a `vr` path
/// segment, `vr`/`180`/`360`/`vr180`/`vr360` tokens, any stereo layout code,
/// or the `_LRF_Full_SBS` composite mark the file as VR.
#[must_use]
pub fn classify_tokens(rel_path: &str) -> VrHeuristic {
    let lowered = rel_path.to_ascii_lowercase();

    let mut result = VrHeuristic::default();

    // Directory named exactly "vr" anywhere in the path
    if lowered.split('/').any(|segment| segment == "vr") {
        result.is_vr = true;
    }
    // Studio composite suffix that slips past tokenization
    if lowered.contains("lrf_full_sbs") {
        result.is_vr = true;
        result.stereo = Some(VrStereo::Sbs);
    }

    for token in lowered.split(|c: char| !c.is_ascii_alphanumeric()) {
        match token {
            "" => {}
            "vr" => result.is_vr = true,
            "180" | "vr180" => {
                result.is_vr = true;
                result.fov = Some(180);
            }
            "360" | "vr360" => {
                result.is_vr = true;
                result.fov = Some(360);
            }
            t if STEREO_SBS_TOKENS.contains(&t) => {
                result.is_vr = true;
                result.stereo.get_or_insert(VrStereo::Sbs);
            }
            t if STEREO_TB_TOKENS.contains(&t) => {
                result.is_vr = true;
                result.stereo.get_or_insert(VrStereo::Tb);
            }
            _ => {}
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dimension_heuristic_360() {
        let h = classify_dimensions(3840, 1920);
        assert!(h.is_vr);
        assert_eq!(h.fov, Some(360));
    }

    #[test]
    fn test_dimension_heuristic_180() {
        let h = classify_dimensions(2880, 2880);
        assert!(h.is_vr);
        assert_eq!(h.fov, Some(180));
    }

    #[test]
    fn test_dimension_heuristic_rejects_small_and_flat() {
        assert!(!classify_dimensions(1920, 1080).is_vr); // 16:9
        assert!(!classify_dimensions(2000, 1000).is_vr); // 2:1 but too small
        assert!(!classify_dimensions(1000, 1000).is_vr); // 1:1 but too small
        assert!(!classify_dimensions(0, 0).is_vr);
    }

    #[test]
    fn test_token_heuristic_lr_180() {
        let h = classify_tokens("clips/movie_LR_180.mp4");
        assert!(h.is_vr);
        assert_eq!(h.fov, Some(180));
        assert_eq!(h.stereo, Some(VrStereo::Sbs));
    }

    #[test]
    fn test_token_heuristic_plain_filename_is_not_vr() {
        assert!(!classify_tokens("family/vacation.mp4").is_vr);
        // "lyric" must not match the "lr" token by substring
        assert!(!classify_tokens("music/lyric_video.mp4").is_vr);
    }

    #[test]
    fn test_token_heuristic_vr_directory() {
        let h = classify_tokens("vr/holiday.mp4");
        assert!(h.is_vr);
        assert_eq!(h.fov, None);
    }

    #[test]
    fn test_token_heuristic_tb_codes() {
        for name in ["a_TB_360.mp4", "b_ou.mp4", "c_OverUnder.mp4", "d_3dv.mp4"] {
            let h = classify_tokens(name);
            assert!(h.is_vr, "{name}");
            assert_eq!(h.stereo, Some(VrStereo::Tb), "{name}");
        }
    }

    #[test]
    fn test_token_heuristic_composite_sbs() {
        let h = classify_tokens("studio/Scene_LRF_Full_SBS.mp4");
        assert!(h.is_vr);
        assert_eq!(h.stereo, Some(VrStereo::Sbs));
    }

    #[test]
    fn test_token_heuristic_vr360() {
        let h = classify_tokens("x/clip_vr360.mkv");
        assert!(h.is_vr);
        assert_eq!(h.fov, Some(360));
    }
}
