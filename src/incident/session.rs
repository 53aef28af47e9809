use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::incident::IncidentState;
use crate::recorder::ClipCodec;
use crate::site::{Geolocation, SiteSnapshot};
use crate::IncidentClass;

/// Everything known about an incident at onset. Travels with the clip into the
/// evidence pipeline.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SessionMetadata {
    pub class: IncidentClass,
    pub started_at: DateTime<Local>,
    pub onset_frame: u64,
    pub location: Option<Geolocation>,
    pub device_id: String,
}

/// One incident, from onset to hand-off.
#[derive(Debug)]
pub struct IncidentSession {
    pub state: IncidentState,
    pub metadata: SessionMetadata,
    pub clip_path: PathBuf,
}

impl IncidentSession {
    pub fn open(
        class: IncidentClass,
        onset_frame: u64,
        site: SiteSnapshot,
        dir: &Path,
        codec: ClipCodec,
    ) -> Self {
        let started_at = Local::now();
        let name = clip_file_name(class, site.location.as_ref(), &started_at, codec);
        Self {
            state: IncidentState::Active,
            clip_path: unique_clip_path(dir.join(name)),
            metadata: SessionMetadata {
                class,
                started_at,
                onset_frame,
                location: site.location,
                device_id: site.device_id,
            },
        }
    }
}

/// `{CLASS}_{lat}_{lon}_{YYYYmmdd_HHMMSS}.{ext}`, with `Unknown` for missing
/// coordinates.
pub fn clip_file_name(
    class: IncidentClass,
    location: Option<&Geolocation>,
    at: &DateTime<Local>,
    codec: ClipCodec,
) -> String {
    let (lat, lon) = match location {
        Some(loc) => (
            format!("{:.6}", loc.latitude),
            format!("{:.6}", loc.longitude),
        ),
        None => ("Unknown".to_string(), "Unknown".to_string()),
    };
    format!(
        "{}_{}_{}_{}.{}",
        class.file_tag(),
        lat,
        lon,
        at.format("%Y%m%d_%H%M%S"),
        codec.extension()
    )
}

/// Two onsets of one class within the same second get `_2`, `_3`, ... suffixes.
fn unique_clip_path(path: PathBuf) -> PathBuf {
    if !path.exists() {
        return path;
    }
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
    (2u32..)
        .map(|n| dir.join(format!("{}_{}.{}", stem, n, ext)))
        .find(|candidate| !candidate.exists())
        .unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap()
    }

    #[test]
    fn file_name_encodes_class_location_and_time() {
        let loc = Geolocation::new(41.4993, -81.6944).unwrap();
        let name = clip_file_name(IncidentClass::Collision, Some(&loc), &at(), ClipCodec::Raw);
        assert_eq!(name, "COLLISION_41.499300_-81.694400_20240309_140507.iclip");
    }

    #[test]
    fn file_name_marks_unknown_location() {
        let name = clip_file_name(IncidentClass::ViolentAct, None, &at(), ClipCodec::H264);
        assert_eq!(name, "VIOLENCE_Unknown_Unknown_20240309_140507.mp4");
    }

    #[test]
    fn same_second_onsets_get_distinct_paths() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("FIRE_Unknown_Unknown_20240309_140507.iclip");
        std::fs::write(&first, b"x").unwrap();
        let second = unique_clip_path(first.clone());
        assert_eq!(
            second.file_name().unwrap().to_string_lossy(),
            "FIRE_Unknown_Unknown_20240309_140507_2.iclip"
        );
    }
}
