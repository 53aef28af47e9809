//! Geolocation and device identity.
//!
//! Both are best effort. An unavailable location is represented as `None` and
//! carried through filenames ("Unknown") and alert text ("Location unknown");
//! it never fails the caller.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::process::Command;
use std::sync::OnceLock;

/// Fallback device identifier when the host name cannot be read.
pub const UNKNOWN_DEVICE: &str = "Unknown Device";

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct Geolocation {
    pub latitude: f64,
    pub longitude: f64,
}

impl Geolocation {
    /// Rejects non-finite or out-of-range coordinates.
    pub fn new(latitude: f64, longitude: f64) -> Option<Self> {
        let valid = latitude.is_finite()
            && longitude.is_finite()
            && (-90.0..=90.0).contains(&latitude)
            && (-180.0..=180.0).contains(&longitude);
        valid.then_some(Self {
            latitude,
            longitude,
        })
    }

    /// Parse `"<lat>, <lon>"` as printed by location helpers.
    pub fn parse(text: &str) -> Option<Self> {
        static LOCATION_RE: OnceLock<Option<Regex>> = OnceLock::new();
        let re = LOCATION_RE
            .get_or_init(|| Regex::new(r"^\s*(-?\d+(?:\.\d+)?)\s*,\s*(-?\d+(?:\.\d+)?)\s*$").ok())
            .as_ref()?;
        let caps = re.captures(text)?;
        let lat = caps.get(1)?.as_str().parse().ok()?;
        let lon = caps.get(2)?.as_str().parse().ok()?;
        Self::new(lat, lon)
    }

    pub fn map_url(&self) -> String {
        format!(
            "https://www.google.com/maps?q={},{}",
            self.latitude, self.longitude
        )
    }
}

/// Location and device identity captured at incident onset.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SiteSnapshot {
    pub location: Option<Geolocation>,
    pub device_id: String,
}

/// Geolocation/device capability.
pub trait SiteProbe: Send + Sync {
    fn probe(&self) -> SiteSnapshot;
}

/// Probe backed by the host: an optional location helper command and the
/// system host name.
#[derive(Clone, Debug, Default)]
pub struct SystemProbe {
    /// Fixed coordinates, used when no helper command is configured.
    pub fixed: Option<Geolocation>,
    /// Helper printing `"lat, lon"` on stdout; output containing "Error" means unknown.
    pub location_command: Option<Vec<String>>,
    /// Overrides the host name.
    pub device_id: Option<String>,
}

impl SystemProbe {
    fn locate(&self) -> Option<Geolocation> {
        let Some(command) = self.location_command.as_ref() else {
            return self.fixed;
        };
        let (program, args) = command.split_first()?;
        let output = match Command::new(program).args(args).output() {
            Ok(output) => output,
            Err(e) => {
                log::warn!("location helper '{}' failed to start: {}", program, e);
                return None;
            }
        };
        let text = String::from_utf8_lossy(&output.stdout);
        let text = text.trim();
        if !output.status.success() || text.contains("Error") {
            log::warn!("location helper reported no fix: {}", text);
            return None;
        }
        let parsed = Geolocation::parse(text);
        if parsed.is_none() {
            log::warn!("location helper output not understood: {:?}", text);
        }
        parsed
    }
}

impl SiteProbe for SystemProbe {
    fn probe(&self) -> SiteSnapshot {
        SiteSnapshot {
            location: self.locate(),
            device_id: self.device_id.clone().unwrap_or_else(host_name),
        }
    }
}

/// Probe that always reports the same snapshot.
#[derive(Clone, Debug)]
pub struct StaticProbe(pub SiteSnapshot);

impl SiteProbe for StaticProbe {
    fn probe(&self) -> SiteSnapshot {
        self.0.clone()
    }
}

/// Host name, or `UNKNOWN_DEVICE`.
pub fn host_name() -> String {
    let from_kernel = std::fs::read_to_string("/proc/sys/kernel/hostname")
        .ok()
        .map(|s| s.trim().to_string());
    from_kernel
        .into_iter()
        .chain(std::env::var("HOSTNAME").ok())
        .chain(std::env::var("COMPUTERNAME").ok())
        .find(|name| !name.trim().is_empty())
        .unwrap_or_else(|| UNKNOWN_DEVICE.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_helper_output() {
        let loc = Geolocation::parse("41.499300, -81.694400\n").unwrap();
        assert!((loc.latitude - 41.4993).abs() < 1e-9);
        assert!((loc.longitude + 81.6944).abs() < 1e-9);
        assert!(Geolocation::parse("Error: no fix").is_none());
        assert!(Geolocation::parse("200, 10").is_none());
    }

    #[test]
    fn fixed_location_used_without_command() {
        let probe = SystemProbe {
            fixed: Geolocation::new(10.0, 20.0),
            location_command: None,
            device_id: Some("unit-7".into()),
        };
        let snap = probe.probe();
        assert_eq!(snap.location, Geolocation::new(10.0, 20.0));
        assert_eq!(snap.device_id, "unit-7");
    }

    #[cfg(unix)]
    #[test]
    fn helper_command_error_means_unknown() {
        let probe = SystemProbe {
            fixed: Geolocation::new(1.0, 1.0),
            location_command: Some(vec!["echo".into(), "Error: GPS offline".into()]),
            device_id: None,
        };
        assert!(probe.probe().location.is_none());
    }

    #[cfg(unix)]
    #[test]
    fn helper_command_coordinates_are_used() {
        let probe = SystemProbe {
            fixed: None,
            location_command: Some(vec!["echo".into(), "12.5, 99.25".into()]),
            device_id: None,
        };
        assert_eq!(probe.probe().location, Geolocation::new(12.5, 99.25));
        assert!(!probe.probe().device_id.is_empty());
    }
}
