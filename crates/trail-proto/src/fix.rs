use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use time::OffsetDateTime;

/// One position reading as pushed by a location source, before any context
/// is attached to it.
#[derive(Debug, Clone, PartialEq)]
pub struct RawFix {
    pub lat: f64,
    pub lon: f64,
    pub ts: OffsetDateTime,
    pub accuracy_m: Option<f32>,
    pub altitude_m: Option<f64>,
    pub speed_mps: Option<f32>,
    pub bearing_deg: Option<f32>,
    pub provider: Option<String>,
}

impl RawFix {
    /// A bare fix with no optional sensor fields.
    pub fn at(lat: f64, lon: f64, ts: OffsetDateTime) -> Self {
        Self {
            lat,
            lon,
            ts,
            accuracy_m: None,
            altitude_m: None,
            speed_mps: None,
            bearing_deg: None,
            provider: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NetworkType {
    Wifi,
    Mobile,
    Offline,
    Unknown,
}

impl NetworkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkType::Wifi => "WIFI",
            NetworkType::Mobile => "MOBILE",
            NetworkType::Offline => "OFFLINE",
            NetworkType::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for NetworkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NetworkType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "WIFI" => Ok(NetworkType::Wifi),
            "MOBILE" => Ok(NetworkType::Mobile),
            "OFFLINE" => Ok(NetworkType::Offline),
            "UNKNOWN" => Ok(NetworkType::Unknown),
            other => Err(format!("unknown network type: {}", other)),
        }
    }
}

/// Battery and connectivity state read at the instant a fix arrives.
/// Any field is `None` when the corresponding read failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceSnapshot {
    pub battery_percent: Option<u8>,
    pub is_charging: Option<bool>,
    pub network_type: Option<NetworkType>,
}

pub const DEFAULT_INTERVAL_MS: u64 = 5 * 60 * 1000;
pub const DEFAULT_MIN_DISTANCE_M: f32 = 100.0;

/// Intervals offered to users, label and milliseconds.
pub const INTERVAL_OPTIONS: [(&str, u64); 5] = [
    ("1 minute", 60 * 1000),
    ("3 minutes", 3 * 60 * 1000),
    ("5 minutes", 5 * 60 * 1000),
    ("10 minutes", 10 * 60 * 1000),
    ("20 minutes", 20 * 60 * 1000),
];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackingParameters {
    pub interval_ms: u64,
    pub min_distance_m: f32,
}

impl Default for TrackingParameters {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_INTERVAL_MS,
            min_distance_m: DEFAULT_MIN_DISTANCE_M,
        }
    }
}

impl TrackingParameters {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Sources may deliver fixes up to twice as often as the nominal interval.
    pub fn fastest_interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms / 2)
    }

    pub fn is_offered_interval(interval_ms: u64) -> bool {
        INTERVAL_OPTIONS.iter().any(|(_, ms)| *ms == interval_ms)
    }
}
