use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::fix::{DeviceSnapshot, NetworkType};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RecordError {
    #[error("latitude must be between -90 and 90, got {0}")]
    LatitudeOutOfRange(f64),
    #[error("longitude must be between -180 and 180, got {0}")]
    LongitudeOutOfRange(f64),
    #[error("installation id must not be empty")]
    MissingInstallationId,
    #[error("timestamp out of range: {0}")]
    Timestamp(String),
}

/// An aggregated location observation. Only constructible through
/// [`LocationRecord::builder`], which enforces coordinate bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RecordRepr", into = "RecordRepr")]
pub struct LocationRecord {
    latitude: f64,
    longitude: f64,
    timestamp: OffsetDateTime,
    accuracy_m: Option<f32>,
    altitude_m: Option<f64>,
    speed_mps: Option<f32>,
    bearing_deg: Option<f32>,
    provider: Option<String>,
    battery_percent: Option<u8>,
    is_charging: Option<bool>,
    network_type: Option<NetworkType>,
    installation_id: String,
    advertising_id: Option<String>,
}

pub struct LocationRecordBuilder {
    inner: LocationRecord,
}

impl LocationRecordBuilder {
    pub fn accuracy_m(mut self, v: Option<f32>) -> Self {
        self.inner.accuracy_m = v;
        self
    }

    pub fn altitude_m(mut self, v: Option<f64>) -> Self {
        self.inner.altitude_m = v;
        self
    }

    pub fn speed_mps(mut self, v: Option<f32>) -> Self {
        self.inner.speed_mps = v;
        self
    }

    pub fn bearing_deg(mut self, v: Option<f32>) -> Self {
        self.inner.bearing_deg = v;
        self
    }

    pub fn provider(mut self, v: Option<String>) -> Self {
        self.inner.provider = v;
        self
    }

    pub fn snapshot(mut self, s: DeviceSnapshot) -> Self {
        self.inner.battery_percent = s.battery_percent.map(|p| p.min(100));
        self.inner.is_charging = s.is_charging;
        self.inner.network_type = s.network_type;
        self
    }

    pub fn advertising_id(mut self, v: Option<String>) -> Self {
        self.inner.advertising_id = v;
        self
    }

    pub fn build(self) -> Result<LocationRecord, RecordError> {
        let r = self.inner;
        // NaN fails both range checks
        if !(-90.0..=90.0).contains(&r.latitude) {
            return Err(RecordError::LatitudeOutOfRange(r.latitude));
        }
        if !(-180.0..=180.0).contains(&r.longitude) {
            return Err(RecordError::LongitudeOutOfRange(r.longitude));
        }
        if r.installation_id.trim().is_empty() {
            return Err(RecordError::MissingInstallationId);
        }
        Ok(r)
    }
}

impl LocationRecord {
    /// `timestamp` is kept to millisecond precision, the resolution records
    /// are stored at, so a record reads back equal to what was built.
    pub fn builder(
        latitude: f64,
        longitude: f64,
        timestamp: OffsetDateTime,
        installation_id: impl Into<String>,
    ) -> LocationRecordBuilder {
        let timestamp = timestamp
            .replace_millisecond(timestamp.millisecond())
            .unwrap_or(timestamp);
        LocationRecordBuilder {
            inner: LocationRecord {
                latitude,
                longitude,
                timestamp,
                accuracy_m: None,
                altitude_m: None,
                speed_mps: None,
                bearing_deg: None,
                provider: None,
                battery_percent: None,
                is_charging: None,
                network_type: None,
                installation_id: installation_id.into(),
                advertising_id: None,
            },
        }
    }

    pub fn latitude(&self) -> f64 { self.latitude }
    pub fn longitude(&self) -> f64 { self.longitude }
    pub fn timestamp(&self) -> OffsetDateTime { self.timestamp }
    pub fn accuracy_m(&self) -> Option<f32> { self.accuracy_m }
    pub fn altitude_m(&self) -> Option<f64> { self.altitude_m }
    pub fn speed_mps(&self) -> Option<f32> { self.speed_mps }
    pub fn bearing_deg(&self) -> Option<f32> { self.bearing_deg }
    pub fn provider(&self) -> Option<&str> { self.provider.as_deref() }
    pub fn battery_percent(&self) -> Option<u8> { self.battery_percent }
    pub fn is_charging(&self) -> Option<bool> { self.is_charging }
    pub fn network_type(&self) -> Option<NetworkType> { self.network_type }
    pub fn installation_id(&self) -> &str { &self.installation_id }
    pub fn advertising_id(&self) -> Option<&str> { self.advertising_id.as_deref() }

    pub fn ts_unix_ms(&self) -> i64 {
        (self.timestamp.unix_timestamp_nanos() / 1_000_000) as i64
    }
}

// On-disk shape. Timestamps travel as unix milliseconds.
#[derive(Serialize, Deserialize)]
struct RecordRepr {
    lat: f64,
    lon: f64,
    ts_unix_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    accuracy_m: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    altitude_m: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    speed_mps: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    bearing_deg: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    battery_percent: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    is_charging: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    network_type: Option<NetworkType>,
    installation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    advertising_id: Option<String>,
}

impl From<LocationRecord> for RecordRepr {
    fn from(r: LocationRecord) -> Self {
        let ts_unix_ms = r.ts_unix_ms();
        Self {
            lat: r.latitude,
            lon: r.longitude,
            ts_unix_ms,
            accuracy_m: r.accuracy_m,
            altitude_m: r.altitude_m,
            speed_mps: r.speed_mps,
            bearing_deg: r.bearing_deg,
            provider: r.provider,
            battery_percent: r.battery_percent,
            is_charging: r.is_charging,
            network_type: r.network_type,
            installation_id: r.installation_id,
            advertising_id: r.advertising_id,
        }
    }
}

impl TryFrom<RecordRepr> for LocationRecord {
    type Error = RecordError;

    fn try_from(r: RecordRepr) -> Result<Self, Self::Error> {
        let ts = OffsetDateTime::from_unix_timestamp_nanos(r.ts_unix_ms as i128 * 1_000_000)
            .map_err(|e| RecordError::Timestamp(e.to_string()))?;
        LocationRecord::builder(r.lat, r.lon, ts, r.installation_id)
            .accuracy_m(r.accuracy_m)
            .altitude_m(r.altitude_m)
            .speed_mps(r.speed_mps)
            .bearing_deg(r.bearing_deg)
            .provider(r.provider)
            .snapshot(DeviceSnapshot {
                battery_percent: r.battery_percent,
                is_charging: r.is_charging,
                network_type: r.network_type,
            })
            .advertising_id(r.advertising_id)
            .build()
    }
}
