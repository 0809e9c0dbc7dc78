use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use trail_core::PeriodicPolicy;
use trail_proto::TrackingParameters;
use trail_sense::battery::DEFAULT_POWER_SUPPLY_DIR;
use trail_sense::network::DEFAULT_NET_DIR;
use trail_sense::NmeaInput;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub storage: StorageCfg,
    pub location: LocationCfg,
    #[serde(default)]
    pub sensors: SensorsCfg,
    #[serde(default)]
    pub tracking: TrackingCfg,
    #[serde(default)]
    pub watchdog: WatchdogCfg,
    #[serde(default)]
    pub identity: IdentityCfg,
}

#[derive(Debug, Deserialize)]
pub struct StorageCfg {
    pub state_dir: PathBuf,
}

#[derive(Debug, Deserialize)]
pub struct LocationCfg {
    pub source: String,
    pub nmea_device: Option<String>,
    #[serde(default = "default_baud")]
    pub baud: u32,
    pub nmea_file: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SensorsCfg {
    pub power_supply_dir: PathBuf,
    pub net_dir: PathBuf,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct TrackingCfg {
    pub interval_ms: u64,
    pub min_distance_m: f32,
    /// Builds that ship without a settings screen pin the interval.
    pub locked_interval_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WatchdogCfg {
    pub period_mins: u64,
    pub backoff_base_mins: u64,
    pub grace_ms: u64,
}

#[derive(Debug, Default, Deserialize)]
pub struct IdentityCfg {
    pub advertising_id: Option<String>,
}

fn default_baud() -> u32 {
    9600
}

impl Default for SensorsCfg {
    fn default() -> Self {
        Self {
            power_supply_dir: DEFAULT_POWER_SUPPLY_DIR.into(),
            net_dir: DEFAULT_NET_DIR.into(),
        }
    }
}

impl Default for TrackingCfg {
    fn default() -> Self {
        let p = TrackingParameters::default();
        Self { interval_ms: p.interval_ms, min_distance_m: p.min_distance_m, locked_interval_ms: None }
    }
}

impl Default for WatchdogCfg {
    fn default() -> Self {
        Self { period_mins: 30, backoff_base_mins: 10, grace_ms: 2_000 }
    }
}

impl Config {
    pub fn intent_path(&self) -> PathBuf {
        self.storage.state_dir.join("intent.toml")
    }

    pub fn records_path(&self) -> PathBuf {
        self.storage.state_dir.join("records.jsonl")
    }

    pub fn identity_path(&self) -> PathBuf {
        self.storage.state_dir.join("installation_id")
    }

    pub fn nmea_input(&self) -> Result<NmeaInput> {
        let loc = &self.location;
        Ok(match loc.source.as_str() {
            "nmea-serial" => NmeaInput::Serial {
                dev: loc.nmea_device.clone().context("location.nmea_device missing")?,
                baud: loc.baud,
            },
            "nmea-file" => NmeaInput::File {
                path: loc.nmea_file.clone().context("location.nmea_file missing")?,
            },
            other => anyhow::bail!("unknown location.source: {}", other),
        })
    }

    /// Parameters used until the user picks their own.
    pub fn default_parameters(&self) -> TrackingParameters {
        TrackingParameters {
            interval_ms: self.tracking.interval_ms,
            min_distance_m: self.tracking.min_distance_m,
        }
    }

    pub fn watchdog_policy(&self) -> PeriodicPolicy {
        PeriodicPolicy::new(
            Duration::from_secs(self.watchdog.period_mins.saturating_mul(60)),
            Duration::from_secs(self.watchdog.backoff_base_mins.saturating_mul(60)),
        )
    }

    pub fn watchdog_grace(&self) -> Duration {
        Duration::from_millis(self.watchdog.grace_ms)
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let s = std::fs::read_to_string(path)
        .with_context(|| format!("read config {}", path.display()))?;
    toml::from_str(&s).context("parse config toml")
}
