use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Point-in-time battery reads. Called once per fix, never subscribed to.
pub trait BatterySource: Send + Sync {
    fn current_battery_percentage(&self) -> Result<u8>;
    fn current_charging_state(&self) -> Result<bool>;
}

pub const DEFAULT_POWER_SUPPLY_DIR: &str = "/sys/class/power_supply";

/// Reads the first `type == Battery` supply under a sysfs power_supply root.
#[derive(Debug, Clone)]
pub struct SysfsBattery {
    root: PathBuf,
}

impl SysfsBattery {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn battery_dir(&self) -> Result<PathBuf> {
        let entries = fs::read_dir(&self.root)
            .with_context(|| format!("read power supplies {}", self.root.display()))?;
        for ent in entries.flatten() {
            let dir = ent.path();
            if read_trimmed(&dir.join("type")).map(|t| t == "Battery").unwrap_or(false) {
                return Ok(dir);
            }
        }
        anyhow::bail!("no battery under {}", self.root.display())
    }
}

impl BatterySource for SysfsBattery {
    fn current_battery_percentage(&self) -> Result<u8> {
        let dir = self.battery_dir()?;
        let raw = read_trimmed(&dir.join("capacity"))?;
        let pct: i32 = raw.parse().with_context(|| format!("parse capacity {:?}", raw))?;
        Ok(pct.clamp(0, 100) as u8)
    }

    fn current_charging_state(&self) -> Result<bool> {
        let dir = self.battery_dir()?;
        let status = read_trimmed(&dir.join("status"))?;
        Ok(matches!(status.as_str(), "Charging" | "Full"))
    }
}

fn read_trimmed(path: &Path) -> Result<String> {
    let s = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    Ok(s.trim().to_string())
}
