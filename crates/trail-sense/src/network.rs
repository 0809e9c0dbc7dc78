use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;
use trail_proto::NetworkType;

pub trait NetworkSource: Send + Sync {
    fn current_network_type(&self) -> Result<NetworkType>;
}

pub const DEFAULT_NET_DIR: &str = "/sys/class/net";

/// Classifies connectivity from the interfaces under a sysfs `net` root.
/// Wireless wins over cellular, cellular over anything else that is up.
#[derive(Debug, Clone)]
pub struct SysfsNetwork {
    root: PathBuf,
}

impl SysfsNetwork {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl NetworkSource for SysfsNetwork {
    fn current_network_type(&self) -> Result<NetworkType> {
        let entries = fs::read_dir(&self.root)
            .with_context(|| format!("read interfaces {}", self.root.display()))?;

        let mut best: Option<NetworkType> = None;
        for ent in entries.flatten() {
            let name = ent.file_name().to_string_lossy().into_owned();
            if name == "lo" {
                continue;
            }
            let dir = ent.path();
            let state = fs::read_to_string(dir.join("operstate")).unwrap_or_default();
            let kind = classify(&name, dir.join("wireless").exists());
            // ppp and most modems report "unknown" while carrying traffic
            let up = match state.trim() {
                "up" => true,
                "unknown" => kind == NetworkType::Mobile,
                _ => false,
            };
            if up {
                best = Some(match best {
                    Some(prev) if rank(prev) >= rank(kind) => prev,
                    _ => kind,
                });
            }
        }
        Ok(best.unwrap_or(NetworkType::Offline))
    }
}

fn classify(name: &str, wireless: bool) -> NetworkType {
    if wireless || name.starts_with("wl") {
        NetworkType::Wifi
    } else if ["wwan", "ppp", "rmnet", "usb"].iter().any(|p| name.starts_with(p)) {
        NetworkType::Mobile
    } else {
        NetworkType::Unknown
    }
}

fn rank(t: NetworkType) -> u8 {
    match t {
        NetworkType::Wifi => 3,
        NetworkType::Mobile => 2,
        NetworkType::Unknown => 1,
        NetworkType::Offline => 0,
    }
}
