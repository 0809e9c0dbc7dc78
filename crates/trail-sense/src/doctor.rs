use anyhow::Result;
use std::path::Path;
use tracing::warn;
use trail_proto::TrackingParameters;

use crate::battery::{BatterySource, SysfsBattery};
use crate::location::NmeaInput;
use crate::network::{NetworkSource, SysfsNetwork};

pub fn check_location_input(input: &NmeaInput) -> Result<()> {
    match input {
        NmeaInput::Serial { dev, baud } => {
            anyhow::ensure!(!dev.is_empty(), "location.nmea_device missing");
            anyhow::ensure!(Path::new(dev).exists(), "serial device not found: {}", dev);
            anyhow::ensure!(*baud >= 4800, "location.baud too low: {}", baud);
        }
        NmeaInput::File { path } => {
            anyhow::ensure!(path.is_file(), "nmea file not found: {}", path.display());
        }
    }
    Ok(())
}

pub fn check_parameters(p: &TrackingParameters) -> Result<()> {
    anyhow::ensure!(p.interval_ms >= 1_000, "tracking interval below 1s: {}ms", p.interval_ms);
    anyhow::ensure!(
        p.min_distance_m.is_finite() && p.min_distance_m >= 0.0,
        "tracking min distance invalid: {}",
        p.min_distance_m
    );
    Ok(())
}

/// Sensors are optional: records degrade to absent fields, so this only warns.
pub fn check_sensors(battery: &SysfsBattery, network: &SysfsNetwork) {
    if let Err(e) = battery.current_battery_percentage() {
        warn!("doctor: battery unreadable, records will omit it: {:#}", e);
    }
    if let Err(e) = network.current_network_type() {
        warn!("doctor: network state unreadable, records will omit it: {:#}", e);
    }
}
