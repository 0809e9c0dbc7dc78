//! Raw device sources: position fixes, battery, connectivity and the
//! installation identity. Everything here is a thin adapter over the host;
//! the supervision logic lives in `trail-core`.

pub mod battery;
pub mod doctor;
pub mod geo;
pub mod identity;
pub mod location;
pub mod network;
mod nmea;

pub use battery::{BatterySource, SysfsBattery};
pub use identity::{FileIdentity, IdentityProvider};
pub use location::{LocationSource, NmeaInput, NmeaLocationSource};
pub use network::{NetworkSource, SysfsNetwork};
