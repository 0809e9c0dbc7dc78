pub mod fix;
pub mod record;

pub use fix::{DeviceSnapshot, NetworkType, RawFix, TrackingParameters, INTERVAL_OPTIONS};
pub use record::{LocationRecord, LocationRecordBuilder, RecordError};
