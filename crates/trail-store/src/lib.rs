pub mod doctor;
pub mod intent;
pub mod records;

pub use intent::{FileIntentStore, IntentStore};
pub use records::{JsonlRecordStore, RecordStore};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not decode {path}: {msg}")]
    Decode { path: String, msg: String },
    #[error("could not encode: {0}")]
    Encode(String),
    #[error("tracking interval is locked to {0}ms")]
    IntervalLocked(u64),
}
