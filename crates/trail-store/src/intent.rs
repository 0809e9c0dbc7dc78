use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use trail_proto::TrackingParameters;

use crate::StoreError;

/// Durable "should be tracking" flag plus tracking parameters.
///
/// Every call goes to storage; nothing is cached, so a value written by one
/// process is what the next process boot reads.
pub trait IntentStore: Send + Sync {
    fn intent(&self) -> Result<bool, StoreError>;
    fn set_intent(&self, active: bool) -> Result<(), StoreError>;
    fn parameters(&self) -> Result<TrackingParameters, StoreError>;
    fn set_parameters(&self, params: TrackingParameters) -> Result<(), StoreError>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct IntentDoc {
    #[serde(default)]
    tracking_active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    interval_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    min_distance_m: Option<f32>,
}

/// TOML-backed intent store. Writes go through a temp file and a rename.
pub struct FileIntentStore {
    path: PathBuf,
    defaults: TrackingParameters,
    locked_interval_ms: Option<u64>,
    io: Mutex<()>,
}

impl FileIntentStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            defaults: TrackingParameters::default(),
            locked_interval_ms: None,
            io: Mutex::new(()),
        }
    }

    /// Parameters used while the file holds none.
    pub fn with_defaults(mut self, defaults: TrackingParameters) -> Self {
        self.defaults = defaults;
        self
    }

    /// Pins the interval: reads always return it and writes may not change it.
    pub fn with_locked_interval(mut self, interval_ms: Option<u64>) -> Self {
        self.locked_interval_ms = interval_ms.filter(|ms| *ms > 0);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<IntentDoc, StoreError> {
        let s = match fs::read_to_string(&self.path) {
            Ok(s) => s,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(IntentDoc::default()),
            Err(e) => return Err(e.into()),
        };
        toml::from_str(&s).map_err(|e| StoreError::Decode {
            path: self.path.display().to_string(),
            msg: e.to_string(),
        })
    }

    fn save(&self, doc: &IntentDoc) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let payload = toml::to_string(doc).map_err(|e| StoreError::Encode(e.to_string()))?;
        let tmp = self.path.with_extension("tmp");
        {
            let mut f = fs::File::create(&tmp)?;
            f.write_all(payload.as_bytes())?;
            // contents must be on disk before the rename makes them visible
            f.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        #[cfg(unix)]
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::File::open(parent)?.sync_all()?;
        }
        Ok(())
    }

    fn update(&self, f: impl FnOnce(&mut IntentDoc)) -> Result<(), StoreError> {
        let _guard = self.io.lock().unwrap_or_else(|p| p.into_inner());
        let mut doc = self.load()?;
        f(&mut doc);
        self.save(&doc)
    }
}

impl IntentStore for FileIntentStore {
    fn intent(&self) -> Result<bool, StoreError> {
        let _guard = self.io.lock().unwrap_or_else(|p| p.into_inner());
        Ok(self.load()?.tracking_active)
    }

    fn set_intent(&self, active: bool) -> Result<(), StoreError> {
        self.update(|doc| doc.tracking_active = active)
    }

    fn parameters(&self) -> Result<TrackingParameters, StoreError> {
        let doc = {
            let _guard = self.io.lock().unwrap_or_else(|p| p.into_inner());
            self.load()?
        };
        Ok(TrackingParameters {
            interval_ms: self
                .locked_interval_ms
                .or(doc.interval_ms)
                .unwrap_or(self.defaults.interval_ms),
            min_distance_m: doc.min_distance_m.unwrap_or(self.defaults.min_distance_m),
        })
    }

    fn set_parameters(&self, params: TrackingParameters) -> Result<(), StoreError> {
        if let Some(locked) = self.locked_interval_ms {
            if params.interval_ms != locked {
                return Err(StoreError::IntervalLocked(locked));
            }
        }
        self.update(|doc| {
            doc.interval_ms = Some(params.interval_ms);
            doc.min_distance_m = Some(params.min_distance_m);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_store_has_defaults_and_no_intent() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileIntentStore::new(tmp.path().join("intent.toml"));
        assert!(!store.intent().unwrap());
        assert_eq!(store.parameters().unwrap(), TrackingParameters::default());
    }

    #[test]
    fn values_survive_a_new_handle() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("state").join("intent.toml");
        {
            let store = FileIntentStore::new(&path);
            store.set_intent(true).unwrap();
            store
                .set_parameters(TrackingParameters { interval_ms: 60_000, min_distance_m: 25.0 })
                .unwrap();
        }
        let store = FileIntentStore::new(&path);
        assert!(store.intent().unwrap());
        assert_eq!(store.parameters().unwrap().interval_ms, 60_000);
        assert_eq!(store.parameters().unwrap().min_distance_m, 25.0);
        // intent writes leave parameters alone
        store.set_intent(false).unwrap();
        assert_eq!(store.parameters().unwrap().interval_ms, 60_000);
    }

    #[test]
    fn locked_interval_wins_and_refuses_changes() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileIntentStore::new(tmp.path().join("intent.toml"))
            .with_locked_interval(Some(1_200_000));
        assert_eq!(store.parameters().unwrap().interval_ms, 1_200_000);

        let err = store
            .set_parameters(TrackingParameters { interval_ms: 60_000, min_distance_m: 10.0 })
            .unwrap_err();
        assert!(matches!(err, StoreError::IntervalLocked(1_200_000)));

        store
            .set_parameters(TrackingParameters { interval_ms: 1_200_000, min_distance_m: 10.0 })
            .unwrap();
        assert_eq!(store.parameters().unwrap().min_distance_m, 10.0);
    }

    #[test]
    fn write_replaces_leftover_temp_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("intent.toml");
        // left by a process killed mid-write
        fs::write(path.with_extension("tmp"), "tracking_act").unwrap();

        let store = FileIntentStore::new(&path);
        assert!(!store.intent().unwrap());
        store.set_intent(true).unwrap();

        assert!(!path.with_extension("tmp").exists());
        let on_disk: IntentDoc = toml::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert!(on_disk.tracking_active);
    }

    #[test]
    fn garbage_file_is_a_decode_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("intent.toml");
        fs::write(&path, "tracking_active = \"maybe\"").unwrap();
        let store = FileIntentStore::new(&path);
        assert!(matches!(store.intent(), Err(StoreError::Decode { .. })));
    }
}
