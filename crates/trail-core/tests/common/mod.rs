#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::{mpsc, watch, Notify};
use trail_core::{Aggregator, StartOutcome, StopOutcome, TrackingControl, TrackingController, TrackingError};
use trail_proto::{LocationRecord, NetworkType, RawFix, TrackingParameters};
use trail_sense::{BatterySource, FileIdentity, IdentityProvider, LocationSource, NetworkSource};
use trail_store::{FileIntentStore, JsonlRecordStore, RecordStore, StoreError};

/// Location source driven by the test: fixes are pushed by hand and a
/// "crash" drops the channel the way a dying provider would.
#[derive(Default)]
pub struct ScriptedSource {
    tx: Mutex<Option<mpsc::UnboundedSender<RawFix>>>,
    active: AtomicBool,
    pub fail_start: AtomicBool,
    pub starts: AtomicU32,
    pub stops: AtomicU32,
    pub subscriptions: AtomicU32,
    pub last_params: Mutex<Option<TrackingParameters>>,
}

impl ScriptedSource {
    pub fn push(&self, fix: RawFix) -> bool {
        match self.tx.lock().unwrap().as_ref() {
            Some(tx) => tx.send(fix).is_ok(),
            None => false,
        }
    }

    pub fn crash(&self) {
        self.active.store(false, Ordering::SeqCst);
        self.tx.lock().unwrap().take();
    }

    pub fn starts(&self) -> u32 {
        self.starts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LocationSource for ScriptedSource {
    async fn start_tracking(&self, params: TrackingParameters) -> anyhow::Result<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        anyhow::ensure!(!self.fail_start.load(Ordering::SeqCst), "location provider disabled");
        *self.last_params.lock().unwrap() = Some(params);
        self.active.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop_tracking(&self) -> anyhow::Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.active.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn location_updates(&self) -> mpsc::UnboundedReceiver<RawFix> {
        self.subscriptions.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        *self.tx.lock().unwrap() = Some(tx);
        rx
    }

    fn is_tracking_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

pub struct FixedBattery(pub u8);

impl BatterySource for FixedBattery {
    fn current_battery_percentage(&self) -> anyhow::Result<u8> {
        Ok(self.0)
    }
    fn current_charging_state(&self) -> anyhow::Result<bool> {
        Ok(false)
    }
}

pub struct FixedNetwork(pub NetworkType);

impl NetworkSource for FixedNetwork {
    fn current_network_type(&self) -> anyhow::Result<NetworkType> {
        Ok(self.0)
    }
}

/// One "process": fresh handles over a state directory that outlives it.
pub struct Device {
    pub intents: Arc<FileIntentStore>,
    pub records: Arc<JsonlRecordStore>,
    pub identity: Arc<FileIdentity>,
    pub source: Arc<ScriptedSource>,
    pub controller: Arc<TrackingController>,
}

impl Device {
    pub async fn boot(state: &TempDir) -> Self {
        Self::boot_with(state, |records| -> Arc<dyn RecordStore> { records }).await
    }

    /// Like `boot`, but the controller writes through whatever `wrap` puts
    /// in front of the file store. `records` still reads the file store.
    pub async fn boot_with(
        state: &TempDir,
        wrap: impl FnOnce(Arc<JsonlRecordStore>) -> Arc<dyn RecordStore>,
    ) -> Self {
        let intents = Arc::new(FileIntentStore::new(state.path().join("intent.toml")));
        let records = Arc::new(
            JsonlRecordStore::open(state.path().join("records.jsonl"))
                .await
                .unwrap(),
        );
        let identity =
            Arc::new(FileIdentity::load_or_create(&state.path().join("installation_id"), None).unwrap());
        let source = Arc::new(ScriptedSource::default());
        let aggregator = Arc::new(Aggregator::new(
            Arc::new(FixedBattery(64)),
            Arc::new(FixedNetwork(NetworkType::Wifi)),
            identity.clone(),
        ));
        let controller = Arc::new(TrackingController::new(
            intents.clone(),
            source.clone(),
            aggregator,
            wrap(records.clone()),
        ));
        Self { intents, records, identity, source, controller }
    }

    pub fn installation_id(&self) -> String {
        self.identity.installation_id().to_string()
    }
}

/// Fails the next `fail_next` inserts, then writes through.
pub struct FlakyStore {
    inner: Arc<JsonlRecordStore>,
    pub fail_next: AtomicU32,
}

impl FlakyStore {
    pub fn new(inner: Arc<JsonlRecordStore>, fail_next: u32) -> Self {
        Self { inner, fail_next: AtomicU32::new(fail_next) }
    }
}

#[async_trait]
impl RecordStore for FlakyStore {
    async fn insert(&self, record: LocationRecord) -> Result<(), StoreError> {
        let failing = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StoreError::Io(std::io::Error::other("no space left on device")));
        }
        self.inner.insert(record).await
    }
    fn all(&self) -> watch::Receiver<Vec<LocationRecord>> {
        self.inner.all()
    }
    fn count(&self) -> watch::Receiver<usize> {
        self.inner.count()
    }
    async fn delete_all(&self) -> Result<(), StoreError> {
        self.inner.delete_all().await
    }
}

/// Holds every insert until the test releases it.
pub struct GatedStore {
    inner: Arc<JsonlRecordStore>,
    pub entered: Notify,
    pub release: Notify,
}

impl GatedStore {
    pub fn new(inner: Arc<JsonlRecordStore>) -> Self {
        Self { inner, entered: Notify::new(), release: Notify::new() }
    }
}

#[async_trait]
impl RecordStore for GatedStore {
    async fn insert(&self, record: LocationRecord) -> Result<(), StoreError> {
        self.entered.notify_one();
        self.release.notified().await;
        self.inner.insert(record).await
    }
    fn all(&self) -> watch::Receiver<Vec<LocationRecord>> {
        self.inner.all()
    }
    fn count(&self) -> watch::Receiver<usize> {
        self.inner.count()
    }
    async fn delete_all(&self) -> Result<(), StoreError> {
        self.inner.delete_all().await
    }
}

/// Real controller whose restart path pauses before taking the lifecycle
/// lock, so a test can slip a user action in between.
pub struct GatedControl {
    inner: Arc<TrackingController>,
    pub entered: Notify,
    pub release: Notify,
}

impl GatedControl {
    pub fn new(inner: Arc<TrackingController>) -> Self {
        Self { inner, entered: Notify::new(), release: Notify::new() }
    }
}

#[async_trait]
impl TrackingControl for GatedControl {
    async fn start(&self) -> Result<StartOutcome, TrackingError> {
        self.inner.start().await
    }
    async fn stop(&self) -> Result<StopOutcome, TrackingError> {
        self.inner.stop().await
    }
    async fn restart_if_intended(&self) -> Result<Option<StartOutcome>, TrackingError> {
        self.entered.notify_one();
        self.release.notified().await;
        self.inner.restart_if_intended().await
    }
    fn is_running(&self) -> bool {
        self.inner.is_running()
    }
}

/// Waits until the count view reaches `n`.
pub async fn wait_for_count(mut count: watch::Receiver<usize>, n: usize) {
    tokio::time::timeout(Duration::from_secs(5), count.wait_for(|c| *c >= n))
        .await
        .expect("timed out waiting for records")
        .unwrap();
}

/// Waits until `cond` holds, polling.
pub async fn eventually(mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition never held");
}
