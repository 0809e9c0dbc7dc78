use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use trail_proto::LocationRecord;
use trail_sense::LocationSource;
use trail_store::{IntentStore, RecordStore, StoreError};

use crate::aggregator::{Aggregator, RecordStream};
use crate::TrackingError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    AlreadyStopped,
}

/// Counters across every run of the loop in this process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub fixes_seen: u64,
    pub records_saved: u64,
    pub save_failures: u64,
    pub rejected_fixes: u64,
}

#[derive(Default)]
struct Counters {
    fixes_seen: AtomicU64,
    records_saved: AtomicU64,
    save_failures: AtomicU64,
    rejected_fixes: AtomicU64,
}

/// What supervisors need from the controller.
#[async_trait]
pub trait TrackingControl: Send + Sync {
    async fn start(&self) -> Result<StartOutcome, TrackingError>;
    async fn stop(&self) -> Result<StopOutcome, TrackingError>;
    /// Starts collection only if intent is still set when the lifecycle lock
    /// is taken. Never writes intent. `None` means intent was off.
    async fn restart_if_intended(&self) -> Result<Option<StartOutcome>, TrackingError>;
    fn is_running(&self) -> bool;
}

struct CollectionLoop {
    cancel: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl CollectionLoop {
    /// Signals the loop and waits for it; a record already being written
    /// finishes first.
    async fn cancel(self) {
        let _ = self.cancel.send(true);
        if let Err(e) = self.handle.await {
            if e.is_panic() {
                error!("controller: collection loop panicked");
            }
        }
    }
}

// Clears the liveness flag however the loop task exits.
struct AliveGuard(Arc<AtomicBool>);

impl Drop for AliveGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Owns the collection loop: location source -> aggregator -> record store.
///
/// `start`, `stop`, `restart_if_intended` and `shutdown` are serialized.
/// Only `start` and `stop` write the intent flag; `shutdown` is the teardown
/// used when the process is going away on its own and leaves intent as it is.
pub struct TrackingController {
    intents: Arc<dyn IntentStore>,
    source: Arc<dyn LocationSource>,
    aggregator: Arc<Aggregator>,
    records: Arc<dyn RecordStore>,
    lifecycle: Mutex<Option<CollectionLoop>>,
    phase: StdMutex<LoopState>,
    alive: Arc<AtomicBool>,
    counters: Arc<Counters>,
}

impl TrackingController {
    pub fn new(
        intents: Arc<dyn IntentStore>,
        source: Arc<dyn LocationSource>,
        aggregator: Arc<Aggregator>,
        records: Arc<dyn RecordStore>,
    ) -> Self {
        Self {
            intents,
            source,
            aggregator,
            records,
            lifecycle: Mutex::new(None),
            phase: StdMutex::new(LoopState::Stopped),
            alive: Arc::new(AtomicBool::new(false)),
            counters: Arc::new(Counters::default()),
        }
    }

    pub async fn start(&self) -> Result<StartOutcome, TrackingError> {
        let mut slot = self.lifecycle.lock().await;
        self.intents.set_intent(true)?;
        self.start_locked(&mut slot).await
    }

    /// Supervisor path: the intent check and the start happen under the same
    /// lock as `stop`, so a user stop cannot be undone by a stale read.
    pub async fn restart_if_intended(&self) -> Result<Option<StartOutcome>, TrackingError> {
        let mut slot = self.lifecycle.lock().await;
        if !self.intents.intent()? {
            debug!("controller: restart skipped, tracking intent is off");
            return Ok(None);
        }
        self.start_locked(&mut slot).await.map(Some)
    }

    async fn start_locked(
        &self,
        slot: &mut Option<CollectionLoop>,
    ) -> Result<StartOutcome, TrackingError> {
        if slot.is_some() && self.is_running() {
            debug!("controller: start requested, already running");
            return Ok(StartOutcome::AlreadyRunning);
        }
        if let Some(stale) = slot.take() {
            warn!("controller: replacing a collection loop that is no longer running");
            stale.cancel().await;
            if let Err(e) = self.source.stop_tracking().await {
                warn!("controller: stale source teardown failed: {:#}", e);
            }
        }

        self.set_phase(LoopState::Starting);
        match self.cold_start().await {
            Ok(lp) => {
                *slot = Some(lp);
                self.set_phase(LoopState::Running);
                info!("controller: tracking started");
                Ok(StartOutcome::Started)
            }
            Err(e) => {
                self.set_phase(LoopState::Stopped);
                warn!("controller: start failed: {}", e);
                Err(e)
            }
        }
    }

    async fn cold_start(&self) -> Result<CollectionLoop, TrackingError> {
        let params = self.intents.parameters()?;

        // subscribe first so no fix slips past between start and collection
        let fixes = self.source.location_updates();
        self.source
            .start_tracking(params)
            .await
            .map_err(|e| TrackingError::Start(format!("{:#}", e)))?;
        debug!(
            interval_ms = params.interval_ms,
            min_distance_m = params.min_distance_m,
            "controller: location source configured"
        );

        let (cancel, cancel_rx) = watch::channel(false);
        self.alive.store(true, Ordering::SeqCst);
        let handle = tokio::spawn(collect(
            self.aggregator.aggregate(fixes),
            Arc::clone(&self.records),
            Arc::clone(&self.counters),
            cancel_rx,
            AliveGuard(Arc::clone(&self.alive)),
        ));
        Ok(CollectionLoop { cancel, handle })
    }

    /// User stop. Always clears intent, even when nothing was running.
    pub async fn stop(&self) -> Result<StopOutcome, TrackingError> {
        let mut slot = self.lifecycle.lock().await;
        let outcome = match slot.take() {
            Some(lp) => {
                self.set_phase(LoopState::Stopping);
                self.teardown(lp).await;
                StopOutcome::Stopped
            }
            None => StopOutcome::AlreadyStopped,
        };
        self.set_phase(LoopState::Stopped);
        self.intents.set_intent(false)?;
        info!(outcome = ?outcome, "controller: tracking stopped");
        Ok(outcome)
    }

    /// Process-exit teardown. Intent is left untouched so the next boot can
    /// restore tracking.
    pub async fn shutdown(&self) {
        let mut slot = self.lifecycle.lock().await;
        if let Some(lp) = slot.take() {
            self.set_phase(LoopState::Stopping);
            self.teardown(lp).await;
            info!("controller: collection loop torn down, intent preserved");
        }
        self.set_phase(LoopState::Stopped);
    }

    async fn teardown(&self, lp: CollectionLoop) {
        lp.cancel().await;
        if let Err(e) = self.source.stop_tracking().await {
            warn!("controller: location source did not stop cleanly: {:#}", e);
        }
    }

    /// Actual state: the loop task is alive and the source is delivering.
    pub fn is_running(&self) -> bool {
        self.alive.load(Ordering::SeqCst) && self.source.is_tracking_active()
    }

    pub fn state(&self) -> LoopState {
        let phase = *self.phase.lock().unwrap_or_else(|p| p.into_inner());
        match phase {
            LoopState::Running if !self.is_running() => LoopState::Stopped,
            other => other,
        }
    }

    pub fn stats(&self) -> LoopStats {
        LoopStats {
            fixes_seen: self.counters.fixes_seen.load(Ordering::Relaxed),
            records_saved: self.counters.records_saved.load(Ordering::Relaxed),
            save_failures: self.counters.save_failures.load(Ordering::Relaxed),
            rejected_fixes: self.counters.rejected_fixes.load(Ordering::Relaxed),
        }
    }

    fn set_phase(&self, state: LoopState) {
        *self.phase.lock().unwrap_or_else(|p| p.into_inner()) = state;
    }
}

#[async_trait]
impl TrackingControl for TrackingController {
    async fn start(&self) -> Result<StartOutcome, TrackingError> {
        TrackingController::start(self).await
    }

    async fn stop(&self) -> Result<StopOutcome, TrackingError> {
        TrackingController::stop(self).await
    }

    async fn restart_if_intended(&self) -> Result<Option<StartOutcome>, TrackingError> {
        TrackingController::restart_if_intended(self).await
    }

    fn is_running(&self) -> bool {
        TrackingController::is_running(self)
    }
}

pub async fn save_record(store: &dyn RecordStore, record: LocationRecord) -> Result<(), StoreError> {
    store.insert(record).await
}

async fn collect(
    mut stream: RecordStream,
    records: Arc<dyn RecordStore>,
    counters: Arc<Counters>,
    mut cancel: watch::Receiver<bool>,
    _alive: AliveGuard,
) {
    loop {
        let item = tokio::select! {
            biased;
            _ = cancel.changed() => break,
            item = stream.next() => item,
        };
        let Some(item) = item else {
            warn!("controller: fix stream closed");
            break;
        };
        counters.fixes_seen.fetch_add(1, Ordering::Relaxed);

        match item {
            Ok(record) => {
                debug!(
                    lat = record.latitude(),
                    lon = record.longitude(),
                    accuracy_m = ?record.accuracy_m(),
                    "controller: location received"
                );
                match save_record(records.as_ref(), record).await {
                    Ok(()) => {
                        counters.records_saved.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        counters.save_failures.fetch_add(1, Ordering::Relaxed);
                        warn!("controller: failed to save record: {}", e);
                    }
                }
            }
            Err(e) => {
                counters.rejected_fixes.fetch_add(1, Ordering::Relaxed);
                warn!("controller: fix rejected: {}", e);
            }
        }
    }
}
