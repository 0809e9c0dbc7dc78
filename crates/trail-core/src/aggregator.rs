use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;
use trail_proto::{DeviceSnapshot, LocationRecord, RawFix, RecordError};
use trail_sense::{BatterySource, IdentityProvider, NetworkSource};

/// Attaches device context to position fixes.
///
/// A fix arriving is the only trigger: battery and network are read on the
/// spot instead of being subscribed to, so a battery tick between two fixes
/// never produces an extra record.
pub struct Aggregator {
    battery: Arc<dyn BatterySource>,
    network: Arc<dyn NetworkSource>,
    identity: Arc<dyn IdentityProvider>,
}

impl Aggregator {
    pub fn new(
        battery: Arc<dyn BatterySource>,
        network: Arc<dyn NetworkSource>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        Self { battery, network, identity }
    }

    /// Failed reads leave the field empty.
    pub fn snapshot(&self) -> DeviceSnapshot {
        let battery_percent = self
            .battery
            .current_battery_percentage()
            .map_err(|e| debug!("aggregator: battery level unavailable: {:#}", e))
            .ok();
        let is_charging = self
            .battery
            .current_charging_state()
            .map_err(|e| debug!("aggregator: charging state unavailable: {:#}", e))
            .ok();
        let network_type = self
            .network
            .current_network_type()
            .map_err(|e| debug!("aggregator: network type unavailable: {:#}", e))
            .ok();

        DeviceSnapshot { battery_percent, is_charging, network_type }
    }

    pub fn aggregate_fix(&self, fix: RawFix) -> Result<LocationRecord, RecordError> {
        let snapshot = self.snapshot();
        LocationRecord::builder(fix.lat, fix.lon, fix.ts, self.identity.installation_id())
            .accuracy_m(fix.accuracy_m)
            .altitude_m(fix.altitude_m)
            .speed_mps(fix.speed_mps)
            .bearing_deg(fix.bearing_deg)
            .provider(fix.provider)
            .snapshot(snapshot)
            .advertising_id(self.identity.advertising_id().map(str::to_string))
            .build()
    }

    pub fn aggregate(self: &Arc<Self>, fixes: mpsc::UnboundedReceiver<RawFix>) -> RecordStream {
        RecordStream { aggregator: Arc::clone(self), fixes }
    }
}

/// One item per fix, in arrival order. Ends when the fix channel closes.
pub struct RecordStream {
    aggregator: Arc<Aggregator>,
    fixes: mpsc::UnboundedReceiver<RawFix>,
}

impl RecordStream {
    pub async fn next(&mut self) -> Option<Result<LocationRecord, RecordError>> {
        let fix = self.fixes.recv().await?;
        Some(self.aggregator.aggregate_fix(fix))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
    use time::macros::datetime;
    use trail_proto::NetworkType;

    struct TickingBattery {
        level: AtomicU8,
        reads: AtomicU32,
    }

    impl BatterySource for TickingBattery {
        fn current_battery_percentage(&self) -> anyhow::Result<u8> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            Ok(self.level.load(Ordering::SeqCst))
        }
        fn current_charging_state(&self) -> anyhow::Result<bool> {
            anyhow::bail!("status file missing")
        }
    }

    struct Wifi;
    impl NetworkSource for Wifi {
        fn current_network_type(&self) -> anyhow::Result<NetworkType> {
            Ok(NetworkType::Wifi)
        }
    }

    struct Id;
    impl IdentityProvider for Id {
        fn installation_id(&self) -> &str { "0d7e4c1a-0000-4000-8000-000000000001" }
        fn advertising_id(&self) -> Option<&str> { None }
    }

    fn aggregator(battery: Arc<TickingBattery>) -> Arc<Aggregator> {
        Arc::new(Aggregator::new(battery, Arc::new(Wifi), Arc::new(Id)))
    }

    #[tokio::test]
    async fn one_record_per_fix_in_order_with_context() {
        let battery = Arc::new(TickingBattery { level: AtomicU8::new(80), reads: AtomicU32::new(0) });
        let agg = aggregator(battery.clone());
        let (tx, rx) = mpsc::unbounded_channel();
        let mut stream = agg.aggregate(rx);

        let ts = datetime!(2024-06-01 08:00 UTC);
        tx.send(RawFix::at(45.5, -122.6, ts)).unwrap();
        // battery changes between fixes without producing anything
        battery.level.store(79, Ordering::SeqCst);
        battery.level.store(78, Ordering::SeqCst);
        tx.send(RawFix::at(40.7, -74.0, ts + time::Duration::minutes(5))).unwrap();
        drop(tx);

        let a = stream.next().await.unwrap().unwrap();
        let b = stream.next().await.unwrap().unwrap();
        assert!(stream.next().await.is_none());

        assert_eq!(a.latitude(), 45.5);
        assert_eq!(a.battery_percent(), Some(80));
        assert_eq!(b.latitude(), 40.7);
        assert_eq!(b.battery_percent(), Some(78));
        assert_eq!(battery.reads.load(Ordering::SeqCst), 2);

        // failed charging read degrades instead of dropping
        assert_eq!(a.is_charging(), None);
        assert_eq!(a.network_type(), Some(NetworkType::Wifi));
        assert_eq!(a.installation_id(), b.installation_id());
    }

    #[tokio::test]
    async fn invalid_fix_still_yields_one_item() {
        let battery = Arc::new(TickingBattery { level: AtomicU8::new(50), reads: AtomicU32::new(0) });
        let agg = aggregator(battery);
        let (tx, rx) = mpsc::unbounded_channel();
        let mut stream = agg.aggregate(rx);

        tx.send(RawFix::at(91.0, 0.0, datetime!(2024-06-01 08:00 UTC))).unwrap();
        drop(tx);
        assert!(matches!(stream.next().await, Some(Err(RecordError::LatitudeOutOfRange(_)))));
        assert!(stream.next().await.is_none());
    }
}
