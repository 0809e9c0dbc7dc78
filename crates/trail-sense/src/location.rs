use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, info, warn};
use trail_proto::{RawFix, TrackingParameters};

use crate::geo;
use crate::nmea::NmeaParser;

/// A push source of position fixes.
///
/// `location_updates` hands out a fresh receiver and detaches the previous
/// one, so a restarted collection loop never shares a channel with a dead one.
#[async_trait]
pub trait LocationSource: Send + Sync {
    async fn start_tracking(&self, params: TrackingParameters) -> Result<()>;
    async fn stop_tracking(&self) -> Result<()>;
    fn location_updates(&self) -> mpsc::UnboundedReceiver<RawFix>;
    fn is_tracking_active(&self) -> bool;
}

#[derive(Debug, Clone)]
pub enum NmeaInput {
    Serial { dev: String, baud: u32 },
    /// Followed like `tail -f`: EOF waits for more lines.
    File { path: PathBuf },
}

enum LineReader {
    Serial(BufReader<SerialStream>),
    File(BufReader<File>),
}

impl LineReader {
    fn open(input: &NmeaInput) -> Result<Self> {
        match input {
            NmeaInput::Serial { dev, baud } => {
                let port = tokio_serial::new(dev, *baud)
                    .open_native_async()
                    .with_context(|| format!("open serial {}", dev))?;
                Ok(Self::Serial(BufReader::new(port)))
            }
            NmeaInput::File { path } => {
                let f = std::fs::File::open(path)
                    .with_context(|| format!("open nmea file {}", path.display()))?;
                Ok(Self::File(BufReader::new(File::from_std(f))))
            }
        }
    }

    async fn next_line(&mut self, line: &mut String) -> Result<()> {
        loop {
            line.clear();
            match self {
                LineReader::Serial(r) => {
                    let n = r.read_line(line).await?;
                    anyhow::ensure!(n > 0, "serial port closed");
                    return Ok(());
                }
                LineReader::File(r) => {
                    let n = r.read_line(line).await?;
                    if n == 0 {
                        tokio::time::sleep(Duration::from_millis(500)).await;
                        continue;
                    }
                    return Ok(());
                }
            }
        }
    }
}

/// Admits a fix only once the fastest interval has elapsed and the device
/// moved at least the minimum distance since the last admitted fix.
#[derive(Debug)]
pub(crate) struct FixThrottle {
    fastest: Duration,
    min_distance_m: f64,
    last: Option<RawFix>,
}

impl FixThrottle {
    pub(crate) fn new(params: &TrackingParameters) -> Self {
        Self {
            fastest: params.fastest_interval(),
            min_distance_m: params.min_distance_m.max(0.0) as f64,
            last: None,
        }
    }

    pub(crate) fn admit(&mut self, fix: &RawFix) -> bool {
        if let Some(last) = &self.last {
            let elapsed = fix.ts - last.ts;
            if elapsed < self.fastest {
                return false;
            }
            if geo::distance_between(last, fix) < self.min_distance_m {
                return false;
            }
        }
        self.last = Some(fix.clone());
        true
    }
}

type Subscriber = Arc<Mutex<Option<mpsc::UnboundedSender<RawFix>>>>;

pub struct NmeaLocationSource {
    input: NmeaInput,
    subscriber: Subscriber,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl NmeaLocationSource {
    pub fn new(input: NmeaInput) -> Self {
        Self {
            input,
            subscriber: Arc::new(Mutex::new(None)),
            reader: Mutex::new(None),
        }
    }

    fn provider(&self) -> &'static str {
        match self.input {
            NmeaInput::Serial { .. } => "gps",
            NmeaInput::File { .. } => "nmea-file",
        }
    }

    fn abort_reader(&self) -> bool {
        let handle = self.reader.lock().unwrap_or_else(|p| p.into_inner()).take();
        match handle {
            Some(h) => {
                h.abort();
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl LocationSource for NmeaLocationSource {
    async fn start_tracking(&self, params: TrackingParameters) -> Result<()> {
        self.abort_reader();

        let mut reader = LineReader::open(&self.input)?;
        let mut parser = NmeaParser::new(self.provider());
        let mut throttle = FixThrottle::new(&params);
        let subscriber = self.subscriber.clone();

        info!(
            interval_ms = params.interval_ms,
            min_distance_m = params.min_distance_m,
            "location: updates requested"
        );

        let handle = tokio::spawn(async move {
            let mut line = String::new();
            loop {
                if let Err(e) = reader.next_line(&mut line).await {
                    warn!("location: reader stopped: {:#}", e);
                    break;
                }
                let Some(fix) = parser.feed(&line) else { continue };
                if !throttle.admit(&fix) {
                    continue;
                }
                let tx = subscriber.lock().unwrap_or_else(|p| p.into_inner()).clone();
                match tx {
                    Some(tx) if tx.send(fix).is_ok() => {}
                    _ => debug!("location: fix dropped, no subscriber"),
                }
            }
        });
        *self.reader.lock().unwrap_or_else(|p| p.into_inner()) = Some(handle);
        Ok(())
    }

    async fn stop_tracking(&self) -> Result<()> {
        if self.abort_reader() {
            info!("location: updates removed");
        }
        Ok(())
    }

    fn location_updates(&self) -> mpsc::UnboundedReceiver<RawFix> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.subscriber.lock().unwrap_or_else(|p| p.into_inner()) = Some(tx);
        rx
    }

    fn is_tracking_active(&self) -> bool {
        self.reader
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }
}
