use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use time::format_description::well_known::Rfc3339;
use tokio::sync::watch;
use tracing::{info, warn};

use trail_core::{
    scheduler, Aggregator, HealthWatchdog, StartupRecovery, TrackingControl, TrackingController, TrackingError,
};
use trail_proto::{TrackingParameters, INTERVAL_OPTIONS};
use trail_sense::{doctor as sense_doctor, FileIdentity, IdentityProvider, NmeaLocationSource, SysfsBattery, SysfsNetwork};
use trail_store::{doctor as store_doctor, FileIntentStore, IntentStore, JsonlRecordStore, RecordStore};

mod config;

use config::{load_config, Config};

#[derive(Debug, Parser)]
#[command(name = "trail", version, about = "trail - unattended location tracking with supervision")]
struct Cli {
    #[arg(long)]
    config: PathBuf,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Doctor,
    /// Restore tracking if it was on, supervise it, and wait for a signal.
    /// Ctrl-C stops tracking; SIGTERM leaves it on for the next boot.
    Run,
    /// Turn tracking on, then behave like `run`.
    Start,
    /// Turn tracking off.
    Stop,
    Status,
    Records { #[command(subcommand)] cmd: RecordsCmd },
    /// Show or change the tracking parameters.
    Settings {
        #[arg(long)]
        interval_ms: Option<u64>,
        #[arg(long)]
        min_distance_m: Option<f32>,
    },
}

#[derive(Debug, Subcommand)]
enum RecordsCmd {
    List {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    Count,
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = load_config(&cli.config)?;

    match cli.cmd {
        Command::Doctor => doctor(&cfg)?,
        Command::Run => run(&cfg, false).await?,
        Command::Start => run(&cfg, true).await?,
        Command::Stop => stop(&cfg).await?,
        Command::Status => status(&cfg).await?,
        Command::Records { cmd } => records_cmd(&cfg, cmd).await?,
        Command::Settings { interval_ms, min_distance_m } => settings(&cfg, interval_ms, min_distance_m)?,
    }
    Ok(())
}

fn open_intents(cfg: &Config) -> Arc<FileIntentStore> {
    Arc::new(
        FileIntentStore::new(cfg.intent_path())
            .with_defaults(cfg.default_parameters())
            .with_locked_interval(cfg.tracking.locked_interval_ms),
    )
}

fn open_identity(cfg: &Config) -> Result<Arc<FileIdentity>> {
    let id = FileIdentity::load_or_create(&cfg.identity_path(), cfg.identity.advertising_id.clone())
        .context("installation identity")?;
    Ok(Arc::new(id))
}

async fn open_records(cfg: &Config) -> Result<Arc<JsonlRecordStore>> {
    let store = JsonlRecordStore::open(cfg.records_path()).await.context("open record store")?;
    Ok(Arc::new(store))
}

struct Stack {
    intents: Arc<FileIntentStore>,
    controller: Arc<TrackingController>,
}

async fn build_stack(cfg: &Config) -> Result<Stack> {
    let intents = open_intents(cfg);
    let records = open_records(cfg).await?;
    let identity = open_identity(cfg)?;
    let source = Arc::new(NmeaLocationSource::new(cfg.nmea_input()?));

    let aggregator = Arc::new(Aggregator::new(
        Arc::new(SysfsBattery::new(&cfg.sensors.power_supply_dir)),
        Arc::new(SysfsNetwork::new(&cfg.sensors.net_dir)),
        identity,
    ));
    let controller = Arc::new(TrackingController::new(intents.clone(), source, aggregator, records));
    Ok(Stack { intents, controller })
}

fn doctor(cfg: &Config) -> Result<()> {
    info!("doctor: starting");

    store_doctor::check_state_dir(&cfg.storage.state_dir)?;
    sense_doctor::check_location_input(&cfg.nmea_input()?)?;

    let intents = open_intents(cfg);
    let params = intents.parameters().context("read tracking parameters")?;
    sense_doctor::check_parameters(&params)?;
    if !TrackingParameters::is_offered_interval(params.interval_ms) {
        warn!(interval_ms = params.interval_ms, "doctor: interval is not one of the offered options");
    }

    sense_doctor::check_sensors(
        &SysfsBattery::new(&cfg.sensors.power_supply_dir),
        &SysfsNetwork::new(&cfg.sensors.net_dir),
    );
    open_identity(cfg)?;

    info!("doctor: OK");
    Ok(())
}

enum Exit {
    UserStop,
    Teardown,
}

async fn wait_for_exit() -> Result<Exit> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = signal(SignalKind::terminate()).context("install SIGTERM handler")?;
        tokio::select! {
            r = tokio::signal::ctrl_c() => { r.context("wait for ctrl-c")?; Ok(Exit::UserStop) }
            _ = term.recv() => Ok(Exit::Teardown),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.context("wait for ctrl-c")?;
        Ok(Exit::UserStop)
    }
}

async fn run(cfg: &Config, user_start: bool) -> Result<()> {
    info!("run: starting");
    let stack = build_stack(cfg).await?;

    if user_start {
        request_start(stack.controller.as_ref()).await?;
    } else {
        let recovery = StartupRecovery::new(stack.intents.clone(), stack.controller.clone());
        scheduler::run_once(&recovery).await;
    }

    let watchdog = HealthWatchdog::new(stack.intents.clone(), stack.controller.clone())
        .with_grace(cfg.watchdog_grace());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let periodic = tokio::spawn(scheduler::run_periodic(
        Arc::new(watchdog),
        cfg.watchdog_policy(),
        shutdown_rx,
    ));

    let exit = wait_for_exit().await?;

    // the watchdog goes first so it cannot restart what is being torn down
    let _ = shutdown_tx.send(true);
    periodic.await.context("join watchdog")?;

    match exit {
        Exit::UserStop => {
            info!("run: interrupted, stopping tracking");
            stack.controller.stop().await?;
        }
        Exit::Teardown => {
            info!("run: terminated, tracking intent kept for next boot");
            stack.controller.shutdown().await;
        }
    }
    info!(stats = ?stack.controller.stats(), "run: exited");
    Ok(())
}

/// User start from the command line. A source that will not come up is left
/// to the watchdog since intent is already recorded; only a store failure
/// ends the command.
async fn request_start(control: &dyn TrackingControl) -> Result<()> {
    match control.start().await {
        Ok(outcome) => info!(outcome = ?outcome, "run: tracking requested"),
        Err(TrackingError::Start(reason)) => {
            warn!("run: tracking requested but did not start, watchdog will retry: {}", reason)
        }
        Err(e) => return Err(e).context("start tracking"),
    }
    Ok(())
}

async fn stop(cfg: &Config) -> Result<()> {
    let stack = build_stack(cfg).await?;
    let outcome = stack.controller.stop().await?;
    println!("tracking off ({:?})", outcome);
    Ok(())
}

async fn status(cfg: &Config) -> Result<()> {
    let intents = open_intents(cfg);
    let records = open_records(cfg).await?;
    let identity = open_identity(cfg)?;
    let params = intents.parameters()?;

    println!("tracking_intent={}", intents.intent()?);
    println!("interval_ms={} min_distance_m={}", params.interval_ms, params.min_distance_m);
    if let Some(locked) = cfg.tracking.locked_interval_ms {
        println!("interval_locked_ms={}", locked);
    }
    println!("installation_id={}", identity.installation_id());
    println!("records={}", *records.count().borrow());
    Ok(())
}

async fn records_cmd(cfg: &Config, cmd: RecordsCmd) -> Result<()> {
    let records = open_records(cfg).await?;
    match cmd {
        RecordsCmd::List { limit } => {
            let all = records.all();
            for r in all.borrow().iter().take(limit) {
                let ts = r.timestamp().format(&Rfc3339).context("format timestamp")?;
                println!(
                    "{} lat={:.6} lon={:.6} acc={:?} batt={:?} charging={:?} net={}",
                    ts,
                    r.latitude(),
                    r.longitude(),
                    r.accuracy_m(),
                    r.battery_percent(),
                    r.is_charging(),
                    r.network_type().map_or("-", |n| n.as_str()),
                );
            }
        }
        RecordsCmd::Count => println!("{}", *records.count().borrow()),
        RecordsCmd::Clear => {
            records.delete_all().await?;
            info!("records: cleared");
        }
    }
    Ok(())
}

fn settings(cfg: &Config, interval_ms: Option<u64>, min_distance_m: Option<f32>) -> Result<()> {
    let intents = open_intents(cfg);
    let mut params = intents.parameters()?;

    if interval_ms.is_none() && min_distance_m.is_none() {
        println!("interval_ms={} min_distance_m={}", params.interval_ms, params.min_distance_m);
        let options: Vec<String> = INTERVAL_OPTIONS
            .iter()
            .map(|(label, ms)| format!("{}={}", label, ms))
            .collect();
        println!("interval options: {}", options.join(" "));
        return Ok(());
    }

    if let Some(ms) = interval_ms {
        anyhow::ensure!(
            TrackingParameters::is_offered_interval(ms),
            "interval {}ms is not one of the offered options",
            ms
        );
        params.interval_ms = ms;
    }
    if let Some(m) = min_distance_m {
        anyhow::ensure!(m.is_finite() && m >= 0.0, "min distance must be >= 0: {}", m);
        params.min_distance_m = m;
    }
    intents.set_parameters(params).context("save tracking parameters")?;
    info!(
        interval_ms = params.interval_ms,
        min_distance_m = params.min_distance_m,
        "settings: saved; a running daemon picks them up on its next start"
    );
    Ok(())
}
