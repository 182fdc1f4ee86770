use std::sync::Arc;

use clap::Parser;
use oob_monitor::{
    actors::{MonitorWorkerHandle, SchedulerHandle},
    api::{ApiConfig, ApiState, spawn_api_server},
    bridge::RuntimeBridge,
    cache::StatsCache,
    config::{Config, read_config_file},
    devices::MemoryDeviceRegistry,
    jobs::{JobStore, JobTrigger, LocalTaskQueue},
    probe::{ConnectivityProbe, prober_for},
    realtime::{BroadcastMessage, Broadcaster, DEFAULT_ROOMS, NotificationLevel, RoomRegistry},
};
use tracing::{debug, info, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file
    #[arg(short)]
    file: String,
}

fn init() {
    let filter = filter::Targets::new().with_targets(vec![
        ("oob_monitor", LevelFilter::DEBUG),
        ("oob_monitor_hub", LevelFilter::TRACE),
        ("tower_http", LevelFilter::INFO),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init();
    let args = Args::parse();
    trace!("started with args: {args:?}");

    let config = read_config_file(&args.file)?;
    info!("loaded {} devices", config.devices.len());

    let hub = Hub::build(&config)?;

    let scheduler = if config.scheduler.enabled {
        Some(SchedulerHandle::spawn(
            hub.trigger.clone(),
            config.scheduler.interval_minutes,
        )?)
    } else {
        info!("scheduled monitoring disabled");
        None
    };

    let addr = spawn_api_server(ApiConfig::from_config(&config), hub.api_state(&config)).await?;
    info!("hub ready on {addr}");

    let started = BroadcastMessage::notification(NotificationLevel::Info, "monitoring hub started");
    if let Err(e) = hub.broadcaster.broadcast_to_all(&started).await {
        warn!("failed to announce startup: {e}");
    }

    tokio::signal::ctrl_c().await?;
    info!("shutting down");

    let stopping =
        BroadcastMessage::notification(NotificationLevel::Warning, "monitoring hub shutting down");
    if let Err(e) = hub.broadcaster.broadcast_to_all(&stopping).await {
        warn!("failed to announce shutdown: {e}");
    }

    if let Some(scheduler) = scheduler {
        scheduler.shutdown().await?;
    }
    match hub.worker.status().await {
        Ok(status) => debug!(
            "worker ran {} jobs ({} failed)",
            status.jobs_completed + status.jobs_failed,
            status.jobs_failed
        ),
        Err(e) => warn!("worker status unavailable: {e}"),
    }
    hub.worker.shutdown().await?;

    Ok(())
}

/// Components shared by the scheduler, the worker and the API
struct Hub {
    cache: StatsCache,
    broadcaster: Broadcaster,
    store: JobStore,
    trigger: JobTrigger,
    worker: MonitorWorkerHandle,
}

impl Hub {
    fn build(config: &Config) -> anyhow::Result<Self> {
        let rooms = RoomRegistry::with_rooms(DEFAULT_ROOMS);
        let broadcaster = Broadcaster::from_config(rooms, &config.realtime);

        let inventory = Arc::new(MemoryDeviceRegistry::new(config.devices.iter().cloned()));
        let probe = ConnectivityProbe::new(inventory, prober_for(&config.probe)?, &config.probe);
        let cache = StatsCache::new(probe);

        let store = JobStore::new();
        let (queue, jobs_rx) =
            LocalTaskQueue::new([config.scheduler.job_name.as_str()], store.clone());
        let worker = MonitorWorkerHandle::spawn(
            cache.clone(),
            broadcaster.clone(),
            store.clone(),
            jobs_rx,
            config.cache.ttl_minutes,
        );

        let trigger = JobTrigger::new(
            Arc::new(queue),
            RuntimeBridge::default(),
            broadcaster.clone(),
            config.scheduler.job_name.clone(),
        );

        Ok(Self {
            cache,
            broadcaster,
            store,
            trigger,
            worker,
        })
    }

    fn api_state(&self, config: &Config) -> ApiState {
        ApiState::new(
            self.cache.clone(),
            self.broadcaster.clone(),
            self.trigger.clone(),
            Arc::new(self.store.clone()),
            config,
        )
    }
}
