//! Dynpool Daemon - Main Entry Point
//! Hosts the configured pools and runs the sync, report and alarm loops

mod load;
mod settings;
mod telemetry;

use anyhow::Result;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry};

// Import workspace crates
use dynpool_core::application::constants::SHUTDOWN_DRAIN_TIMEOUT;
use dynpool_core::application::{
    push_channel, shutdown_channel, AlarmEngine, ConfigSyncEngine, PoolRegistryStore, RegistryReporter,
};
use dynpool_core::port::id_provider::UuidProvider;
use dynpool_core::port::time_provider::SystemTimeProvider;
use dynpool_core::port::RegistryClient;
use dynpool_infra_executor::ThreadPoolExecutor;
use dynpool_infra_local::{FileRegistry, InMemoryRegistry, TracingAlarmNotifier};
use settings::{expand, DaemonConfig, LogFormat, RegistryKind};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Load configuration (file + DYNPOOL__* env)
    let config = DaemonConfig::load()?;

    // 2. Initialize logging
    let _log_guard = init_logging(&config)?;
    info!("Dynpool daemon v{} starting...", VERSION);
    if telemetry::endpoint().is_some() && !telemetry::ENABLED {
        warn!("OpenTelemetry endpoint set but feature 'telemetry' not enabled (rebuild with --features telemetry)");
    }

    // 3. Setup dependencies (DI wiring)
    let time_provider = Arc::new(SystemTimeProvider);
    let id_provider = Arc::new(UuidProvider);
    let store = Arc::new(PoolRegistryStore::new());
    let (push_tx, push_rx) = push_channel(config.push_channel_capacity);

    let registry: Arc<dyn RegistryClient> = match config.registry.kind {
        RegistryKind::File => {
            let config_path = expand(&config.registry.config_path);
            let report_path = expand(&config.registry.report_path);
            info!(config_path = %config_path, report_path = %report_path, "Using file registry");
            Arc::new(FileRegistry::new(config_path, report_path))
        }
        RegistryKind::Memory => {
            info!("Using in-memory registry seeded with the initial pool configs");
            let registry = InMemoryRegistry::new();
            for pool in &config.pools {
                registry.publish(pool.to_config());
            }
            registry.subscribe(push_tx.clone());
            Arc::new(registry)
        }
    };

    // 4. Create and register pools (a failed pool does not stop the others)
    let mut executors = Vec::new();
    for pool in &config.pools {
        let initial = pool.to_config();
        let executor = match ThreadPoolExecutor::new(&initial) {
            Ok(executor) => Arc::new(executor),
            Err(e) => {
                error!(pool = %initial.identifier, error = %e, "Failed to create pool");
                continue;
            }
        };
        match store.register(initial, executor.clone()) {
            Ok(handle) => {
                info!(pool = %handle.identifier(), "Pool hosted");
                executors.push(executor);
            }
            Err(e) => {
                error!(pool = %pool.identifier(), error = %e, "Pool registration failed");
                executor.shutdown();
            }
        }
    }
    info!(pools = store.len(), "Pools registered");

    // 5. Start background loops
    let reporter = Arc::new(RegistryReporter::new(
        store.clone(),
        registry.clone(),
        config.reporter_config(),
    ));
    let sync_engine = Arc::new(ConfigSyncEngine::new(
        store.clone(),
        registry.clone(),
        reporter.clone(),
        config.sync_config(),
    ));
    let alarm_engine = Arc::new(AlarmEngine::new(
        store.clone(),
        Arc::new(TracingAlarmNotifier),
        time_provider,
        id_provider,
        config.alarm_config(),
    )?);

    let (shutdown_tx, shutdown_rx) = shutdown_channel();
    let mut loops = JoinSet::new();
    loops.spawn(sync_engine.run(push_rx, shutdown_rx));
    loops.spawn(reporter.run(shutdown_tx.token()));
    loops.spawn(alarm_engine.run(shutdown_tx.token()));
    let load = config
        .load
        .enabled
        .then(|| load::spawn(executors.clone(), config.load.clone(), shutdown_tx.token()));

    info!("System ready. Press Ctrl+C to shutdown");

    // 6. Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Exiting gracefully...");

    // 7. Graceful shutdown: loops first, then pools
    shutdown_tx.shutdown();
    let loops_stopped = tokio::time::timeout(SHUTDOWN_DRAIN_TIMEOUT + Duration::from_secs(1), async {
        while loops.join_next().await.is_some() {}
        if let Some(load) = load {
            let _ = load.await;
        }
    })
    .await;
    if loops_stopped.is_err() {
        warn!("Background loops did not stop in time");
    }
    drop(push_tx);

    store.unregister_all();

    let timeout = config.shutdown_timeout();
    let unfinished = tokio::task::spawn_blocking(move || stop_pools(&executors, timeout)).await?;
    if unfinished > 0 {
        warn!(pools = unfinished, "Some pools did not drain before the shutdown timeout");
    }

    info!("Shutdown complete.");
    Ok(())
}

fn init_logging(config: &DaemonConfig) -> Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("dynpool=info"))?;

    let stdout_layer = match config.log_format {
        // Production: JSON structured logging
        LogFormat::Json => fmt::layer().json().boxed(),
        // Development: Pretty formatting with colors
        LogFormat::Pretty => fmt::layer().pretty().boxed(),
    };

    let (file_layer, guard) = match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(expand(dir), "dynpool.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().json().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(telemetry::otel_layer::<Registry>()?)
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()?;

    Ok(guard)
}

/// Shut every pool down and wait for it to drain; returns how many did not
fn stop_pools(executors: &[Arc<ThreadPoolExecutor>], timeout: Duration) -> usize {
    for executor in executors {
        executor.shutdown();
    }

    let started = Instant::now();
    let mut unfinished = 0;
    for executor in executors {
        let remaining = timeout.saturating_sub(started.elapsed());
        if !executor.await_termination(remaining) {
            let dropped = executor.shutdown_now().len();
            warn!(pool = %executor.name(), dropped_tasks = dropped, "Pool still busy at shutdown timeout");
            unfinished += 1;
        }
    }
    unfinished
}
