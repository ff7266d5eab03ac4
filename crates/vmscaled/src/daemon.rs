//! Daemon wiring — builds the subsystems and owns the shutdown sequence.

use std::sync::Arc;

use anyhow::Context;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use vmscale_autoscale::{LocalJobQueue, LoopExit, ScalerSettings, ScalingController, run_event_loop};
use vmscale_capacity::quota_metric;
use vmscale_core::{MemoryProvider, ScalerConfig};
use vmscale_fleet::{ManagerConfig, VmManager};
use vmscale_reclaim::{IntervalTicker, OrphanReclaimer, ReclaimConfig};

use crate::events::read_events;

/// Buffered job events between the stdin reader and the controller.
const EVENT_BUFFER: usize = 64;

/// Build the in-memory provider from `[simulation]`.
pub fn simulated_provider(config: &ScalerConfig) -> MemoryProvider {
    let metric = quota_metric(&config.provider.resource_class);
    let provider = MemoryProvider::new()
        .with_page_size(config.simulation.page_size)
        .with_usage_metric(&metric);
    for (region, limit) in &config.simulation.quotas {
        provider.set_quota(region, &metric, *limit, 0.0);
    }
    provider
}

/// Run until shutdown, drain completion, or end of input.
pub async fn run(config: ScalerConfig) -> anyhow::Result<()> {
    info!(
        project = %config.provider.project,
        zones = ?config.zones(),
        platform = %config.provider.platform,
        min_runners = config.scaling.min_runners,
        max_runners = config.scaling.max_runners,
        "vmscaled starting"
    );

    // ── Initialize subsystems ──────────────────────────────────

    let provider = simulated_provider(&config);
    info!(regions = config.simulation.quotas.len(), "in-memory compute provider initialized");

    let manager_config = ManagerConfig::from_config(&config).context("Invalid manager config")?;
    let manager = Arc::new(VmManager::new(Arc::new(provider), manager_config));

    let controller = Arc::new(ScalingController::new(
        Arc::clone(&manager),
        Arc::new(LocalJobQueue::new()),
        ScalerSettings {
            min_runners: config.scaling.min_runners,
            max_runners: config.scaling.max_runners,
            vm_prefix: config.vm_prefix(),
        },
    ));

    let reclaim_config = ReclaimConfig::from_config(&config).context("Invalid reclaim config")?;
    let interval = reclaim_config.interval;
    let reclaimer = OrphanReclaimer::new(Arc::clone(&manager), reclaim_config);

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let reclaim_shutdown = shutdown_rx.clone();

    // ── Start background tasks ─────────────────────────────────

    let reclaim_handle = tokio::spawn(async move {
        reclaimer
            .run(IntervalTicker::new(interval), reclaim_shutdown)
            .await
    });

    // Stdin reads cannot be cancelled, so the reader gets its own thread
    // and is simply abandoned at exit.
    let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
    std::thread::Builder::new()
        .name("vmscaled-stdin".to_string())
        .spawn(move || {
            if let Err(e) = read_events(std::io::stdin().lock(), event_tx) {
                warn!(error = %e, "job event input failed");
            }
        })
        .context("Failed to spawn stdin reader")?;

    let signal_handle = {
        let controller = Arc::clone(&controller);
        let shutdown_tx = shutdown_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_signals(&controller, &shutdown_tx).await {
                warn!(error = %e, "signal handling failed, shutting down");
                let _ = shutdown_tx.send(true);
            }
        })
    };

    // ── Event loop ─────────────────────────────────────────────

    let exit = run_event_loop(&controller, event_rx, shutdown_rx).await;
    match exit {
        LoopExit::DrainComplete => info!("drain complete, exiting"),
        LoopExit::Shutdown => info!("shutdown signal received"),
        LoopExit::EventsClosed => info!("job event input closed, shutting down"),
    }

    // ── Shutdown ───────────────────────────────────────────────

    let _ = shutdown_tx.send(true);
    signal_handle.abort();

    match reclaim_handle.await {
        Ok(passes) => info!(passes, "orphan reclaimer finished"),
        Err(e) => warn!(error = %e, "orphan reclaimer task failed"),
    }

    controller.shutdown().await;

    info!("vmscaled stopped");
    Ok(())
}

/// SIGINT/SIGTERM request shutdown; SIGUSR1 requests drain.
async fn handle_signals(
    controller: &ScalingController,
    shutdown: &watch::Sender<bool>,
) -> anyhow::Result<()> {
    let mut terminate = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    let mut drain = signal(SignalKind::user_defined1()).context("Failed to install SIGUSR1 handler")?;

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for SIGINT")?;
                info!("SIGINT received");
                let _ = shutdown.send(true);
                return Ok(());
            }
            _ = terminate.recv() => {
                info!("SIGTERM received");
                let _ = shutdown.send(true);
                return Ok(());
            }
            _ = drain.recv() => {
                info!("SIGUSR1 received");
                controller.begin_drain();
            }
        }
    }
}
