//! Job event dispatch loop.

use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use crate::controller::{ScaleOutcome, ScalingController};
use crate::drain::DrainState;

/// A message from the job queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobEvent {
    /// Number of jobs waiting for a runner.
    DesiredCount(u32),
    JobStarted { runner: String },
    JobCompleted { runner: String, result: String },
}

/// Why [`run_event_loop`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// The shutdown signal fired.
    Shutdown,
    /// Drain finished; the process can exit cleanly.
    DrainComplete,
    /// Every event sender was dropped.
    EventsClosed,
}

/// Dispatch events to `controller` in arrival order until shutdown, drain
/// completion, or the event stream ends.
///
/// Drain completion is also checked when drain begins and after each
/// completed job, so an emptied fleet does not wait for the next
/// desired-count update.
pub async fn run_event_loop(
    controller: &ScalingController,
    mut events: mpsc::Receiver<JobEvent>,
    mut shutdown: watch::Receiver<bool>,
) -> LoopExit {
    let mut drain = controller.drain().subscribe();
    let mut drain_open = true;
    // A drain requested before the loop started still needs checking.
    if drained(controller) {
        return LoopExit::DrainComplete;
    }

    loop {
        tokio::select! {
            biased;
            _ = shutdown_signalled(&mut shutdown) => {
                info!("event loop stopping on shutdown");
                return LoopExit::Shutdown;
            }
            changed = drain.changed(), if drain_open => {
                if changed.is_err() {
                    drain_open = false;
                    continue;
                }
                let state = *drain.borrow_and_update();
                debug!(%state, "drain state changed");
                if drained(controller) {
                    return LoopExit::DrainComplete;
                }
            }
            event = events.recv() => {
                let Some(event) = event else {
                    info!("event stream closed");
                    return LoopExit::EventsClosed;
                };
                if dispatch(controller, event).await {
                    return LoopExit::DrainComplete;
                }
            }
        }
    }
}

/// Handle one event. Returns true once the drain is complete.
async fn dispatch(controller: &ScalingController, event: JobEvent) -> bool {
    match event {
        JobEvent::DesiredCount(desired) => {
            let outcome = controller.handle_desired_count(desired).await;
            debug!(desired, ?outcome, "handled desired count");
            outcome == ScaleOutcome::Drained
        }
        JobEvent::JobStarted { runner } => {
            controller.handle_job_started(&runner);
            false
        }
        JobEvent::JobCompleted { runner, result } => {
            controller.handle_job_completed(&runner, &result).await;
            drained(controller)
        }
    }
}

fn drained(controller: &ScalingController) -> bool {
    controller.drain_state() != DrainState::Active
        && controller.check_drain() == Some(ScaleOutcome::Drained)
}

/// Resolves once shutdown is signalled. Never resolves if the sender is gone.
async fn shutdown_signalled(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use crate::controller::ScalerSettings;
    use crate::queue::LocalJobQueue;
    use vmscale_core::{BootPayload, MemoryProvider, Platform};
    use vmscale_fleet::{ManagerConfig, Timeouts, VmManager};

    fn controller() -> (Arc<VmManager>, Arc<ScalingController>) {
        let provider = MemoryProvider::new();
        provider.set_quota("us-east1", "NVIDIA_T4_GPUS", 10.0, 0.0);
        let manager = Arc::new(VmManager::new(
            Arc::new(provider),
            ManagerConfig {
                zones: vec!["us-east1-c".to_string()],
                instance_template: "windows-gpu-runner".to_string(),
                resource_class: "nvidia-tesla-t4".to_string(),
                platform: Platform::Windows,
                vm_prefix: "win-runner".to_string(),
                boot: BootPayload::default(),
                timeouts: Timeouts::default(),
            },
        ));
        let controller = Arc::new(ScalingController::new(
            Arc::clone(&manager),
            Arc::new(LocalJobQueue::new()),
            ScalerSettings {
                min_runners: 0,
                max_runners: 5,
                vm_prefix: "win-runner".to_string(),
            },
        ));
        (manager, controller)
    }

    #[tokio::test]
    async fn dispatches_in_order_until_events_close() {
        let (manager, controller) = controller();
        let (tx, rx) = mpsc::channel(16);
        let (_stop, shutdown) = watch::channel(false);

        tx.send(JobEvent::DesiredCount(2)).await.unwrap();
        drop(tx);

        let exit = run_event_loop(&controller, rx, shutdown).await;

        assert_eq!(exit, LoopExit::EventsClosed);
        assert_eq!(manager.active_count(), 2);
    }

    #[tokio::test]
    async fn job_events_reach_the_fleet() {
        let (manager, controller) = controller();
        controller.handle_desired_count(1).await;
        let runner = manager.active_runner_names().remove(0);

        let (tx, rx) = mpsc::channel(16);
        let (_stop, shutdown) = watch::channel(false);
        tx.send(JobEvent::JobStarted { runner: runner.clone() })
            .await
            .unwrap();
        drop(tx);
        run_event_loop(&controller, rx, shutdown).await;
        assert!(manager.tracker().get(&runner).unwrap().busy);

        let (tx, rx) = mpsc::channel(16);
        let (_stop, shutdown) = watch::channel(false);
        tx.send(JobEvent::JobCompleted {
            runner: runner.clone(),
            result: "succeeded".to_string(),
        })
        .await
        .unwrap();
        drop(tx);
        run_event_loop(&controller, rx, shutdown).await;
        assert_eq!(manager.active_count(), 0);
    }

    #[tokio::test]
    async fn shutdown_stops_the_loop() {
        let (_manager, controller) = controller();
        let (_tx, rx) = mpsc::channel::<JobEvent>(16);
        let (stop, shutdown) = watch::channel(false);

        let handle = {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move { run_event_loop(&controller, rx, shutdown).await })
        };
        stop.send(true).unwrap();

        let exit = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(exit, LoopExit::Shutdown);
    }

    #[tokio::test]
    async fn last_job_completion_finishes_drain() {
        let (manager, controller) = controller();
        controller.handle_desired_count(1).await;
        let runner = manager.active_runner_names().remove(0);
        let (tx, rx) = mpsc::channel(16);
        let (_stop, shutdown) = watch::channel(false);

        let handle = {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move { run_event_loop(&controller, rx, shutdown).await })
        };
        assert!(controller.begin_drain());
        tx.send(JobEvent::DesiredCount(3)).await.unwrap();
        tx.send(JobEvent::JobCompleted {
            runner,
            result: "succeeded".to_string(),
        })
        .await
        .unwrap();

        let exit = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(exit, LoopExit::DrainComplete);
        assert_eq!(controller.drain_state(), DrainState::Done);
        assert_eq!(manager.active_count(), 0);
    }

    #[tokio::test]
    async fn drain_of_empty_fleet_exits_without_events() {
        let (_manager, controller) = controller();
        let (_tx, rx) = mpsc::channel::<JobEvent>(16);
        let (_stop, shutdown) = watch::channel(false);

        let handle = {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move { run_event_loop(&controller, rx, shutdown).await })
        };
        controller.begin_drain();

        let exit = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(exit, LoopExit::DrainComplete);
    }
}
