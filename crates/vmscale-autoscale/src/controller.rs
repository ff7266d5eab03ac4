//! Scaling controller — desired-count decisions and job lifecycle.

use std::sync::Arc;

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use vmscale_fleet::VmManager;

use crate::drain::{DrainControl, DrainState};
use crate::queue::{JobQueue, RevokeOutcome};

/// Hex characters of the random suffix in generated runner names.
const RUNNER_SUFFIX_LEN: usize = 12;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScalerSettings {
    /// Runners kept even with an empty queue.
    pub min_runners: u32,
    pub max_runners: u32,
    /// Prefix of generated runner names.
    pub vm_prefix: String,
}

/// What a desired-count update led to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleOutcome {
    /// Active mode. `created + failed` is the number of creations attempted.
    Scaled {
        current: usize,
        target: usize,
        created: usize,
        failed: usize,
    },
    /// Drain in progress; `remaining` runners are still tracked.
    Draining { remaining: usize },
    /// Drain finished. No further creation will happen.
    Drained,
}

/// Drives runner creation from queue demand and deletion from job events.
pub struct ScalingController {
    manager: Arc<VmManager>,
    queue: Arc<dyn JobQueue>,
    settings: ScalerSettings,
    drain: DrainControl,
}

impl ScalingController {
    pub fn new(manager: Arc<VmManager>, queue: Arc<dyn JobQueue>, settings: ScalerSettings) -> Self {
        Self {
            manager,
            queue,
            settings,
            drain: DrainControl::new(),
        }
    }

    pub fn settings(&self) -> &ScalerSettings {
        &self.settings
    }

    pub fn drain(&self) -> &DrainControl {
        &self.drain
    }

    pub fn drain_state(&self) -> DrainState {
        self.drain.state()
    }

    /// Generate a fresh runner name: `<prefix>-<12 hex chars>`.
    pub fn next_runner_name(&self) -> String {
        let id = Uuid::new_v4().simple().to_string();
        format!("{}-{}", self.settings.vm_prefix, &id[..RUNNER_SUFFIX_LEN])
    }

    /// React to a new desired job count from the queue.
    pub async fn handle_desired_count(&self, desired: u32) -> ScaleOutcome {
        if let Some(outcome) = self.check_drain() {
            return outcome;
        }

        let current = self.manager.active_count();
        let target = self
            .settings
            .max_runners
            .min(self.settings.min_runners.saturating_add(desired)) as usize;

        if target <= current {
            debug!(current, target, desired, "no scale-up needed");
            return ScaleOutcome::Scaled {
                current,
                target,
                created: 0,
                failed: 0,
            };
        }

        let to_create = target - current;
        info!(current, target, creating = to_create, "scaling up");

        let mut created = 0;
        let mut failed = 0;
        for _ in 0..to_create {
            if self.drain.state() != DrainState::Active {
                info!(created, "drain started, stopping scale-up");
                break;
            }
            if self.create_runner().await {
                created += 1;
            } else {
                failed += 1;
            }
        }

        ScaleOutcome::Scaled {
            current,
            target,
            created,
            failed,
        }
    }

    async fn create_runner(&self) -> bool {
        let runner = self.next_runner_name();

        let credential = match self.queue.mint_job_credential(&runner).await {
            Ok(credential) => credential,
            Err(e) => {
                error!(%runner, error = %e, "failed to mint job credential");
                return false;
            }
        };

        match self.manager.create_vm(&runner, &credential).await {
            Ok(vm) => {
                info!(%vm, %runner, "created runner VM");
                true
            }
            Err(e) => {
                error!(%runner, error = %e, "failed to create runner VM");
                self.revoke(&runner).await;
                false
            }
        }
    }

    /// While draining, finish the drain once the fleet is empty.
    /// Returns `None` in Active mode.
    pub fn check_drain(&self) -> Option<ScaleOutcome> {
        match self.drain.state() {
            DrainState::Active => None,
            DrainState::Done => Some(ScaleOutcome::Drained),
            DrainState::Draining => {
                let remaining = self.manager.active_count();
                if remaining > 0 {
                    info!(remaining, "draining");
                    return Some(ScaleOutcome::Draining { remaining });
                }
                if self.drain.complete() {
                    info!("all runners finished, drain complete");
                }
                Some(ScaleOutcome::Drained)
            }
        }
    }

    pub fn handle_job_started(&self, runner: &str) {
        info!(%runner, "job started");
        if !self.manager.mark_busy(runner) {
            debug!(%runner, "job started on untracked runner");
        }
    }

    /// The runner's single job is done: delete its VM and registration.
    pub async fn handle_job_completed(&self, runner: &str, result: &str) {
        info!(%runner, %result, "job completed");

        if let Err(e) = self.manager.delete_by_name(runner).await {
            error!(%runner, error = %e, "failed to delete VM after job completed");
        }
        if !runner.is_empty() {
            self.revoke(runner).await;
        }
    }

    /// Enter drain mode. Returns false if already draining or drained.
    pub fn begin_drain(&self) -> bool {
        let started = self.drain.begin_drain();
        if started {
            info!(
                active = self.manager.active_count(),
                "entering drain mode: no new runners, waiting for running VMs to finish"
            );
        } else {
            debug!(state = %self.drain.state(), "drain already requested");
        }
        started
    }

    /// Tear down on exit. A draining fleet is left running; an active
    /// one is deleted and deregistered.
    pub async fn shutdown(&self) {
        if self.drain.state() != DrainState::Active {
            let remaining = self.manager.active_count();
            if remaining > 0 {
                info!(remaining, "shutdown while draining: leaving running VMs to finish");
            }
            return;
        }

        info!("shutting down, deleting all runner VMs");
        let names = self.manager.active_runner_names();
        self.manager.delete_all().await;
        for name in names {
            self.revoke(&name).await;
        }
    }

    /// Best-effort registration cleanup. Never fails.
    async fn revoke(&self, runner: &str) {
        match self.queue.revoke_registration(runner).await {
            Ok(RevokeOutcome::Removed) => info!(%runner, "removed runner registration"),
            Ok(RevokeOutcome::AlreadyGone) => debug!(%runner, "runner registration already gone"),
            Err(e) => warn!(%runner, error = %e, "failed to remove runner registration"),
        }
    }
}
