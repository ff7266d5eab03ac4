//! Job queue collaborator.
//!
//! The queue hands out one-time runner credentials and owns the runner
//! registrations they create. Revocation is idempotent: revoking a
//! registration that is already gone is a success.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum JobQueueError {
    #[error("failed to mint credential for {runner}: {message}")]
    Mint { runner: String, message: String },

    #[error("failed to revoke registration of {runner}: {message}")]
    Revoke { runner: String, message: String },
}

/// Result of a revoke call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevokeOutcome {
    Removed,
    AlreadyGone,
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Register `runner_name` and return the credential its VM boots with.
    async fn mint_job_credential(&self, runner_name: &str) -> Result<String, JobQueueError>;

    /// Remove the registration of `runner_name`, if any.
    async fn revoke_registration(&self, runner_name: &str) -> Result<RevokeOutcome, JobQueueError>;
}

#[derive(Debug, Default)]
struct QueueState {
    registered: HashSet<String>,
    revoked: Vec<String>,
    fail_mints: bool,
    fail_revokes: bool,
}

/// In-process job queue used by the daemon's local mode and by tests.
#[derive(Debug, Default)]
pub struct LocalJobQueue {
    state: Mutex<QueueState>,
}

impl LocalJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_registered(&self, runner_name: &str) -> bool {
        self.state().registered.contains(runner_name)
    }

    pub fn registered_count(&self) -> usize {
        self.state().registered.len()
    }

    /// Every revoke request received, in order, including repeats.
    pub fn revoke_calls(&self) -> Vec<String> {
        self.state().revoked.clone()
    }

    pub fn fail_mints(&self, fail: bool) {
        self.state().fail_mints = fail;
    }

    pub fn fail_revokes(&self, fail: bool) {
        self.state().fail_revokes = fail;
    }
}

#[async_trait]
impl JobQueue for LocalJobQueue {
    async fn mint_job_credential(&self, runner_name: &str) -> Result<String, JobQueueError> {
        let mut state = self.state();
        if state.fail_mints {
            return Err(JobQueueError::Mint {
                runner: runner_name.to_string(),
                message: "injected failure".to_string(),
            });
        }
        state.registered.insert(runner_name.to_string());
        debug!(runner = %runner_name, "registered runner");
        Ok(format!("jit-{}", Uuid::new_v4().simple()))
    }

    async fn revoke_registration(&self, runner_name: &str) -> Result<RevokeOutcome, JobQueueError> {
        let mut state = self.state();
        state.revoked.push(runner_name.to_string());
        if state.fail_revokes {
            return Err(JobQueueError::Revoke {
                runner: runner_name.to_string(),
                message: "injected failure".to_string(),
            });
        }
        if state.registered.remove(runner_name) {
            Ok(RevokeOutcome::Removed)
        } else {
            Ok(RevokeOutcome::AlreadyGone)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mint_registers_and_returns_unique_credentials() {
        let queue = LocalJobQueue::new();
        let a = queue.mint_job_credential("win-runner-a").await.unwrap();
        let b = queue.mint_job_credential("win-runner-b").await.unwrap();

        assert_ne!(a, b);
        assert!(a.starts_with("jit-"));
        assert_eq!(queue.registered_count(), 2);
    }

    #[tokio::test]
    async fn revoke_is_idempotent() {
        let queue = LocalJobQueue::new();
        queue.mint_job_credential("win-runner-a").await.unwrap();

        assert_eq!(
            queue.revoke_registration("win-runner-a").await.unwrap(),
            RevokeOutcome::Removed
        );
        assert_eq!(
            queue.revoke_registration("win-runner-a").await.unwrap(),
            RevokeOutcome::AlreadyGone
        );
        assert!(!queue.is_registered("win-runner-a"));
    }

    #[tokio::test]
    async fn injected_mint_failure_registers_nothing() {
        let queue = LocalJobQueue::new();
        queue.fail_mints(true);

        let err = queue.mint_job_credential("win-runner-a").await.unwrap_err();
        assert!(matches!(err, JobQueueError::Mint { .. }));
        assert_eq!(queue.registered_count(), 0);
    }
}
