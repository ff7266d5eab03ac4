//! vmscale-autoscale — turns queue demand into runner VMs.
//!
//! The job queue reports how many jobs are waiting; the controller
//! creates runners up to `min(max_runners, min_runners + desired)` and
//! deletes each runner when its single job completes. Scale-down is
//! event-driven, never polled.
//!
//! # Drain
//!
//! ```text
//! Active ──begin_drain──▶ Draining ──fleet empty──▶ Done
//! ```
//!
//! Draining withholds creation and lets in-flight runners finish. Done is
//! terminal and reached exactly once. Transitions only move forward.

pub mod controller;
pub mod drain;
pub mod events;
pub mod queue;

pub use controller::{ScaleOutcome, ScalerSettings, ScalingController};
pub use drain::{DrainControl, DrainState};
pub use events::{JobEvent, LoopExit, run_event_loop};
pub use queue::{JobQueue, JobQueueError, LocalJobQueue, RevokeOutcome};
