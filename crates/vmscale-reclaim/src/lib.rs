//! vmscale-reclaim — periodic reconciliation of the fleet against the provider.
//!
//! Deletions are fire-and-log, so VMs leak: a delete times out, a runner
//! shuts itself down and sits TERMINATED, or a VM vanishes without the
//! tracker hearing about it. The reclaimer runs a pass at startup and on
//! every tick after that.
//!
//! # Pass
//!
//! ```text
//! run_pass
//!   ├── Phase A: sweep_terminated
//!   │   └── per configured zone: list TERMINATED → delete → untrack
//!   └── Phase B: reconcile_running
//!       └── per tracked zone: list RUNNING → evict entries not listed
//! ```
//!
//! A zone whose listing fails is skipped for that phase. Every provider
//! call races its time budget against the shutdown signal.

pub mod error;
pub mod reclaimer;
pub mod ticker;

pub use error::ReclaimError;
pub use reclaimer::{OrphanReclaimer, PassReport, ReclaimConfig};
pub use ticker::{ChannelTicker, IntervalTicker, TickSource};
