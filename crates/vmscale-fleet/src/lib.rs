//! vmscale-fleet — the tracked runner fleet and its VM lifecycle.
//!
//! The `FleetTracker` is the only source of truth for fleet size. The
//! `VmManager` creates and deletes VMs through an injected
//! `ComputeProvider` and keeps the tracker in step.
//!
//! # Architecture
//!
//! ```text
//! VmManager
//!   ├── ComputeProvider (insert / delete / wait / list)
//!   ├── select_zone() from vmscale-capacity
//!   └── Arc<FleetTracker>
//!       └── Mutex<HashMap<runner name, RunnerRecord>>
//! ```
//!
//! # Lock discipline
//!
//! The tracker uses a synchronous mutex and never hands out its guard,
//! so no provider call can run while the table is locked.

pub mod error;
pub mod manager;
pub mod tracker;

pub use error::{FleetError, FleetResult};
pub use manager::{Listing, ManagerConfig, Timeouts, VmManager};
pub use tracker::{FleetTracker, RunnerRecord};
