//! vmscale-core — shared types for the runner autoscaler.
//!
//! Everything the other crates agree on lives here:
//!
//! - **`provider`** — the `ComputeProvider` capability (insert, delete,
//!   wait, paginated list, region quota) and the pagination helper
//! - **`memory`** — an in-memory provider with fault injection, used by
//!   tests and by the daemon's local mode
//! - **`config`** — the `vmscale.toml` model, validation, duration parsing
//! - **`platform`** — platform selection and boot payload metadata
//! - **`zone`** — `<region>-<letter>` zone naming

pub mod config;
pub mod error;
pub mod memory;
pub mod platform;
pub mod provider;
pub mod types;
pub mod zone;

pub use config::{ScalerConfig, parse_duration};
pub use error::{ConfigError, ProviderError, ProviderResult};
pub use memory::MemoryProvider;
pub use platform::{BootPayload, Platform};
pub use provider::{ComputeProvider, list_all, list_into};
pub use types::*;
pub use zone::{Zone, parse_zone_list, region_of};
