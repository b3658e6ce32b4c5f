//! EAC cache runtime controller library.
//!
//! Reconciles the worker fleet of one cache runtime inside a cluster
//! orchestrator:
//!
//! - `workers` / `readiness`: worker phase and conditions, with a disabled
//!   variant for zero replicas and a delegated helper otherwise
//! - `endpoints`: publishes ready worker RPC addresses for client discovery
//! - `quota`: capacity and quota of the backing store
//!
//! All status and config mutation is compare-and-update under optimistic
//! concurrency (see `eac_reconcile`). The cluster API itself sits behind the
//! traits in `cluster`; `memory` provides in-memory implementations.

pub mod api;
pub mod cluster;
pub mod config;
pub mod endpoints;
pub mod engine;
pub mod error;
pub mod memory;
pub mod quota;
pub mod readiness;
pub mod reconciler;
pub mod telemetry;
pub mod values;
pub mod workers;

// Re-export commonly used types
pub use api::{Runtime, RuntimeRef, RuntimeStatus};
pub use engine::{EacEngine, EngineDeps};
pub use error::{EngineError, EngineResult};
pub use memory::MemoryCluster;
pub use workers::{MockHelper, WorkerSetHelper};
