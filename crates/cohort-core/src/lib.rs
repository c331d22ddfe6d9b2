//! cohort-core: constrained group allocation and quota-based selection.
//!
//! # Conventions
//!
//! - **Errors**: engine operations return [`EngineError`]; storage and config
//!   helpers use `anyhow::Result` with context.
//! - **Logging**: `tracing` macros (`info!` for committed changes, `debug!`
//!   for filtering decisions, `warn!` for soft-cap overruns and retries).
//! - **Randomness**: every random choice goes through an injected
//!   `rand::Rng`, so seeded runs are reproducible.

pub mod allocate;
pub mod capacity;
pub mod code;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod matcher;
pub mod model;
pub mod provision;
pub mod resolver;
pub mod select;

pub use allocate::{GroupAssignment, JoinOutcome, Roster};
pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{EngineError, ErrorCode};
pub use provision::{
    GroupingSessionRequest, ProvisionedSession, ResolvedCode, SelectionSessionRequest,
};
pub use select::{PoolJoinOutcome, SelectionRequest, SelectionResult};
