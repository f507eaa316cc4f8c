//! Rolling upgrade workflow for Rancher services.
//!
//! - `image` / `launch`: compute the new launch configs from requested tags
//! - `validate`: registry and environment checks run before submitting
//! - `executor` / `waiter`: submit one upgrade and wait for it to settle
//! - `fleet`: run the above for every service matching a selector

pub mod envfile;
pub mod executor;
pub mod fleet;
pub mod image;
pub mod launch;
pub mod request;
pub mod validate;
pub mod waiter;

pub use fleet::{Compensation, FleetReport, Orchestrator, OrchestratorSettings};
pub use request::{ServiceSelector, UpgradeRequest};
