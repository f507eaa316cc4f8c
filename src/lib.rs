//! Rolling upgrades of Rancher services.
//!
//! [`upgrade::Orchestrator`] validates requested image tags and environment
//! keys, submits in-service upgrades for one service or a fleet matched by
//! name prefix, and compensates members that fail while waiting.

pub mod config;
pub mod error;
pub mod output;
pub mod rancher;
pub mod registry;
#[cfg(test)]
mod testing;
pub mod upgrade;
