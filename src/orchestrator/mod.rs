//! Run orchestration.
//!
//! This module owns the per-run state machine (upload phase, save phase,
//! finalization) and the mapping from executor results to layer outcomes. The
//! presentation side is only reached through the hand-off channel.

mod controller;
mod finalize;

pub use controller::Orchestrator;
pub(crate) use finalize::finalize;
