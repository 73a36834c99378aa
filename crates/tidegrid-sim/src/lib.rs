//! tidegrid-sim — an in-memory stand-in for the cluster manager, the cloud
//! provider and the metrics system.
//!
//! Used by the daemon's `simulate` mode and by cross-crate tests. See
//! [`Simulator`] for the knobs it exposes.

mod cloud;
mod manager;
mod metrics;
pub mod simulator;

pub use simulator::{GroupSeed, Simulator, cloud_group_name};
