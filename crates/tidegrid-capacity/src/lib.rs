//! tidegrid-capacity — cloud-side capacity adjustment.
//!
//! Resizes the autoscaling group behind a host group, terminates single
//! instances, and waits for the provider to converge. All waits are bounded
//! polling loops from [`polling`] and stop as soon as the owning cluster
//! operation is cancelled.

pub mod adjuster;
pub mod error;
pub mod polling;
pub mod provider;

pub use adjuster::{
    CapacityAdjuster, CapacitySettings, DEFAULT_INSTANCE_BATCH_SIZE, DEFAULT_SUSPENDED_PROCESSES,
};
pub use error::{AdjustmentCause, CapacityError, CapacityResult, ProviderError, Stage};
pub use polling::{PollError, PollingStrategy, poll};
pub use provider::{
    CloudProvider, GroupDescription, GroupMember, GroupStatus, InstanceState, LifecycleState,
    ProviderFuture,
};
