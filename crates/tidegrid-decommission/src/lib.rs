//! tidegrid-decommission — safe removal of hosts from a data cluster.
//!
//! [`DownscaleCandidateSelector`] decides which members of a host group can
//! leave without losing data, and [`DecommissionOrchestrator`] carries the
//! removal out phase by phase against a [`ClusterManager`].

pub mod client;
pub mod component;
pub mod error;
pub mod orchestrator;
pub mod selector;

#[cfg(test)]
mod testing;

pub use client::{
    AdminState, ClientError, ClientFuture, ClusterManager, ComponentState, ComponentStatus,
    HostState, HostStatus, MigrationStatus, RequestId, RequestStatus, StorageUsage,
};
pub use component::{ComponentKind, ComponentRegistry, ComponentStrategy};
pub use error::{DecommissionError, DecommissionResult, Phase};
pub use orchestrator::{
    DecommissionOrchestrator, DecommissionOutcome, DecommissionPlan, DecommissionSettings,
    UNKNOWN_STATE_REASON,
};
pub use selector::{DownscaleCandidateSelector, SelectorSettings, verify_node_count};
