//! Collaborator contracts for persistence.
//!
//! The scaling core only talks to storage through these traits. They are
//! synchronous: implementations are expected to provide their own atomicity
//! (the redb `StateStore` runs each call in a single transaction).

use chrono::{DateTime, Utc};

use crate::error::StateResult;
use crate::types::*;

/// Cluster lookups and cooldown bookkeeping.
pub trait ClusterStore: Send + Sync {
    /// Fetch a cluster, failing with `StateError::ClusterNotFound` if unknown.
    fn find_cluster(&self, id: ClusterId) -> StateResult<Cluster>;

    fn save_cluster(&self, cluster: &Cluster) -> StateResult<()>;

    fn list_clusters(&self) -> StateResult<Vec<Cluster>>;

    /// Advance `last_scaling_activity` to `at` unless it is already later.
    ///
    /// Returns the value stored after the call.
    fn touch_scaling_activity(&self, id: ClusterId, at: DateTime<Utc>)
    -> StateResult<DateTime<Utc>>;
}

/// Alerts attached to a cluster, in definition order.
pub trait AlertStore: Send + Sync {
    fn find_alerts_for_cluster(&self, id: ClusterId) -> StateResult<Vec<Alert>>;
}

/// Audit sink for scaling outcomes.
pub trait HistorySink: Send + Sync {
    fn record_entry(&self, entry: &HistoryEntry) -> StateResult<()>;

    fn record_event(
        &self,
        cluster_id: ClusterId,
        status: ScalingStatus,
        message: &str,
    ) -> StateResult<()> {
        self.record_entry(&HistoryEntry::new(cluster_id, status, message))
    }
}

/// Instance metadata, grouped by host group.
pub trait InstanceStore: Send + Sync {
    /// All instances (including terminated ones) of a host group.
    fn host_group(&self, cluster_id: ClusterId, name: &str) -> StateResult<HostGroup>;

    fn save_instance(&self, instance: &InstanceMetaData) -> StateResult<()>;

    /// Mark the given provider instances terminated at `at`.
    ///
    /// Returns how many not-yet-terminated records were updated.
    fn mark_terminated(
        &self,
        cluster_id: ClusterId,
        instance_ids: &[InstanceId],
        at: DateTime<Utc>,
    ) -> StateResult<u32>;
}

/// Everything the scaling coordinator needs from storage.
pub trait Store: ClusterStore + AlertStore + HistorySink + InstanceStore {}

impl<T> Store for T where T: ClusterStore + AlertStore + HistorySink + InstanceStore {}
