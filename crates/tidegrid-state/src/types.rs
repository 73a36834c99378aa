//! Domain types for the tidegrid state store.
//!
//! These types describe the persisted state of clusters, their alerts and
//! scaling policies, per-instance metadata, and the scaling history. All of
//! them serialize to JSON for storage in redb tables.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for a managed cluster.
pub type ClusterId = u64;

/// Unique identifier for an alert within the store.
pub type AlertId = u64;

/// Cloud provider instance identifier (e.g. `i-0abc...`).
pub type InstanceId = String;

// ── Cluster ────────────────────────────────────────────────────────

/// An autoscaled cluster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Cluster {
    pub id: ClusterId,
    /// Reference to the provider-side stack that owns the cluster's groups.
    pub stack_ref: String,
    /// Lower bound applied to every computed host group size.
    pub min_size: u32,
    /// Upper bound applied to every computed host group size.
    pub max_size: u32,
    /// Minimum minutes between two scaling activities.
    pub cool_down_minutes: u32,
    /// When the last scaling activity was dispatched, if ever.
    pub last_scaling_activity: Option<DateTime<Utc>>,
    /// Disabled clusters are skipped by the evaluation loop.
    pub autoscaling_enabled: bool,
}

// ── Instances ─────────────────────────────────────────────────────

/// Lifecycle status of a cluster node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceStatus {
    RunningHealthy,
    RunningUnhealthy,
    DeletedOnProvider,
    Terminated,
    Failed,
}

/// Per-node metadata. Records are append-only: termination sets
/// `termination_date` and status, the record itself is never removed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstanceMetaData {
    pub cluster_id: ClusterId,
    /// Ordinal assigned at provisioning, unique within the cluster.
    pub private_id: u64,
    pub group_name: String,
    pub instance_id: Option<InstanceId>,
    /// Discovery FQDN as registered with the cluster manager.
    pub discovery_fqdn: Option<String>,
    pub status: InstanceStatus,
    pub status_reason: Option<String>,
    pub start_date: DateTime<Utc>,
    pub termination_date: Option<DateTime<Utc>>,
}

impl InstanceMetaData {
    pub fn is_healthy(&self) -> bool {
        self.status == InstanceStatus::RunningHealthy
    }

    /// Failed its health check while still running on the provider.
    pub fn is_unhealthy(&self) -> bool {
        self.status == InstanceStatus::RunningUnhealthy
    }

    pub fn is_deleted_on_provider(&self) -> bool {
        self.status == InstanceStatus::DeletedOnProvider
    }

    pub fn is_terminated(&self) -> bool {
        self.status == InstanceStatus::Terminated || self.termination_date.is_some()
    }

    /// Attached instances are registered with the cluster and not yet terminated.
    pub fn is_attached(&self) -> bool {
        !self.is_terminated() && self.discovery_fqdn.is_some()
    }

    /// Build the composite key for the instances table.
    pub fn table_key(&self) -> String {
        instance_key(self.cluster_id, self.private_id)
    }
}

/// A named subset of a cluster's nodes that share a role.
#[derive(Debug, Clone, PartialEq)]
pub struct HostGroup {
    pub cluster_id: ClusterId,
    pub name: String,
    pub instances: Vec<InstanceMetaData>,
}

impl HostGroup {
    /// Instances currently attached to the cluster.
    pub fn attached(&self) -> impl Iterator<Item = &InstanceMetaData> {
        self.instances.iter().filter(|i| i.is_attached())
    }

    pub fn node_count(&self) -> u32 {
        self.attached().count() as u32
    }

    /// Look up an attached member by FQDN, ignoring ASCII case.
    pub fn find_by_fqdn(&self, fqdn: &str) -> Option<&InstanceMetaData> {
        self.attached().find(|i| {
            i.discovery_fqdn
                .as_deref()
                .is_some_and(|f| f.eq_ignore_ascii_case(fqdn))
        })
    }
}

// ── Policies and alerts ───────────────────────────────────────────

/// How `ScalingPolicy::scaling_adjustment` is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdjustmentType {
    /// Add (or remove, if negative) this many nodes.
    NodeCount,
    /// Grow or shrink by this percentage of the current size.
    Percentage,
    /// Set the group to exactly this many nodes.
    Exact,
    /// Any type this build does not understand. Evaluates as a no-op.
    #[serde(other)]
    Unknown,
}

/// The action attached to an alert.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScalingPolicy {
    pub name: String,
    pub host_group: String,
    pub adjustment_type: AdjustmentType,
    /// Signed adjustment; negative shrinks the group.
    pub scaling_adjustment: i32,
}

/// State reported for a metric definition by the monitoring system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MetricState {
    Ok,
    Warning,
    Critical,
}

/// What makes an alert fire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AlertTrigger {
    /// Cron schedule, `[sec] min hour dom month dow`.
    Time { cron: String },
    /// Metric definition held in `state` for at least `period_minutes`.
    Metric {
        definition: String,
        state: MetricState,
        period_minutes: u32,
    },
}

/// A time- or metric-based alert, optionally carrying a scaling policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Alert {
    pub id: AlertId,
    pub cluster_id: ClusterId,
    pub name: String,
    pub trigger: AlertTrigger,
    /// Alerts without a policy never result in a scaling action.
    pub policy: Option<ScalingPolicy>,
}

impl Alert {
    /// Build the composite key for the alerts table.
    pub fn table_key(&self) -> String {
        format!("{}:{:010}", self.cluster_id, self.id)
    }
}

// ── History ───────────────────────────────────────────────────────

/// Outcome class of a recorded scaling event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScalingStatus {
    Success,
    Failed,
    /// An alert fired but was not executed (e.g. it overlapped another).
    TriggerFailed,
    Cancelled,
    /// The worker pool refused the request; it is retried on the next pass.
    Rejected,
}

/// Audit record attached to a cluster's history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryEntry {
    pub cluster_id: ClusterId,
    pub status: ScalingStatus,
    pub message: String,
    pub host_group: Option<String>,
    pub original_node_count: Option<u32>,
    pub desired_node_count: Option<u32>,
    pub recorded_at: DateTime<Utc>,
}

impl HistoryEntry {
    /// A bare entry carrying only status and message.
    pub fn new(cluster_id: ClusterId, status: ScalingStatus, message: impl Into<String>) -> Self {
        Self {
            cluster_id,
            status,
            message: message.into(),
            host_group: None,
            original_node_count: None,
            desired_node_count: None,
            recorded_at: Utc::now(),
        }
    }
}

/// Build the composite key for an instance record.
pub fn instance_key(cluster_id: ClusterId, private_id: u64) -> String {
    format!("{cluster_id}:{private_id:010}")
}
