//! Cluster-manager contract.
//!
//! The cluster manager owns service topology: which components run on
//! which host, their admin state, replication settings and storage usage.
//! Every call is scoped by the cluster's stack reference.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

/// Error string returned by the cluster manager.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct ClientError(pub String);

impl ClientError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Boxed future returned by every cluster-manager call.
pub type ClientFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ClientError>> + Send + 'a>>;

/// Identifier of an asynchronous cluster-manager request.
pub type RequestId = u64;

/// Agent-level state of a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HostState {
    Healthy,
    Unhealthy,
    Alert,
    /// The agent stopped heartbeating.
    Unknown,
}

/// Run state of a component on a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComponentState {
    Installed,
    Starting,
    Started,
    Stopping,
    Unknown,
}

/// Administrative state a component is asked to be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdminState {
    InService,
    Decommissioned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentStatus {
    pub state: ComponentState,
    pub desired_admin_state: AdminState,
}

/// Live status of one host and the components installed on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostStatus {
    pub host_state: HostState,
    /// Component name (e.g. `DATANODE`) → status.
    pub components: BTreeMap<String, ComponentStatus>,
}

impl HostStatus {
    pub fn runs(&self, component: &str) -> bool {
        self.components.contains_key(component)
    }
}

/// Progress of an asynchronous request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStatus {
    InProgress,
    Completed,
    Failed,
}

/// Progress of data moving off decommissioning hosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MigrationStatus {
    InProgress,
    Completed,
}

/// Storage figures of one data host, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageUsage {
    pub used: u64,
    pub remaining: u64,
}

/// Operations the decommissioning engine needs from the cluster manager.
pub trait ClusterManager: Send + Sync {
    /// Number of hosts the cluster manager reports for a host group.
    fn host_group_node_count<'a>(&'a self, stack_ref: &'a str, host_group: &'a str)
    -> ClientFuture<'a, u32>;

    /// FQDN → cloud instance id for every member of a host group.
    fn instance_ids_for_host_group<'a>(
        &'a self,
        stack_ref: &'a str,
        host_group: &'a str,
    ) -> ClientFuture<'a, HashMap<String, String>>;

    /// Every host currently registered with the cluster.
    fn cluster_hosts<'a>(&'a self, stack_ref: &'a str) -> ClientFuture<'a, Vec<String>>;

    /// Live status of the given hosts. Hosts the manager no longer knows are omitted.
    fn host_statuses<'a>(
        &'a self,
        stack_ref: &'a str,
        hosts: &'a [String],
    ) -> ClientFuture<'a, HashMap<String, HostStatus>>;

    /// Component names the cluster layout places on a host group.
    fn host_group_components<'a>(
        &'a self,
        stack_ref: &'a str,
        host_group: &'a str,
    ) -> ClientFuture<'a, Vec<String>>;

    fn replication_factor<'a>(&'a self, stack_ref: &'a str, host_group: &'a str)
    -> ClientFuture<'a, u32>;

    /// Storage usage per data host.
    fn storage_usage<'a>(&'a self, stack_ref: &'a str)
    -> ClientFuture<'a, HashMap<String, StorageUsage>>;

    /// Hosts that must not be decommissioned right now.
    fn reserved_hosts<'a>(&'a self, stack_ref: &'a str, host_group: &'a str)
    -> ClientFuture<'a, Vec<String>>;

    /// Start a service. `None` means it was already running.
    fn start_service<'a>(&'a self, stack_ref: &'a str, service: &'a str)
    -> ClientFuture<'a, Option<RequestId>>;

    fn decommission_component<'a>(
        &'a self,
        stack_ref: &'a str,
        component: &'a str,
        hosts: &'a [String],
    ) -> ClientFuture<'a, RequestId>;

    fn set_maintenance<'a>(
        &'a self,
        stack_ref: &'a str,
        component: &'a str,
        hosts: &'a [String],
        enabled: bool,
    ) -> ClientFuture<'a, ()>;

    fn stop_components<'a>(&'a self, stack_ref: &'a str, hosts: &'a [String])
    -> ClientFuture<'a, RequestId>;

    fn request_status<'a>(&'a self, stack_ref: &'a str, request: RequestId)
    -> ClientFuture<'a, RequestStatus>;

    fn migration_status<'a>(
        &'a self,
        stack_ref: &'a str,
        component: &'a str,
        hosts: &'a [String],
    ) -> ClientFuture<'a, MigrationStatus>;

    /// Remove hosts from cluster membership.
    fn delete_hosts<'a>(&'a self, stack_ref: &'a str, hosts: &'a [String]) -> ClientFuture<'a, ()>;
}
