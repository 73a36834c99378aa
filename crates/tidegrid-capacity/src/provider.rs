//! Cloud provider contract.
//!
//! One autoscaling group backs each host group of a cluster. The adjuster
//! never talks to a cloud SDK directly; it drives this trait, which the
//! daemon wires to a concrete client (or to the simulator in tests).

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use crate::error::ProviderError;

/// Boxed future returned by every provider call.
pub type ProviderFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, ProviderError>> + Send + 'a>>;

/// Overall state of an autoscaling group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupStatus {
    InService,
    /// A capacity change is still being applied.
    Updating,
    Deleting,
}

/// Lifecycle state of a group member, as the group sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Pending,
    InService,
    Terminating,
    Terminated,
    Standby,
}

/// Compute-layer state of a single instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    Pending,
    Running,
    Stopping,
    Stopped,
    ShuttingDown,
    Terminated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMember {
    pub instance_id: String,
    pub lifecycle: LifecycleState,
}

/// Snapshot of an autoscaling group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupDescription {
    pub name: String,
    pub max_size: u32,
    pub desired_capacity: u32,
    pub status: GroupStatus,
    pub members: Vec<GroupMember>,
}

impl GroupDescription {
    /// Ids of members the group reports as in service.
    pub fn in_service(&self) -> Vec<String> {
        self.members
            .iter()
            .filter(|m| m.lifecycle == LifecycleState::InService)
            .map(|m| m.instance_id.clone())
            .collect()
    }
}

/// Operations the capacity adjuster needs from a cloud provider.
pub trait CloudProvider: Send + Sync {
    /// Resolve the group that backs `host_group` of the given stack.
    fn group_name<'a>(&'a self, stack_ref: &'a str, host_group: &'a str)
    -> ProviderFuture<'a, String>;

    fn describe_group<'a>(&'a self, group: &'a str) -> ProviderFuture<'a, GroupDescription>;

    /// Set the group's max size and desired capacity.
    fn resize_group<'a>(
        &'a self,
        group: &'a str,
        max_size: u32,
        desired_capacity: u32,
    ) -> ProviderFuture<'a, ()>;

    fn suspend_processes<'a>(
        &'a self,
        group: &'a str,
        processes: &'a [String],
    ) -> ProviderFuture<'a, ()>;

    fn resume_processes<'a>(
        &'a self,
        group: &'a str,
        processes: &'a [String],
    ) -> ProviderFuture<'a, ()>;

    /// Terminate one member, optionally lowering desired capacity by one.
    fn terminate_instance<'a>(
        &'a self,
        group: &'a str,
        instance_id: &'a str,
        decrement_desired: bool,
    ) -> ProviderFuture<'a, ()>;

    /// Compute-layer state of each requested instance. Unknown ids are omitted.
    fn instance_states<'a>(
        &'a self,
        instance_ids: &'a [String],
    ) -> ProviderFuture<'a, HashMap<String, InstanceState>>;
}
