//! Per-component decommission strategies.
//!
//! Each component kind that needs an orderly decommission registers a
//! [`ComponentStrategy`]. The orchestrator walks the registry in kind order
//! and never branches on component names itself.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::client::{AdminState, ClientFuture, ClusterManager, HostStatus, RequestId};

/// Component kinds with a decommission procedure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentKind {
    DataStore,
    Compute,
    RegionServer,
}

impl ComponentKind {
    /// Component name as the cluster manager reports it.
    pub fn component(self) -> &'static str {
        match self {
            ComponentKind::DataStore => "DATANODE",
            ComponentKind::Compute => "NODEMANAGER",
            ComponentKind::RegionServer => "HBASE_REGIONSERVER",
        }
    }

    /// Service that owns the component.
    pub fn service(self) -> &'static str {
        match self {
            ComponentKind::DataStore => "HDFS",
            ComponentKind::Compute => "YARN",
            ComponentKind::RegionServer => "HBASE",
        }
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.component())
    }
}

/// How one component kind is taken out of service.
pub trait ComponentStrategy: Send + Sync {
    fn kind(&self) -> ComponentKind;

    /// The host runs the component and it is still in service.
    fn applicable(&self, status: &HostStatus) -> bool {
        status
            .components
            .get(self.kind().component())
            .is_some_and(|c| c.desired_admin_state == AdminState::InService)
    }

    /// Issue the decommission request for `hosts`.
    fn decommission<'a>(
        &'a self,
        client: &'a dyn ClusterManager,
        stack_ref: &'a str,
        hosts: &'a [String],
    ) -> ClientFuture<'a, RequestId> {
        client.decommission_component(stack_ref, self.kind().component(), hosts)
    }

    /// Data must move off the hosts before their components can stop.
    fn needs_migration_wait(&self) -> bool;

    /// The host reports the component as decommissioned.
    fn stopped(&self, status: &HostStatus) -> bool {
        status
            .components
            .get(self.kind().component())
            .is_none_or(|c| c.desired_admin_state == AdminState::Decommissioned)
    }
}

pub struct DataStoreStrategy;

impl ComponentStrategy for DataStoreStrategy {
    fn kind(&self) -> ComponentKind {
        ComponentKind::DataStore
    }

    fn needs_migration_wait(&self) -> bool {
        true
    }
}

pub struct ComputeStrategy;

impl ComponentStrategy for ComputeStrategy {
    fn kind(&self) -> ComponentKind {
        ComponentKind::Compute
    }

    fn needs_migration_wait(&self) -> bool {
        false
    }
}

/// Region servers go into maintenance mode first so the master stops
/// assigning regions to them.
pub struct RegionServerStrategy;

impl ComponentStrategy for RegionServerStrategy {
    fn kind(&self) -> ComponentKind {
        ComponentKind::RegionServer
    }

    fn decommission<'a>(
        &'a self,
        client: &'a dyn ClusterManager,
        stack_ref: &'a str,
        hosts: &'a [String],
    ) -> ClientFuture<'a, RequestId> {
        let component = self.kind().component();
        Box::pin(async move {
            client.set_maintenance(stack_ref, component, hosts, true).await?;
            client
                .decommission_component(stack_ref, component, hosts)
                .await
        })
    }

    fn needs_migration_wait(&self) -> bool {
        true
    }
}

/// Registered strategies, iterated in [`ComponentKind`] order.
pub struct ComponentRegistry {
    strategies: BTreeMap<ComponentKind, Box<dyn ComponentStrategy>>,
}

impl ComponentRegistry {
    pub fn empty() -> Self {
        Self {
            strategies: BTreeMap::new(),
        }
    }

    /// Registry with the data-store, compute and region-server strategies.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register(Box::new(DataStoreStrategy));
        registry.register(Box::new(ComputeStrategy));
        registry.register(Box::new(RegionServerStrategy));
        registry
    }

    /// Add or replace the strategy for its kind.
    pub fn register(&mut self, strategy: Box<dyn ComponentStrategy>) {
        self.strategies.insert(strategy.kind(), strategy);
    }

    pub fn get(&self, kind: ComponentKind) -> Option<&dyn ComponentStrategy> {
        self.strategies.get(&kind).map(|s| s.as_ref())
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn ComponentStrategy> {
        self.strategies.values().map(|s| s.as_ref())
    }

    /// Strategy responsible for a component name, if any.
    pub fn by_component(&self, component: &str) -> Option<&dyn ComponentStrategy> {
        self.iter().find(|s| s.kind().component() == component)
    }
}

impl Default for ComponentRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
