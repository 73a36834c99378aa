//! Shared simulated world: stacks, their hosts and the cloud groups
//! backing each host group.
//!
//! [`Simulator`] is cheap to clone; every clone sees the same state. It
//! implements [`ClusterManager`](tidegrid_decommission::ClusterManager),
//! [`CloudProvider`](tidegrid_capacity::CloudProvider) and
//! [`MetricsSource`](tidegrid_autoscale::MetricsSource), so one instance
//! can stand in for all remote collaborators.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

use tidegrid_autoscale::MetricObservation;
use tidegrid_capacity::{GroupDescription, GroupMember, GroupStatus, LifecycleState};
use tidegrid_decommission::{
    AdminState, ComponentKind, ComponentState, ComponentStatus, HostState, HostStatus,
    RequestId, StorageUsage,
};
use tidegrid_state::{
    Cluster, ClusterId, InstanceMetaData, InstanceStatus, InstanceStore, MetricState,
    StateResult,
};

const DEFAULT_REMAINING_BYTES: u64 = 1 << 40;

fn default_components() -> Vec<String> {
    vec!["DATANODE".to_string(), "NODEMANAGER".to_string()]
}

fn default_remaining() -> u64 {
    DEFAULT_REMAINING_BYTES
}

/// Initial shape of one host group.
#[derive(Debug, Clone, Deserialize)]
pub struct GroupSeed {
    pub name: String,
    pub nodes: u32,
    #[serde(default = "default_components")]
    pub components: Vec<String>,
    /// Used bytes reported by every seeded host.
    #[serde(default)]
    pub used_bytes: u64,
    #[serde(default = "default_remaining")]
    pub remaining_bytes: u64,
}

pub(crate) struct SimHost {
    pub host_group: String,
    pub instance_id: String,
    pub status: HostStatus,
    pub storage: StorageUsage,
}

pub(crate) struct SimHostGroup {
    pub components: Vec<String>,
    pub reserved: Vec<String>,
    pub used_bytes: u64,
    pub remaining_bytes: u64,
}

pub(crate) struct SimStack {
    pub cluster_id: ClusterId,
    pub replication: u32,
    pub groups: BTreeMap<String, SimHostGroup>,
    pub hosts: BTreeMap<String, SimHost>,
}

pub(crate) struct CloudGroup {
    pub stack_ref: String,
    pub host_group: String,
    pub max_size: u32,
    pub desired: u32,
    pub status: GroupStatus,
    pub members: Vec<GroupMember>,
    pub suspended: BTreeSet<String>,
}

impl CloudGroup {
    pub fn describe(&self, name: &str) -> GroupDescription {
        GroupDescription {
            name: name.to_string(),
            max_size: self.max_size,
            desired_capacity: self.desired,
            status: self.status,
            members: self.members.clone(),
        }
    }

    /// One step of provider-side progress.
    pub fn settle(&mut self) {
        for member in &mut self.members {
            if member.lifecycle == LifecycleState::Pending {
                member.lifecycle = LifecycleState::InService;
            }
        }
        if self.status == GroupStatus::Updating {
            self.status = GroupStatus::InService;
        }
    }
}

#[derive(Default)]
pub(crate) struct SimState {
    pub stacks: HashMap<String, SimStack>,
    pub cloud: HashMap<String, CloudGroup>,
    pub terminated: HashSet<String>,
    pub metrics: HashMap<(String, String), MetricObservation>,
    pub failing: HashSet<String>,
    pub calls: Vec<String>,
    pub next_private_id: u64,
    pub next_request: RequestId,
    pub failed_requests: HashSet<RequestId>,
    /// In-progress replies before a migration reports complete.
    pub migration_polls: u32,
    pub migrations: HashMap<(String, String), u32>,
}

impl SimState {
    pub fn new_request(&mut self) -> RequestId {
        self.next_request += 1;
        self.next_request
    }

    /// Register a new host in `host_group` and return its metadata.
    pub fn provision(&mut self, stack_ref: &str, host_group: &str) -> Option<InstanceMetaData> {
        let private_id = self.next_private_id;
        let stack = self.stacks.get_mut(stack_ref)?;
        let group = stack.groups.get(host_group)?;
        let components: BTreeMap<String, ComponentStatus> = group
            .components
            .iter()
            .map(|c| {
                let status = ComponentStatus {
                    state: ComponentState::Started,
                    desired_admin_state: AdminState::InService,
                };
                (c.clone(), status)
            })
            .collect();
        let storage = StorageUsage {
            used: group.used_bytes,
            remaining: group.remaining_bytes,
        };
        self.next_private_id += 1;

        let fqdn = format!("{host_group}-{private_id}.{stack_ref}.sim");
        let instance_id = format!("i-{private_id:06}");
        stack.hosts.insert(
            fqdn.clone(),
            SimHost {
                host_group: host_group.to_string(),
                instance_id: instance_id.clone(),
                status: HostStatus {
                    host_state: HostState::Healthy,
                    components,
                },
                storage,
            },
        );
        Some(InstanceMetaData {
            cluster_id: stack.cluster_id,
            private_id,
            group_name: host_group.to_string(),
            instance_id: Some(instance_id),
            discovery_fqdn: Some(fqdn),
            status: InstanceStatus::RunningHealthy,
            status_reason: None,
            start_date: Utc::now(),
            termination_date: None,
        })
    }
}

fn check_op(s: &SimState, op: &str) -> Result<(), String> {
    if s.failing.contains(op) {
        Err(format!("simulated {op} failure"))
    } else {
        Ok(())
    }
}

/// Cloud group name for a host group of a stack.
pub fn cloud_group_name(stack_ref: &str, host_group: &str) -> String {
    format!("{stack_ref}-{host_group}")
}

/// Service owning a component, for the built-in component kinds.
pub(crate) fn service_of(component: &str) -> Option<&'static str> {
    [
        ComponentKind::DataStore,
        ComponentKind::Compute,
        ComponentKind::RegionServer,
    ]
    .into_iter()
    .find(|k| k.component() == component)
    .map(ComponentKind::service)
}

#[derive(Clone)]
pub struct Simulator {
    pub(crate) state: Arc<Mutex<SimState>>,
    pub(crate) instances: Option<Arc<dyn InstanceStore>>,
}

impl Default for Simulator {
    fn default() -> Self {
        Self::new()
    }
}

impl Simulator {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                next_private_id: 1,
                migration_polls: 1,
                ..SimState::default()
            })),
            instances: None,
        }
    }

    /// Record hosts created by upscales in `store`, like real provisioning.
    pub fn with_instance_store(mut self, store: Arc<dyn InstanceStore>) -> Self {
        self.instances = Some(store);
        self
    }

    pub(crate) fn with_state<R>(&self, f: impl FnOnce(&mut SimState) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    /// Fail if `op` was marked failing.
    pub(crate) fn check(&self, op: &str) -> Result<(), String> {
        self.with_state(|s| check_op(s, op))
    }

    /// Log `call`, then fail it if `op` was marked failing.
    pub(crate) fn record(&self, op: &str, call: String) -> Result<(), String> {
        self.with_state(|s| {
            s.calls.push(call);
            check_op(s, op)
        })
    }

    pub fn add_stack(&self, cluster: &Cluster, replication: u32) {
        self.with_state(|s| {
            s.stacks.insert(
                cluster.stack_ref.clone(),
                SimStack {
                    cluster_id: cluster.id,
                    replication,
                    groups: BTreeMap::new(),
                    hosts: BTreeMap::new(),
                },
            );
        });
    }

    /// Create a host group with `seed.nodes` hosts and its cloud group.
    ///
    /// The hosts' metadata is saved to the attached instance store, if any,
    /// and returned.
    pub fn seed_group(&self, cluster: &Cluster, seed: &GroupSeed) -> StateResult<Vec<InstanceMetaData>> {
        let stack_ref = cluster.stack_ref.as_str();
        let created = self.with_state(|s| {
            let Some(stack) = s.stacks.get_mut(stack_ref) else {
                return Vec::new();
            };
            stack.groups.insert(
                seed.name.clone(),
                SimHostGroup {
                    components: seed.components.clone(),
                    reserved: Vec::new(),
                    used_bytes: seed.used_bytes,
                    remaining_bytes: seed.remaining_bytes,
                },
            );
            let created: Vec<InstanceMetaData> = (0..seed.nodes)
                .filter_map(|_| s.provision(stack_ref, &seed.name))
                .collect();
            let members = created
                .iter()
                .filter_map(|i| i.instance_id.clone())
                .map(|instance_id| GroupMember {
                    instance_id,
                    lifecycle: LifecycleState::InService,
                })
                .collect();
            s.cloud.insert(
                cloud_group_name(stack_ref, &seed.name),
                CloudGroup {
                    stack_ref: stack_ref.to_string(),
                    host_group: seed.name.clone(),
                    max_size: seed.nodes,
                    desired: seed.nodes,
                    status: GroupStatus::InService,
                    members,
                    suspended: BTreeSet::new(),
                },
            );
            created
        });
        debug!(stack_ref, host_group = %seed.name, nodes = created.len(), "seeded host group");
        if let Some(store) = &self.instances {
            for instance in &created {
                store.save_instance(instance)?;
            }
        }
        Ok(created)
    }

    pub fn set_host_state(&self, stack_ref: &str, fqdn: &str, state: HostState) {
        self.with_state(|s| {
            if let Some(host) = s.stacks.get_mut(stack_ref).and_then(|st| st.hosts.get_mut(fqdn)) {
                host.status.host_state = state;
            }
        });
    }

    pub fn set_storage(&self, stack_ref: &str, fqdn: &str, used: u64, remaining: u64) {
        self.with_state(|s| {
            if let Some(host) = s.stacks.get_mut(stack_ref).and_then(|st| st.hosts.get_mut(fqdn)) {
                host.storage = StorageUsage { used, remaining };
            }
        });
    }

    /// Hide a host from the cluster manager without touching the cloud.
    pub fn forget_host(&self, stack_ref: &str, fqdn: &str) {
        self.with_state(|s| {
            if let Some(stack) = s.stacks.get_mut(stack_ref) {
                stack.hosts.remove(fqdn);
            }
        });
    }

    pub fn reserve_host(&self, stack_ref: &str, host_group: &str, fqdn: &str) {
        self.with_state(|s| {
            if let Some(group) = s
                .stacks
                .get_mut(stack_ref)
                .and_then(|st| st.groups.get_mut(host_group))
            {
                group.reserved.push(fqdn.to_string());
            }
        });
    }

    pub fn set_metric(&self, stack_ref: &str, definition: &str, state: MetricState, since: DateTime<Utc>) {
        self.with_state(|s| {
            s.metrics.insert(
                (stack_ref.to_string(), definition.to_string()),
                MetricObservation { state, since },
            );
        });
    }

    /// Make every later call of `op` (a trait method name) fail.
    pub fn fail_calls(&self, op: &str) {
        self.with_state(|s| {
            s.failing.insert(op.to_string());
        });
    }

    pub fn set_migration_polls(&self, polls: u32) {
        self.with_state(|s| s.migration_polls = polls);
    }

    /// Every call made so far, as `op:args` strings.
    pub fn calls(&self) -> Vec<String> {
        self.with_state(|s| s.calls.clone())
    }

    /// Registered hosts of a host group, sorted.
    pub fn hosts(&self, stack_ref: &str, host_group: &str) -> Vec<String> {
        self.with_state(|s| {
            s.stacks
                .get(stack_ref)
                .map(|st| {
                    st.hosts
                        .iter()
                        .filter(|(_, h)| h.host_group == host_group)
                        .map(|(fqdn, _)| fqdn.clone())
                        .collect()
                })
                .unwrap_or_default()
        })
    }

    /// Snapshot of the cloud group backing a host group.
    pub fn cloud_group(&self, stack_ref: &str, host_group: &str) -> Option<GroupDescription> {
        let name = cloud_group_name(stack_ref, host_group);
        self.with_state(|s| s.cloud.get(&name).map(|g| g.describe(&name)))
    }

    pub fn is_terminated(&self, instance_id: &str) -> bool {
        self.with_state(|s| s.terminated.contains(instance_id))
    }
}
