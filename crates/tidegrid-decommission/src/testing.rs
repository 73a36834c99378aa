//! In-crate fake cluster manager for unit tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

use chrono::{TimeZone, Utc};

use tidegrid_state::{Cluster, HostGroup, InstanceMetaData, InstanceStatus};

use crate::client::*;

pub(crate) fn test_cluster() -> Cluster {
    Cluster {
        id: 1,
        stack_ref: "stack-1".to_string(),
        min_size: 1,
        max_size: 20,
        cool_down_minutes: 30,
        last_scaling_activity: None,
        autoscaling_enabled: true,
    }
}

pub(crate) fn worker(i: u64) -> InstanceMetaData {
    InstanceMetaData {
        cluster_id: 1,
        private_id: i,
        group_name: "worker".to_string(),
        instance_id: Some(format!("i-{i}")),
        discovery_fqdn: Some(fqdn(i)),
        status: InstanceStatus::RunningHealthy,
        status_reason: None,
        start_date: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
        termination_date: None,
    }
}

pub(crate) fn fqdn(i: u64) -> String {
    format!("worker-{i}.example.com")
}

pub(crate) fn worker_group(n: u64) -> HostGroup {
    HostGroup {
        cluster_id: 1,
        name: "worker".to_string(),
        instances: (0..n).map(worker).collect(),
    }
}

pub(crate) fn started(admin: AdminState) -> ComponentStatus {
    ComponentStatus {
        state: ComponentState::Started,
        desired_admin_state: admin,
    }
}

#[derive(Default)]
pub(crate) struct FakeState {
    pub components: Vec<String>,
    pub replication: u32,
    pub storage: HashMap<String, StorageUsage>,
    pub reserved: Vec<String>,
    pub registered: Vec<String>,
    pub statuses: HashMap<String, HostStatus>,
    pub calls: Vec<String>,
    pub next_request: RequestId,
    pub failed_requests: HashSet<RequestId>,
    pub fail_start_service: bool,
    /// Migration polls that report in-progress before completing.
    pub migration_polls_left: u32,
    pub migration_never_completes: bool,
}

pub(crate) struct FakeClusterManager {
    pub state: Mutex<FakeState>,
}

impl FakeClusterManager {
    fn with_components(n: u64, components: &[&str], replication: u32) -> Self {
        let mut state = FakeState {
            components: components.iter().map(|c| c.to_string()).collect(),
            replication,
            next_request: 1,
            ..FakeState::default()
        };
        for i in 0..n {
            let host = fqdn(i);
            state.storage.insert(
                host.clone(),
                StorageUsage {
                    used: 1_000 + i * 100,
                    remaining: 10_000_000,
                },
            );
            state.statuses.insert(
                host.clone(),
                HostStatus {
                    host_state: HostState::Healthy,
                    components: components
                        .iter()
                        .map(|c| (c.to_string(), started(AdminState::InService)))
                        .collect::<BTreeMap<_, _>>(),
                },
            );
            state.registered.push(host);
        }
        Self {
            state: Mutex::new(state),
        }
    }

    /// Hosts run DATANODE and NODEMANAGER.
    pub(crate) fn data_cluster(n: u64, replication: u32) -> Self {
        Self::with_components(n, &["DATANODE", "NODEMANAGER"], replication)
    }

    /// Hosts run NODEMANAGER only.
    pub(crate) fn compute_cluster(n: u64) -> Self {
        Self::with_components(n, &["NODEMANAGER"], 0)
    }

    /// Hosts run HBASE_REGIONSERVER only.
    pub(crate) fn hbase_cluster(n: u64) -> Self {
        Self::with_components(n, &["HBASE_REGIONSERVER"], 0)
    }

    pub(crate) fn set_used(&self, host: &str, used: u64) {
        let mut s = self.state.lock().unwrap();
        if let Some(usage) = s.storage.get_mut(host) {
            usage.used = used;
        }
    }

    pub(crate) fn set_storage(&self, host: &str, used: u64, remaining: u64) {
        self.state
            .lock()
            .unwrap()
            .storage
            .insert(host.to_string(), StorageUsage { used, remaining });
    }

    pub(crate) fn reserve(&self, host: &str) {
        self.state.lock().unwrap().reserved.push(host.to_string());
    }

    pub(crate) fn unregister(&self, host: &str) {
        self.state.lock().unwrap().registered.retain(|h| h != host);
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    fn record(&self, call: String) {
        self.state.lock().unwrap().calls.push(call);
    }

    fn new_request(&self) -> RequestId {
        let mut s = self.state.lock().unwrap();
        let id = s.next_request;
        s.next_request += 1;
        id
    }
}

impl ClusterManager for FakeClusterManager {
    fn host_group_node_count<'a>(&'a self, _stack_ref: &'a str, _host_group: &'a str) -> ClientFuture<'a, u32> {
        Box::pin(async move { Ok(self.state.lock().unwrap().registered.len() as u32) })
    }

    fn instance_ids_for_host_group<'a>(
        &'a self,
        _stack_ref: &'a str,
        _host_group: &'a str,
    ) -> ClientFuture<'a, HashMap<String, String>> {
        Box::pin(async move {
            let s = self.state.lock().unwrap();
            Ok(s.registered
                .iter()
                .map(|h| {
                    let ordinal = h.trim_start_matches("worker-").trim_end_matches(".example.com");
                    (h.clone(), format!("i-{ordinal}"))
                })
                .collect())
        })
    }

    fn cluster_hosts<'a>(&'a self, _stack_ref: &'a str) -> ClientFuture<'a, Vec<String>> {
        Box::pin(async move { Ok(self.state.lock().unwrap().registered.clone()) })
    }

    fn host_statuses<'a>(
        &'a self,
        _stack_ref: &'a str,
        hosts: &'a [String],
    ) -> ClientFuture<'a, HashMap<String, HostStatus>> {
        Box::pin(async move {
            let s = self.state.lock().unwrap();
            Ok(hosts
                .iter()
                .filter_map(|h| s.statuses.get(h).map(|st| (h.clone(), st.clone())))
                .collect())
        })
    }

    fn host_group_components<'a>(
        &'a self,
        _stack_ref: &'a str,
        _host_group: &'a str,
    ) -> ClientFuture<'a, Vec<String>> {
        Box::pin(async move { Ok(self.state.lock().unwrap().components.clone()) })
    }

    fn replication_factor<'a>(&'a self, _stack_ref: &'a str, _host_group: &'a str) -> ClientFuture<'a, u32> {
        Box::pin(async move { Ok(self.state.lock().unwrap().replication) })
    }

    fn storage_usage<'a>(&'a self, _stack_ref: &'a str) -> ClientFuture<'a, HashMap<String, StorageUsage>> {
        Box::pin(async move { Ok(self.state.lock().unwrap().storage.clone()) })
    }

    fn reserved_hosts<'a>(&'a self, _stack_ref: &'a str, _host_group: &'a str) -> ClientFuture<'a, Vec<String>> {
        Box::pin(async move { Ok(self.state.lock().unwrap().reserved.clone()) })
    }

    fn start_service<'a>(&'a self, _stack_ref: &'a str, service: &'a str) -> ClientFuture<'a, Option<RequestId>> {
        Box::pin(async move {
            self.record(format!("start:{service}"));
            if self.state.lock().unwrap().fail_start_service {
                return Err(ClientError::new("service start rejected"));
            }
            Ok(Some(self.new_request()))
        })
    }

    fn decommission_component<'a>(
        &'a self,
        _stack_ref: &'a str,
        component: &'a str,
        hosts: &'a [String],
    ) -> ClientFuture<'a, RequestId> {
        Box::pin(async move {
            self.record(format!("decommission:{component}:{}", hosts.join(",")));
            {
                let mut s = self.state.lock().unwrap();
                for host in hosts {
                    if let Some(c) = s
                        .statuses
                        .get_mut(host)
                        .and_then(|st| st.components.get_mut(component))
                    {
                        c.desired_admin_state = AdminState::Decommissioned;
                    }
                }
            }
            Ok(self.new_request())
        })
    }

    fn set_maintenance<'a>(
        &'a self,
        _stack_ref: &'a str,
        component: &'a str,
        hosts: &'a [String],
        enabled: bool,
    ) -> ClientFuture<'a, ()> {
        Box::pin(async move {
            self.record(format!("maintenance:{component}:{}:{enabled}", hosts.join(",")));
            Ok(())
        })
    }

    fn stop_components<'a>(&'a self, _stack_ref: &'a str, hosts: &'a [String]) -> ClientFuture<'a, RequestId> {
        Box::pin(async move {
            self.record(format!("stop:{}", hosts.join(",")));
            Ok(self.new_request())
        })
    }

    fn request_status<'a>(&'a self, _stack_ref: &'a str, request: RequestId) -> ClientFuture<'a, RequestStatus> {
        Box::pin(async move {
            if self.state.lock().unwrap().failed_requests.contains(&request) {
                Ok(RequestStatus::Failed)
            } else {
                Ok(RequestStatus::Completed)
            }
        })
    }

    fn migration_status<'a>(
        &'a self,
        _stack_ref: &'a str,
        component: &'a str,
        _hosts: &'a [String],
    ) -> ClientFuture<'a, MigrationStatus> {
        Box::pin(async move {
            self.record(format!("migration:{component}"));
            let mut s = self.state.lock().unwrap();
            if s.migration_never_completes {
                return Ok(MigrationStatus::InProgress);
            }
            if s.migration_polls_left > 0 {
                s.migration_polls_left -= 1;
                return Ok(MigrationStatus::InProgress);
            }
            Ok(MigrationStatus::Completed)
        })
    }

    fn delete_hosts<'a>(&'a self, _stack_ref: &'a str, hosts: &'a [String]) -> ClientFuture<'a, ()> {
        Box::pin(async move {
            self.record(format!("delete:{}", hosts.join(",")));
            let mut s = self.state.lock().unwrap();
            for host in hosts {
                s.statuses.remove(host);
                s.registered.retain(|h| h != host);
            }
            Ok(())
        })
    }
}
