//! Simulated cluster manager. Requests complete immediately; data
//! migrations report in progress for a configurable number of polls.

use std::collections::HashMap;

use tidegrid_decommission::{
    AdminState, ClientError, ClientFuture, ClusterManager, ComponentState, HostStatus,
    MigrationStatus, RequestId, RequestStatus, StorageUsage,
};

use crate::simulator::{SimStack, SimState, Simulator, service_of};

fn stack<'s>(s: &'s SimState, stack_ref: &str) -> Result<&'s SimStack, ClientError> {
    s.stacks
        .get(stack_ref)
        .ok_or_else(|| ClientError::new(format!("unknown stack '{stack_ref}'")))
}

fn stack_mut<'s>(s: &'s mut SimState, stack_ref: &str) -> Result<&'s mut SimStack, ClientError> {
    s.stacks
        .get_mut(stack_ref)
        .ok_or_else(|| ClientError::new(format!("unknown stack '{stack_ref}'")))
}

impl Simulator {
    fn read(&self, op: &str) -> Result<(), ClientError> {
        self.check(op).map_err(ClientError)
    }

    fn write(&self, op: &str, call: String) -> Result<(), ClientError> {
        self.record(op, call).map_err(ClientError)
    }

    fn with_client<R>(
        &self,
        f: impl FnOnce(&mut SimState) -> Result<R, ClientError>,
    ) -> Result<R, ClientError> {
        self.with_state(f)
    }
}

impl ClusterManager for Simulator {
    fn host_group_node_count<'a>(&'a self, stack_ref: &'a str, host_group: &'a str) -> ClientFuture<'a, u32> {
        Box::pin(async move {
            self.read("host_group_node_count")?;
            self.with_client(|s| {
                let stack = stack(s, stack_ref)?;
                Ok(stack.hosts.values().filter(|h| h.host_group == host_group).count() as u32)
            })
        })
    }

    fn instance_ids_for_host_group<'a>(
        &'a self,
        stack_ref: &'a str,
        host_group: &'a str,
    ) -> ClientFuture<'a, HashMap<String, String>> {
        Box::pin(async move {
            self.read("instance_ids_for_host_group")?;
            self.with_client(|s| {
                let stack = stack(s, stack_ref)?;
                Ok(stack
                    .hosts
                    .iter()
                    .filter(|(_, h)| h.host_group == host_group)
                    .map(|(fqdn, h)| (fqdn.clone(), h.instance_id.clone()))
                    .collect())
            })
        })
    }

    fn cluster_hosts<'a>(&'a self, stack_ref: &'a str) -> ClientFuture<'a, Vec<String>> {
        Box::pin(async move {
            self.read("cluster_hosts")?;
            self.with_client(|s| Ok(stack(s, stack_ref)?.hosts.keys().cloned().collect()))
        })
    }

    fn host_statuses<'a>(
        &'a self,
        stack_ref: &'a str,
        hosts: &'a [String],
    ) -> ClientFuture<'a, HashMap<String, HostStatus>> {
        Box::pin(async move {
            self.read("host_statuses")?;
            self.with_client(|s| {
                let stack = stack(s, stack_ref)?;
                Ok(hosts
                    .iter()
                    .filter_map(|h| stack.hosts.get(h).map(|sim| (h.clone(), sim.status.clone())))
                    .collect())
            })
        })
    }

    fn host_group_components<'a>(
        &'a self,
        stack_ref: &'a str,
        host_group: &'a str,
    ) -> ClientFuture<'a, Vec<String>> {
        Box::pin(async move {
            self.read("host_group_components")?;
            self.with_client(|s| {
                stack(s, stack_ref)?
                    .groups
                    .get(host_group)
                    .map(|g| g.components.clone())
                    .ok_or_else(|| ClientError::new(format!("unknown host group '{host_group}'")))
            })
        })
    }

    fn replication_factor<'a>(&'a self, stack_ref: &'a str, _host_group: &'a str) -> ClientFuture<'a, u32> {
        Box::pin(async move {
            self.read("replication_factor")?;
            self.with_client(|s| Ok(stack(s, stack_ref)?.replication))
        })
    }

    fn storage_usage<'a>(&'a self, stack_ref: &'a str) -> ClientFuture<'a, HashMap<String, StorageUsage>> {
        Box::pin(async move {
            self.read("storage_usage")?;
            self.with_client(|s| {
                Ok(stack(s, stack_ref)?
                    .hosts
                    .iter()
                    .map(|(fqdn, h)| (fqdn.clone(), h.storage))
                    .collect())
            })
        })
    }

    fn reserved_hosts<'a>(&'a self, stack_ref: &'a str, host_group: &'a str) -> ClientFuture<'a, Vec<String>> {
        Box::pin(async move {
            self.read("reserved_hosts")?;
            self.with_client(|s| {
                Ok(stack(s, stack_ref)?
                    .groups
                    .get(host_group)
                    .map(|g| g.reserved.clone())
                    .unwrap_or_default())
            })
        })
    }

    fn start_service<'a>(&'a self, stack_ref: &'a str, service: &'a str) -> ClientFuture<'a, Option<RequestId>> {
        Box::pin(async move {
            self.write("start_service", format!("start_service:{service}"))?;
            self.with_client(|s| {
                let mut started = 0;
                for host in stack_mut(s, stack_ref)?.hosts.values_mut() {
                    for (component, status) in &mut host.status.components {
                        if service_of(component) == Some(service)
                            && status.state != ComponentState::Started
                            && status.desired_admin_state != AdminState::Decommissioned
                        {
                            status.state = ComponentState::Started;
                            started += 1;
                        }
                    }
                }
                Ok((started > 0).then(|| s.new_request()))
            })
        })
    }

    fn decommission_component<'a>(
        &'a self,
        stack_ref: &'a str,
        component: &'a str,
        hosts: &'a [String],
    ) -> ClientFuture<'a, RequestId> {
        Box::pin(async move {
            self.write(
                "decommission_component",
                format!("decommission_component:{component}:{}", hosts.join(",")),
            )?;
            self.with_client(|s| {
                let stack = stack_mut(s, stack_ref)?;
                for host in hosts {
                    if let Some(status) = stack
                        .hosts
                        .get_mut(host)
                        .and_then(|h| h.status.components.get_mut(component))
                    {
                        status.desired_admin_state = AdminState::Decommissioned;
                    }
                }
                let polls = s.migration_polls;
                s.migrations
                    .insert((stack_ref.to_string(), component.to_string()), polls);
                Ok(s.new_request())
            })
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
            self.write(
                "set_maintenance",
                format!("set_maintenance:{component}:{}:{enabled}", hosts.join(",")),
            )
        })
    }

    fn stop_components<'a>(&'a self, stack_ref: &'a str, hosts: &'a [String]) -> ClientFuture<'a, RequestId> {
        Box::pin(async move {
            self.write("stop_components", format!("stop_components:{}", hosts.join(",")))?;
            self.with_client(|s| {
                let stack = stack_mut(s, stack_ref)?;
                for host in hosts {
                    if let Some(h) = stack.hosts.get_mut(host) {
                        for status in h.status.components.values_mut() {
                            status.state = ComponentState::Installed;
                        }
                    }
                }
                Ok(s.new_request())
            })
        })
    }

    fn request_status<'a>(&'a self, _stack_ref: &'a str, request: RequestId) -> ClientFuture<'a, RequestStatus> {
        Box::pin(async move {
            self.read("request_status")?;
            self.with_client(|s| {
                if s.failed_requests.contains(&request) {
                    Ok(RequestStatus::Failed)
                } else {
                    Ok(RequestStatus::Completed)
                }
            })
        })
    }

    fn migration_status<'a>(
        &'a self,
        stack_ref: &'a str,
        component: &'a str,
        _hosts: &'a [String],
    ) -> ClientFuture<'a, MigrationStatus> {
        Box::pin(async move {
            self.write("migration_status", format!("migration_status:{component}"))?;
            self.with_client(|s| {
                let key = (stack_ref.to_string(), component.to_string());
                match s.migrations.get_mut(&key) {
                    Some(left) if *left > 0 => {
                        *left -= 1;
                        Ok(MigrationStatus::InProgress)
                    }
                    _ => Ok(MigrationStatus::Completed),
                }
            })
        })
    }

    fn delete_hosts<'a>(&'a self, stack_ref: &'a str, hosts: &'a [String]) -> ClientFuture<'a, ()> {
        Box::pin(async move {
            self.write("delete_hosts", format!("delete_hosts:{}", hosts.join(",")))?;
            self.with_client(|s| {
                let stack = stack_mut(s, stack_ref)?;
                for host in hosts {
                    stack.hosts.remove(host);
                }
                Ok(())
            })
        })
    }
}

impl Simulator {
    /// Make `request` report `Failed` when polled.
    pub fn fail_request(&self, request: RequestId) {
        self.with_state(|s| {
            s.failed_requests.insert(request);
        });
    }
}
