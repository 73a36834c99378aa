//! DownscaleCandidateSelector — picks which hosts leave a host group.
//!
//! Unhealthy members are always taken first. For data-store groups the rest
//! are the healthy members with the least used storage, and the selection
//! must pass two guards:
//!
//! - the node-count guard keeps at least `replication` nodes (reserved hosts
//!   included) and never removes more than the removable members;
//! - the storage guard requires the remaining hosts to have room for the
//!   selected hosts' data times replication times a safety multiplier.
//!
//! A forced downscale skips both guards but keeps the ordering.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use tidegrid_state::{Cluster, HostGroup, InstanceMetaData};

use crate::client::{ClusterManager, StorageUsage};
use crate::component::ComponentKind;
use crate::error::{DecommissionError, DecommissionResult};

/// Headroom required on remaining hosts for migrated data.
pub const DEFAULT_SAFETY_MULTIPLIER: f64 = 1.2;

/// Throughput assumed when estimating decommission time (50 MiB/s).
pub const DEFAULT_MIGRATION_BYTES_PER_SEC: u64 = 50 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct SelectorSettings {
    pub safety_multiplier: f64,
    pub migration_bytes_per_sec: u64,
}

impl Default for SelectorSettings {
    fn default() -> Self {
        Self {
            safety_multiplier: DEFAULT_SAFETY_MULTIPLIER,
            migration_bytes_per_sec: DEFAULT_MIGRATION_BYTES_PER_SEC,
        }
    }
}

pub struct DownscaleCandidateSelector {
    client: Arc<dyn ClusterManager>,
    settings: SelectorSettings,
}

impl DownscaleCandidateSelector {
    pub fn new(client: Arc<dyn ClusterManager>, settings: SelectorSettings) -> Self {
        Self { client, settings }
    }

    /// Select exactly `adjustment` members of `group` for removal.
    pub async fn select(
        &self,
        cluster: &Cluster,
        group: &HostGroup,
        adjustment: u32,
        forced: bool,
    ) -> DecommissionResult<Vec<InstanceMetaData>> {
        info!(
            cluster_id = cluster.id,
            host_group = %group.name,
            adjustment,
            forced,
            "collecting downscale candidates"
        );
        let candidates = self
            .collect_candidates(cluster, group, adjustment, forced)
            .await?;
        let selected = order_for_removal(candidates, adjustment as usize);
        if selected.len() != adjustment as usize {
            return Err(DecommissionError::NotEnoughNodes(format!(
                "Only {} hosts found to downscale but {} required.",
                selected.len(),
                adjustment
            )));
        }
        info!(
            cluster_id = cluster.id,
            host_group = %group.name,
            hosts = ?fqdns(&selected),
            "hosts selected for removal"
        );
        Ok(selected)
    }

    async fn collect_candidates(
        &self,
        cluster: &Cluster,
        group: &HostGroup,
        adjustment: u32,
        forced: bool,
    ) -> DecommissionResult<Vec<InstanceMetaData>> {
        if group.instances.is_empty() {
            return Err(DecommissionError::HostGroupNotFound(group.name.clone()));
        }
        let attached: Vec<&InstanceMetaData> = group.attached().collect();
        let reserved = self
            .client
            .reserved_hosts(&cluster.stack_ref, &group.name)
            .await?;
        let filtered = without_reserved(attached.iter().copied(), &reserved);
        let reserved_count = attached.len() - filtered.len();
        let unhealthy = filtered.iter().filter(|i| is_removal_priority(i)).count();
        debug!(
            host_group = %group.name,
            attached = attached.len(),
            reserved = reserved_count,
            unhealthy,
            healthy = filtered.len() - unhealthy,
            "partitioned host group"
        );

        if self.is_data_group(cluster, &group.name).await? {
            let replication = self
                .client
                .replication_factor(&cluster.stack_ref, &group.name)
                .await?;
            debug!(host_group = %group.name, replication, "host group stores data");
            if !forced {
                verify_node_count(replication, adjustment, filtered.len(), reserved_count)?;
            }
            self.check_and_sort_by_available_space(cluster, replication, adjustment, &filtered, forced)
                .await
        } else {
            if !forced {
                verify_node_count(0, adjustment, filtered.len(), reserved_count)?;
            }
            Ok(filtered)
        }
    }

    async fn check_and_sort_by_available_space(
        &self,
        cluster: &Cluster,
        replication: u32,
        adjustment: u32,
        filtered: &[InstanceMetaData],
        forced: bool,
    ) -> DecommissionResult<Vec<InstanceMetaData>> {
        let storage = self.client.storage_usage(&cluster.stack_ref).await?;
        let sorted = sort_by_used_space(&storage);
        let selected = select_nodes(&sorted, filtered, adjustment as usize);

        let used: u64 = selected.iter().map(|(_, used)| used).sum();
        let remaining = remaining_space(&storage, &selected);
        let required = (used as f64 * replication as f64 * self.settings.safety_multiplier) as u64;
        debug!(used, remaining, required, replication, "checking storage headroom");
        if remaining < required && !forced {
            return Err(DecommissionError::BadRequest(format!(
                "Trying to move '{used}' bytes worth of data to nodes with '{remaining}' bytes of capacity is not allowed"
            )));
        }

        info!(
            cluster_id = cluster.id,
            used_bytes = used,
            estimate_secs = self.estimate_decommission_time(used).as_secs(),
            "estimated data migration time"
        );

        let names: HashSet<String> = selected.iter().map(|(h, _)| h.to_lowercase()).collect();
        Ok(filtered
            .iter()
            .filter(|i| fqdn_in(i, &names))
            .cloned()
            .collect())
    }

    /// Resolve explicit host names to live members of `group`.
    pub async fn collect_hosts_to_remove(
        &self,
        cluster: &Cluster,
        group: &HostGroup,
        hostnames: &[String],
    ) -> DecommissionResult<Vec<InstanceMetaData>> {
        if group.instances.is_empty() {
            return Err(DecommissionError::HostGroupNotFound(group.name.clone()));
        }
        let requested: HashSet<String> = hostnames.iter().map(|h| h.to_lowercase()).collect();
        let found: Vec<&InstanceMetaData> = group
            .attached()
            .filter(|i| fqdn_in(i, &requested))
            .collect();
        if found.len() != hostnames.len() {
            warn!(
                host_group = %group.name,
                requested = hostnames.len(),
                found = found.len(),
                "not all hosts found in the host group"
            );
        }
        let running: HashSet<String> = self
            .client
            .cluster_hosts(&cluster.stack_ref)
            .await?
            .into_iter()
            .map(|h| h.to_lowercase())
            .collect();
        let hosts: Vec<InstanceMetaData> = found
            .into_iter()
            .filter(|i| fqdn_in(i, &running))
            .cloned()
            .collect();
        debug!(host_group = %group.name, hosts = ?fqdns(&hosts), "hosts to remove");
        Ok(hosts)
    }

    /// Check that an explicit removal list can go without breaking the group.
    pub async fn verify_nodes_removable(
        &self,
        cluster: &Cluster,
        group: &HostGroup,
        instances: &[InstanceMetaData],
    ) -> DecommissionResult<()> {
        let ids: HashSet<u64> = instances.iter().map(|i| i.private_id).collect();
        let removable: Vec<&InstanceMetaData> = group
            .attached()
            .filter(|i| ids.contains(&i.private_id))
            .collect();
        if removable.is_empty() {
            return Ok(());
        }

        let reserved = self
            .client
            .reserved_hosts(&cluster.stack_ref, &group.name)
            .await?;
        let allowed = without_reserved(removable.iter().copied(), &reserved);
        if allowed.len() < removable.len() {
            let allowed_ids: HashSet<u64> = allowed.iter().map(|i| i.private_id).collect();
            let hosts = removable
                .iter()
                .filter(|i| !allowed_ids.contains(&i.private_id))
                .filter_map(|i| i.discovery_fqdn.clone())
                .collect();
            return Err(DecommissionError::NotRecommendedRemoval { hosts });
        }

        let data_group = self.is_data_group(cluster, &group.name).await?;
        let replication = if data_group {
            self.client
                .replication_factor(&cluster.stack_ref, &group.name)
                .await?
        } else {
            0
        };
        verify_node_count(
            replication,
            removable.len() as u32,
            group.node_count() as usize,
            0,
        )?;

        if data_group {
            let storage = self.client.storage_usage(&cluster.stack_ref).await?;
            let names: HashSet<String> = allowed
                .iter()
                .filter_map(|i| i.discovery_fqdn.as_deref())
                .map(str::to_lowercase)
                .collect();
            let used: u64 = storage
                .iter()
                .filter(|(host, _)| names.contains(&host.to_lowercase()))
                .map(|(_, s)| s.used)
                .sum();
            info!(
                cluster_id = cluster.id,
                used_bytes = used,
                estimate_secs = self.estimate_decommission_time(used).as_secs(),
                "estimated data migration time"
            );
        }
        Ok(())
    }

    /// Rough time to move `used_bytes` off the decommissioned hosts.
    pub fn estimate_decommission_time(&self, used_bytes: u64) -> Duration {
        Duration::from_secs(used_bytes / self.settings.migration_bytes_per_sec.max(1))
    }

    async fn is_data_group(&self, cluster: &Cluster, host_group: &str) -> DecommissionResult<bool> {
        let components = self
            .client
            .host_group_components(&cluster.stack_ref, host_group)
            .await?;
        Ok(components
            .iter()
            .any(|c| c == ComponentKind::DataStore.component()))
    }
}

/// Fail when removing `adjustment` nodes would leave fewer than
/// `replication` nodes, or when fewer than `adjustment` are removable.
pub fn verify_node_count(
    replication: u32,
    adjustment: u32,
    filtered: usize,
    reserved: usize,
) -> DecommissionResult<()> {
    let remaining = (filtered + reserved) as i64 - adjustment as i64;
    if remaining < replication as i64 || filtered < adjustment as usize {
        debug!(replication, adjustment, filtered, reserved, "cannot downscale");
        return Err(DecommissionError::NotEnoughNodes(
            "There is not enough node to downscale. \
             Check the replication factor and the ApplicationMaster occupation."
                .to_string(),
        ));
    }
    Ok(())
}

/// Pick `remove_count` hosts: unhealthy members first (counted as no used
/// storage), then the least-used live members from `sorted_ascending`.
pub fn select_nodes(
    sorted_ascending: &[(String, u64)],
    filtered: &[InstanceMetaData],
    remove_count: usize,
) -> Vec<(String, u64)> {
    let mut selected: Vec<(String, u64)> = filtered
        .iter()
        .filter(|i| is_removal_priority(i))
        .filter_map(|i| i.discovery_fqdn.clone())
        .take(remove_count)
        .map(|h| (h, 0))
        .collect();

    if selected.len() < remove_count {
        let live: HashSet<String> = filtered
            .iter()
            .filter_map(|i| i.discovery_fqdn.as_deref())
            .map(str::to_lowercase)
            .collect();
        let mut taken: HashSet<String> = selected.iter().map(|(h, _)| h.to_lowercase()).collect();
        for (host, used) in sorted_ascending {
            if selected.len() == remove_count {
                break;
            }
            let key = host.to_lowercase();
            if live.contains(&key) && taken.insert(key) {
                selected.push((host.clone(), *used));
            }
        }
    }
    selected
}

/// Order non-healthy members first and keep at most `count`.
pub fn order_for_removal(mut candidates: Vec<InstanceMetaData>, count: usize) -> Vec<InstanceMetaData> {
    candidates.sort_by_key(|i| i.is_healthy());
    candidates.truncate(count);
    candidates
}

fn is_removal_priority(instance: &InstanceMetaData) -> bool {
    instance.is_unhealthy() || instance.is_deleted_on_provider()
}

fn sort_by_used_space(storage: &HashMap<String, StorageUsage>) -> Vec<(String, u64)> {
    let mut sorted: Vec<(String, u64)> = storage
        .iter()
        .map(|(host, usage)| (host.clone(), usage.used))
        .collect();
    sorted.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
    sorted
}

fn remaining_space(storage: &HashMap<String, StorageUsage>, selected: &[(String, u64)]) -> u64 {
    let selected: HashSet<String> = selected.iter().map(|(h, _)| h.to_lowercase()).collect();
    storage
        .iter()
        .filter(|(host, _)| !selected.contains(&host.to_lowercase()))
        .map(|(_, usage)| usage.remaining)
        .sum()
}

fn without_reserved<'a>(
    members: impl Iterator<Item = &'a InstanceMetaData>,
    reserved: &[String],
) -> Vec<InstanceMetaData> {
    let reserved: HashSet<String> = reserved.iter().map(|h| h.to_lowercase()).collect();
    members.filter(|i| !fqdn_in(i, &reserved)).cloned().collect()
}

fn fqdn_in(instance: &InstanceMetaData, lowercase_names: &HashSet<String>) -> bool {
    instance
        .discovery_fqdn
        .as_deref()
        .is_some_and(|f| lowercase_names.contains(&f.to_lowercase()))
}

pub(crate) fn fqdns(instances: &[InstanceMetaData]) -> Vec<String> {
    instances
        .iter()
        .filter_map(|i| i.discovery_fqdn.clone())
        .collect()
}
