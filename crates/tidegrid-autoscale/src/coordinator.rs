//! ScalingCoordinator — gates, dispatches and records scaling operations.
//!
//! An intent passes the cooldown gate, is re-sized against the live node
//! count and is dispatched onto a bounded worker pool. At most one
//! operation runs per cluster. Intents that find the pool full, or their
//! cluster busy, are parked and handed back by [`ScalingCoordinator::take_rejected`]
//! on the next evaluation pass.
//!
//! A downscale runs the decommission plan first and then shrinks the cloud
//! group. An upscale only grows the cloud group. Every outcome lands in the
//! cluster history.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{TimeDelta, Utc};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use tidegrid_capacity::CapacityAdjuster;
use tidegrid_decommission::{
    ClusterManager, DecommissionOrchestrator, DecommissionPlan, DownscaleCandidateSelector,
};
use tidegrid_state::{
    Cluster, ClusterId, HistoryEntry, HostGroup, InstanceId, InstanceMetaData, ScalingStatus,
    StateError, Store,
};

use crate::error::{ScalingError, ScalingResult};
use crate::intent::ScalingIntent;
use crate::target::desired_node_count;

pub const DEFAULT_WORKER_POOL_SIZE: usize = 8;

#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub worker_pool_size: usize,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            worker_pool_size: DEFAULT_WORKER_POOL_SIZE,
        }
    }
}

/// What [`ScalingCoordinator::handle`] did with an intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Running on the worker pool.
    Dispatched,
    /// The group is already at the desired size.
    NoChange,
    CoolingDown { remaining: TimeDelta },
    /// Parked for the next evaluation pass.
    Rejected,
}

/// Time left before `cluster` may scale again. Zero or negative means none.
pub fn remaining_cooldown(cluster: &Cluster, now: chrono::DateTime<Utc>) -> TimeDelta {
    match cluster.last_scaling_activity {
        None => TimeDelta::zero(),
        Some(last) => {
            TimeDelta::milliseconds(i64::from(cluster.cool_down_minutes) * 60_000) - (now - last)
        }
    }
}

pub struct ScalingCoordinator {
    store: Arc<dyn Store>,
    client: Arc<dyn ClusterManager>,
    selector: Arc<DownscaleCandidateSelector>,
    orchestrator: Arc<DecommissionOrchestrator>,
    adjuster: Arc<CapacityAdjuster>,
    pool: Arc<Semaphore>,
    pool_size: u32,
    in_flight: Mutex<HashMap<ClusterId, CancellationToken>>,
    rejected: Mutex<HashMap<ClusterId, ScalingIntent>>,
}

enum Slot {
    Acquired(OwnedSemaphorePermit, CancellationToken),
    Busy(&'static str),
}

impl ScalingCoordinator {
    pub fn new(
        store: Arc<dyn Store>,
        client: Arc<dyn ClusterManager>,
        selector: Arc<DownscaleCandidateSelector>,
        orchestrator: Arc<DecommissionOrchestrator>,
        adjuster: Arc<CapacityAdjuster>,
        settings: CoordinatorSettings,
    ) -> Self {
        let pool_size = settings.worker_pool_size.max(1);
        Self {
            store,
            client,
            selector,
            orchestrator,
            adjuster,
            pool: Arc::new(Semaphore::new(pool_size)),
            pool_size: pool_size as u32,
            in_flight: Mutex::new(HashMap::new()),
            rejected: Mutex::new(HashMap::new()),
        }
    }

    /// Gate and dispatch one intent.
    pub async fn handle(self: &Arc<Self>, intent: ScalingIntent) -> ScalingResult<Dispatch> {
        let cluster = self.find_cluster(intent.cluster_id)?;
        let remaining = remaining_cooldown(&cluster, Utc::now());
        if remaining > TimeDelta::zero() {
            info!(
                cluster_id = cluster.id,
                "cluster cannot be scaled for {:.2} min(s)",
                remaining.num_milliseconds() as f64 / 60_000.0
            );
            return Ok(Dispatch::CoolingDown { remaining });
        }

        let host_group = intent.policy.host_group.clone();
        let current = match self
            .client
            .host_group_node_count(&cluster.stack_ref, &host_group)
            .await
        {
            Ok(current) => current,
            Err(e) => {
                let e = ScalingError::from(e);
                self.record_failure(&intent, &e);
                return Err(e);
            }
        };
        let desired = desired_node_count(&cluster, &intent.policy, current);
        if desired == current {
            info!(cluster_id = cluster.id, %host_group, current, "no scaling activity required");
            return Ok(Dispatch::NoChange);
        }

        let mut intent = intent;
        if intent.current_size != current || intent.desired_size != desired {
            debug!(
                cluster_id = cluster.id,
                %host_group,
                from = intent.current_size,
                to = current,
                "host group size changed since evaluation"
            );
            intent.current_size = current;
            intent.desired_size = desired;
            intent.decommission_candidates.clear();
        }
        self.dispatch(cluster, intent)
    }

    /// Intents parked by rejection. Each is handed out once.
    pub fn take_rejected(&self) -> Vec<ScalingIntent> {
        let mut rejected = self.rejected.lock().unwrap_or_else(PoisonError::into_inner);
        let mut intents: Vec<ScalingIntent> = rejected.drain().map(|(_, i)| i).collect();
        intents.sort_by_key(|i| i.cluster_id);
        intents
    }

    pub fn is_in_flight(&self, cluster_id: ClusterId) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&cluster_id)
    }

    /// Cancel the operation running for `cluster_id`, if any.
    pub fn cancel(&self, cluster_id: ClusterId) -> bool {
        let in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        match in_flight.get(&cluster_id) {
            Some(token) => {
                info!(cluster_id, "cancelling scaling operation");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Wait for every dispatched operation to finish.
    pub async fn drain(&self) {
        match self.pool.acquire_many(self.pool_size).await {
            Ok(_permits) => debug!("scaling operations drained"),
            Err(e) => warn!(error = %e, "worker pool closed while draining"),
        }
    }

    fn find_cluster(&self, id: ClusterId) -> ScalingResult<Cluster> {
        self.store.find_cluster(id).map_err(|e| match e {
            StateError::ClusterNotFound(_) => ScalingError::ClusterNotFound(id),
            other => ScalingError::State(other),
        })
    }

    fn dispatch(self: &Arc<Self>, cluster: Cluster, intent: ScalingIntent) -> ScalingResult<Dispatch> {
        let slot = {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            if in_flight.contains_key(&cluster.id) {
                Slot::Busy("a scaling operation is already running for the cluster")
            } else {
                match Arc::clone(&self.pool).try_acquire_owned() {
                    Ok(permit) => {
                        let token = CancellationToken::new();
                        in_flight.insert(cluster.id, token.clone());
                        Slot::Acquired(permit, token)
                    }
                    Err(_) => Slot::Busy("the worker pool is saturated"),
                }
            }
        };
        let (permit, cancel) = match slot {
            Slot::Acquired(permit, cancel) => (permit, cancel),
            Slot::Busy(reason) => return Ok(self.reject(intent, reason)),
        };

        self.rejected
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&cluster.id);
        if let Err(e) = self.store.touch_scaling_activity(cluster.id, Utc::now()) {
            self.release(cluster.id);
            return Err(e.into());
        }

        info!(
            cluster_id = cluster.id,
            host_group = %intent.policy.host_group,
            from = intent.current_size,
            to = intent.desired_size,
            "dispatching scaling operation"
        );
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let _permit = permit;
            let result = this.execute(&cluster, &intent, &cancel).await;
            this.record_outcome(&intent, result);
            this.release(cluster.id);
        });
        Ok(Dispatch::Dispatched)
    }

    fn release(&self, cluster_id: ClusterId) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&cluster_id);
    }

    fn reject(&self, intent: ScalingIntent, reason: &str) -> Dispatch {
        warn!(cluster_id = intent.cluster_id, reason, "scaling request rejected");
        let mut entry = HistoryEntry::new(
            intent.cluster_id,
            ScalingStatus::Rejected,
            format!(
                "Scaling request for host group '{}' rejected: {reason}",
                intent.policy.host_group
            ),
        );
        entry.host_group = Some(intent.policy.host_group.clone());
        entry.original_node_count = Some(intent.current_size);
        entry.desired_node_count = Some(intent.desired_size);
        if let Err(e) = self.store.record_entry(&entry) {
            warn!(cluster_id = intent.cluster_id, error = %e, "failed to record rejection");
        }
        self.rejected
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(intent.cluster_id, intent);
        Dispatch::Rejected
    }

    async fn execute(
        &self,
        cluster: &Cluster,
        intent: &ScalingIntent,
        cancel: &CancellationToken,
    ) -> ScalingResult<String> {
        if intent.is_downscale() {
            self.downscale(cluster, intent, cancel).await
        } else {
            self.upscale(cluster, intent, cancel).await
        }
    }

    async fn upscale(
        &self,
        cluster: &Cluster,
        intent: &ScalingIntent,
        cancel: &CancellationToken,
    ) -> ScalingResult<String> {
        let host_group = &intent.policy.host_group;
        let group = self.adjuster.group_name(&cluster.stack_ref, host_group).await?;
        self.adjuster
            .managed_resize(&group, intent.desired_size, cancel)
            .await?;
        Ok(format!(
            "Upscaled host group '{host_group}' from {} to {} nodes.",
            intent.current_size, intent.desired_size
        ))
    }

    async fn downscale(
        &self,
        cluster: &Cluster,
        intent: &ScalingIntent,
        cancel: &CancellationToken,
    ) -> ScalingResult<String> {
        let host_group = &intent.policy.host_group;
        let members = self.store.host_group(cluster.id, host_group)?;
        let hosts = match preselected(&members, intent) {
            Some(hosts) => hosts,
            None => {
                self.selector
                    .select(cluster, &members, intent.removal_count(), false)
                    .await?
            }
        };

        let plan = DecommissionPlan::new(cluster, host_group, hosts);
        let outcome = self.orchestrator.execute(&plan, cancel).await?;
        let removed = outcome.removed();
        let removed_lc: HashSet<String> = removed.iter().map(|h| h.to_lowercase()).collect();
        let instance_ids: Vec<InstanceId> = plan
            .hosts
            .iter()
            .filter(|i| {
                i.discovery_fqdn
                    .as_deref()
                    .is_some_and(|f| removed_lc.contains(&f.to_lowercase()))
            })
            .filter_map(|i| i.instance_id.clone())
            .collect();

        let group = self.adjuster.group_name(&cluster.stack_ref, host_group).await?;
        let mut terminated = 0;
        let downscaled = self
            .adjuster
            .managed_downscale(&group, &instance_ids, intent.desired_size, cancel, |instance_id| {
                match self
                    .store
                    .mark_terminated(cluster.id, &[instance_id.to_string()], Utc::now())
                {
                    Ok(n) => terminated += n,
                    Err(e) => {
                        warn!(cluster_id = cluster.id, instance_id, error = %e, "failed to mark instance terminated")
                    }
                }
            })
            .await;
        debug!(cluster_id = cluster.id, terminated, "instance records terminated");
        downscaled?;

        Ok(format!(
            "Downscaled host group '{host_group}' from {} to {} nodes. Removed hosts: {}",
            intent.current_size,
            intent.desired_size,
            removed.join(", ")
        ))
    }

    /// Record a request that failed before it reached the worker pool.
    pub fn record_failure(&self, intent: &ScalingIntent, error: &ScalingError) {
        error!(cluster_id = intent.cluster_id, error = %error, "scaling request failed before dispatch");
        self.record(intent, ScalingStatus::Failed, error.to_string());
    }

    fn record_outcome(&self, intent: &ScalingIntent, result: ScalingResult<String>) {
        let cluster_id = intent.cluster_id;
        let (status, message) = match result {
            Ok(message) => {
                info!(cluster_id, %message, "scaling operation succeeded");
                (ScalingStatus::Success, message)
            }
            Err(e) if e.is_cancelled() => {
                warn!(cluster_id, error = %e, "scaling operation cancelled");
                (ScalingStatus::Cancelled, e.to_string())
            }
            Err(e) => {
                error!(cluster_id, error = %e, "scaling operation failed");
                (ScalingStatus::Failed, e.to_string())
            }
        };
        self.record(intent, status, message);
    }

    fn record(&self, intent: &ScalingIntent, status: ScalingStatus, message: String) {
        let mut entry = HistoryEntry::new(intent.cluster_id, status, message);
        entry.host_group = Some(intent.policy.host_group.clone());
        entry.original_node_count = Some(intent.current_size);
        entry.desired_node_count = Some(intent.desired_size);
        if let Err(e) = self.store.record_entry(&entry) {
            warn!(cluster_id = intent.cluster_id, error = %e, "failed to record scaling outcome");
        }
    }
}

/// Resolve the intent's candidate instance ids against live members.
///
/// `None` unless every candidate is found and the list is complete.
fn preselected(group: &HostGroup, intent: &ScalingIntent) -> Option<Vec<InstanceMetaData>> {
    let ids = &intent.decommission_candidates;
    if ids.is_empty() || ids.len() != intent.removal_count() as usize {
        return None;
    }
    ids.iter()
        .map(|id| {
            group
                .attached()
                .find(|i| i.instance_id.as_deref() == Some(id.as_str()))
                .cloned()
        })
        .collect()
}
