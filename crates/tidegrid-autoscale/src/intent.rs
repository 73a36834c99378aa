//! Scaling intents: what a fired alert asks the coordinator to do.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info};

use tidegrid_decommission::{ClusterManager, DownscaleCandidateSelector};
use tidegrid_state::{Cluster, ClusterId, InstanceId, InstanceStore, ScalingPolicy};

use crate::error::ScalingResult;
use crate::target::desired_node_count;
use crate::trigger::Firing;

/// A request to move one host group to a new size.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScalingIntent {
    pub cluster_id: ClusterId,
    pub alert_name: String,
    pub policy: ScalingPolicy,
    pub current_size: u32,
    pub desired_size: u32,
    /// Provider instance ids chosen for removal. Empty for upscales, and
    /// for downscales whose candidates could not be selected up front.
    pub decommission_candidates: Vec<InstanceId>,
    pub fired_at: DateTime<Utc>,
}

impl ScalingIntent {
    pub fn is_downscale(&self) -> bool {
        self.desired_size < self.current_size
    }

    pub fn removal_count(&self) -> u32 {
        self.current_size.saturating_sub(self.desired_size)
    }
}

/// Turns a [`Firing`] into a [`ScalingIntent`].
pub struct IntentBuilder {
    client: Arc<dyn ClusterManager>,
    instances: Arc<dyn InstanceStore>,
    selector: Arc<DownscaleCandidateSelector>,
}

impl IntentBuilder {
    pub fn new(
        client: Arc<dyn ClusterManager>,
        instances: Arc<dyn InstanceStore>,
        selector: Arc<DownscaleCandidateSelector>,
    ) -> Self {
        Self {
            client,
            instances,
            selector,
        }
    }

    pub async fn build(&self, cluster: &Cluster, firing: Firing) -> ScalingResult<ScalingIntent> {
        let policy = firing.policy;
        let current = self
            .client
            .host_group_node_count(&cluster.stack_ref, &policy.host_group)
            .await?;
        let desired = desired_node_count(cluster, &policy, current);

        let mut intent = ScalingIntent {
            cluster_id: cluster.id,
            alert_name: firing.alert.name,
            policy,
            current_size: current,
            desired_size: desired,
            decommission_candidates: Vec::new(),
            fired_at: firing.fired_at,
        };
        if intent.is_downscale() {
            intent.decommission_candidates = self
                .candidates(cluster, &intent.policy, intent.removal_count())
                .await;
        }
        info!(
            cluster_id = cluster.id,
            alert = %intent.alert_name,
            host_group = %intent.policy.host_group,
            current,
            desired,
            candidates = intent.decommission_candidates.len(),
            "scaling intent built"
        );
        Ok(intent)
    }

    /// Best effort. Errors are logged and leave the list empty so the
    /// coordinator selects again at dispatch.
    async fn candidates(&self, cluster: &Cluster, policy: &ScalingPolicy, count: u32) -> Vec<InstanceId> {
        match self.try_candidates(cluster, policy, count).await {
            Ok(ids) => ids,
            Err(e) => {
                error!(
                    cluster_id = cluster.id,
                    policy = %policy.name,
                    adjustment_type = ?policy.adjustment_type,
                    error = %e,
                    "error retrieving decommission candidates"
                );
                Vec::new()
            }
        }
    }

    async fn try_candidates(
        &self,
        cluster: &Cluster,
        policy: &ScalingPolicy,
        count: u32,
    ) -> ScalingResult<Vec<InstanceId>> {
        let group = self.instances.host_group(cluster.id, &policy.host_group)?;
        let selected = self.selector.select(cluster, &group, count, false).await?;
        let ids: HashMap<String, String> = self
            .client
            .instance_ids_for_host_group(&cluster.stack_ref, &policy.host_group)
            .await?
            .into_iter()
            .map(|(fqdn, id)| (fqdn.to_lowercase(), id))
            .collect();
        let candidates: Vec<InstanceId> = selected
            .iter()
            .filter_map(|i| {
                let fqdn = i.discovery_fqdn.as_deref()?.to_lowercase();
                ids.get(&fqdn).cloned().or_else(|| i.instance_id.clone())
            })
            .collect();
        debug!(cluster_id = cluster.id, ?candidates, "decommission candidates");
        Ok(candidates)
    }
}
