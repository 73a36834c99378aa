//! Builds the scaling pipeline on top of a [`StateStore`] and a
//! [`Simulator`], and seeds both from the `[simulation]` config section.

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{info, warn};

use tidegrid_autoscale::{Autoscaler, IntentBuilder, MetricsSource, ScalingCoordinator, TriggerEvaluator};
use tidegrid_capacity::{CapacityAdjuster, CloudProvider};
use tidegrid_decommission::{
    ClusterManager, ComponentRegistry, DecommissionOrchestrator, DownscaleCandidateSelector,
};
use tidegrid_sim::Simulator;
use tidegrid_state::{
    Alert, Cluster, ClusterStore, HistorySink, InstanceStore, StateError, StateStore, Store,
};

use crate::config::{SimClusterConfig, TidegridConfig};

/// The wired pipeline. Clones of `store` and `simulator` share state with
/// the components inside `autoscaler`.
pub struct Engine {
    pub store: StateStore,
    pub simulator: Simulator,
    pub autoscaler: Arc<Autoscaler>,
}

impl Engine {
    pub fn build(config: &TidegridConfig, store: StateStore) -> Self {
        let simulator = Simulator::new().with_instance_store(Arc::new(store.clone()));

        let client: Arc<dyn ClusterManager> = Arc::new(simulator.clone());
        let provider: Arc<dyn CloudProvider> = Arc::new(simulator.clone());
        let metrics: Arc<dyn MetricsSource> = Arc::new(simulator.clone());
        let instances: Arc<dyn InstanceStore> = Arc::new(store.clone());
        let history: Arc<dyn HistorySink> = Arc::new(store.clone());
        let shared: Arc<dyn Store> = Arc::new(store.clone());

        let selector = Arc::new(DownscaleCandidateSelector::new(
            client.clone(),
            config.selector_settings(),
        ));
        let orchestrator = Arc::new(DecommissionOrchestrator::new(
            client.clone(),
            instances.clone(),
            ComponentRegistry::builtin(),
            config.decommission_settings(),
        ));
        let adjuster = Arc::new(CapacityAdjuster::new(provider, config.capacity_settings()));
        let evaluator = Arc::new(TriggerEvaluator::new(
            history,
            metrics,
            config.min_reevaluation(),
        ));
        let builder = Arc::new(IntentBuilder::new(client.clone(), instances, selector.clone()));
        let coordinator = Arc::new(ScalingCoordinator::new(
            shared.clone(),
            client,
            selector,
            orchestrator,
            adjuster,
            config.coordinator_settings(),
        ));
        let autoscaler = Arc::new(
            Autoscaler::new(shared, evaluator, builder, coordinator)
                .with_queue_depth(config.intent_queue_depth()),
        );

        Self {
            store,
            simulator,
            autoscaler,
        }
    }

    /// Load every `[[simulation.clusters]]` entry into the store and the
    /// simulator.
    pub fn seed(&self, config: &TidegridConfig, now: DateTime<Utc>) -> anyhow::Result<()> {
        for cluster in config.simulated_clusters() {
            self.seed_cluster(cluster, now)?;
        }
        Ok(())
    }

    fn seed_cluster(&self, seed: &SimClusterConfig, now: DateTime<Utc>) -> anyhow::Result<()> {
        // The simulated world does not survive restarts; the cooldown does.
        let last_scaling_activity = match self.store.find_cluster(seed.id) {
            Ok(existing) => existing.last_scaling_activity,
            Err(StateError::ClusterNotFound(_)) => None,
            Err(e) => return Err(e.into()),
        };
        let cluster = Cluster {
            id: seed.id,
            stack_ref: seed.stack_ref.clone(),
            min_size: seed.min_size,
            max_size: seed.max_size,
            cool_down_minutes: seed.cool_down_minutes,
            last_scaling_activity,
            autoscaling_enabled: seed.autoscaling_enabled,
        };
        if cluster.min_size > cluster.max_size {
            warn!(
                cluster_id = cluster.id,
                min_size = cluster.min_size,
                max_size = cluster.max_size,
                "min_size exceeds max_size; min_size wins"
            );
        }
        self.store.save_cluster(&cluster)?;

        self.simulator.add_stack(&cluster, seed.replication);
        for group in &seed.groups {
            self.retire_previous_run(&cluster, &group.name, now)?;
            self.simulator.seed_group(&cluster, group)?;
        }
        for metric in &seed.metrics {
            let since = now - TimeDelta::minutes(metric.held_for_minutes);
            self.simulator
                .set_metric(&cluster.stack_ref, &metric.definition, metric.state, since);
        }
        for (index, alert) in seed.alerts.iter().enumerate() {
            self.store.put_alert(&Alert {
                id: index as u64 + 1,
                cluster_id: cluster.id,
                name: alert.name.clone(),
                trigger: alert.trigger.clone(),
                policy: alert.policy.clone(),
            })?;
        }

        info!(
            cluster_id = cluster.id,
            stack_ref = %cluster.stack_ref,
            groups = seed.groups.len(),
            alerts = seed.alerts.len(),
            "simulated cluster seeded"
        );
        Ok(())
    }

    /// Instances left attached by an earlier run belong to a simulated world
    /// that no longer exists.
    fn retire_previous_run(
        &self,
        cluster: &Cluster,
        host_group: &str,
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let group = self.store.host_group(cluster.id, host_group)?;
        let stale: Vec<String> = group
            .attached()
            .filter_map(|i| i.instance_id.clone())
            .collect();
        if !stale.is_empty() {
            let retired = self.store.mark_terminated(cluster.id, &stale, now)?;
            info!(cluster_id = cluster.id, host_group, retired, "retired instances from a previous run");
        }
        Ok(())
    }
}
