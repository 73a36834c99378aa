//! Autoscaler — the periodic evaluation loop.
//!
//! Each tick evaluates every enabled cluster in its own task and sends the
//! resulting intents over a bounded channel to a single coordinator loop.
//! Intents parked by the coordinator are re-sent at the start of the next
//! tick.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use tidegrid_state::{Cluster, HistoryEntry, ScalingStatus, Store};

use crate::coordinator::ScalingCoordinator;
use crate::error::{ScalingError, ScalingResult};
use crate::intent::{IntentBuilder, ScalingIntent};
use crate::trigger::TriggerEvaluator;

pub const DEFAULT_EVALUATION_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_INTENT_QUEUE_DEPTH: usize = 64;

pub struct Autoscaler {
    store: Arc<dyn Store>,
    evaluator: Arc<TriggerEvaluator>,
    builder: Arc<IntentBuilder>,
    coordinator: Arc<ScalingCoordinator>,
    queue_depth: usize,
}

impl Autoscaler {
    pub fn new(
        store: Arc<dyn Store>,
        evaluator: Arc<TriggerEvaluator>,
        builder: Arc<IntentBuilder>,
        coordinator: Arc<ScalingCoordinator>,
    ) -> Self {
        Self {
            store,
            evaluator,
            builder,
            coordinator,
            queue_depth: DEFAULT_INTENT_QUEUE_DEPTH,
        }
    }

    pub fn with_queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = depth.max(1);
        self
    }

    pub fn coordinator(&self) -> &Arc<ScalingCoordinator> {
        &self.coordinator
    }

    /// Evaluate one cluster's alerts at `now` and build the intent, if any.
    pub async fn evaluate_cluster(
        &self,
        cluster: &Cluster,
        now: DateTime<Utc>,
    ) -> ScalingResult<Option<ScalingIntent>> {
        let alerts = self.store.find_alerts_for_cluster(cluster.id)?;
        debug!(cluster_id = cluster.id, alerts = alerts.len(), "evaluating alerts");
        let Some(firing) = self.evaluator.evaluate(cluster, &alerts, now).await else {
            return Ok(None);
        };
        let host_group = firing.policy.host_group.clone();
        match self.builder.build(cluster, firing).await {
            Ok(intent) => Ok(Some(intent)),
            Err(e) => {
                self.record_build_failure(cluster, host_group, &e);
                Err(e)
            }
        }
    }

    fn record_build_failure(&self, cluster: &Cluster, host_group: String, error: &ScalingError) {
        let mut entry = HistoryEntry::new(
            cluster.id,
            ScalingStatus::Failed,
            format!("Could not build a scaling request for host group '{host_group}': {error}"),
        );
        entry.host_group = Some(host_group);
        if let Err(e) = self.store.record_entry(&entry) {
            warn!(cluster_id = cluster.id, error = %e, "failed to record evaluation failure");
        }
    }

    /// Evaluate every enabled cluster once, without dispatching anything.
    pub async fn evaluate_all(&self, now: DateTime<Utc>) -> ScalingResult<Vec<ScalingIntent>> {
        let mut intents = Vec::new();
        for cluster in self.store.list_clusters()? {
            if !cluster.autoscaling_enabled {
                continue;
            }
            match self.evaluate_cluster(&cluster, now).await {
                Ok(Some(intent)) => intents.push(intent),
                Ok(None) => {}
                Err(e) => warn!(cluster_id = cluster.id, error = %e, "cluster evaluation failed"),
            }
        }
        Ok(intents)
    }

    /// Run until `shutdown` changes, then wait for in-flight operations.
    pub async fn run(self: Arc<Self>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = interval.as_secs(), "autoscaler started");

        let (tx, mut rx) = mpsc::channel::<ScalingIntent>(self.queue_depth);
        let coordinator = Arc::clone(&self.coordinator);
        let consumer = tokio::spawn(async move {
            while let Some(intent) = rx.recv().await {
                let cluster_id = intent.cluster_id;
                match coordinator.handle(intent).await {
                    Ok(dispatch) => debug!(cluster_id, ?dispatch, "intent handled"),
                    Err(e) => warn!(cluster_id, error = %e, "failed to handle scaling intent"),
                }
            }
        });

        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.tick(&tx),
                _ = shutdown.changed() => {
                    info!("autoscaler shutting down");
                    break;
                }
            }
        }

        drop(tx);
        if let Err(e) = consumer.await {
            error!(error = %e, "coordinator loop panicked");
        }
        self.coordinator.drain().await;
    }

    fn tick(self: &Arc<Self>, tx: &mpsc::Sender<ScalingIntent>) {
        let now = Utc::now();
        let retries = self.coordinator.take_rejected();
        if !retries.is_empty() {
            debug!(count = retries.len(), "retrying rejected intents");
            let tx = tx.clone();
            tokio::spawn(async move {
                for intent in retries {
                    if tx.send(intent).await.is_err() {
                        break;
                    }
                }
            });
        }

        let clusters = match self.store.list_clusters() {
            Ok(clusters) => clusters,
            Err(e) => {
                error!(error = %e, "failed to list clusters");
                return;
            }
        };
        for cluster in clusters.into_iter().filter(|c| c.autoscaling_enabled) {
            let this = Arc::clone(self);
            let tx = tx.clone();
            tokio::spawn(async move {
                match this.evaluate_cluster(&cluster, now).await {
                    Ok(Some(intent)) => {
                        if tx.send(intent).await.is_err() {
                            debug!(cluster_id = cluster.id, "intent channel closed");
                        }
                    }
                    Ok(None) => {}
                    Err(e) => warn!(cluster_id = cluster.id, error = %e, "cluster evaluation failed"),
                }
            });
        }
    }
}
