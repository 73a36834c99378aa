//! TriggerEvaluator — decides which alert of a cluster fires.
//!
//! An alert is due when its cron schedule fires within the last
//! re-evaluation interval, or when its metric has been in the alerting
//! state for the alert's period. Only alerts with a scaling policy are
//! actionable. The first due, actionable alert of a pass wins; every later
//! one is recorded in the cluster history as an overlap.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, info, warn};

use tidegrid_state::{
    Alert, AlertId, AlertTrigger, Cluster, ClusterId, HistoryEntry, HistorySink, ScalingPolicy,
    ScalingStatus,
};

use crate::metrics::MetricsSource;
use crate::schedule::CronSchedule;

/// Default minimum time between two evaluations of the same alert.
pub const DEFAULT_MIN_REEVALUATION: Duration = Duration::from_secs(60);

/// An alert that fired, with the policy it carries.
#[derive(Debug, Clone, PartialEq)]
pub struct Firing {
    pub alert: Alert,
    pub policy: ScalingPolicy,
    pub fired_at: DateTime<Utc>,
}

pub struct TriggerEvaluator {
    history: Arc<dyn HistorySink>,
    metrics: Arc<dyn MetricsSource>,
    interval: TimeDelta,
    last_fired: Mutex<HashMap<(ClusterId, AlertId), DateTime<Utc>>>,
}

impl TriggerEvaluator {
    pub fn new(
        history: Arc<dyn HistorySink>,
        metrics: Arc<dyn MetricsSource>,
        min_reevaluation: Duration,
    ) -> Self {
        let interval = TimeDelta::from_std(min_reevaluation).unwrap_or(TimeDelta::seconds(60));
        Self {
            history,
            metrics,
            interval,
            last_fired: Mutex::new(HashMap::new()),
        }
    }

    /// Whether `alert` should fire at `now`.
    pub async fn is_due(&self, cluster: &Cluster, alert: &Alert, now: DateTime<Utc>) -> bool {
        if self.fired_recently(alert, now) {
            debug!(cluster_id = cluster.id, alert = %alert.name, "alert fired within the last interval");
            return false;
        }
        match &alert.trigger {
            AlertTrigger::Time { cron } => match cron.parse::<CronSchedule>() {
                Ok(schedule) => schedule.fires_within(now - self.interval, now),
                Err(e) => {
                    warn!(cluster_id = cluster.id, alert = %alert.name, cron = %cron, error = %e, "invalid cron expression");
                    false
                }
            },
            AlertTrigger::Metric {
                definition,
                state,
                period_minutes,
            } => match self.metrics.observe(cluster, definition).await {
                Ok(Some(obs)) => {
                    obs.state == *state
                        && now - obs.since >= TimeDelta::minutes(i64::from(*period_minutes))
                }
                Ok(None) => false,
                Err(e) => {
                    warn!(cluster_id = cluster.id, alert = %alert.name, definition = %definition, error = %e, "metric lookup failed");
                    false
                }
            },
        }
    }

    /// Evaluate every alert of `cluster` at `now`.
    pub async fn evaluate(
        &self,
        cluster: &Cluster,
        alerts: &[Alert],
        now: DateTime<Utc>,
    ) -> Option<Firing> {
        let timed: Vec<(&Alert, DateTime<Utc>)> = alerts.iter().map(|a| (a, now)).collect();
        self.first_due(cluster, &timed).await
    }

    /// Evaluate alerts each at its own timestamp, in the given order.
    pub async fn replay(
        &self,
        cluster: &Cluster,
        alerts: &[(Alert, DateTime<Utc>)],
    ) -> Option<Firing> {
        let timed: Vec<(&Alert, DateTime<Utc>)> = alerts.iter().map(|(a, at)| (a, *at)).collect();
        self.first_due(cluster, &timed).await
    }

    async fn first_due(
        &self,
        cluster: &Cluster,
        alerts: &[(&Alert, DateTime<Utc>)],
    ) -> Option<Firing> {
        let mut winner: Option<Firing> = None;
        for &(alert, at) in alerts {
            let Some(policy) = &alert.policy else {
                continue;
            };
            if !self.is_due(cluster, alert, at).await {
                continue;
            }
            self.mark_fired(alert, at);
            match &winner {
                None => {
                    info!(cluster_id = cluster.id, alert = %alert.name, host_group = %policy.host_group, "alert triggered");
                    winner = Some(Firing {
                        alert: alert.clone(),
                        policy: policy.clone(),
                        fired_at: at,
                    });
                }
                Some(first) => self.record_overlap(cluster, alert, policy, &first.alert),
            }
        }
        winner
    }

    fn record_overlap(&self, cluster: &Cluster, alert: &Alert, policy: &ScalingPolicy, first: &Alert) {
        let message = format!(
            "Autoscaling schedule '{}' overlaps with '{}'.",
            alert.name, first.name
        );
        info!(cluster_id = cluster.id, alert = %alert.name, winner = %first.name, "alert overlaps");
        let mut entry = HistoryEntry::new(cluster.id, ScalingStatus::TriggerFailed, message);
        entry.host_group = Some(policy.host_group.clone());
        if let Err(e) = self.history.record_entry(&entry) {
            warn!(cluster_id = cluster.id, error = %e, "failed to record overlap");
        }
    }

    fn fired_recently(&self, alert: &Alert, now: DateTime<Utc>) -> bool {
        let last_fired = self.last_fired.lock().unwrap_or_else(PoisonError::into_inner);
        last_fired
            .get(&(alert.cluster_id, alert.id))
            .is_some_and(|last| now - *last < self.interval && now >= *last)
    }

    fn mark_fired(&self, alert: &Alert, at: DateTime<Utc>) {
        self.last_fired
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((alert.cluster_id, alert.id), at);
    }
}
