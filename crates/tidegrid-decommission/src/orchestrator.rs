//! DecommissionOrchestrator — takes hosts out of a cluster in order.
//!
//! A plan runs through these phases:
//!
//! ```text
//! UNHEALTHY_SPLIT → START_SERVICES → DECOMMISSION_COMPONENTS →
//! WAIT_DATA_MIGRATION(data-store) → WAIT_DATA_MIGRATION(region-server) →
//! STOP_COMPONENTS → REMOVE_MEMBERSHIP
//! ```
//!
//! Hosts the cluster manager no longer reports, or reports as `UNKNOWN`,
//! are deleted right away and marked FAILED. Those deletions stand even if
//! a later phase fails. Every wait polls with a fixed interval and a bounded
//! attempt budget, and stops when the cluster operation is cancelled.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tidegrid_capacity::{PollError, PollingStrategy, poll};
use tidegrid_state::{Cluster, ClusterId, InstanceMetaData, InstanceStatus, InstanceStore};

use crate::client::{
    AdminState, ClientError, ClusterManager, ComponentState, HostState, HostStatus, MigrationStatus,
    RequestId, RequestStatus,
};
use crate::component::{ComponentKind, ComponentRegistry, ComponentStrategy};
use crate::error::{DecommissionError, DecommissionResult, Phase};
use crate::selector::fqdns;

/// Status reason stored on hosts deleted during the unhealthy split.
pub const UNKNOWN_STATE_REASON: &str = "Instance is in UNKNOWN state";

#[derive(Debug, Clone)]
pub struct DecommissionSettings {
    pub poll_interval: Duration,
    pub max_attempts: u32,
    /// Region servers move regions slowly; they get a larger budget.
    pub region_server_max_attempts: u32,
}

impl Default for DecommissionSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            max_attempts: 360,
            region_server_max_attempts: 500,
        }
    }
}

/// Hosts of one host group to take out of a cluster.
#[derive(Debug, Clone)]
pub struct DecommissionPlan {
    pub cluster_id: ClusterId,
    pub stack_ref: String,
    pub host_group: String,
    pub hosts: Vec<InstanceMetaData>,
}

impl DecommissionPlan {
    pub fn new(cluster: &Cluster, host_group: &str, hosts: Vec<InstanceMetaData>) -> Self {
        Self {
            cluster_id: cluster.id,
            stack_ref: cluster.stack_ref.clone(),
            host_group: host_group.to_string(),
            hosts,
        }
    }
}

/// Hosts removed by a plan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecommissionOutcome {
    /// Deleted during the unhealthy split without a decommission.
    pub unhealthy_deleted: Vec<String>,
    /// Decommissioned and removed from membership.
    pub decommissioned: Vec<String>,
}

impl DecommissionOutcome {
    pub fn removed(&self) -> Vec<String> {
        let all: BTreeSet<&String> = self
            .unhealthy_deleted
            .iter()
            .chain(&self.decommissioned)
            .collect();
        all.into_iter().cloned().collect()
    }
}

type HostKey = (ClusterId, String);

/// Releases the plan's hosts when dropped.
struct HostLease<'a> {
    in_flight: &'a Mutex<HashSet<HostKey>>,
    keys: Vec<HostKey>,
}

impl Drop for HostLease<'_> {
    fn drop(&mut self) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        for key in &self.keys {
            in_flight.remove(key);
        }
    }
}

pub struct DecommissionOrchestrator {
    client: Arc<dyn ClusterManager>,
    instances: Arc<dyn InstanceStore>,
    registry: ComponentRegistry,
    settings: DecommissionSettings,
    in_flight: Mutex<HashSet<HostKey>>,
}

impl DecommissionOrchestrator {
    pub fn new(
        client: Arc<dyn ClusterManager>,
        instances: Arc<dyn InstanceStore>,
        registry: ComponentRegistry,
        settings: DecommissionSettings,
    ) -> Self {
        Self {
            client,
            instances,
            registry,
            settings,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Run every phase of `plan`. Returns the hosts that left the cluster.
    pub async fn execute(
        &self,
        plan: &DecommissionPlan,
        cancel: &CancellationToken,
    ) -> DecommissionResult<DecommissionOutcome> {
        let _lease = self.lease(plan)?;
        let stack = plan.stack_ref.as_str();
        info!(
            cluster_id = plan.cluster_id,
            host_group = %plan.host_group,
            hosts = ?fqdns(&plan.hosts),
            "executing decommission plan"
        );

        check_cancel(cancel, Phase::UnhealthySplit)?;
        let names = fqdns(&plan.hosts);
        let statuses = self
            .client
            .host_statuses(stack, &names)
            .await
            .map_err(|e| client_failure(Phase::UnhealthySplit, e))?;
        let mut outcome = DecommissionOutcome::default();
        let healthy = self
            .split_unhealthy(plan, &statuses, &mut outcome)
            .await?;
        if healthy.is_empty() {
            info!(cluster_id = plan.cluster_id, removed = ?outcome.unhealthy_deleted, "only unhealthy hosts removed");
            return Ok(outcome);
        }
        let healthy_statuses: BTreeMap<String, HostStatus> = healthy
            .iter()
            .filter_map(|h| statuses.get(h).map(|s| (h.clone(), s.clone())))
            .collect();

        self.start_services(stack, &healthy_statuses, cancel).await?;
        self.decommission_components(stack, &healthy, &healthy_statuses, cancel)
            .await?;
        for strategy in self.registry.iter().filter(|s| s.needs_migration_wait()) {
            self.wait_for_migration(stack, strategy, &healthy, &healthy_statuses, cancel)
                .await?;
        }
        self.stop_components(stack, &healthy, &healthy_statuses, cancel)
            .await?;

        check_cancel(cancel, Phase::RemoveMembership)?;
        self.client
            .delete_hosts(stack, &healthy)
            .await
            .map_err(|e| client_failure(Phase::RemoveMembership, e))?;
        outcome.decommissioned = healthy;

        info!(
            cluster_id = plan.cluster_id,
            host_group = %plan.host_group,
            removed = ?outcome.removed(),
            "decommission plan succeeded"
        );
        Ok(outcome)
    }

    fn lease(&self, plan: &DecommissionPlan) -> DecommissionResult<HostLease<'_>> {
        let keys: Vec<HostKey> = fqdns(&plan.hosts)
            .into_iter()
            .map(|h| (plan.cluster_id, h.to_lowercase()))
            .collect();
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some((_, host)) = keys.iter().find(|k| in_flight.contains(*k)) {
            return Err(DecommissionError::BadRequest(format!(
                "host {host} is already part of a running decommission"
            )));
        }
        in_flight.extend(keys.iter().cloned());
        Ok(HostLease {
            in_flight: &self.in_flight,
            keys,
        })
    }

    /// Delete hosts that are gone or unknown; return the rest.
    async fn split_unhealthy(
        &self,
        plan: &DecommissionPlan,
        statuses: &HashMap<String, HostStatus>,
        outcome: &mut DecommissionOutcome,
    ) -> DecommissionResult<Vec<String>> {
        let mut healthy = Vec::new();
        for instance in &plan.hosts {
            let Some(fqdn) = instance.discovery_fqdn.clone() else {
                continue;
            };
            match statuses.get(&fqdn) {
                Some(status) if status.host_state != HostState::Unknown => healthy.push(fqdn),
                Some(_) => {
                    info!(host = %fqdn, "host in UNKNOWN state, deleting");
                    self.client
                        .delete_hosts(&plan.stack_ref, std::slice::from_ref(&fqdn))
                        .await
                        .map_err(|e| client_failure(Phase::UnhealthySplit, e))?;
                    self.mark_failed(instance)?;
                    outcome.unhealthy_deleted.push(fqdn);
                }
                None => {
                    debug!(host = %fqdn, "host already gone from the cluster");
                    self.mark_failed(instance)?;
                    outcome.unhealthy_deleted.push(fqdn);
                }
            }
        }
        debug!(unhealthy = ?outcome.unhealthy_deleted, ?healthy, "split hosts by status");
        Ok(healthy)
    }

    fn mark_failed(&self, instance: &InstanceMetaData) -> DecommissionResult<()> {
        let mut failed = instance.clone();
        failed.status = InstanceStatus::Failed;
        failed.status_reason = Some(UNKNOWN_STATE_REASON.to_string());
        self.instances.save_instance(&failed)?;
        Ok(())
    }

    async fn start_services(
        &self,
        stack: &str,
        statuses: &BTreeMap<String, HostStatus>,
        cancel: &CancellationToken,
    ) -> DecommissionResult<()> {
        check_cancel(cancel, Phase::StartServices)?;
        let mut services = BTreeSet::new();
        for (host, status) in statuses {
            for (component, cs) in &status.components {
                let Some(strategy) = self.registry.by_component(component) else {
                    continue;
                };
                if cs.state == ComponentState::Started {
                    continue;
                }
                if cs.desired_admin_state == AdminState::Decommissioned {
                    debug!(host = %host, component = %component, "component decommissioned, not starting");
                    continue;
                }
                services.insert(strategy.kind().service());
            }
        }
        if services.is_empty() {
            debug!("no services need starting");
            return Ok(());
        }

        let mut requests = Vec::new();
        for service in services {
            info!(service, "starting service before decommission");
            match self.client.start_service(stack, service).await {
                Ok(Some(id)) => requests.push((format!("{service}_START"), id)),
                Ok(None) => {}
                Err(e) => {
                    return Err(DecommissionError::failed(
                        Phase::StartServices,
                        format!(
                            "failed to start service {service}, some of the nodes may be unavailable: {e}"
                        ),
                    ));
                }
            }
        }
        self.wait_requests(stack, Phase::StartServices, &requests, cancel)
            .await
    }

    async fn decommission_components(
        &self,
        stack: &str,
        hosts: &[String],
        statuses: &BTreeMap<String, HostStatus>,
        cancel: &CancellationToken,
    ) -> DecommissionResult<()> {
        check_cancel(cancel, Phase::DecommissionComponents)?;
        let mut requests = Vec::new();
        for strategy in self.registry.iter() {
            let targets: Vec<String> = hosts
                .iter()
                .filter(|h| statuses.get(*h).is_some_and(|s| strategy.applicable(s)))
                .cloned()
                .collect();
            if targets.is_empty() {
                continue;
            }
            let component = strategy.kind().component();
            info!(component, hosts = ?targets, "decommissioning component");
            let id = strategy
                .decommission(self.client.as_ref(), stack, &targets)
                .await
                .map_err(|e| client_failure(Phase::DecommissionComponents, e))?;
            requests.push((format!("{component}_DECOMMISSION"), id));
        }
        if let Err(e) = self
            .wait_requests(stack, Phase::DecommissionComponents, &requests, cancel)
            .await
        {
            return Err(self.with_host_states(stack, e, hosts, None).await);
        }
        Ok(())
    }

    async fn wait_for_migration(
        &self,
        stack: &str,
        strategy: &dyn ComponentStrategy,
        hosts: &[String],
        statuses: &BTreeMap<String, HostStatus>,
        cancel: &CancellationToken,
    ) -> DecommissionResult<()> {
        let kind = strategy.kind();
        let phase = Phase::WaitDataMigration(kind);
        let component = kind.component();
        let targets: Vec<String> = hosts
            .iter()
            .filter(|h| statuses.get(*h).is_some_and(|s| s.runs(component)))
            .cloned()
            .collect();
        if targets.is_empty() {
            debug!(component, "no targeted host runs component, skipping migration wait");
            return Ok(());
        }

        let max_attempts = match kind {
            ComponentKind::RegionServer => self.settings.region_server_max_attempts,
            _ => self.settings.max_attempts,
        };
        let strategy_poll = PollingStrategy::Fixed {
            interval: self.settings.poll_interval,
            max_attempts,
        };
        info!(component, hosts = ?targets, max_attempts, "waiting for data migration");

        let client = self.client.as_ref();
        let target_ref = &targets;
        let result = poll(&strategy_poll, cancel, move |_| async move {
            let status = client
                .migration_status(stack, component, target_ref)
                .await
                .map_err(|e| e.to_string())?;
            Ok::<_, String>((status == MigrationStatus::Completed).then_some(()))
        })
        .await;

        match result {
            Ok(()) => Ok(()),
            Err(PollError::Cancelled) => Err(DecommissionError::Cancelled { phase }),
            Err(e) => {
                let reason = match e {
                    PollError::Check(reason) => reason,
                    _ => format!("{component} could not be decommissioned on hosts"),
                };
                let err = DecommissionError::failed(phase, reason);
                Err(self.with_host_states(stack, err, &targets, Some(strategy)).await)
            }
        }
    }

    async fn stop_components(
        &self,
        stack: &str,
        hosts: &[String],
        statuses: &BTreeMap<String, HostStatus>,
        cancel: &CancellationToken,
    ) -> DecommissionResult<()> {
        check_cancel(cancel, Phase::StopComponents)?;
        let targets: Vec<String> = hosts
            .iter()
            .filter(|h| statuses.get(*h).is_some_and(|s| !s.components.is_empty()))
            .cloned()
            .collect();
        if targets.is_empty() {
            return Ok(());
        }
        info!(hosts = ?targets, "stopping components on decommissioned hosts");
        let id = self
            .client
            .stop_components(stack, &targets)
            .await
            .map_err(|e| client_failure(Phase::StopComponents, e))?;
        let requests = [("Stopping components on the decommissioned hosts".to_string(), id)];
        self.wait_requests(stack, Phase::StopComponents, &requests, cancel)
            .await
    }

    /// Poll until every request completes. A failed request fails the phase.
    async fn wait_requests(
        &self,
        stack: &str,
        phase: Phase,
        requests: &[(String, RequestId)],
        cancel: &CancellationToken,
    ) -> DecommissionResult<()> {
        if requests.is_empty() {
            return Ok(());
        }
        let strategy = PollingStrategy::Fixed {
            interval: self.settings.poll_interval,
            max_attempts: self.settings.max_attempts,
        };
        let client = self.client.as_ref();
        poll(&strategy, cancel, move |_| async move {
            let mut done = true;
            for (label, id) in requests {
                match client
                    .request_status(stack, *id)
                    .await
                    .map_err(|e| e.to_string())?
                {
                    RequestStatus::Completed => {}
                    RequestStatus::InProgress => done = false,
                    RequestStatus::Failed => return Err(format!("request {label} ({id}) failed")),
                }
            }
            Ok::<_, String>(done.then_some(()))
        })
        .await
        .map_err(|e| match e {
            PollError::Cancelled => DecommissionError::Cancelled { phase },
            PollError::Exhausted { attempts } => DecommissionError::failed(
                phase,
                format!("requests did not finish after {attempts} attempts"),
            ),
            PollError::Check(reason) => DecommissionError::failed(phase, reason),
        })
    }

    /// Attach current host states to a phase failure. Hosts whose component
    /// already stopped are left out when a strategy is given.
    async fn with_host_states(
        &self,
        stack: &str,
        err: DecommissionError,
        hosts: &[String],
        strategy: Option<&dyn ComponentStrategy>,
    ) -> DecommissionError {
        let (phase, reason) = match err {
            DecommissionError::DecommissionFailed { phase, reason, .. } => (phase, reason),
            other => return other,
        };
        let host_states = match self.client.host_statuses(stack, hosts).await {
            Ok(statuses) => statuses
                .into_iter()
                .filter(|(_, s)| strategy.is_none_or(|st| !st.stopped(s)))
                .collect(),
            Err(e) => {
                warn!(error = %e, "could not refresh host states after failure");
                BTreeMap::new()
            }
        };
        DecommissionError::DecommissionFailed {
            phase,
            reason,
            host_states,
        }
    }
}

fn check_cancel(cancel: &CancellationToken, phase: Phase) -> DecommissionResult<()> {
    if cancel.is_cancelled() {
        return Err(DecommissionError::Cancelled { phase });
    }
    Ok(())
}

fn client_failure(phase: Phase, err: ClientError) -> DecommissionError {
    DecommissionError::failed(phase, err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeClusterManager, fqdn, test_cluster, worker_group};
    use tidegrid_state::StateStore;

    fn fast_settings() -> DecommissionSettings {
        DecommissionSettings {
            poll_interval: Duration::from_millis(1),
            max_attempts: 3,
            region_server_max_attempts: 5,
        }
    }

    fn orchestrator(
        client: &Arc<FakeClusterManager>,
        store: &StateStore,
        settings: DecommissionSettings,
    ) -> DecommissionOrchestrator {
        DecommissionOrchestrator::new(
            client.clone(),
            Arc::new(store.clone()),
            ComponentRegistry::builtin(),
            settings,
        )
    }

    fn plan(ids: &[u64]) -> DecommissionPlan {
        let group = worker_group(10);
        let hosts = ids.iter().map(|i| group.instances[*i as usize].clone()).collect();
        DecommissionPlan::new(&test_cluster(), "worker", hosts)
    }

    #[tokio::test]
    async fn runs_every_phase_in_order() {
        let client = Arc::new(FakeClusterManager::data_cluster(5, 1));
        client
            .state
            .lock()
            .unwrap()
            .statuses
            .get_mut(&fqdn(1))
            .unwrap()
            .components
            .get_mut("NODEMANAGER")
            .unwrap()
            .state = ComponentState::Installed;
        let store = StateStore::open_in_memory().unwrap();
        let orch = orchestrator(&client, &store, fast_settings());

        let outcome = orch
            .execute(&plan(&[0, 1]), &CancellationToken::new())
            .await
            .unwrap();

        let hosts = format!("{},{}", fqdn(0), fqdn(1));
        assert_eq!(
            client.calls(),
            vec![
                "start:YARN".to_string(),
                format!("decommission:DATANODE:{hosts}"),
                format!("decommission:NODEMANAGER:{hosts}"),
                "migration:DATANODE".to_string(),
                format!("stop:{hosts}"),
                format!("delete:{hosts}"),
            ]
        );
        assert!(outcome.unhealthy_deleted.is_empty());
        assert_eq!(outcome.removed(), vec![fqdn(0), fqdn(1)]);
    }

    #[tokio::test]
    async fn unknown_and_missing_hosts_are_deleted_first() {
        let client = Arc::new(FakeClusterManager::compute_cluster(5));
        {
            let mut s = client.state.lock().unwrap();
            s.statuses.get_mut(&fqdn(0)).unwrap().host_state = HostState::Unknown;
            s.statuses.remove(&fqdn(1));
        }
        let store = StateStore::open_in_memory().unwrap();
        let orch = orchestrator(&client, &store, fast_settings());

        let outcome = orch
            .execute(&plan(&[0, 1, 2]), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.unhealthy_deleted, vec![fqdn(0), fqdn(1)]);
        assert_eq!(outcome.decommissioned, vec![fqdn(2)]);
        let calls = client.calls();
        assert_eq!(calls[0], format!("delete:{}", fqdn(0)));
        assert!(!calls.contains(&format!("delete:{}", fqdn(1))));

        let failed = store.get_instance(1, 0).unwrap().unwrap();
        assert_eq!(failed.status, InstanceStatus::Failed);
        assert_eq!(failed.status_reason.as_deref(), Some(UNKNOWN_STATE_REASON));
        assert_eq!(store.get_instance(1, 1).unwrap().unwrap().status, InstanceStatus::Failed);
    }

    #[tokio::test]
    async fn region_servers_enter_maintenance_and_wait_for_regions() {
        let client = Arc::new(FakeClusterManager::hbase_cluster(3));
        client.state.lock().unwrap().migration_polls_left = 2;
        let store = StateStore::open_in_memory().unwrap();
        let orch = orchestrator(&client, &store, fast_settings());

        orch.execute(&plan(&[0]), &CancellationToken::new())
            .await
            .unwrap();

        let calls = client.calls();
        let maintenance = calls.iter().position(|c| c.starts_with("maintenance:")).unwrap();
        let decommission = calls.iter().position(|c| c.starts_with("decommission:")).unwrap();
        assert!(maintenance < decommission);
        let polls = calls
            .iter()
            .filter(|c| *c == "migration:HBASE_REGIONSERVER")
            .count();
        assert_eq!(polls, 3);
    }

    #[tokio::test]
    async fn exhausted_migration_fails_but_keeps_unhealthy_deletions() {
        let client = Arc::new(FakeClusterManager::data_cluster(5, 1));
        {
            let mut s = client.state.lock().unwrap();
            s.migration_never_completes = true;
            s.statuses.get_mut(&fqdn(0)).unwrap().host_state = HostState::Unknown;
        }
        let store = StateStore::open_in_memory().unwrap();
        let orch = orchestrator(&client, &store, fast_settings());

        let err = orch
            .execute(&plan(&[0, 1]), &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            DecommissionError::DecommissionFailed { phase, reason, .. } => {
                assert_eq!(phase, Phase::WaitDataMigration(ComponentKind::DataStore));
                assert!(reason.contains("DATANODE"), "{reason}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        let calls = client.calls();
        assert_eq!(calls.iter().filter(|c| *c == "migration:DATANODE").count(), 3);
        assert!(!calls.iter().any(|c| c.starts_with("stop:")));
        assert_eq!(store.get_instance(1, 0).unwrap().unwrap().status, InstanceStatus::Failed);
    }

    #[tokio::test]
    async fn failed_service_start_is_fatal() {
        let client = Arc::new(FakeClusterManager::compute_cluster(3));
        {
            let mut s = client.state.lock().unwrap();
            s.fail_start_service = true;
            s.statuses
                .get_mut(&fqdn(0))
                .unwrap()
                .components
                .get_mut("NODEMANAGER")
                .unwrap()
                .state = ComponentState::Installed;
        }
        let store = StateStore::open_in_memory().unwrap();
        let orch = orchestrator(&client, &store, fast_settings());

        let err = orch
            .execute(&plan(&[0]), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DecommissionError::DecommissionFailed { phase: Phase::StartServices, .. }
        ));
        assert!(!client.calls().iter().any(|c| c.starts_with("decommission:")));
    }

    #[tokio::test]
    async fn failed_request_reports_host_states() {
        let client = Arc::new(FakeClusterManager::compute_cluster(3));
        // Request 1 is the first decommission request.
        client.state.lock().unwrap().failed_requests.insert(1);
        let store = StateStore::open_in_memory().unwrap();
        let orch = orchestrator(&client, &store, fast_settings());

        let err = orch
            .execute(&plan(&[0]), &CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            DecommissionError::DecommissionFailed { phase, host_states, .. } => {
                assert_eq!(phase, Phase::DecommissionComponents);
                assert!(host_states.contains_key(&fqdn(0)));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancellation_surfaces_as_cancelled() {
        let client = Arc::new(FakeClusterManager::data_cluster(5, 1));
        client.state.lock().unwrap().migration_never_completes = true;
        let store = StateStore::open_in_memory().unwrap();
        let orch = orchestrator(
            &client,
            &store,
            DecommissionSettings {
                poll_interval: Duration::from_secs(3600),
                ..fast_settings()
            },
        );
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = orch.execute(&plan(&[0]), &cancel).await.unwrap_err();
        assert!(matches!(
            err,
            DecommissionError::Cancelled { phase: Phase::WaitDataMigration(ComponentKind::DataStore) }
        ));
    }

    #[tokio::test]
    async fn host_cannot_be_in_two_plans() {
        let client = Arc::new(FakeClusterManager::compute_cluster(3));
        let store = StateStore::open_in_memory().unwrap();
        let orch = orchestrator(&client, &store, fast_settings());

        let lease = orch.lease(&plan(&[0, 1])).unwrap();
        let err = orch
            .execute(&plan(&[1, 2]), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DecommissionError::BadRequest(_)));

        drop(lease);
        orch.execute(&plan(&[1, 2]), &CancellationToken::new())
            .await
            .unwrap();
    }
}
