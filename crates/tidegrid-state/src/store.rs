//! StateStore — redb-backed persistence for tidegrid.
//!
//! Provides typed CRUD over clusters, alerts, instance metadata and the
//! scaling history, and implements the collaborator traits from
//! [`crate::repository`]. Values are JSON-serialized into redb's `&[u8]`
//! columns. Both on-disk and in-memory backends are supported.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use redb::{Database, ReadableDatabase, ReadableTable, TableHandle};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::repository::{AlertStore, ClusterStore, HistorySink, InstanceStore};
use crate::tables::*;
use crate::types::*;

/// Closure turning any `Display` error into a [`StateError`] variant.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
    (Corrupt, $table:expr) => {
        |e| StateError::Corrupt {
            table: $table.name().to_string(),
            reason: e.to_string(),
        }
    };
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing and simulation).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(CLUSTERS).map_err(map_err!(Table))?;
        txn.open_table(ALERTS).map_err(map_err!(Table))?;
        txn.open_table(INSTANCES).map_err(map_err!(Table))?;
        txn.open_table(HISTORY).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn put<T: serde::Serialize>(
        &self,
        def: JsonTable,
        key: &str,
        value: &T,
    ) -> StateResult<()> {
        let value = serde_json::to_vec(value).map_err(map_err!(Encode))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(def).map_err(map_err!(Table))?;
            table
                .insert(key, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn get<T: DeserializeOwned>(
        &self,
        def: JsonTable,
        key: &str,
    ) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let value = serde_json::from_slice(guard.value()).map_err(map_err!(Corrupt, def))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// All values whose key starts with `{cluster_id}:`, in key order.
    fn list_for_cluster<T: DeserializeOwned>(
        &self,
        def: JsonTable,
        cluster_id: ClusterId,
    ) -> StateResult<Vec<T>> {
        let (start, end) = cluster_range(cluster_id);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table
            .range::<&str>(start.as_str()..end.as_str())
            .map_err(map_err!(Read))?
        {
            let (_, value) = entry.map_err(map_err!(Read))?;
            results.push(serde_json::from_slice(value.value()).map_err(map_err!(Corrupt, def))?);
        }
        Ok(results)
    }

    // ── Alerts ─────────────────────────────────────────────────────

    /// Insert or update an alert.
    pub fn put_alert(&self, alert: &Alert) -> StateResult<()> {
        self.put(ALERTS, &alert.table_key(), alert)?;
        debug!(cluster_id = alert.cluster_id, alert = %alert.name, "alert stored");
        Ok(())
    }

    /// Delete an alert. Returns true if it existed.
    pub fn delete_alert(&self, cluster_id: ClusterId, alert_id: AlertId) -> StateResult<bool> {
        let key = format!("{cluster_id}:{alert_id:010}");
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(ALERTS).map_err(map_err!(Table))?;
            existed = table.remove(key.as_str()).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }

    // ── Instances ──────────────────────────────────────────────────

    /// Get one instance record by its private id.
    pub fn get_instance(
        &self,
        cluster_id: ClusterId,
        private_id: u64,
    ) -> StateResult<Option<InstanceMetaData>> {
        self.get(INSTANCES, &instance_key(cluster_id, private_id))
    }

    /// All instance records of a cluster, across host groups.
    pub fn list_instances(&self, cluster_id: ClusterId) -> StateResult<Vec<InstanceMetaData>> {
        self.list_for_cluster(INSTANCES, cluster_id)
    }

    // ── History ────────────────────────────────────────────────────

    /// Scaling history of a cluster, oldest first.
    pub fn list_history(&self, cluster_id: ClusterId) -> StateResult<Vec<HistoryEntry>> {
        self.list_for_cluster(HISTORY, cluster_id)
    }
}

impl ClusterStore for StateStore {
    fn find_cluster(&self, id: ClusterId) -> StateResult<Cluster> {
        self.get(CLUSTERS, &id.to_string())?
            .ok_or_else(|| StateError::ClusterNotFound(id))
    }

    fn save_cluster(&self, cluster: &Cluster) -> StateResult<()> {
        self.put(CLUSTERS, &cluster.id.to_string(), cluster)?;
        debug!(cluster_id = cluster.id, "cluster stored");
        Ok(())
    }

    fn list_clusters(&self) -> StateResult<Vec<Cluster>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(CLUSTERS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let cluster: Cluster =
                serde_json::from_slice(value.value()).map_err(map_err!(Corrupt, CLUSTERS))?;
            results.push(cluster);
        }
        results.sort_by_key(|c| c.id);
        Ok(results)
    }

    fn touch_scaling_activity(
        &self,
        id: ClusterId,
        at: DateTime<Utc>,
    ) -> StateResult<DateTime<Utc>> {
        let key = id.to_string();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let effective;
        {
            let mut table = txn.open_table(CLUSTERS).map_err(map_err!(Table))?;
            let mut cluster: Cluster = match table.get(key.as_str()).map_err(map_err!(Read))? {
                Some(guard) => {
                    serde_json::from_slice(guard.value()).map_err(map_err!(Corrupt, CLUSTERS))?
                }
                None => return Err(StateError::ClusterNotFound(id)),
            };
            effective = match cluster.last_scaling_activity {
                Some(last) if last >= at => last,
                _ => at,
            };
            cluster.last_scaling_activity = Some(effective);
            let value = serde_json::to_vec(&cluster).map_err(map_err!(Encode))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(cluster_id = id, at = %effective, "scaling activity recorded");
        Ok(effective)
    }
}

impl AlertStore for StateStore {
    fn find_alerts_for_cluster(&self, id: ClusterId) -> StateResult<Vec<Alert>> {
        self.list_for_cluster(ALERTS, id)
    }
}

impl HistorySink for StateStore {
    fn record_entry(&self, entry: &HistoryEntry) -> StateResult<()> {
        let value = serde_json::to_vec(entry).map_err(map_err!(Encode))?;
        let (start, end) = cluster_range(entry.cluster_id);
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(HISTORY).map_err(map_err!(Table))?;
            // Next sequence number = last key in this cluster's range + 1.
            let next = {
                let mut range = table
                    .range::<&str>(start.as_str()..end.as_str())
                    .map_err(map_err!(Read))?;
                match range.next_back() {
                    Some(last) => {
                        let (key, _) = last.map_err(map_err!(Read))?;
                        parse_sequence(key.value()) + 1
                    }
                    None => 0,
                }
            };
            let key = format!("{}:{next:020}", entry.cluster_id);
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(
            cluster_id = entry.cluster_id,
            status = ?entry.status,
            message = %entry.message,
            "history entry recorded"
        );
        Ok(())
    }
}

impl InstanceStore for StateStore {
    fn host_group(&self, cluster_id: ClusterId, name: &str) -> StateResult<HostGroup> {
        let instances = self
            .list_instances(cluster_id)?
            .into_iter()
            .filter(|i| i.group_name == name)
            .collect();
        Ok(HostGroup {
            cluster_id,
            name: name.to_string(),
            instances,
        })
    }

    fn save_instance(&self, instance: &InstanceMetaData) -> StateResult<()> {
        self.put(INSTANCES, &instance.table_key(), instance)
    }

    fn mark_terminated(
        &self,
        cluster_id: ClusterId,
        instance_ids: &[InstanceId],
        at: DateTime<Utc>,
    ) -> StateResult<u32> {
        let (start, end) = cluster_range(cluster_id);
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let mut updated = 0;
        {
            let mut table = txn.open_table(INSTANCES).map_err(map_err!(Table))?;
            let mut targets = Vec::new();
            for entry in table
                .range::<&str>(start.as_str()..end.as_str())
                .map_err(map_err!(Read))?
            {
                let (key, value) = entry.map_err(map_err!(Read))?;
                let inst: InstanceMetaData =
                    serde_json::from_slice(value.value()).map_err(map_err!(Corrupt, INSTANCES))?;
                let matches = inst
                    .instance_id
                    .as_ref()
                    .is_some_and(|id| instance_ids.contains(id));
                if matches && !inst.is_terminated() {
                    targets.push((key.value().to_string(), inst));
                }
            }
            for (key, mut inst) in targets {
                inst.status = InstanceStatus::Terminated;
                inst.termination_date = Some(at);
                let value = serde_json::to_vec(&inst).map_err(map_err!(Encode))?;
                table
                    .insert(key.as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;
                updated += 1;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(cluster_id, updated, "instances marked terminated");
        Ok(updated)
    }
}

/// Key range `[{id}:, {id};)` covering every child record of a cluster.
fn cluster_range(cluster_id: ClusterId) -> (String, String) {
    (format!("{cluster_id}:"), format!("{cluster_id};"))
}

fn parse_sequence(key: &str) -> u64 {
    key.rsplit(':')
        .next()
        .and_then(|s| s.parse().ok())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn test_cluster(id: ClusterId) -> Cluster {
        Cluster {
            id,
            stack_ref: format!("stack-{id}"),
            min_size: 1,
            max_size: 20,
            cool_down_minutes: 30,
            last_scaling_activity: None,
            autoscaling_enabled: true,
        }
    }

    fn test_instance(cluster_id: ClusterId, private_id: u64, group: &str) -> InstanceMetaData {
        InstanceMetaData {
            cluster_id,
            private_id,
            group_name: group.to_string(),
            instance_id: Some(format!("i-{private_id}")),
            discovery_fqdn: Some(format!("{group}-{private_id}.example.com")),
            status: InstanceStatus::RunningHealthy,
            status_reason: None,
            start_date: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            termination_date: None,
        }
    }

    fn test_alert(cluster_id: ClusterId, id: AlertId) -> Alert {
        Alert {
            id,
            cluster_id,
            name: format!("alert-{id}"),
            trigger: AlertTrigger::Time {
                cron: "0 8 * * MON-FRI".to_string(),
            },
            policy: Some(ScalingPolicy {
                name: "grow".to_string(),
                host_group: "worker".to_string(),
                adjustment_type: AdjustmentType::NodeCount,
                scaling_adjustment: 2,
            }),
        }
    }

    // ── Clusters ───────────────────────────────────────────────────

    #[test]
    fn cluster_save_and_find() {
        let store = StateStore::open_in_memory().unwrap();
        let cluster = test_cluster(7);

        store.save_cluster(&cluster).unwrap();
        assert_eq!(store.find_cluster(7).unwrap(), cluster);
    }

    #[test]
    fn find_unknown_cluster_is_not_found() {
        let store = StateStore::open_in_memory().unwrap();
        assert!(matches!(store.find_cluster(1), Err(StateError::ClusterNotFound(1))));
    }

    #[test]
    fn undecodable_cluster_is_reported_as_corrupt() {
        let store = StateStore::open_in_memory().unwrap();
        let txn = store.db.begin_write().unwrap();
        {
            let mut table = txn.open_table(CLUSTERS).unwrap();
            table.insert("4", b"not json".as_slice()).unwrap();
        }
        txn.commit().unwrap();

        let err = store.find_cluster(4).unwrap_err();
        assert!(matches!(&err, StateError::Corrupt { table, .. } if table == "clusters"));
        assert!(err.to_string().starts_with("corrupt record in table 'clusters'"));
    }

    #[test]
    fn list_clusters_sorted_by_id() {
        let store = StateStore::open_in_memory().unwrap();
        store.save_cluster(&test_cluster(12)).unwrap();
        store.save_cluster(&test_cluster(3)).unwrap();

        let ids: Vec<_> = store.list_clusters().unwrap().iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![3, 12]);
    }

    #[test]
    fn touch_scaling_activity_never_moves_backwards() {
        let store = StateStore::open_in_memory().unwrap();
        store.save_cluster(&test_cluster(1)).unwrap();
        let t0 = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();

        assert_eq!(store.touch_scaling_activity(1, t0).unwrap(), t0);
        let earlier = t0 - Duration::minutes(5);
        assert_eq!(store.touch_scaling_activity(1, earlier).unwrap(), t0);
        let later = t0 + Duration::minutes(5);
        assert_eq!(store.touch_scaling_activity(1, later).unwrap(), later);

        assert_eq!(
            store.find_cluster(1).unwrap().last_scaling_activity,
            Some(later)
        );
    }

    #[test]
    fn touch_unknown_cluster_fails() {
        let store = StateStore::open_in_memory().unwrap();
        assert!(store.touch_scaling_activity(99, Utc::now()).is_err());
    }

    // ── Alerts ─────────────────────────────────────────────────────

    #[test]
    fn alerts_listed_per_cluster_in_id_order() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_alert(&test_alert(1, 20)).unwrap();
        store.put_alert(&test_alert(1, 3)).unwrap();
        store.put_alert(&test_alert(2, 1)).unwrap();
        // Cluster 11 shares the "1" prefix but must not leak into cluster 1.
        store.put_alert(&test_alert(11, 1)).unwrap();

        let names: Vec<_> = store
            .find_alerts_for_cluster(1)
            .unwrap()
            .into_iter()
            .map(|a| a.name)
            .collect();
        assert_eq!(names, vec!["alert-3", "alert-20"]);
    }

    #[test]
    fn alert_delete() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_alert(&test_alert(1, 1)).unwrap();

        assert!(store.delete_alert(1, 1).unwrap());
        assert!(!store.delete_alert(1, 1).unwrap());
        assert!(store.find_alerts_for_cluster(1).unwrap().is_empty());
    }

    // ── Instances ──────────────────────────────────────────────────

    #[test]
    fn host_group_filters_by_name() {
        let store = StateStore::open_in_memory().unwrap();
        store.save_instance(&test_instance(1, 0, "worker")).unwrap();
        store.save_instance(&test_instance(1, 1, "worker")).unwrap();
        store.save_instance(&test_instance(1, 2, "master")).unwrap();

        let group = store.host_group(1, "worker").unwrap();
        assert_eq!(group.node_count(), 2);
        assert!(group.find_by_fqdn("WORKER-1.example.com").is_some());
        assert!(group.find_by_fqdn("master-2.example.com").is_none());
    }

    #[test]
    fn mark_terminated_updates_matching_records_once() {
        let store = StateStore::open_in_memory().unwrap();
        for i in 0..3 {
            store.save_instance(&test_instance(1, i, "worker")).unwrap();
        }
        let at = Utc::now();

        let ids = vec!["i-0".to_string(), "i-2".to_string(), "i-unknown".to_string()];
        assert_eq!(store.mark_terminated(1, &ids, at).unwrap(), 2);
        // Already terminated records are not touched again.
        assert_eq!(store.mark_terminated(1, &ids, at).unwrap(), 0);

        let group = store.host_group(1, "worker").unwrap();
        assert_eq!(group.node_count(), 1);
        // Records are kept as history.
        assert_eq!(group.instances.len(), 3);
        let terminated = store.get_instance(1, 0).unwrap().unwrap();
        assert_eq!(terminated.status, InstanceStatus::Terminated);
        assert_eq!(terminated.termination_date, Some(at));
    }

    // ── History ────────────────────────────────────────────────────

    #[test]
    fn history_appends_in_order() {
        let store = StateStore::open_in_memory().unwrap();
        store
            .record_event(1, ScalingStatus::TriggerFailed, "overlap")
            .unwrap();
        store.record_event(1, ScalingStatus::Success, "done").unwrap();
        store.record_event(2, ScalingStatus::Failed, "boom").unwrap();

        let history = store.list_history(1).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].status, ScalingStatus::TriggerFailed);
        assert_eq!(history[1].message, "done");
    }

    // ── Persistence (on-disk) ──────────────────────────────────────

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("tidegrid.redb");

        {
            let store = StateStore::open(&db_path).unwrap();
            store.save_cluster(&test_cluster(5)).unwrap();
            store.record_event(5, ScalingStatus::Success, "first").unwrap();
        }

        let store = StateStore::open(&db_path).unwrap();
        assert_eq!(store.find_cluster(5).unwrap().stack_ref, "stack-5");
        store.record_event(5, ScalingStatus::Success, "second").unwrap();
        let history = store.list_history(5).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].message, "second");
    }

    #[test]
    fn unknown_adjustment_type_deserializes_as_unknown() {
        let json = r#"{"name":"p","host_group":"w","adjustment_type":"LOAD_BASED","scaling_adjustment":3}"#;
        let policy: ScalingPolicy = serde_json::from_str(json).unwrap();
        assert_eq!(policy.adjustment_type, AdjustmentType::Unknown);
    }
}
