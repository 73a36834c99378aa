//! redb table definitions for the tidegrid state store.
//!
//! Every table maps `&str` keys to JSON-encoded `&[u8]` values. Child
//! records are keyed `{cluster_id}:{child}` with zero-padded numeric parts
//! so that a prefix scan returns them in insertion order.

use redb::TableDefinition;

/// Shape shared by every tidegrid table.
pub type JsonTable = TableDefinition<'static, &'static str, &'static [u8]>;

/// Clusters keyed by `{cluster_id}`.
pub const CLUSTERS: JsonTable = TableDefinition::new("clusters");

/// Alerts keyed by `{cluster_id}:{alert_id:010}`.
pub const ALERTS: JsonTable = TableDefinition::new("alerts");

/// Instance metadata keyed by `{cluster_id}:{private_id:010}`.
pub const INSTANCES: JsonTable = TableDefinition::new("instances");

/// Scaling history keyed by `{cluster_id}:{sequence:020}`.
pub const HISTORY: JsonTable = TableDefinition::new("history");
