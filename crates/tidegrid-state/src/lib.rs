//! tidegrid-state — embedded state store for tidegrid.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and in-memory
//! storage for clusters, alerts with their scaling policies, per-instance
//! metadata, and the scaling history.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Child records use `{cluster_id}:{child}` keys so a range scan returns one
//! cluster's records without touching others.
//!
//! The scaling core depends only on the traits in [`repository`]; the
//! `StateStore` is one implementation of them. It is `Clone` + `Send` +
//! `Sync` (backed by `Arc<Database>`) and can be shared across tasks.

pub mod error;
pub mod repository;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use repository::{AlertStore, ClusterStore, HistorySink, InstanceStore, Store};
pub use store::StateStore;
pub use types::*;
