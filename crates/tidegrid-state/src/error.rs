//! Errors raised by the cluster, alert, instance and history store.

use thiserror::Error;

use crate::types::ClusterId;

pub type StateResult<T> = Result<T, StateError>;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("cannot open state database: {0}")]
    Open(String),

    #[error("state transaction failed: {0}")]
    Transaction(String),

    #[error("cannot open state table: {0}")]
    Table(String),

    #[error("state read failed: {0}")]
    Read(String),

    #[error("state write failed: {0}")]
    Write(String),

    #[error("cannot encode record: {0}")]
    Encode(String),

    /// A stored value no longer decodes into its record type.
    #[error("corrupt record in table '{table}': {reason}")]
    Corrupt { table: String, reason: String },

    #[error("cluster {0} is not registered")]
    ClusterNotFound(ClusterId),
}
