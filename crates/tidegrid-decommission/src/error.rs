//! Error types for candidate selection and decommissioning.

use std::collections::BTreeMap;
use std::fmt;

use tidegrid_state::StateError;

use crate::client::{ClientError, HostStatus};
use crate::component::ComponentKind;

/// Phase of a decommission plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    UnhealthySplit,
    StartServices,
    DecommissionComponents,
    WaitDataMigration(ComponentKind),
    StopComponents,
    RemoveMembership,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::UnhealthySplit => f.write_str("unhealthy-split"),
            Phase::StartServices => f.write_str("start-services"),
            Phase::DecommissionComponents => f.write_str("decommission-components"),
            Phase::WaitDataMigration(kind) => write!(f, "wait-data-migration({kind})"),
            Phase::StopComponents => f.write_str("stop-components"),
            Phase::RemoveMembership => f.write_str("remove-membership"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DecommissionError {
    /// The removal would breach the replication or capacity floor.
    #[error("not enough nodes to downscale: {0}")]
    NotEnoughNodes(String),

    /// Storage-safety or input-validation violation.
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("following nodes shouldn't be removed from the cluster: {hosts:?}")]
    NotRecommendedRemoval { hosts: Vec<String> },

    #[error("host group '{0}' not found")]
    HostGroupNotFound(String),

    #[error("decommission failed at {phase}: {reason}")]
    DecommissionFailed {
        phase: Phase,
        reason: String,
        /// Last known status of the hosts still affected.
        host_states: BTreeMap<String, HostStatus>,
    },

    #[error("decommission cancelled at {phase}")]
    Cancelled { phase: Phase },

    #[error("cluster manager error: {0}")]
    Client(String),

    #[error(transparent)]
    State(#[from] StateError),
}

impl From<ClientError> for DecommissionError {
    fn from(e: ClientError) -> Self {
        DecommissionError::Client(e.0)
    }
}

impl DecommissionError {
    pub(crate) fn failed(phase: Phase, reason: impl Into<String>) -> Self {
        DecommissionError::DecommissionFailed {
            phase,
            reason: reason.into(),
            host_states: BTreeMap::new(),
        }
    }
}

pub type DecommissionResult<T> = Result<T, DecommissionError>;
