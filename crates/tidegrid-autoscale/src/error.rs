//! Error types for the scaling pipeline.

use thiserror::Error;

use tidegrid_capacity::CapacityError;
use tidegrid_decommission::{ClientError, DecommissionError};
use tidegrid_state::{ClusterId, StateError};

#[derive(Debug, Error)]
pub enum ScalingError {
    #[error("cluster {0} not found")]
    ClusterNotFound(ClusterId),

    #[error("cluster manager error: {0}")]
    Client(String),

    #[error(transparent)]
    Decommission(#[from] DecommissionError),

    #[error(transparent)]
    Capacity(#[from] CapacityError),

    #[error(transparent)]
    State(#[from] StateError),
}

impl From<ClientError> for ScalingError {
    fn from(e: ClientError) -> Self {
        ScalingError::Client(e.0)
    }
}

impl ScalingError {
    /// True when the operation stopped because its cluster was cancelled.
    pub fn is_cancelled(&self) -> bool {
        match self {
            ScalingError::Decommission(DecommissionError::Cancelled { .. }) => true,
            ScalingError::Capacity(e) => e.is_cancelled(),
            _ => false,
        }
    }
}

pub type ScalingResult<T> = Result<T, ScalingError>;
