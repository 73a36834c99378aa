//! Error types for cloud capacity adjustment.

use std::fmt;

/// Error string returned by a cloud provider call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct ProviderError(pub String);

impl ProviderError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Step of a capacity adjustment, carried by errors for diagnosis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    ResolveGroup,
    Suspend,
    Resume,
    Resize,
    Terminate,
    GroupInService,
    InstancesInService,
    InstancesRunning,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::ResolveGroup => "resolve-group",
            Stage::Suspend => "suspend",
            Stage::Resume => "resume",
            Stage::Resize => "resize",
            Stage::Terminate => "terminate",
            Stage::GroupInService => "group-in-service",
            Stage::InstancesInService => "instances-in-service",
            Stage::InstancesRunning => "instances-running",
        };
        f.write_str(s)
    }
}

/// Underlying cause of a failed adjustment.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AdjustmentCause {
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("gave up after {attempts} attempts")]
    Timeout { attempts: u32 },
}

/// Errors raised by [`crate::CapacityAdjuster`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum CapacityError {
    #[error("capacity adjustment of group '{group}' failed at {stage}: {source}")]
    AdjustmentFailed {
        group: String,
        stage: Stage,
        #[source]
        source: AdjustmentCause,
    },

    #[error("capacity adjustment of group '{group}' cancelled at {stage}")]
    Cancelled { group: String, stage: Stage },
}

impl CapacityError {
    pub(crate) fn provider(group: &str, stage: Stage, err: ProviderError) -> Self {
        CapacityError::AdjustmentFailed {
            group: group.to_string(),
            stage,
            source: AdjustmentCause::Provider(err),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, CapacityError::Cancelled { .. })
    }
}

pub type CapacityResult<T> = Result<T, CapacityError>;
