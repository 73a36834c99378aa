//! Metrics-source contract for metric-based alerts.

use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};

use tidegrid_state::{Cluster, MetricState};

/// Error string returned by a metrics source.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct MetricsError(pub String);

pub type MetricsFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, MetricsError>> + Send + 'a>>;

/// Current state of a metric definition and when it was entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricObservation {
    pub state: MetricState,
    pub since: DateTime<Utc>,
}

pub trait MetricsSource: Send + Sync {
    /// Observe `definition` on `cluster`. `None` if the source has no data.
    fn observe<'a>(
        &'a self,
        cluster: &'a Cluster,
        definition: &'a str,
    ) -> MetricsFuture<'a, Option<MetricObservation>>;
}
