//! tidegrid-autoscale — decides when clusters grow or shrink.
//!
//! ```text
//! alerts ──► TriggerEvaluator ──► IntentBuilder ──► ScalingCoordinator
//!              (cron / metric)    (target size,       (cooldown, worker pool,
//!                                  candidates)         decommission + resize)
//! ```
//!
//! [`Autoscaler`] drives the pipeline on a fixed interval.

pub mod coordinator;
pub mod error;
pub mod intent;
pub mod metrics;
pub mod scaler;
pub mod schedule;
pub mod target;
pub mod trigger;

pub use coordinator::{CoordinatorSettings, Dispatch, ScalingCoordinator, remaining_cooldown};
pub use error::{ScalingError, ScalingResult};
pub use intent::{IntentBuilder, ScalingIntent};
pub use metrics::{MetricObservation, MetricsError, MetricsFuture, MetricsSource};
pub use scaler::Autoscaler;
pub use schedule::{CronError, CronSchedule};
pub use target::desired_node_count;
pub use trigger::{Firing, TriggerEvaluator};
