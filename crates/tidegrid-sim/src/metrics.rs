use tidegrid_autoscale::{MetricObservation, MetricsError, MetricsFuture, MetricsSource};
use tidegrid_state::Cluster;

use crate::simulator::Simulator;

impl MetricsSource for Simulator {
    fn observe<'a>(
        &'a self,
        cluster: &'a Cluster,
        definition: &'a str,
    ) -> MetricsFuture<'a, Option<MetricObservation>> {
        Box::pin(async move {
            self.check("observe").map_err(MetricsError)?;
            Ok(self.with_state(|s| {
                s.metrics
                    .get(&(cluster.stack_ref.clone(), definition.to_string()))
                    .copied()
            }))
        })
    }
}
