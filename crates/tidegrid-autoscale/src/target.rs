//! TargetSizeCalculator — the size a host group should have after a policy
//! is applied.
//!
//! ```text
//! NODE_COUNT  current + adjustment
//! PERCENTAGE  current + ceil(current * adjustment / 100)
//! EXACT       adjustment
//! unknown     current
//! ```
//!
//! The result is clamped to the cluster's `[min_size, max_size]`.

use tidegrid_state::{AdjustmentType, Cluster, ScalingPolicy};

const MAX_PERCENTAGE: f64 = 100.0;

/// Desired node count for `policy` applied to a group of `current` nodes.
pub fn desired_node_count(cluster: &Cluster, policy: &ScalingPolicy, current: u32) -> u32 {
    let current_i = i64::from(current);
    let adjustment = i64::from(policy.scaling_adjustment);
    let desired = match policy.adjustment_type {
        AdjustmentType::NodeCount => current_i + adjustment,
        AdjustmentType::Percentage => {
            let delta = (current as f64 * (adjustment as f64 / MAX_PERCENTAGE)).ceil();
            current_i + delta as i64
        }
        AdjustmentType::Exact => adjustment,
        AdjustmentType::Unknown => current_i,
    };
    clamp(desired, cluster.min_size, cluster.max_size)
}

/// Clamp to `[min, max]`. The lower bound wins if the two cross.
fn clamp(desired: i64, min: u32, max: u32) -> u32 {
    if desired < i64::from(min) {
        min
    } else if desired > i64::from(max) {
        max
    } else {
        desired as u32
    }
}
