//! `tidegrid.toml` parsing.
//!
//! Every section and every key is optional; missing values fall back to the
//! library defaults of the crate that owns the setting.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use tidegrid_autoscale::CoordinatorSettings;
use tidegrid_autoscale::coordinator::DEFAULT_WORKER_POOL_SIZE;
use tidegrid_autoscale::scaler::{DEFAULT_EVALUATION_INTERVAL, DEFAULT_INTENT_QUEUE_DEPTH};
use tidegrid_autoscale::trigger::DEFAULT_MIN_REEVALUATION;
use tidegrid_capacity::{CapacitySettings, PollingStrategy};
use tidegrid_decommission::{DecommissionSettings, SelectorSettings};
use tidegrid_sim::GroupSeed;
use tidegrid_state::{AlertTrigger, ClusterId, ScalingPolicy};

const DEFAULT_DATA_DIR: &str = "tidegrid-data";
const DEFAULT_REPLICATION: u32 = 3;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TidegridConfig {
    pub daemon: Option<DaemonConfig>,
    pub evaluator: Option<EvaluatorConfig>,
    pub coordinator: Option<CoordinatorConfig>,
    pub decommission: Option<DecommissionConfig>,
    pub capacity: Option<CapacityConfig>,
    pub simulation: Option<SimulationConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DaemonConfig {
    pub data_dir: Option<PathBuf>,
    pub evaluation_interval_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EvaluatorConfig {
    pub min_reevaluation_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CoordinatorConfig {
    pub worker_pool_size: Option<usize>,
    pub intent_queue_depth: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DecommissionConfig {
    pub poll_interval_ms: Option<u64>,
    pub max_attempts: Option<u32>,
    pub region_server_max_attempts: Option<u32>,
    pub safety_multiplier: Option<f64>,
    pub migration_bytes_per_sec: Option<u64>,
}

/// Polling knobs for the cloud provider. `group_*` drives the group and
/// instance-running waits (exponential backoff), `instance_*` the wait for
/// new members to come into service (slow start).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CapacityConfig {
    pub group_base_delay_ms: Option<u64>,
    pub group_max_delay_ms: Option<u64>,
    pub group_max_attempts: Option<u32>,
    pub instance_expected_runtime_ms: Option<u64>,
    pub instance_min_delay_ms: Option<u64>,
    pub instance_max_attempts: Option<u32>,
    pub instance_batch_size: Option<usize>,
    pub suspended_processes: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SimulationConfig {
    #[serde(default)]
    pub clusters: Vec<SimClusterConfig>,
}

/// One simulated cluster: its scaling bounds, the host groups it starts
/// with and the alerts attached to it.
#[derive(Debug, Clone, Deserialize)]
pub struct SimClusterConfig {
    pub id: ClusterId,
    pub stack_ref: String,
    pub min_size: u32,
    pub max_size: u32,
    #[serde(default)]
    pub cool_down_minutes: u32,
    #[serde(default = "enabled")]
    pub autoscaling_enabled: bool,
    #[serde(default = "default_replication")]
    pub replication: u32,
    #[serde(default)]
    pub groups: Vec<GroupSeed>,
    #[serde(default)]
    pub alerts: Vec<AlertConfig>,
    #[serde(default)]
    pub metrics: Vec<MetricSeed>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AlertConfig {
    pub name: String,
    #[serde(flatten)]
    pub trigger: AlertTrigger,
    pub policy: Option<ScalingPolicy>,
}

/// Initial state of a metric definition in the simulated monitoring system.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricSeed {
    pub definition: String,
    pub state: tidegrid_state::MetricState,
    /// How long the metric has already been in `state` at startup.
    #[serde(default)]
    pub held_for_minutes: i64,
}

fn enabled() -> bool {
    true
}

fn default_replication() -> u32 {
    DEFAULT_REPLICATION
}

impl TidegridConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: TidegridConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn data_dir(&self) -> PathBuf {
        self.daemon
            .as_ref()
            .and_then(|d| d.data_dir.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR))
    }

    pub fn evaluation_interval(&self) -> Duration {
        self.daemon
            .as_ref()
            .and_then(|d| d.evaluation_interval_secs)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_EVALUATION_INTERVAL)
    }

    pub fn min_reevaluation(&self) -> Duration {
        self.evaluator
            .as_ref()
            .and_then(|e| e.min_reevaluation_secs)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_MIN_REEVALUATION)
    }

    pub fn intent_queue_depth(&self) -> usize {
        self.coordinator
            .as_ref()
            .and_then(|c| c.intent_queue_depth)
            .unwrap_or(DEFAULT_INTENT_QUEUE_DEPTH)
    }

    pub fn coordinator_settings(&self) -> CoordinatorSettings {
        CoordinatorSettings {
            worker_pool_size: self
                .coordinator
                .as_ref()
                .and_then(|c| c.worker_pool_size)
                .unwrap_or(DEFAULT_WORKER_POOL_SIZE)
                .max(1),
        }
    }

    pub fn decommission_settings(&self) -> DecommissionSettings {
        let mut settings = DecommissionSettings::default();
        if let Some(d) = &self.decommission {
            if let Some(ms) = d.poll_interval_ms {
                settings.poll_interval = Duration::from_millis(ms);
            }
            if let Some(n) = d.max_attempts {
                settings.max_attempts = n;
            }
            if let Some(n) = d.region_server_max_attempts {
                settings.region_server_max_attempts = n;
            }
        }
        settings
    }

    pub fn selector_settings(&self) -> SelectorSettings {
        let mut settings = SelectorSettings::default();
        if let Some(d) = &self.decommission {
            if let Some(m) = d.safety_multiplier {
                settings.safety_multiplier = m;
            }
            if let Some(rate) = d.migration_bytes_per_sec {
                settings.migration_bytes_per_sec = rate;
            }
        }
        settings
    }

    pub fn capacity_settings(&self) -> CapacitySettings {
        let mut settings = CapacitySettings::default();
        let Some(c) = &self.capacity else {
            return settings;
        };

        if let PollingStrategy::Backoff {
            base_delay,
            max_delay,
            max_attempts,
        } = settings.group_in_service
        {
            let backoff = PollingStrategy::Backoff {
                base_delay: c.group_base_delay_ms.map(Duration::from_millis).unwrap_or(base_delay),
                max_delay: c.group_max_delay_ms.map(Duration::from_millis).unwrap_or(max_delay),
                max_attempts: c.group_max_attempts.unwrap_or(max_attempts),
            };
            settings.group_in_service = backoff;
            settings.instances_running = backoff;
        }
        if let PollingStrategy::SlowStart {
            expected_runtime,
            min_delay,
            max_attempts,
        } = settings.instances_in_service
        {
            settings.instances_in_service = PollingStrategy::SlowStart {
                expected_runtime: c
                    .instance_expected_runtime_ms
                    .map(Duration::from_millis)
                    .unwrap_or(expected_runtime),
                min_delay: c.instance_min_delay_ms.map(Duration::from_millis).unwrap_or(min_delay),
                max_attempts: c.instance_max_attempts.unwrap_or(max_attempts),
            };
        }
        if let Some(size) = c.instance_batch_size {
            settings.instance_batch_size = size.max(1);
        }
        if let Some(processes) = &c.suspended_processes {
            settings.suspended_processes = processes.clone();
        }
        settings
    }

    pub fn simulated_clusters(&self) -> &[SimClusterConfig] {
        self.simulation
            .as_ref()
            .map(|s| s.clusters.as_slice())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidegrid_state::{AdjustmentType, MetricState};

    #[test]
    fn empty_config_uses_library_defaults() {
        let config: TidegridConfig = toml::from_str("").unwrap();
        assert_eq!(config.data_dir(), PathBuf::from("tidegrid-data"));
        assert_eq!(config.evaluation_interval(), Duration::from_secs(60));
        assert_eq!(config.min_reevaluation(), Duration::from_secs(60));
        assert_eq!(config.intent_queue_depth(), 64);
        assert_eq!(config.coordinator_settings().worker_pool_size, 8);
        assert_eq!(config.decommission_settings().max_attempts, 360);
        assert_eq!(config.selector_settings().safety_multiplier, 1.2);
        assert_eq!(config.capacity_settings().instance_batch_size, 100);
        assert!(config.simulated_clusters().is_empty());
    }

    #[test]
    fn parse_daemon_and_tuning_sections() {
        let toml = r#"
[daemon]
data_dir = "/var/lib/tidegrid"
evaluation_interval_secs = 15

[evaluator]
min_reevaluation_secs = 120

[coordinator]
worker_pool_size = 0
intent_queue_depth = 8

[decommission]
poll_interval_ms = 250
max_attempts = 10
safety_multiplier = 2.0
"#;
        let config: TidegridConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.data_dir(), PathBuf::from("/var/lib/tidegrid"));
        assert_eq!(config.evaluation_interval(), Duration::from_secs(15));
        assert_eq!(config.min_reevaluation(), Duration::from_secs(120));
        assert_eq!(config.intent_queue_depth(), 8);
        // A pool of zero would never dispatch anything.
        assert_eq!(config.coordinator_settings().worker_pool_size, 1);

        let decommission = config.decommission_settings();
        assert_eq!(decommission.poll_interval, Duration::from_millis(250));
        assert_eq!(decommission.max_attempts, 10);
        assert_eq!(decommission.region_server_max_attempts, 500);
        let selector = config.selector_settings();
        assert_eq!(selector.safety_multiplier, 2.0);
        assert_eq!(selector.migration_bytes_per_sec, 50 * 1024 * 1024);
    }

    #[test]
    fn capacity_overrides_keep_strategy_shapes() {
        let toml = r#"
[capacity]
group_base_delay_ms = 10
group_max_attempts = 5
instance_expected_runtime_ms = 20
instance_min_delay_ms = 5
instance_batch_size = 2
suspended_processes = ["Launch"]
"#;
        let config: TidegridConfig = toml::from_str(toml).unwrap();
        let settings = config.capacity_settings();
        assert_eq!(
            settings.group_in_service,
            PollingStrategy::Backoff {
                base_delay: Duration::from_millis(10),
                max_delay: Duration::from_secs(30),
                max_attempts: 5,
            }
        );
        assert_eq!(settings.instances_running, settings.group_in_service);
        assert_eq!(
            settings.instances_in_service,
            PollingStrategy::SlowStart {
                expected_runtime: Duration::from_millis(20),
                min_delay: Duration::from_millis(5),
                max_attempts: 120,
            }
        );
        assert_eq!(settings.instance_batch_size, 2);
        assert_eq!(settings.suspended_processes, vec!["Launch".to_string()]);
    }

    #[test]
    fn parse_simulated_cluster() {
        let toml = r#"
[[simulation.clusters]]
id = 1
stack_ref = "analytics"
min_size = 5
max_size = 20
cool_down_minutes = 30

[[simulation.clusters.groups]]
name = "worker"
nodes = 10
used_bytes = 4096

[[simulation.clusters.alerts]]
name = "nightly-shrink"
type = "time"
cron = "0 0 22 * * ?"

[simulation.clusters.alerts.policy]
name = "shrink"
host_group = "worker"
adjustment_type = "PERCENTAGE"
scaling_adjustment = -20

[[simulation.clusters.alerts]]
name = "pending-containers"
type = "metric"
definition = "yarn.pending"
state = "CRITICAL"
period_minutes = 5

[[simulation.clusters.metrics]]
definition = "yarn.pending"
state = "CRITICAL"
held_for_minutes = 10
"#;
        let config: TidegridConfig = toml::from_str(toml).unwrap();
        let clusters = config.simulated_clusters();
        assert_eq!(clusters.len(), 1);
        let cluster = &clusters[0];
        assert!(cluster.autoscaling_enabled);
        assert_eq!(cluster.replication, 3);

        let group = &cluster.groups[0];
        assert_eq!(group.nodes, 10);
        assert_eq!(group.used_bytes, 4096);
        assert_eq!(group.components, vec!["DATANODE".to_string(), "NODEMANAGER".to_string()]);

        assert_eq!(
            cluster.alerts[0].trigger,
            AlertTrigger::Time {
                cron: "0 0 22 * * ?".into()
            }
        );
        let policy = cluster.alerts[0].policy.as_ref().unwrap();
        assert_eq!(policy.adjustment_type, AdjustmentType::Percentage);
        assert_eq!(policy.scaling_adjustment, -20);

        assert_eq!(
            cluster.alerts[1].trigger,
            AlertTrigger::Metric {
                definition: "yarn.pending".into(),
                state: MetricState::Critical,
                period_minutes: 5,
            }
        );
        assert!(cluster.alerts[1].policy.is_none());
        assert_eq!(cluster.metrics[0].held_for_minutes, 10);
    }

    #[test]
    fn from_file_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(TidegridConfig::from_file(&dir.path().join("absent.toml")).is_err());

        let path = dir.path().join("tidegrid.toml");
        std::fs::write(&path, "[daemon]\nevaluation_interval_secs = 5\n").unwrap();
        let config = TidegridConfig::from_file(&path).unwrap();
        assert_eq!(config.evaluation_interval(), Duration::from_secs(5));
    }
}
