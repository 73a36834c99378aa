//! CapacityAdjuster — drives an autoscaling group to a target size.
//!
//! A managed change suspends the provider's own scaling processes, applies
//! the mutation, waits for convergence and resumes the processes again.
//! Convergence is a three-stage wait:
//!
//! 1. the group itself reports in service,
//! 2. the expected number of members are in service,
//! 3. every member is running at the compute layer (checked in batches).

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{AdjustmentCause, CapacityError, CapacityResult, ProviderError, Stage};
use crate::polling::{PollError, PollingStrategy, poll};
use crate::provider::{CloudProvider, GroupStatus, InstanceState};

/// Processes suspended during a managed resize.
pub const DEFAULT_SUSPENDED_PROCESSES: [&str; 8] = [
    "Launch",
    "HealthCheck",
    "ReplaceUnhealthy",
    "AZRebalance",
    "AlarmNotification",
    "ScheduledActions",
    "AddToLoadBalancer",
    "RemoveFromLoadBalancerLowPriority",
];

/// Provider request limit for instance state lookups.
pub const DEFAULT_INSTANCE_BATCH_SIZE: usize = 100;

/// Tunables for [`CapacityAdjuster`].
#[derive(Debug, Clone)]
pub struct CapacitySettings {
    pub group_in_service: PollingStrategy,
    pub instances_in_service: PollingStrategy,
    pub instances_running: PollingStrategy,
    pub instance_batch_size: usize,
    pub suspended_processes: Vec<String>,
}

impl Default for CapacitySettings {
    fn default() -> Self {
        Self {
            group_in_service: PollingStrategy::Backoff {
                base_delay: Duration::from_secs(2),
                max_delay: Duration::from_secs(30),
                max_attempts: 60,
            },
            instances_in_service: PollingStrategy::SlowStart {
                expected_runtime: Duration::from_secs(40),
                min_delay: Duration::from_secs(5),
                max_attempts: 120,
            },
            instances_running: PollingStrategy::Backoff {
                base_delay: Duration::from_secs(2),
                max_delay: Duration::from_secs(30),
                max_attempts: 60,
            },
            instance_batch_size: DEFAULT_INSTANCE_BATCH_SIZE,
            suspended_processes: DEFAULT_SUSPENDED_PROCESSES
                .iter()
                .map(|p| p.to_string())
                .collect(),
        }
    }
}

/// Applies capacity changes to cloud groups through a [`CloudProvider`].
pub struct CapacityAdjuster {
    provider: Arc<dyn CloudProvider>,
    settings: CapacitySettings,
}

impl CapacityAdjuster {
    pub fn new(provider: Arc<dyn CloudProvider>, settings: CapacitySettings) -> Self {
        Self { provider, settings }
    }

    pub fn settings(&self) -> &CapacitySettings {
        &self.settings
    }

    /// Resolve the cloud group backing a host group.
    pub async fn group_name(&self, stack_ref: &str, host_group: &str) -> CapacityResult<String> {
        self.provider
            .group_name(stack_ref, host_group)
            .await
            .map_err(|e| CapacityError::provider(host_group, Stage::ResolveGroup, e))
    }

    /// Suspend the configured automatic scaling processes.
    pub async fn suspend(&self, group: &str) -> CapacityResult<()> {
        debug!(group, processes = ?self.settings.suspended_processes, "suspending group processes");
        self.provider
            .suspend_processes(group, &self.settings.suspended_processes)
            .await
            .map_err(|e| CapacityError::provider(group, Stage::Suspend, e))
    }

    pub async fn resume(&self, group: &str, processes: &[String]) -> CapacityResult<()> {
        debug!(group, ?processes, "resuming group processes");
        self.provider
            .resume_processes(group, processes)
            .await
            .map_err(|e| CapacityError::provider(group, Stage::Resume, e))
    }

    /// Set both max size and desired capacity to `size`.
    pub async fn resize(&self, group: &str, size: u32) -> CapacityResult<()> {
        info!(group, size, "resizing group");
        self.provider
            .resize_group(group, size, size)
            .await
            .map_err(|e| CapacityError::provider(group, Stage::Resize, e))
    }

    /// Terminate one member and lower desired capacity by one.
    pub async fn terminate_one(&self, group: &str, instance_id: &str) -> CapacityResult<()> {
        info!(group, instance_id, "terminating instance");
        self.provider
            .terminate_instance(group, instance_id, true)
            .await
            .map_err(|e| CapacityError::provider(group, Stage::Terminate, e))
    }

    /// Wait until the group holds `expected` running, in-service members.
    pub async fn await_convergence(
        &self,
        group: &str,
        expected: u32,
        cancel: &CancellationToken,
    ) -> CapacityResult<()> {
        self.wait_group_in_service(group, cancel).await?;
        let members = self
            .wait_instances_in_service(group, expected, cancel)
            .await?;
        self.wait_instances_running(group, &members, cancel).await?;
        info!(group, expected, "group converged");
        Ok(())
    }

    /// Suspend, resize to `size`, converge, resume.
    ///
    /// Processes are resumed even when the resize or the wait fails.
    pub async fn managed_resize(
        &self,
        group: &str,
        size: u32,
        cancel: &CancellationToken,
    ) -> CapacityResult<()> {
        self.suspend(group).await?;
        let outcome = async {
            self.resize(group, size).await?;
            self.await_convergence(group, size, cancel).await
        }
        .await;
        self.finish_managed(group, outcome).await
    }

    /// Suspend, terminate each instance, set the group to `desired`,
    /// converge, resume.
    ///
    /// `on_terminated` sees every instance the provider accepted a
    /// termination for, including when a later step fails.
    pub async fn managed_downscale(
        &self,
        group: &str,
        instance_ids: &[String],
        desired: u32,
        cancel: &CancellationToken,
        mut on_terminated: impl FnMut(&str) + Send,
    ) -> CapacityResult<()> {
        self.suspend(group).await?;
        let outcome = async {
            for instance_id in instance_ids {
                if cancel.is_cancelled() {
                    return Err(CapacityError::Cancelled {
                        group: group.to_string(),
                        stage: Stage::Terminate,
                    });
                }
                self.terminate_one(group, instance_id).await?;
                on_terminated(instance_id);
            }
            self.resize(group, desired).await?;
            self.await_convergence(group, desired, cancel).await
        }
        .await;
        self.finish_managed(group, outcome).await
    }

    async fn finish_managed(
        &self,
        group: &str,
        outcome: CapacityResult<()>,
    ) -> CapacityResult<()> {
        let resumed = self.resume(group, &self.settings.suspended_processes).await;
        match (outcome, resumed) {
            (Ok(()), resumed) => resumed,
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(resume_err)) => {
                warn!(group, error = %resume_err, "failed to resume processes after failed adjustment");
                Err(e)
            }
        }
    }

    async fn wait_group_in_service(
        &self,
        group: &str,
        cancel: &CancellationToken,
    ) -> CapacityResult<()> {
        let provider = self.provider.as_ref();
        poll(&self.settings.group_in_service, cancel, move |_| async move {
            let desc = provider.describe_group(group).await?;
            Ok::<_, ProviderError>((desc.status == GroupStatus::InService).then_some(()))
        })
        .await
        .map_err(|e| poll_failure(group, Stage::GroupInService, e))
    }

    async fn wait_instances_in_service(
        &self,
        group: &str,
        expected: u32,
        cancel: &CancellationToken,
    ) -> CapacityResult<Vec<String>> {
        let provider = self.provider.as_ref();
        poll(&self.settings.instances_in_service, cancel, move |attempt| async move {
            let members = provider.describe_group(group).await?.in_service();
            if members.len() as u32 == expected {
                return Ok::<_, ProviderError>(Some(members));
            }
            debug!(group, attempt, in_service = members.len(), expected, "waiting for instances");
            Ok(None)
        })
        .await
        .map_err(|e| poll_failure(group, Stage::InstancesInService, e))
    }

    async fn wait_instances_running(
        &self,
        group: &str,
        instance_ids: &[String],
        cancel: &CancellationToken,
    ) -> CapacityResult<()> {
        let provider = self.provider.as_ref();
        let batch_size = self.settings.instance_batch_size.max(1);
        for batch in instance_ids.chunks(batch_size) {
            poll(&self.settings.instances_running, cancel, move |_| async move {
                let states = provider.instance_states(batch).await?;
                let pending = batch
                    .iter()
                    .filter(|id| states.get(*id) != Some(&InstanceState::Running))
                    .count();
                Ok::<_, ProviderError>((pending == 0).then_some(()))
            })
            .await
            .map_err(|e| poll_failure(group, Stage::InstancesRunning, e))?;
        }
        Ok(())
    }
}

fn poll_failure(group: &str, stage: Stage, err: PollError<ProviderError>) -> CapacityError {
    match err {
        PollError::Cancelled => CapacityError::Cancelled {
            group: group.to_string(),
            stage,
        },
        PollError::Exhausted { attempts } => CapacityError::AdjustmentFailed {
            group: group.to_string(),
            stage,
            source: AdjustmentCause::Timeout { attempts },
        },
        PollError::Check(e) => CapacityError::provider(group, stage, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use crate::provider::{GroupDescription, GroupMember, LifecycleState, ProviderFuture};

    /// Provider whose group converges instantly unless told to stall.
    struct FakeProvider {
        group: Mutex<GroupDescription>,
        calls: Mutex<Vec<String>>,
        batch_sizes: Mutex<Vec<usize>>,
        stall: bool,
        fail_resize: bool,
    }

    impl FakeProvider {
        fn with_members(n: u32) -> Self {
            let members = (0..n)
                .map(|i| GroupMember {
                    instance_id: format!("i-{i}"),
                    lifecycle: LifecycleState::InService,
                })
                .collect();
            Self {
                group: Mutex::new(GroupDescription {
                    name: "asg-worker".to_string(),
                    max_size: n,
                    desired_capacity: n,
                    status: GroupStatus::InService,
                    members,
                }),
                calls: Mutex::new(Vec::new()),
                batch_sizes: Mutex::new(Vec::new()),
                stall: false,
                fail_resize: false,
            }
        }

        fn call(&self, name: &str) {
            self.calls.lock().unwrap().push(name.to_string());
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl CloudProvider for FakeProvider {
        fn group_name<'a>(&'a self, stack_ref: &'a str, host_group: &'a str) -> ProviderFuture<'a, String> {
            Box::pin(async move { Ok(format!("{stack_ref}-{host_group}")) })
        }

        fn describe_group<'a>(&'a self, _group: &'a str) -> ProviderFuture<'a, GroupDescription> {
            Box::pin(async move { Ok(self.group.lock().unwrap().clone()) })
        }

        fn resize_group<'a>(&'a self, _group: &'a str, max_size: u32, desired: u32) -> ProviderFuture<'a, ()> {
            Box::pin(async move {
                self.call("resize");
                if self.fail_resize {
                    return Err(ProviderError::new("throttled"));
                }
                let mut g = self.group.lock().unwrap();
                g.max_size = max_size;
                g.desired_capacity = desired;
                if self.stall {
                    g.status = GroupStatus::Updating;
                    return Ok(());
                }
                let mut next = g.members.len() as u32;
                while (g.members.len() as u32) < desired {
                    g.members.push(GroupMember {
                        instance_id: format!("i-{next}"),
                        lifecycle: LifecycleState::InService,
                    });
                    next += 1;
                }
                g.members.truncate(desired as usize);
                Ok(())
            })
        }

        fn suspend_processes<'a>(&'a self, _group: &'a str, processes: &'a [String]) -> ProviderFuture<'a, ()> {
            Box::pin(async move {
                assert_eq!(processes.len(), 8);
                self.call("suspend");
                Ok(())
            })
        }

        fn resume_processes<'a>(&'a self, _group: &'a str, _processes: &'a [String]) -> ProviderFuture<'a, ()> {
            Box::pin(async move {
                self.call("resume");
                Ok(())
            })
        }

        fn terminate_instance<'a>(
            &'a self,
            _group: &'a str,
            instance_id: &'a str,
            decrement_desired: bool,
        ) -> ProviderFuture<'a, ()> {
            Box::pin(async move {
                self.call(&format!("terminate:{instance_id}"));
                let mut g = self.group.lock().unwrap();
                g.members.retain(|m| m.instance_id != instance_id);
                if decrement_desired {
                    g.desired_capacity -= 1;
                }
                Ok(())
            })
        }

        fn instance_states<'a>(&'a self, instance_ids: &'a [String]) -> ProviderFuture<'a, HashMap<String, InstanceState>> {
            Box::pin(async move {
                self.batch_sizes.lock().unwrap().push(instance_ids.len());
                Ok(instance_ids
                    .iter()
                    .map(|id| (id.clone(), InstanceState::Running))
                    .collect())
            })
        }
    }

    fn fast_settings(batch: usize) -> CapacitySettings {
        let fixed = PollingStrategy::Fixed {
            interval: Duration::from_millis(1),
            max_attempts: 3,
        };
        CapacitySettings {
            group_in_service: fixed,
            instances_in_service: fixed,
            instances_running: fixed,
            instance_batch_size: batch,
            ..CapacitySettings::default()
        }
    }

    fn adjuster(provider: &Arc<FakeProvider>, batch: usize) -> CapacityAdjuster {
        CapacityAdjuster::new(provider.clone(), fast_settings(batch))
    }

    #[test]
    fn default_settings_suspend_eight_processes() {
        let s = CapacitySettings::default();
        assert_eq!(s.suspended_processes.len(), 8);
        assert_eq!(s.instance_batch_size, 100);
        assert!(matches!(
            s.instances_in_service,
            PollingStrategy::SlowStart { expected_runtime, .. } if expected_runtime == Duration::from_secs(40)
        ));
    }

    #[tokio::test]
    async fn managed_resize_suspends_resizes_and_resumes() {
        let provider = Arc::new(FakeProvider::with_members(3));
        let adj = adjuster(&provider, 100);

        adj.managed_resize("asg-worker", 5, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(provider.calls(), vec!["suspend", "resize", "resume"]);
        let g = provider.group.lock().unwrap();
        assert_eq!(g.max_size, 5);
        assert_eq!(g.desired_capacity, 5);
        assert_eq!(g.in_service().len(), 5);
    }

    #[tokio::test]
    async fn running_check_uses_batches() {
        let provider = Arc::new(FakeProvider::with_members(7));
        let adj = adjuster(&provider, 3);

        adj.await_convergence("asg-worker", 7, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(*provider.batch_sizes.lock().unwrap(), vec![3, 3, 1]);
    }

    #[tokio::test]
    async fn stalled_group_times_out_and_still_resumes() {
        let mut fake = FakeProvider::with_members(3);
        fake.stall = true;
        let provider = Arc::new(fake);
        let adj = adjuster(&provider, 100);

        let err = adj
            .managed_resize("asg-worker", 5, &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            CapacityError::AdjustmentFailed { stage, source, .. } => {
                assert_eq!(stage, Stage::GroupInService);
                assert!(matches!(source, AdjustmentCause::Timeout { attempts: 3 }));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(provider.calls().last().map(String::as_str), Some("resume"));
    }

    #[tokio::test]
    async fn provider_error_is_wrapped_with_stage() {
        let mut fake = FakeProvider::with_members(3);
        fake.fail_resize = true;
        let provider = Arc::new(fake);
        let adj = adjuster(&provider, 100);

        let err = adj
            .managed_resize("asg-worker", 5, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            CapacityError::AdjustmentFailed { stage: Stage::Resize, source: AdjustmentCause::Provider(_), .. }
        ));
        assert!(err.to_string().contains("throttled"));
        assert_eq!(provider.calls(), vec!["suspend", "resize", "resume"]);
    }

    #[tokio::test]
    async fn cancelled_convergence_is_distinct_from_failure() {
        let mut fake = FakeProvider::with_members(3);
        fake.stall = true;
        let provider = Arc::new(fake);
        let adj = adjuster(&provider, 100);
        provider.group.lock().unwrap().status = GroupStatus::Updating;

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = adj
            .await_convergence("asg-worker", 3, &cancel)
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn managed_downscale_terminates_each_instance() {
        let provider = Arc::new(FakeProvider::with_members(5));
        let adj = adjuster(&provider, 100);
        let remove = vec!["i-1".to_string(), "i-3".to_string()];

        let mut terminated = Vec::new();
        adj.managed_downscale("asg-worker", &remove, 3, &CancellationToken::new(), |id| {
            terminated.push(id.to_string())
        })
        .await
        .unwrap();

        assert_eq!(terminated, remove);
        assert_eq!(
            provider.calls(),
            vec!["suspend", "terminate:i-1", "terminate:i-3", "resize", "resume"]
        );
        let g = provider.group.lock().unwrap();
        assert_eq!(g.desired_capacity, 3);
        assert_eq!(g.in_service(), vec!["i-0", "i-2", "i-4"]);
    }

    #[tokio::test]
    async fn failed_resize_still_reports_terminated_instances() {
        let mut fake = FakeProvider::with_members(4);
        fake.fail_resize = true;
        let provider = Arc::new(fake);
        let adj = adjuster(&provider, 100);
        let remove = vec!["i-0".to_string(), "i-2".to_string()];

        let mut terminated = Vec::new();
        let err = adj
            .managed_downscale("asg-worker", &remove, 2, &CancellationToken::new(), |id| {
                terminated.push(id.to_string())
            })
            .await
            .unwrap_err();

        assert!(matches!(err, CapacityError::AdjustmentFailed { stage: Stage::Resize, .. }));
        assert_eq!(terminated, remove);
        assert_eq!(provider.calls().last().map(String::as_str), Some("resume"));
    }

    #[tokio::test]
    async fn group_name_is_resolved_through_provider() {
        let provider = Arc::new(FakeProvider::with_members(1));
        let adj = adjuster(&provider, 100);
        assert_eq!(adj.group_name("stack-1", "worker").await.unwrap(), "stack-1-worker");
    }
}
