//! Simulated cloud provider.
//!
//! A capacity change puts the group into `Updating` and new members into
//! `Pending`. Each `describe_group` returns the current view and then
//! advances the group by one step, so convergence takes a couple of polls.

use std::collections::HashMap;

use tracing::debug;

use tidegrid_capacity::{
    CloudProvider, GroupDescription, GroupMember, GroupStatus, InstanceState, LifecycleState,
    ProviderError, ProviderFuture,
};
use tidegrid_state::InstanceMetaData;

use crate::simulator::{CloudGroup, SimState, Simulator, cloud_group_name};

fn group_mut<'s>(s: &'s mut SimState, group: &str) -> Result<&'s mut CloudGroup, ProviderError> {
    s.cloud
        .get_mut(group)
        .ok_or_else(|| ProviderError::new(format!("unknown group '{group}'")))
}

impl Simulator {
    fn cloud_call(&self, op: &str, call: String) -> Result<(), ProviderError> {
        self.record(op, call).map_err(ProviderError)
    }

    fn with_cloud<R>(
        &self,
        f: impl FnOnce(&mut SimState) -> Result<R, ProviderError>,
    ) -> Result<R, ProviderError> {
        self.with_state(f)
    }

    /// Grow or shrink a group's membership to `desired`.
    fn apply_capacity(&self, group: &str, desired: u32) -> Result<(), ProviderError> {
        let created = self.with_cloud(|s| {
            let cloud = group_mut(s, group)?;
            let (stack_ref, host_group) = (cloud.stack_ref.clone(), cloud.host_group.clone());
            let current = cloud.members.len() as u32;
            if desired < current {
                let removed = cloud.members.split_off(desired as usize);
                cloud.status = GroupStatus::Updating;
                for member in removed {
                    s.terminated.insert(member.instance_id);
                }
                return Ok(Vec::new());
            }
            let mut created: Vec<InstanceMetaData> = Vec::new();
            for _ in current..desired {
                if let Some(instance) = s.provision(&stack_ref, &host_group) {
                    created.push(instance);
                }
            }
            let cloud = group_mut(s, group)?;
            for instance in &created {
                if let Some(instance_id) = &instance.instance_id {
                    cloud.members.push(GroupMember {
                        instance_id: instance_id.clone(),
                        lifecycle: LifecycleState::Pending,
                    });
                }
            }
            if !created.is_empty() {
                cloud.status = GroupStatus::Updating;
            }
            Ok(created)
        })?;

        if let Some(store) = &self.instances {
            for instance in &created {
                store
                    .save_instance(instance)
                    .map_err(|e| ProviderError::new(e.to_string()))?;
            }
        }
        debug!(group, desired, created = created.len(), "applied simulated capacity");
        Ok(())
    }
}

impl CloudProvider for Simulator {
    fn group_name<'a>(&'a self, stack_ref: &'a str, host_group: &'a str) -> ProviderFuture<'a, String> {
        Box::pin(async move {
            self.check("group_name").map_err(ProviderError)?;
            let name = cloud_group_name(stack_ref, host_group);
            self.with_cloud(|s| {
                if s.cloud.contains_key(&name) {
                    Ok(name)
                } else {
                    Err(ProviderError::new(format!(
                        "no group backs host group '{host_group}' of stack '{stack_ref}'"
                    )))
                }
            })
        })
    }

    fn describe_group<'a>(&'a self, group: &'a str) -> ProviderFuture<'a, GroupDescription> {
        Box::pin(async move {
            self.check("describe_group").map_err(ProviderError)?;
            self.with_cloud(|s| {
                let cloud = group_mut(s, group)?;
                let description = cloud.describe(group);
                cloud.settle();
                Ok(description)
            })
        })
    }

    fn resize_group<'a>(&'a self, group: &'a str, max_size: u32, desired_capacity: u32) -> ProviderFuture<'a, ()> {
        Box::pin(async move {
            self.cloud_call("resize_group", format!("resize_group:{group}:{max_size}:{desired_capacity}"))?;
            self.with_cloud(|s| {
                let cloud = group_mut(s, group)?;
                cloud.max_size = max_size;
                cloud.desired = desired_capacity;
                Ok(())
            })?;
            self.apply_capacity(group, desired_capacity)
        })
    }

    fn suspend_processes<'a>(&'a self, group: &'a str, processes: &'a [String]) -> ProviderFuture<'a, ()> {
        Box::pin(async move {
            self.cloud_call("suspend_processes", format!("suspend_processes:{group}"))?;
            self.with_cloud(|s| {
                group_mut(s, group)?.suspended.extend(processes.iter().cloned());
                Ok(())
            })
        })
    }

    fn resume_processes<'a>(&'a self, group: &'a str, processes: &'a [String]) -> ProviderFuture<'a, ()> {
        Box::pin(async move {
            self.cloud_call("resume_processes", format!("resume_processes:{group}"))?;
            self.with_cloud(|s| {
                let cloud = group_mut(s, group)?;
                for process in processes {
                    cloud.suspended.remove(process);
                }
                Ok(())
            })
        })
    }

    fn terminate_instance<'a>(
        &'a self,
        group: &'a str,
        instance_id: &'a str,
        decrement_desired: bool,
    ) -> ProviderFuture<'a, ()> {
        Box::pin(async move {
            self.cloud_call("terminate_instance", format!("terminate_instance:{group}:{instance_id}"))?;
            self.with_cloud(|s| {
                let cloud = group_mut(s, group)?;
                let before = cloud.members.len();
                cloud.members.retain(|m| m.instance_id != instance_id);
                if cloud.members.len() == before {
                    return Err(ProviderError::new(format!(
                        "instance {instance_id} is not a member of '{group}'"
                    )));
                }
                if decrement_desired {
                    cloud.desired = cloud.desired.saturating_sub(1);
                }
                cloud.status = GroupStatus::Updating;
                s.terminated.insert(instance_id.to_string());
                Ok(())
            })
        })
    }

    fn instance_states<'a>(&'a self, instance_ids: &'a [String]) -> ProviderFuture<'a, HashMap<String, InstanceState>> {
        Box::pin(async move {
            self.check("instance_states").map_err(ProviderError)?;
            self.with_cloud(|s| {
                let mut states = HashMap::new();
                for id in instance_ids {
                    if s.terminated.contains(id) {
                        states.insert(id.clone(), InstanceState::Terminated);
                        continue;
                    }
                    let member = s
                        .cloud
                        .values()
                        .flat_map(|g| g.members.iter())
                        .find(|m| &m.instance_id == id);
                    if let Some(member) = member {
                        let state = match member.lifecycle {
                            LifecycleState::Pending => InstanceState::Pending,
                            _ => InstanceState::Running,
                        };
                        states.insert(id.clone(), state);
                    }
                }
                Ok(states)
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulator::tests::seeded;

    #[tokio::test]
    async fn terminate_then_converge_in_two_polls() {
        let sim = seeded(3);
        let group = cloud_group_name("stack-7", "worker");
        sim.terminate_instance(&group, "i-000002", true).await.unwrap();

        let first = sim.describe_group(&group).await.unwrap();
        assert_eq!(first.status, GroupStatus::Updating);
        assert_eq!(first.desired_capacity, 2);
        let second = sim.describe_group(&group).await.unwrap();
        assert_eq!(second.status, GroupStatus::InService);
        assert_eq!(second.in_service(), vec!["i-000001", "i-000003"]);

        let states = sim
            .instance_states(&["i-000001".to_string(), "i-000002".to_string()])
            .await
            .unwrap();
        assert_eq!(states["i-000001"], InstanceState::Running);
        assert_eq!(states["i-000002"], InstanceState::Terminated);
    }

    #[tokio::test]
    async fn growing_registers_new_hosts() {
        let sim = seeded(2);
        let group = cloud_group_name("stack-7", "worker");
        sim.resize_group(&group, 4, 4).await.unwrap();

        let pending = sim.describe_group(&group).await.unwrap();
        assert_eq!(pending.members.len(), 4);
        assert_eq!(pending.in_service().len(), 2);
        assert_eq!(sim.describe_group(&group).await.unwrap().in_service().len(), 4);
        assert_eq!(sim.hosts("stack-7", "worker").len(), 4);
    }

    #[tokio::test]
    async fn failing_calls_surface_as_provider_errors() {
        let sim = seeded(1);
        sim.fail_calls("resize_group");
        let err = sim
            .resize_group(&cloud_group_name("stack-7", "worker"), 2, 2)
            .await
            .unwrap_err();
        assert_eq!(err.0, "simulated resize_group failure");
    }

    #[tokio::test]
    async fn unknown_group_is_an_error() {
        let sim = seeded(1);
        assert!(sim.group_name("stack-7", "master").await.is_err());
        assert_eq!(
            sim.group_name("stack-7", "worker").await.unwrap(),
            "stack-7-worker"
        );
    }
}
