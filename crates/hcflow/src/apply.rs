//! Executing a plan against the cloud and recording the outcome

use crate::manifest::{Manifest, ResourceDecl, ResourceKind};
use crate::plan::ManagedResource;
use anyhow::{Context, bail};
use hcflow_cloud::{
    Action, ActionType, ApplyResult, GlobalState, Plan, ResourceState, StateManager, TAINTED,
    Timeouts,
};
use hcflow_cloud_huawei::{CceAddon, Client, NatDnatRule, RdsInstance};
use serde::Serialize;
use std::time::Instant;

/// What a single step did to the recorded state
enum Outcome {
    Applied(ResourceState),
    Removed,
    /// Created remotely but never became ready; recorded, then reported
    Tainted(ResourceState, anyhow::Error),
}

pub struct Executor {
    rds: RdsInstance,
    nat: NatDnatRule,
    cce: CceAddon,
}

impl Executor {
    pub fn new(client: Client) -> Self {
        Self {
            rds: RdsInstance::new(client.clone()),
            nat: NatDnatRule::new(client.clone()),
            cce: CceAddon::new(client),
        }
    }

    /// Run every action of the plan. The state file is saved after each
    /// successful step; a failed action is reported and the rest still run.
    pub async fn apply(
        &self,
        plan: &Plan,
        manifest: &Manifest,
        state: &mut GlobalState,
        manager: &StateManager,
    ) -> anyhow::Result<ApplyResult> {
        let started = Instant::now();
        let mut result = ApplyResult::new();

        for action in &plan.actions {
            // A replacement runs as a delete followed by a create, each recorded
            let steps: &[ActionType] = match action.action_type {
                ActionType::NoOp => continue,
                ActionType::Replace => &[ActionType::Delete, ActionType::Create],
                ActionType::Create => &[ActionType::Create],
                ActionType::Update => &[ActionType::Update],
                ActionType::Delete => &[ActionType::Delete],
            };

            tracing::info!(address = %action.address, action = %action.action_type, "Applying");
            let mut failure = None;
            for step in steps {
                let decl = manifest.get(&action.address);
                let applied = state.get_resource(&action.address);
                let error = match self.run_step(*step, action, decl, applied).await {
                    Ok(Outcome::Applied(record)) => {
                        state.set_resource(action.address.clone(), record);
                        None
                    }
                    Ok(Outcome::Removed) => {
                        state.remove_resource(&action.address);
                        None
                    }
                    Ok(Outcome::Tainted(record, e)) => {
                        state.set_resource(action.address.clone(), record);
                        Some(e)
                    }
                    Err(e) => {
                        failure = Some(e);
                        break;
                    }
                };
                manager
                    .save(state)
                    .await
                    .context("Failed to save the state file")?;
                if error.is_some() {
                    failure = error;
                    break;
                }
            }

            match failure {
                None => result.add_success(action.address.clone(), action.description()),
                Some(e) => {
                    tracing::warn!(address = %action.address, error = %e, "Action failed");
                    result.add_failure(action.address.clone(), format!("{e:#}"));
                }
            }
        }

        result.duration_ms = started.elapsed().as_millis() as u64;
        Ok(result)
    }

    async fn run_step(
        &self,
        step: ActionType,
        action: &Action,
        decl: Option<&ResourceDecl>,
        applied: Option<&ResourceState>,
    ) -> anyhow::Result<Outcome> {
        let kind = ResourceKind::from_resource_type(&action.resource_type)
            .with_context(|| format!("unknown resource type '{}'", action.resource_type))?;
        match kind {
            ResourceKind::RdsInstance => run(&self.rds, step, action, decl, applied).await,
            ResourceKind::DnatRule => run(&self.nat, step, action, decl, applied).await,
            ResourceKind::CceAddon => run(&self.cce, step, action, decl, applied).await,
        }
    }
}

async fn run<R: ManagedResource>(
    resource: &R,
    step: ActionType,
    action: &Action,
    decl: Option<&ResourceDecl>,
    applied: Option<&ResourceState>,
) -> anyhow::Result<Outcome> {
    let address = &action.address;
    let timeouts = match decl {
        Some(decl) => decl.timeouts.apply_to(resource.default_timeouts()),
        None => resource.default_timeouts(),
    };
    let desired = || {
        decl.and_then(|decl| R::desired(&decl.config))
            .with_context(|| format!("{address} is not declared as a {}", action.resource_type))
    };
    let recorded = || applied.with_context(|| format!("{address} has no recorded state"));

    match step {
        ActionType::Create => create(resource, desired()?, &timeouts).await,
        ActionType::Update => {
            let applied = recorded()?;
            let desired = desired()?;
            if resource.read(&applied.id).await?.is_none() {
                tracing::warn!(%address, id = %applied.id, "Resource is gone, creating it again");
                return create(resource, desired, &timeouts).await;
            }

            let old: R::Config = applied.typed_config()?;
            let observed = resource
                .update(&applied.id, &old, desired, &timeouts)
                .await?;
            let mut record = applied.clone();
            record.id = R::state_id(&observed);
            record.status = status_of(&observed);
            record.set_config(desired)?;
            Ok(Outcome::Applied(record))
        }
        ActionType::Delete => {
            let applied = recorded()?;
            let old: R::Config = applied.typed_config()?;
            resource.delete(&applied.id, &old, &timeouts).await?;
            Ok(Outcome::Removed)
        }
        ActionType::Replace | ActionType::NoOp => {
            bail!("{step} is not a single step")
        }
    }
}

async fn create<R: ManagedResource>(
    resource: &R,
    config: &R::Config,
    timeouts: &Timeouts,
) -> anyhow::Result<Outcome> {
    let observed = match resource.create(config, timeouts).await {
        Ok(observed) => observed,
        Err(e) => {
            let Some(id) = R::created_id(&e) else {
                return Err(e.into());
            };
            tracing::warn!(%id, error = %e, "Create did not finish, recording the resource as tainted");
            let record =
                ResourceState::new(id, resource.resource_type(), config)?.with_status(TAINTED);
            return Ok(Outcome::Tainted(record, e.into()));
        }
    };
    let mut record = ResourceState::new(R::state_id(&observed), resource.resource_type(), config)?;
    record.status = status_of(&observed);
    Ok(Outcome::Applied(record))
}

/// The `status` attribute of an observed resource, if it has one
fn status_of<S: Serialize>(observed: &S) -> Option<String> {
    serde_json::to_value(observed)
        .ok()?
        .get("status")?
        .as_str()
        .map(String::from)
}
