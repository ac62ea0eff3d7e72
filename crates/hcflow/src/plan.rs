//! Planning: the manifest compared against the recorded state

use crate::manifest::{Manifest, ResourceConfig, ResourceDecl, ResourceKind};
use anyhow::Context;
use hcflow_cloud::{Action, ActionType, CloudResource, GlobalState, Plan, ResourceState};
use hcflow_cloud_huawei::{CceAddon, NatDnatRule, RdsInstance};
use serde_json::Value;

/// A resource type the manifest can declare
pub trait ManagedResource: CloudResource {
    /// Typed configuration of a declaration of this type
    fn desired(config: &ResourceConfig) -> Option<&Self::Config>;
}

impl ManagedResource for RdsInstance {
    fn desired(config: &ResourceConfig) -> Option<&Self::Config> {
        match config {
            ResourceConfig::RdsInstance(config) => Some(config),
            _ => None,
        }
    }
}

impl ManagedResource for NatDnatRule {
    fn desired(config: &ResourceConfig) -> Option<&Self::Config> {
        match config {
            ResourceConfig::DnatRule(config) => Some(config),
            _ => None,
        }
    }
}

impl ManagedResource for CceAddon {
    fn desired(config: &ResourceConfig) -> Option<&Self::Config> {
        match config {
            ResourceConfig::CceAddon(config) => Some(config),
            _ => None,
        }
    }
}

/// Actions that bring the recorded state in line with the manifest.
/// Declared resources come first in manifest order, then deletions.
pub fn plan(manifest: &Manifest, state: &GlobalState) -> anyhow::Result<Plan> {
    let mut actions = Vec::new();

    for decl in &manifest.resources {
        let address = decl.address();
        let action = match state.get_resource(&address) {
            None => Action::new(
                &address,
                ActionType::Create,
                decl.config.kind().resource_type(),
            ),
            Some(applied) => compare_decl(decl, applied)
                .with_context(|| format!("Failed to compare {address} with its state"))?,
        };
        actions.push(action);
    }

    for (address, applied) in state.resources.iter().rev() {
        if manifest.get(address).is_none() {
            actions.push(Action::new(
                address,
                ActionType::Delete,
                &applied.resource_type,
            ));
        }
    }

    Ok(Plan::new(actions))
}

/// Delete every recorded resource, in reverse address order
pub fn plan_destroy(state: &GlobalState) -> Plan {
    let actions = state
        .resources
        .iter()
        .rev()
        .map(|(address, applied)| {
            Action::new(address, ActionType::Delete, &applied.resource_type)
        })
        .collect();
    Plan::new(actions)
}

fn compare_decl(decl: &ResourceDecl, applied: &ResourceState) -> anyhow::Result<Action> {
    let address = decl.address();
    let kind = decl.config.kind();
    if ResourceKind::from_resource_type(&applied.resource_type) != Some(kind) {
        return Ok(
            Action::new(address, ActionType::Replace, kind.resource_type())
                .with_changed(vec!["resource_type".to_string()]),
        );
    }

    if applied.is_tainted() {
        return Ok(Action::new(address, ActionType::Replace, kind.resource_type())
            .with_changed(vec!["tainted".to_string()]));
    }

    match kind {
        ResourceKind::RdsInstance => compare::<RdsInstance>(address, decl, applied),
        ResourceKind::DnatRule => compare::<NatDnatRule>(address, decl, applied),
        ResourceKind::CceAddon => compare::<CceAddon>(address, decl, applied),
    }
}

fn compare<R: ManagedResource>(
    address: String,
    decl: &ResourceDecl,
    applied: &ResourceState,
) -> anyhow::Result<Action> {
    let resource_type = decl.config.kind().resource_type();
    let desired = R::desired(&decl.config)
        .with_context(|| format!("{address} is not a {resource_type}"))?;
    let old: R::Config = applied.typed_config()?;

    if old == *desired {
        return Ok(Action::new(address, ActionType::NoOp, resource_type));
    }

    let reasons = R::replacement_reasons(&old, desired);
    if !reasons.is_empty() {
        return Ok(Action::new(address, ActionType::Replace, resource_type)
            .with_changed(reasons.into_iter().map(String::from).collect()));
    }

    let changed = changed_keys(&applied.config, &serde_json::to_value(desired)?);
    Ok(Action::new(address, ActionType::Update, resource_type).with_changed(changed))
}

/// Dotted paths of the values that differ between two configurations
pub fn changed_keys(old: &Value, new: &Value) -> Vec<String> {
    let mut changed = Vec::new();
    collect_changes("", old, new, &mut changed);
    changed
}

fn collect_changes(prefix: &str, old: &Value, new: &Value, changed: &mut Vec<String>) {
    match (old, new) {
        (Value::Object(old), Value::Object(new)) => {
            let mut keys: Vec<&String> = old.keys().chain(new.keys()).collect();
            keys.sort();
            keys.dedup();
            for key in keys {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                let old = old.get(key).unwrap_or(&Value::Null);
                let new = new.get(key).unwrap_or(&Value::Null);
                collect_changes(&path, old, new, changed);
            }
        }
        (old, new) if old != new => changed.push(prefix.to_string()),
        _ => {}
    }
}
