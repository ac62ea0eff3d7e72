use crate::manifest;
use colored::Colorize;
use hcflow_cloud::StateManager;
use serde_json::Value;
use std::path::Path;

/// Shown in place of secrets kept in the state file
const REDACTED: &str = "(sensitive)";

pub async fn handle(manifest_path: &Path, address: Option<&str>) -> anyhow::Result<()> {
    let manager = StateManager::new(manifest::project_root(manifest_path));
    let state = manager.load().await?;

    if let Some(address) = address {
        let Some(record) = state.get_resource(address) else {
            anyhow::bail!("{address} is not in the state");
        };
        let mut value = serde_json::to_value(record)?;
        redact(&mut value);
        println!("{}", address.cyan().bold());
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    if state.resources.is_empty() {
        println!("{}", "No resources in state.".yellow());
        return Ok(());
    }

    for (address, record) in &state.resources {
        println!(
            "{}  {}  {}",
            address.cyan(),
            record.id,
            record.status.as_deref().unwrap_or("-").dimmed()
        );
    }
    Ok(())
}

fn redact(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, value) in map.iter_mut() {
                if key.contains("password") && value.is_string() {
                    *value = Value::String(REDACTED.to_string());
                } else {
                    redact(value);
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(redact),
        _ => {}
    }
}
