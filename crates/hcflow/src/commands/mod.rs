pub mod apply;
pub mod destroy;
pub mod plan;
pub mod show;

use crate::manifest::{self, Manifest};
use colored::Colorize;
use hcflow_cloud::{ActionType, ApplyResult, Plan, StateManager};
use std::io::Write;
use std::path::Path;

/// Manifest and state of the project a command works on
pub struct Project {
    pub manifest: Manifest,
    pub state: StateManager,
}

impl Project {
    pub fn load(manifest_path: &Path) -> anyhow::Result<Self> {
        let manifest = Manifest::load(manifest_path)?;
        let state = StateManager::new(manifest::project_root(manifest_path));
        Ok(Self { manifest, state })
    }
}

pub fn print_plan(plan: &Plan) {
    if !plan.has_changes {
        println!("{}", "No changes. Resources match the manifest.".green());
        return;
    }

    println!("{}", "Planned changes:".bold());
    for action in &plan.actions {
        let line = action.description();
        match action.action_type {
            ActionType::Create => println!("  {} {}", "+".green(), line.green()),
            ActionType::Update => println!("  {} {}", "~".yellow(), line.yellow()),
            ActionType::Replace => println!("  {} {}", "-/+".magenta(), line.magenta()),
            ActionType::Delete => println!("  {} {}", "-".red(), line.red()),
            ActionType::NoOp => {}
        }
    }
    println!();
    println!("Plan: {}", plan.summary());
}

/// Ask for an explicit "yes" on stdin
pub fn confirm(prompt: &str) -> anyhow::Result<bool> {
    print!("{prompt} Only 'yes' will be accepted: ");
    std::io::stdout().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(input.trim() == "yes")
}

pub fn print_apply_result(result: &ApplyResult) {
    println!();
    for done in &result.succeeded {
        println!("  {} {}", "✓".green(), done.message);
    }
    for failed in &result.failed {
        println!(
            "  {} {}: {}",
            "✗".red(),
            failed.address,
            failed.error.as_deref().unwrap_or("unknown error")
        );
    }
    println!();

    let summary = format!(
        "{} succeeded, {} failed ({:.1}s)",
        result.succeeded.len(),
        result.failed.len(),
        result.duration_ms as f64 / 1000.0
    );
    if result.is_success() {
        println!("{}", summary.green().bold());
    } else {
        println!("{}", summary.red().bold());
    }
}
