use super::{Project, confirm, print_apply_result, print_plan};
use crate::apply::Executor;
use crate::plan::plan_destroy;
use crate::provider;
use colored::Colorize;
use std::path::Path;

pub async fn handle(manifest_path: &Path, yes: bool) -> anyhow::Result<()> {
    let project = Project::load(manifest_path)?;
    let lock = project.state.acquire_lock().await?;
    let mut state = project.state.load().await?;

    let plan = plan_destroy(&state);
    if !plan.has_changes {
        println!("{}", "Nothing to destroy.".green());
        lock.release().await?;
        return Ok(());
    }
    print_plan(&plan);

    println!();
    let prompt = format!("Destroy all {} resources?", plan.actions.len());
    if !yes && !confirm(&prompt)? {
        println!("{}", "Destroy cancelled.".yellow());
        lock.release().await?;
        return Ok(());
    }

    let executor = Executor::new(provider::client(&project.manifest.provider)?);
    let result = executor
        .apply(&plan, &project.manifest, &mut state, &project.state)
        .await?;
    lock.release().await?;

    print_apply_result(&result);
    if !result.is_success() {
        anyhow::bail!("{} resources could not be destroyed", result.failed.len());
    }
    Ok(())
}
