use super::{Project, confirm, print_apply_result, print_plan};
use crate::apply::Executor;
use crate::provider;
use colored::Colorize;
use std::path::Path;

pub async fn handle(manifest_path: &Path, yes: bool) -> anyhow::Result<()> {
    let project = Project::load(manifest_path)?;
    let lock = project.state.acquire_lock().await?;
    let mut state = project.state.load().await?;

    let plan = crate::plan::plan(&project.manifest, &state)?;
    print_plan(&plan);
    if !plan.has_changes {
        lock.release().await?;
        return Ok(());
    }

    println!();
    if !yes && !confirm("Apply these changes?")? {
        println!("{}", "Apply cancelled.".yellow());
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
        let total = result.failed.len() + result.succeeded.len();
        anyhow::bail!("{} of {} actions failed", result.failed.len(), total);
    }
    Ok(())
}
