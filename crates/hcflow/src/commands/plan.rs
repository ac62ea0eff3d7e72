use super::{Project, print_plan};
use std::path::Path;

pub async fn handle(manifest_path: &Path) -> anyhow::Result<()> {
    let project = Project::load(manifest_path)?;
    let state = project.state.load().await?;

    let plan = crate::plan::plan(&project.manifest, &state)?;
    print_plan(&plan);
    Ok(())
}
