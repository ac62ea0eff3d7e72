//! Provider settings resolved from the manifest and the environment

use crate::manifest::ProviderSettings;
use anyhow::Context;
use hcflow_cloud_huawei::{Client, ProviderConfig};

/// Build the API client. Manifest settings win over `HW_REGION_NAME`,
/// `HW_PROJECT_ID` and `HW_CLOUD`; the token is read from `HW_AUTH_TOKEN` only.
pub fn client(settings: &ProviderSettings) -> anyhow::Result<Client> {
    let config = resolve(settings, |name| std::env::var(name).ok())?;
    tracing::debug!(?config, "Resolved provider configuration");
    Ok(Client::new(config)?)
}

fn resolve(
    settings: &ProviderSettings,
    env: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<ProviderConfig> {
    let region = settings
        .region
        .clone()
        .or_else(|| env("HW_REGION_NAME"))
        .context("region is not set: add it to the provider node or set HW_REGION_NAME")?;
    let project_id = settings
        .project_id
        .clone()
        .or_else(|| env("HW_PROJECT_ID"))
        .context("project-id is not set: add it to the provider node or set HW_PROJECT_ID")?;
    let token = env("HW_AUTH_TOKEN").context("HW_AUTH_TOKEN is not set")?;

    let mut config = ProviderConfig::new(region, project_id, token);
    if let Some(cloud) = settings.cloud.clone().or_else(|| env("HW_CLOUD")) {
        config = config.with_cloud(cloud);
    }
    for (service, url) in &settings.endpoints {
        config = config.with_endpoint(service, url);
    }
    if let Some(max_retries) = settings.max_retries {
        config = config.with_max_retries(max_retries);
    }
    Ok(config)
}
