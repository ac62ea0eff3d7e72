//! Provider configuration

use crate::error::{HuaweiError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Default cloud domain for the international site
pub const DEFAULT_CLOUD: &str = "myhuaweicloud.com";

/// Default number of retries for idempotent requests
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Services that are served from a single global endpoint
const GLOBAL_SERVICES: &[&str] = &["bss"];

/// Credentials and endpoint settings shared by every resource
#[derive(Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderConfig {
    pub region: String,
    pub project_id: String,
    #[serde(skip_serializing)]
    pub auth_token: String,
    #[serde(default = "default_cloud")]
    pub cloud: String,
    /// Per-service endpoint overrides (service name -> base URL)
    #[serde(default)]
    pub endpoints: BTreeMap<String, String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_cloud() -> String {
    DEFAULT_CLOUD.to_string()
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("region", &self.region)
            .field("project_id", &self.project_id)
            .field("auth_token", &"<redacted>")
            .field("cloud", &self.cloud)
            .field("endpoints", &self.endpoints)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

impl ProviderConfig {
    pub fn new(
        region: impl Into<String>,
        project_id: impl Into<String>,
        auth_token: impl Into<String>,
    ) -> Self {
        Self {
            region: region.into(),
            project_id: project_id.into(),
            auth_token: auth_token.into(),
            cloud: default_cloud(),
            endpoints: BTreeMap::new(),
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// Create ProviderConfig from environment variables
    pub fn from_env() -> Result<Self> {
        let region = std::env::var("HW_REGION_NAME")
            .map_err(|_| HuaweiError::MissingEnvVar("HW_REGION_NAME".to_string()))?;
        let project_id = std::env::var("HW_PROJECT_ID")
            .map_err(|_| HuaweiError::MissingEnvVar("HW_PROJECT_ID".to_string()))?;
        let auth_token = std::env::var("HW_AUTH_TOKEN")
            .map_err(|_| HuaweiError::MissingEnvVar("HW_AUTH_TOKEN".to_string()))?;

        let mut config = Self::new(region, project_id, auth_token);
        if let Ok(cloud) = std::env::var("HW_CLOUD") {
            config.cloud = cloud;
        }
        Ok(config)
    }

    pub fn with_cloud(mut self, cloud: impl Into<String>) -> Self {
        self.cloud = cloud.into();
        self
    }

    pub fn with_endpoint(mut self, service: impl Into<String>, url: impl Into<String>) -> Self {
        self.endpoints.insert(service.into(), url.into());
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.region.trim().is_empty() {
            return Err(HuaweiError::InvalidConfig("region must not be empty".into()));
        }
        if self.project_id.trim().is_empty() {
            return Err(HuaweiError::InvalidConfig(
                "project_id must not be empty".into(),
            ));
        }
        if self.auth_token.trim().is_empty() {
            return Err(HuaweiError::InvalidConfig(
                "auth_token must not be empty".into(),
            ));
        }
        if self.cloud.trim().is_empty() {
            return Err(HuaweiError::InvalidConfig("cloud must not be empty".into()));
        }
        Ok(())
    }

    /// Base URL of a service, without a trailing slash
    pub fn endpoint(&self, service: &str) -> String {
        if let Some(url) = self.endpoints.get(service) {
            return url.trim_end_matches('/').to_string();
        }
        if GLOBAL_SERVICES.contains(&service) {
            format!("https://{}.{}", service, self.cloud)
        } else {
            format!("https://{}.{}.{}", service, self.region, self.cloud)
        }
    }
}
