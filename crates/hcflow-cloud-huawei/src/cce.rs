//! Cloud Container Engine (CCE) cluster add-ons (`cce_addon` resource)

use crate::client::Client;
use crate::error::{HuaweiError, Result};
use async_trait::async_trait;
use hcflow_cloud::{CloudResource, Observation, StateChangeConf, Timeouts};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::time::Duration;

pub const RESOURCE_TYPE: &str = "cce_addon";

const DELETED: &str = "deleted";

/// Add-on values passed to the template
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AddonValues {
    #[serde(default)]
    pub basic: Map<String, Value>,
    #[serde(default)]
    pub custom: Map<String, Value>,
    #[serde(default)]
    pub flavor: Map<String, Value>,
}

impl AddonValues {
    fn to_body(&self) -> Value {
        let mut values = Map::new();
        values.insert("basic".into(), Value::Object(self.basic.clone()));
        if !self.custom.is_empty() {
            values.insert("custom".into(), Value::Object(self.custom.clone()));
        }
        if !self.flavor.is_empty() {
            values.insert("flavor".into(), Value::Object(self.flavor.clone()));
        }
        Value::Object(values)
    }
}

/// Desired attributes of a cluster add-on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CceAddonConfig {
    pub cluster_id: String,
    pub template_name: String,
    /// Latest stable template version when unset
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub values: AddonValues,
}

impl CceAddonConfig {
    pub fn validate(&self) -> Result<()> {
        if self.cluster_id.trim().is_empty() {
            return Err(HuaweiError::InvalidConfig("cluster_id is required".into()));
        }
        if self.template_name.trim().is_empty() {
            return Err(HuaweiError::InvalidConfig(
                "template_name is required".into(),
            ));
        }
        if let Some(version) = &self.version
            && version.trim().is_empty()
        {
            return Err(HuaweiError::InvalidConfig(
                "version must not be empty when set".into(),
            ));
        }
        Ok(())
    }
}

/// Observed attributes of a cluster add-on
#[derive(Debug, Clone, Serialize)]
pub struct CceAddonState {
    /// `{cluster_id}/{addon_id}`
    pub id: String,
    pub addon_id: String,
    pub cluster_id: String,
    pub template_name: String,
    pub version: String,
    pub status: String,
    pub description: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct AddonMetadata {
    #[serde(default)]
    uid: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddonSpec {
    #[serde(default, rename = "clusterID")]
    cluster_id: String,
    #[serde(default)]
    version: String,
    #[serde(default)]
    addon_template_name: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct AddonStatus {
    #[serde(default)]
    status: String,
}

#[derive(Debug, Clone, Deserialize)]
struct Addon {
    #[serde(default)]
    metadata: AddonMetadata,
    #[serde(default)]
    spec: AddonSpec,
    #[serde(default)]
    status: AddonStatus,
}

impl Addon {
    fn into_state(self, cluster_id: &str) -> CceAddonState {
        let cluster_id = if self.spec.cluster_id.is_empty() {
            cluster_id.to_string()
        } else {
            self.spec.cluster_id
        };
        CceAddonState {
            id: format!("{}/{}", cluster_id, self.metadata.uid),
            addon_id: self.metadata.uid,
            cluster_id,
            template_name: self.spec.addon_template_name,
            version: self.spec.version,
            status: self.status.status,
            description: self.spec.description,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct TemplateVersion {
    version: String,
    #[serde(default)]
    stable: bool,
    #[serde(default)]
    input: TemplateInput,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct TemplateInput {
    #[serde(default)]
    basic: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct TemplateSpec {
    #[serde(default)]
    versions: Vec<TemplateVersion>,
}

#[derive(Debug, Clone, Deserialize)]
struct Template {
    #[serde(default)]
    spec: TemplateSpec,
}

#[derive(Debug, Deserialize)]
struct TemplateList {
    #[serde(default)]
    items: Vec<Template>,
}

/// Numeric ordering of dotted versions ("1.25.21" > "1.9.3")
fn version_key(version: &str) -> Vec<u64> {
    version
        .split(|c: char| !c.is_ascii_digit())
        .filter(|part| !part.is_empty())
        .filter_map(|part| part.parse().ok())
        .collect()
}

/// Split a state id into cluster id and add-on id
pub fn parse_addon_id(id: &str) -> Result<(&str, &str)> {
    match id.split_once('/') {
        Some((cluster, addon)) if !cluster.is_empty() && !addon.is_empty() => Ok((cluster, addon)),
        _ => Err(HuaweiError::InvalidConfig(format!(
            "invalid add-on id \"{id}\", expected <cluster_id>/<addon_id>"
        ))),
    }
}

async fn get_addon(client: &Client, cluster_id: &str, addon_id: &str) -> Result<Addon> {
    client
        .service("cce")
        .get(&format!("/api/v3/addons/{addon_id}?cluster_id={cluster_id}"))
        .await
}

async fn addon_status(
    client: &Client,
    cluster_id: &str,
    addon_id: &str,
) -> Result<Observation<Addon>> {
    match get_addon(client, cluster_id, addon_id).await {
        Ok(addon) => {
            let status = addon.status.status.clone();
            Ok(Observation::new(addon, status))
        }
        Err(e) if e.is_not_found() => Ok(Observation::empty(DELETED)),
        Err(e) => Err(e),
    }
}

/// Cluster add-on installed from an add-on template
pub struct CceAddon {
    client: Client,
}

impl CceAddon {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Resolve the version to install and default basic values from the template
    async fn resolve_template(&self, config: &CceAddonConfig) -> Result<(String, AddonValues)> {
        if let Some(version) = &config.version
            && !config.values.basic.is_empty()
        {
            return Ok((version.clone(), config.values.clone()));
        }

        let list: TemplateList = self
            .client
            .service("cce")
            .get(&format!(
                "/api/v3/addontemplates?addon_template_name={}",
                config.template_name
            ))
            .await?;
        let versions: Vec<TemplateVersion> = list
            .items
            .into_iter()
            .flat_map(|t| t.spec.versions)
            .collect();

        let selected = match &config.version {
            Some(version) => versions.into_iter().find(|v| &v.version == version),
            None => versions
                .into_iter()
                .filter(|v| v.stable)
                .max_by_key(|v| version_key(&v.version)),
        }
        .ok_or_else(|| {
            HuaweiError::InvalidConfig(format!(
                "no matching version of add-on template \"{}\"",
                config.template_name
            ))
        })?;

        let mut values = config.values.clone();
        if values.basic.is_empty() {
            values.basic = selected.input.basic;
        }
        tracing::debug!(template = %config.template_name, version = %selected.version, "Resolved add-on template");
        Ok((selected.version, values))
    }

    fn request_body(config: &CceAddonConfig, version: &str, values: &AddonValues, anno: Value) -> Value {
        json!({
            "kind": "Addon",
            "apiVersion": "v3",
            "metadata": { "annotations": anno },
            "spec": {
                "clusterID": config.cluster_id,
                "version": version,
                "addonTemplateName": config.template_name,
                "values": values.to_body(),
            }
        })
    }

    async fn wait_for_addon(
        &self,
        cluster_id: &str,
        addon_id: &str,
        conf: StateChangeConf,
    ) -> Result<Observation<Addon>> {
        let client = &self.client;
        let observation = client
            .state_change(conf)
            .wait_for_state(move || addon_status(client, cluster_id, addon_id))
            .await?;
        Ok(observation)
    }

    async fn wait_until_running(
        &self,
        cluster_id: &str,
        addon_id: &str,
        pending: [&str; 2],
        timeout: Duration,
    ) -> Result<CceAddonState> {
        let observation = self
            .wait_for_addon(
                cluster_id,
                addon_id,
                StateChangeConf::new(["running", "available"], timeout)
                    .pending(pending)
                    .delay(Duration::from_secs(10))
                    .poll_interval(Duration::from_secs(5)),
            )
            .await?;
        observation
            .into_value()
            .map(|addon| addon.into_state(cluster_id))
            .ok_or_else(|| HuaweiError::UnexpectedResponse(format!("add-on {addon_id} disappeared")))
    }
}

#[async_trait]
impl CloudResource for CceAddon {
    type Config = CceAddonConfig;
    type State = CceAddonState;
    type Error = HuaweiError;

    fn resource_type(&self) -> &'static str {
        RESOURCE_TYPE
    }

    fn state_id(state: &CceAddonState) -> String {
        state.id.clone()
    }

    fn created_id(error: &HuaweiError) -> Option<String> {
        error.created_id().map(String::from)
    }

    fn replacement_reasons(old: &CceAddonConfig, new: &CceAddonConfig) -> Vec<&'static str> {
        let mut reasons = Vec::new();
        if old.cluster_id != new.cluster_id {
            reasons.push("cluster_id");
        }
        if old.template_name != new.template_name {
            reasons.push("template_name");
        }
        reasons
    }

    async fn create(&self, config: &CceAddonConfig, timeouts: &Timeouts) -> Result<CceAddonState> {
        config.validate()?;
        let (version, values) = self.resolve_template(config).await?;
        let body = Self::request_body(
            config,
            &version,
            &values,
            json!({ "addon.install/type": "install" }),
        );

        let created: Addon = self
            .client
            .service("cce")
            .post("/api/v3/addons", &body)
            .await?;
        let addon_id = created.metadata.uid;
        if addon_id.is_empty() {
            return Err(HuaweiError::UnexpectedResponse(
                "add-on created without an id".into(),
            ));
        }
        tracing::info!(cluster_id = %config.cluster_id, addon_id = %addon_id, version = %version, "Add-on install started");

        self.wait_until_running(
            &config.cluster_id,
            &addon_id,
            ["installing", "abnormal"],
            timeouts.create,
        )
        .await
        .map_err(|e| e.after_create(&format!("{}/{}", config.cluster_id, addon_id)))
    }

    async fn read(&self, id: &str) -> Result<Option<CceAddonState>> {
        let (cluster_id, addon_id) = parse_addon_id(id)?;
        match get_addon(&self.client, cluster_id, addon_id).await {
            Ok(addon) => Ok(Some(addon.into_state(cluster_id))),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn update(
        &self,
        id: &str,
        old: &CceAddonConfig,
        new: &CceAddonConfig,
        timeouts: &Timeouts,
    ) -> Result<CceAddonState> {
        new.validate()?;
        let reasons = Self::replacement_reasons(old, new);
        if !reasons.is_empty() {
            return Err(HuaweiError::RequiresReplacement(reasons.join(", ")));
        }
        let (cluster_id, addon_id) = parse_addon_id(id)?;

        let (version, values) = self.resolve_template(new).await?;
        let body = Self::request_body(
            new,
            &version,
            &values,
            json!({ "addon.upgrade/type": "upgrade" }),
        );
        let _: Option<Value> = self
            .client
            .service("cce")
            .put(&format!("/api/v3/addons/{addon_id}"), &body)
            .await?;
        tracing::info!(cluster_id, addon_id, version = %version, "Add-on upgrade started");

        self.wait_until_running(
            cluster_id,
            addon_id,
            ["upgrading", "abnormal"],
            timeouts.update,
        )
        .await
    }

    async fn delete(&self, id: &str, _config: &CceAddonConfig, timeouts: &Timeouts) -> Result<()> {
        let (cluster_id, addon_id) = parse_addon_id(id)?;
        let result: Result<Option<Value>> = self
            .client
            .service("cce")
            .delete(&format!("/api/v3/addons/{addon_id}?cluster_id={cluster_id}"))
            .await;
        match result {
            Ok(_) => {}
            Err(e) if e.is_not_found() => {
                tracing::info!(cluster_id, addon_id, "Add-on already deleted");
                return Ok(());
            }
            Err(e) => return Err(e),
        }

        self.wait_for_addon(
            cluster_id,
            addon_id,
            StateChangeConf::new([DELETED], timeouts.delete)
                .pending(["deleting", "available", "running"])
                .delay(Duration::from_secs(10))
                .poll_interval(Duration::from_secs(5)),
        )
        .await?;

        tracing::info!(cluster_id, addon_id, "Add-on deleted");
        Ok(())
    }
}
