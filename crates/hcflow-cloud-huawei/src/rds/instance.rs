//! `rds_instance` resource

use super::{AutoExpansion, BackupStrategy, CreateInstanceResponse, InstanceDetail, Node, Volume};
use crate::bss;
use crate::client::Client;
use crate::error::{HuaweiError, Result};
use async_trait::async_trait;
use hcflow_cloud::{
    CloudError, CloudResource, Observation, RetryError, StateChangeConf, Timeouts,
    retry_with_timeout,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

pub const RESOURCE_TYPE: &str = "rds_instance";

/// State reported by the refresh function once the instance is gone
const DELETED: &str = "DELETED";

/// Billing mode of a resource
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChargingMode {
    #[default]
    PostPaid,
    PrePaid,
}

impl std::fmt::Display for ChargingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChargingMode::PostPaid => write!(f, "postPaid"),
            ChargingMode::PrePaid => write!(f, "prePaid"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargingConfig {
    #[serde(default)]
    pub mode: ChargingMode,
    /// "month" or "year"
    #[serde(default)]
    pub period_unit: Option<String>,
    #[serde(default)]
    pub period: Option<u32>,
    #[serde(default)]
    pub auto_renew: bool,
    #[serde(default = "default_auto_pay")]
    pub auto_pay: bool,
}

fn default_auto_pay() -> bool {
    true
}

impl Default for ChargingConfig {
    fn default() -> Self {
        Self {
            mode: ChargingMode::PostPaid,
            period_unit: None,
            period: None,
            auto_renew: false,
            auto_pay: true,
        }
    }
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct DbConfig {
    #[serde(rename = "type")]
    pub db_type: String,
    pub version: String,
    pub password: String,
    #[serde(default)]
    pub port: Option<u16>,
}

impl std::fmt::Debug for DbConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbConfig")
            .field("db_type", &self.db_type)
            .field("version", &self.version)
            .field("password", &"<redacted>")
            .field("port", &self.port)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeConfig {
    #[serde(rename = "type")]
    pub volume_type: String,
    pub size: u32,
    #[serde(default)]
    pub disk_encryption_id: Option<String>,
    /// Upper limit of automatic storage expansion, in GB
    #[serde(default)]
    pub limit_size: Option<u32>,
    /// Free-space percentage that triggers automatic expansion
    #[serde(default)]
    pub trigger_threshold: Option<u32>,
}

/// Desired attributes of an RDS instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RdsInstanceConfig {
    pub name: String,
    pub flavor: String,
    pub availability_zones: Vec<String>,
    pub vpc_id: String,
    pub subnet_id: String,
    #[serde(default)]
    pub security_group_id: Option<String>,
    pub db: DbConfig,
    pub volume: VolumeConfig,
    #[serde(default)]
    pub backup_strategy: Option<BackupStrategy>,
    #[serde(default)]
    pub param_group_id: Option<String>,
    #[serde(default)]
    pub time_zone: Option<String>,
    #[serde(default)]
    pub fixed_ip: Option<String>,
    #[serde(default)]
    pub collation: Option<String>,
    #[serde(default)]
    pub ha_replication_mode: Option<String>,
    #[serde(default)]
    pub lower_case_table_names: Option<String>,
    #[serde(default)]
    pub ssl_enable: bool,
    /// Database parameters (name -> value)
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
    #[serde(default)]
    pub enterprise_project_id: Option<String>,
    #[serde(default)]
    pub charging: ChargingConfig,
}

impl RdsInstanceConfig {
    pub fn is_mysql(&self) -> bool {
        self.db.db_type.eq_ignore_ascii_case("mysql")
    }

    pub fn is_prepaid(&self) -> bool {
        self.charging.mode == ChargingMode::PrePaid
    }

    pub fn validate(&self) -> Result<()> {
        let required = [
            ("name", &self.name),
            ("flavor", &self.flavor),
            ("vpc_id", &self.vpc_id),
            ("subnet_id", &self.subnet_id),
            ("db.type", &self.db.db_type),
            ("db.version", &self.db.version),
            ("db.password", &self.db.password),
            ("volume.type", &self.volume.volume_type),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(HuaweiError::InvalidConfig(format!(
                    "{field} must not be empty"
                )));
            }
        }

        if self.availability_zones.is_empty() {
            return Err(HuaweiError::InvalidConfig(
                "at least one availability zone is required".into(),
            ));
        }
        if self.volume.size == 0 {
            return Err(HuaweiError::InvalidConfig(
                "volume.size must be greater than zero".into(),
            ));
        }

        if self.is_prepaid() {
            match self.charging.period_unit.as_deref() {
                Some("month") | Some("year") => {}
                Some(other) => {
                    return Err(HuaweiError::InvalidConfig(format!(
                        "period_unit must be \"month\" or \"year\", got \"{other}\""
                    )));
                }
                None => {
                    return Err(HuaweiError::InvalidConfig(
                        "period_unit is required in prePaid charging mode".into(),
                    ));
                }
            }
            if !matches!(self.charging.period, Some(p) if p > 0) {
                return Err(HuaweiError::InvalidConfig(
                    "period is required in prePaid charging mode".into(),
                ));
            }
        }

        if self.volume.limit_size.is_some() != self.volume.trigger_threshold.is_some() {
            return Err(HuaweiError::InvalidConfig(
                "volume.limit_size and volume.trigger_threshold must be set together".into(),
            ));
        }

        if self.ssl_enable && !self.is_mysql() {
            return Err(HuaweiError::InvalidConfig(
                "only MySQL databases support SSL".into(),
            ));
        }

        Ok(())
    }

    fn create_request(&self, region: &str) -> super::CreateInstanceRequest {
        super::CreateInstanceRequest {
            name: self.name.clone(),
            datastore: super::Datastore {
                db_type: self.db.db_type.clone(),
                version: self.db.version.clone(),
            },
            flavor_ref: self.flavor.clone(),
            volume: Volume {
                volume_type: self.volume.volume_type.clone(),
                size: self.volume.size,
            },
            region: region.to_string(),
            availability_zone: self.availability_zones.join(","),
            vpc_id: self.vpc_id.clone(),
            subnet_id: self.subnet_id.clone(),
            security_group_id: self.security_group_id.clone(),
            port: self.db.port.map(|p| p.to_string()),
            password: self.db.password.clone(),
            configuration_id: self.param_group_id.clone(),
            time_zone: self.time_zone.clone(),
            disk_encryption_id: self.volume.disk_encryption_id.clone(),
            fixed_ip: self.fixed_ip.clone(),
            collation: self.collation.clone(),
            backup_strategy: self.backup_strategy.clone(),
            ha: self.ha_replication_mode.as_ref().map(|mode| super::Ha {
                mode: "ha".to_string(),
                replication_mode: mode.clone(),
            }),
            unchangeable_param: self.lower_case_table_names.as_ref().map(|v| {
                super::UnchangeableParam {
                    lower_case_table_names: v.clone(),
                }
            }),
            charge_info: self.is_prepaid().then(|| super::ChargeInfo {
                charge_mode: self.charging.mode.to_string(),
                period_type: self.charging.period_unit.clone().unwrap_or_default(),
                period_num: self.charging.period.unwrap_or_default(),
                is_auto_renew: self.charging.auto_renew,
                is_auto_pay: self.charging.auto_pay,
            }),
            enterprise_project_id: self.enterprise_project_id.clone(),
        }
    }
}

/// Observed attributes of an RDS instance
#[derive(Debug, Clone, Serialize)]
pub struct RdsInstanceState {
    pub id: String,
    pub name: String,
    pub status: String,
    pub region: String,
    pub flavor: String,
    pub vpc_id: String,
    pub subnet_id: String,
    pub security_group_id: String,
    pub db_type: String,
    pub db_version: String,
    pub port: u16,
    pub db_user_name: String,
    pub private_ips: Vec<String>,
    pub public_ips: Vec<String>,
    /// First private IP, empty when the instance failed to build
    pub fixed_ip: Option<String>,
    pub volume: Volume,
    pub disk_encryption_id: String,
    pub auto_expansion: Option<AutoExpansion>,
    pub backup_strategy: BackupStrategy,
    pub nodes: Vec<Node>,
    pub time_zone: String,
    pub enterprise_project_id: String,
    pub charging_mode: String,
    pub ha_replication_mode: String,
    pub created: String,
    /// Current values of the configured parameters
    pub parameters: BTreeMap<String, String>,
    /// Changed parameters that only take effect after a reboot
    pub restart_required: Vec<String>,
}

impl RdsInstanceState {
    fn from_detail(
        detail: InstanceDetail,
        auto_expansion: Option<AutoExpansion>,
        parameters: BTreeMap<String, String>,
    ) -> Self {
        Self {
            fixed_ip: detail.private_ips.first().cloned(),
            id: detail.id,
            name: detail.name,
            status: detail.status,
            region: detail.region,
            flavor: detail.flavor_ref,
            vpc_id: detail.vpc_id,
            subnet_id: detail.subnet_id,
            security_group_id: detail.security_group_id,
            db_type: detail.datastore.db_type,
            db_version: detail.datastore.version,
            port: detail.port,
            db_user_name: detail.db_user_name,
            private_ips: detail.private_ips,
            public_ips: detail.public_ips,
            volume: detail.volume,
            disk_encryption_id: detail.disk_encryption_id,
            auto_expansion,
            backup_strategy: detail.backup_strategy,
            nodes: detail.nodes,
            time_zone: detail.time_zone,
            enterprise_project_id: detail.enterprise_project_id,
            charging_mode: detail.charge_info.charge_mode,
            ha_replication_mode: detail.ha.replication_mode,
            created: detail.created,
            parameters,
            restart_required: Vec::new(),
        }
    }
}

/// Current status of an instance, reporting `DELETED` once it is gone
async fn instance_status(client: &Client, instance_id: &str) -> Result<Observation<InstanceDetail>> {
    match super::get_instance(client, instance_id).await? {
        Some(instance) => {
            let status = instance.status.clone();
            Ok(Observation::new(instance, status))
        }
        None => Ok(Observation::empty(DELETED)),
    }
}

async fn job_status(client: &Client, job_id: &str) -> Result<Observation<super::Job>> {
    let job = super::get_job(client, job_id).await?;
    let status = job.status.clone();
    Ok(Observation::new(job, status))
}

/// Retry `op` while the instance reports that another operation is running
async fn retry_busy<T, F, Fut>(client: &Client, timeout: Duration, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    retry_with_timeout(client.retry_config(), timeout, || {
        let attempt = op();
        async move {
            attempt.await.map_err(|e| {
                if e.is_busy() {
                    RetryError::Retryable(e)
                } else {
                    RetryError::Fatal(e)
                }
            })
        }
    })
    .await
}

/// Managed database instance
pub struct RdsInstance {
    client: Client,
}

impl RdsInstance {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn wait_for_instance(&self, instance_id: &str, conf: StateChangeConf) -> Result<()> {
        let client = &self.client;
        client
            .state_change(conf)
            .wait_for_state(move || instance_status(client, instance_id))
            .await?;
        Ok(())
    }

    async fn wait_for_job(&self, job_id: &str, timeout: Duration) -> Result<()> {
        tracing::debug!(job_id, "Waiting for RDS job");
        let client = &self.client;
        let conf = StateChangeConf::new(["Completed"], timeout)
            .pending(["Running"])
            .delay(Duration::from_secs(20))
            .poll_interval(Duration::from_secs(10));
        client
            .state_change(conf)
            .wait_for_state(move || job_status(client, job_id))
            .await?;
        Ok(())
    }

    async fn read_with_parameters(
        &self,
        instance_id: &str,
        parameter_names: &[&String],
    ) -> Result<Option<RdsInstanceState>> {
        let Some(detail) = super::get_instance(&self.client, instance_id).await? else {
            return Ok(None);
        };

        // Only MySQL engines support automatic expansion
        let auto_expansion = match super::get_auto_expansion(&self.client, instance_id).await {
            Ok(expansion) if expansion.switch_option => Some(expansion),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(instance_id, error = %e, "Failed to query storage auto-expansion");
                None
            }
        };

        let mut parameters = BTreeMap::new();
        if !parameter_names.is_empty() {
            match super::get_configurations(&self.client, instance_id).await {
                Ok(configs) => {
                    for param in configs {
                        if parameter_names.contains(&&param.name) {
                            parameters.insert(param.name, param.value);
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(instance_id, error = %e, "Failed to fetch instance parameters");
                }
            }
        }

        Ok(Some(RdsInstanceState::from_detail(
            detail,
            auto_expansion,
            parameters,
        )))
    }

    async fn read_after_change(
        &self,
        instance_id: &str,
        config: &RdsInstanceConfig,
    ) -> Result<RdsInstanceState> {
        let names: Vec<&String> = config.parameters.keys().collect();
        self.read_with_parameters(instance_id, &names)
            .await?
            .ok_or_else(|| CloudError::ResourceNotFound(instance_id.to_string()).into())
    }

    /// Apply parameter values, retrying while the instance is busy.
    /// Returns the names of the applied parameters that require a reboot.
    async fn apply_parameters(
        &self,
        instance_id: &str,
        values: &BTreeMap<String, String>,
        timeout: Duration,
    ) -> Result<Vec<String>> {
        let client = &self.client;
        retry_busy(client, timeout, || {
            super::modify_configurations(client, instance_id, values)
        })
        .await?;

        let configs = super::get_configurations(client, instance_id).await?;
        Ok(configs
            .into_iter()
            .filter(|p| p.restart_required && values.contains_key(&p.name))
            .map(|p| p.name)
            .collect())
    }

    async fn configure_auto_expansion(
        &self,
        instance_id: &str,
        volume: &VolumeConfig,
    ) -> Result<()> {
        match (volume.limit_size, volume.trigger_threshold) {
            (Some(limit), Some(threshold)) if limit > 0 => {
                super::enable_auto_expansion(&self.client, instance_id, limit, threshold).await
            }
            _ => super::disable_auto_expansion(&self.client, instance_id).await,
        }
    }

    /// Everything after the create call: order, job and status waits, then
    /// the settings that can only be applied to a running instance.
    async fn finish_create(
        &self,
        id: &str,
        response: CreateInstanceResponse,
        config: &RdsInstanceConfig,
        timeouts: &Timeouts,
    ) -> Result<RdsInstanceState> {
        if let Some(order_id) = response.order_id.filter(|o| !o.is_empty()) {
            bss::wait_for_order_success(&self.client, &order_id, timeouts.create).await?;
        }
        if let Some(job_id) = response.job_id.filter(|j| !j.is_empty()) {
            self.wait_for_job(&job_id, timeouts.create).await?;
        }

        // Seeing ACTIVE twice rules out an instance about to enter BACKING UP
        self.wait_for_instance(
            id,
            StateChangeConf::new(["ACTIVE", "BACKING UP"], timeouts.create)
                .pending(["BUILD"])
                .delay(Duration::from_secs(20))
                .poll_interval(Duration::from_secs(10))
                .continuous_target_occurence(2),
        )
        .await?;

        if config.ssl_enable {
            super::update_ssl(&self.client, id, true).await?;
        }

        if !config.parameters.is_empty() {
            let restart = self
                .apply_parameters(id, &config.parameters, timeouts.create)
                .await?;

            if !restart.is_empty() {
                tracing::info!(instance_id = %id, parameters = ?restart, "Rebooting to apply parameters");
                let client = &self.client;
                retry_busy(client, timeouts.create, || super::restart(client, id)).await?;
                self.wait_for_instance(
                    id,
                    StateChangeConf::new(["ACTIVE"], timeouts.default)
                        .delay(Duration::from_secs(5))
                        .poll_interval(Duration::from_secs(5)),
                )
                .await?;
            }
        }

        if matches!(config.volume.limit_size, Some(limit) if limit > 0) {
            self.configure_auto_expansion(id, &config.volume).await?;
        }

        self.read_after_change(id, config).await
    }

    async fn update_name(
        &self,
        id: &str,
        new: &RdsInstanceConfig,
        timeouts: &Timeouts,
    ) -> Result<()> {
        super::rename(&self.client, id, &new.name).await?;
        self.wait_for_instance(
            id,
            StateChangeConf::new(["ACTIVE"], timeouts.update)
                .pending(["MODIFYING"])
                .delay(Duration::from_secs(5))
                .poll_interval(Duration::from_secs(3)),
        )
        .await
    }

    async fn update_flavor(
        &self,
        id: &str,
        new: &RdsInstanceConfig,
        timeouts: &Timeouts,
    ) -> Result<()> {
        let response =
            super::resize_flavor(&self.client, id, &new.flavor, new.charging.auto_pay).await?;
        if let Some(order_id) = response.order_id.filter(|o| !o.is_empty()) {
            bss::wait_for_order_success(&self.client, &order_id, timeouts.update).await?;
        }
        self.wait_for_instance(
            id,
            StateChangeConf::new(["ACTIVE"], timeouts.update)
                .pending(["MODIFYING"])
                .delay(Duration::from_secs(15))
                .poll_interval(Duration::from_secs(15)),
        )
        .await
    }

    async fn update_volume_size(
        &self,
        id: &str,
        new: &RdsInstanceConfig,
        timeouts: &Timeouts,
    ) -> Result<()> {
        let response = super::enlarge_volume(&self.client, id, new.volume.size).await?;
        if let Some(order_id) = response.order_id.filter(|o| !o.is_empty()) {
            bss::wait_for_order_success(&self.client, &order_id, timeouts.update).await?;
        }
        if let Some(job_id) = response.job_id.filter(|j| !j.is_empty()) {
            self.wait_for_job(&job_id, timeouts.update).await?;
        }
        Ok(())
    }

    async fn update_backup_strategy(
        &self,
        id: &str,
        strategy: &BackupStrategy,
        timeouts: &Timeouts,
    ) -> Result<()> {
        super::update_backup_policy(&self.client, id, strategy).await?;
        self.wait_for_instance(
            id,
            StateChangeConf::new(["ACTIVE"], timeouts.update)
                .pending(["BACKING UP"])
                .delay(Duration::from_secs(15))
                .poll_interval(Duration::from_secs(3)),
        )
        .await
    }

    async fn update_db_port(&self, id: &str, port: u16, timeouts: &Timeouts) -> Result<()> {
        super::update_port(&self.client, id, port).await?;
        self.wait_for_instance(
            id,
            StateChangeConf::new(["ACTIVE"], timeouts.update)
                .pending(["MODIFYING DATABASE PORT"])
                .delay(Duration::from_secs(5))
                .poll_interval(Duration::from_secs(3)),
        )
        .await
    }
}

#[async_trait]
impl CloudResource for RdsInstance {
    type Config = RdsInstanceConfig;
    type State = RdsInstanceState;
    type Error = HuaweiError;

    fn resource_type(&self) -> &'static str {
        RESOURCE_TYPE
    }

    fn state_id(state: &RdsInstanceState) -> String {
        state.id.clone()
    }

    fn created_id(error: &HuaweiError) -> Option<String> {
        error.created_id().map(String::from)
    }

    fn replacement_reasons(old: &RdsInstanceConfig, new: &RdsInstanceConfig) -> Vec<&'static str> {
        let mut reasons = Vec::new();
        if old.availability_zones != new.availability_zones {
            reasons.push("availability_zones");
        }
        if old.vpc_id != new.vpc_id {
            reasons.push("vpc_id");
        }
        if old.subnet_id != new.subnet_id {
            reasons.push("subnet_id");
        }
        if old.db.db_type != new.db.db_type {
            reasons.push("db.type");
        }
        if old.db.version != new.db.version {
            reasons.push("db.version");
        }
        if old.volume.volume_type != new.volume.volume_type {
            reasons.push("volume.type");
        }
        if old.volume.disk_encryption_id != new.volume.disk_encryption_id {
            reasons.push("volume.disk_encryption_id");
        }
        if old.param_group_id != new.param_group_id {
            reasons.push("param_group_id");
        }
        if old.time_zone != new.time_zone {
            reasons.push("time_zone");
        }
        if old.fixed_ip != new.fixed_ip {
            reasons.push("fixed_ip");
        }
        if old.collation != new.collation {
            reasons.push("collation");
        }
        if old.ha_replication_mode != new.ha_replication_mode {
            reasons.push("ha_replication_mode");
        }
        if old.lower_case_table_names != new.lower_case_table_names {
            reasons.push("lower_case_table_names");
        }
        if old.enterprise_project_id != new.enterprise_project_id {
            reasons.push("enterprise_project_id");
        }
        if old.charging.mode != new.charging.mode
            || old.charging.period_unit != new.charging.period_unit
            || old.charging.period != new.charging.period
        {
            reasons.push("charging");
        }
        reasons
    }

    fn default_timeouts(&self) -> Timeouts {
        Timeouts::uniform(Duration::from_secs(30 * 60)).with_default(Duration::from_secs(15 * 60))
    }

    async fn create(&self, config: &RdsInstanceConfig, timeouts: &Timeouts) -> Result<RdsInstanceState> {
        config.validate()?;

        let request = config.create_request(self.client.region());
        let response = super::create_instance(&self.client, &request).await?;
        let id = response.instance.id.clone();
        tracing::info!(instance_id = %id, name = %config.name, "RDS instance created");

        self.finish_create(&id, response, config, timeouts)
            .await
            .map_err(|e| e.after_create(&id))
    }

    async fn read(&self, id: &str) -> Result<Option<RdsInstanceState>> {
        self.read_with_parameters(id, &[]).await
    }

    async fn update(
        &self,
        id: &str,
        old: &RdsInstanceConfig,
        new: &RdsInstanceConfig,
        timeouts: &Timeouts,
    ) -> Result<RdsInstanceState> {
        new.validate()?;
        let reasons = Self::replacement_reasons(old, new);
        if !reasons.is_empty() {
            return Err(HuaweiError::RequiresReplacement(reasons.join(", ")));
        }
        if new.volume.size < old.volume.size {
            return Err(HuaweiError::InvalidConfig(format!(
                "volume.size can only be increased ({} -> {})",
                old.volume.size, new.volume.size
            )));
        }

        // The API rejects calls while the instance is BACKING UP
        self.wait_for_instance(
            id,
            StateChangeConf::new(["ACTIVE"], timeouts.default)
                .delay(Duration::from_secs(5))
                .poll_interval(Duration::from_secs(5))
                .continuous_target_occurence(3),
        )
        .await?;

        if old.name != new.name {
            self.update_name(id, new, timeouts).await?;
        }
        if old.flavor != new.flavor {
            self.update_flavor(id, new, timeouts).await?;
        }
        if old.volume.size != new.volume.size {
            self.update_volume_size(id, new, timeouts).await?;
        }
        if old.backup_strategy != new.backup_strategy
            && let Some(strategy) = &new.backup_strategy
        {
            self.update_backup_strategy(id, strategy, timeouts).await?;
        }
        if old.db.port != new.db.port
            && let Some(port) = new.db.port
        {
            self.update_db_port(id, port, timeouts).await?;
        }
        if old.security_group_id != new.security_group_id
            && let Some(group) = &new.security_group_id
        {
            super::update_security_group(&self.client, id, group).await?;
        }
        if old.ssl_enable != new.ssl_enable {
            super::update_ssl(&self.client, id, new.ssl_enable).await?;
        }
        if old.db.password != new.db.password {
            super::reset_root_password(&self.client, id, &new.db.password).await?;
        }
        if old.charging.auto_renew != new.charging.auto_renew && new.is_prepaid() {
            bss::update_auto_renew(&self.client, id, new.charging.auto_renew).await?;
        }

        let mut restart_required = Vec::new();
        let changed: BTreeMap<String, String> = new
            .parameters
            .iter()
            .filter(|(name, value)| old.parameters.get(*name) != Some(*value))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        if !changed.is_empty() {
            restart_required = self
                .apply_parameters(id, &changed, timeouts.update)
                .await?;
            if !restart_required.is_empty() {
                tracing::warn!(
                    instance_id = id,
                    parameters = ?restart_required,
                    "Changed parameters need a reboot to take effect"
                );
            }
        }

        if old.volume.limit_size != new.volume.limit_size
            || old.volume.trigger_threshold != new.volume.trigger_threshold
        {
            self.configure_auto_expansion(id, &new.volume).await?;
        }

        let mut state = self.read_after_change(id, new).await?;
        state.restart_required = restart_required;
        Ok(state)
    }

    async fn delete(&self, id: &str, config: &RdsInstanceConfig, timeouts: &Timeouts) -> Result<()> {
        tracing::debug!(instance_id = id, "Deleting RDS instance");
        if config.is_prepaid() {
            bss::unsubscribe(&self.client, &[id.to_string()]).await?;
        } else {
            super::delete_instance(&self.client, id).await?;
        }

        self.wait_for_instance(
            id,
            StateChangeConf::new([DELETED], timeouts.delete)
                .pending(["ACTIVE"])
                .delay(Duration::from_secs(15))
                .poll_interval(Duration::from_secs(5)),
        )
        .await?;

        tracing::info!(instance_id = id, "RDS instance deleted");
        Ok(())
    }
}
