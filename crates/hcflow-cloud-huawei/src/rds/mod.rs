//! Relational Database Service (RDS) v3 API
//!
//! Thin typed wrappers around the REST endpoints used by the
//! [`RdsInstance`](instance::RdsInstance) resource.

pub mod instance;

pub use instance::{RdsInstance, RdsInstanceConfig, RdsInstanceState};

use crate::client::{Client, ServiceClient};
use crate::error::{HuaweiError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;

const SERVICE: &str = "rds";

fn rds(client: &Client) -> ServiceClient<'_> {
    client.service(SERVICE)
}

fn instance_path(client: &Client, instance_id: &str) -> String {
    format!("/v3/{}/instances/{}", client.project_id(), instance_id)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Datastore {
    #[serde(rename = "type")]
    pub db_type: String,
    pub version: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Volume {
    #[serde(rename = "type")]
    pub volume_type: String,
    pub size: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackupStrategy {
    pub start_time: String,
    #[serde(default)]
    pub keep_days: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct Ha {
    pub mode: String,
    pub replication_mode: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnchangeableParam {
    pub lower_case_table_names: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChargeInfo {
    pub charge_mode: String,
    pub period_type: String,
    pub period_num: u32,
    pub is_auto_renew: bool,
    pub is_auto_pay: bool,
}

/// Body of the create-instance request
#[derive(Clone, Serialize)]
pub struct CreateInstanceRequest {
    pub name: String,
    pub datastore: Datastore,
    pub flavor_ref: String,
    pub volume: Volume,
    pub region: String,
    pub availability_zone: String,
    pub vpc_id: String,
    pub subnet_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub security_group_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub configuration_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disk_encryption_id: Option<String>,
    #[serde(rename = "data_vip", skip_serializing_if = "Option::is_none")]
    pub fixed_ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_strategy: Option<BackupStrategy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ha: Option<Ha>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unchangeable_param: Option<UnchangeableParam>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub charge_info: Option<ChargeInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enterprise_project_id: Option<String>,
}

impl std::fmt::Debug for CreateInstanceRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CreateInstanceRequest")
            .field("name", &self.name)
            .field("datastore", &self.datastore)
            .field("flavor_ref", &self.flavor_ref)
            .field("volume", &self.volume)
            .field("availability_zone", &self.availability_zone)
            .field("vpc_id", &self.vpc_id)
            .field("subnet_id", &self.subnet_id)
            .field("port", &self.port)
            .field("charge_info", &self.charge_info)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreatedInstance {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateInstanceResponse {
    pub instance: CreatedInstance,
    #[serde(default)]
    pub job_id: Option<String>,
    #[serde(default)]
    pub order_id: Option<String>,
}

/// Response of asynchronous actions (resize, enlarge, restart, ...)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobResponse {
    #[serde(default, alias = "jobId")]
    pub job_id: Option<String>,
    #[serde(default)]
    pub order_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChargeInfoResponse {
    #[serde(default)]
    pub charge_mode: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HaResponse {
    #[serde(default)]
    pub replication_mode: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub name: String,
    pub role: String,
    pub status: String,
    pub availability_zone: String,
}

/// One instance as returned by the list endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct InstanceDetail {
    pub id: String,
    pub name: String,
    pub status: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub datastore: Datastore,
    #[serde(default)]
    pub created: String,
    #[serde(default)]
    pub private_ips: Vec<String>,
    #[serde(default)]
    pub public_ips: Vec<String>,
    #[serde(default)]
    pub db_user_name: String,
    #[serde(default)]
    pub vpc_id: String,
    #[serde(default)]
    pub subnet_id: String,
    #[serde(default)]
    pub security_group_id: String,
    #[serde(default)]
    pub flavor_ref: String,
    #[serde(default)]
    pub volume: Volume,
    #[serde(default)]
    pub backup_strategy: BackupStrategy,
    #[serde(default)]
    pub charge_info: ChargeInfoResponse,
    #[serde(default)]
    pub ha: HaResponse,
    #[serde(default)]
    pub time_zone: String,
    #[serde(default)]
    pub enterprise_project_id: String,
    #[serde(default)]
    pub disk_encryption_id: String,
    #[serde(default)]
    pub nodes: Vec<Node>,
}

#[derive(Debug, Deserialize)]
struct ListInstancesResponse {
    #[serde(default)]
    instances: Vec<InstanceDetail>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Job {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub status: String,
}

#[derive(Debug, Deserialize)]
struct JobDetail {
    job: Job,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConfigurationParameter {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub restart_required: bool,
}

#[derive(Debug, Deserialize)]
struct ConfigurationsResponse {
    #[serde(default)]
    configuration_parameters: Vec<ConfigurationParameter>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModifyConfigurationResponse {
    #[serde(default)]
    pub job_id: Option<String>,
    #[serde(default)]
    pub restart_required: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AutoExpansion {
    #[serde(default)]
    pub switch_option: bool,
    #[serde(default)]
    pub limit_size: u32,
    #[serde(default)]
    pub trigger_threshold: u32,
}

pub async fn create_instance(
    client: &Client,
    request: &CreateInstanceRequest,
) -> Result<CreateInstanceResponse> {
    tracing::debug!(?request, "Creating RDS instance");
    rds(client)
        .post(&format!("/v3/{}/instances", client.project_id()), request)
        .await
}

/// Look up an instance by id. `None` when no instance matches.
pub async fn get_instance(client: &Client, instance_id: &str) -> Result<Option<InstanceDetail>> {
    let response: ListInstancesResponse = rds(client)
        .get(&format!(
            "/v3/{}/instances?id={}",
            client.project_id(),
            instance_id
        ))
        .await?;

    let mut instances = response.instances;
    match instances.len() {
        0 => {
            tracing::warn!(instance_id, "RDS instance not found");
            Ok(None)
        }
        1 => {
            let instance = instances.remove(0);
            if instance.id != instance_id {
                return Err(HuaweiError::UnexpectedResponse(format!(
                    "expected RDS instance {}, got {}",
                    instance_id, instance.id
                )));
            }
            Ok(Some(instance))
        }
        n => Err(HuaweiError::UnexpectedResponse(format!(
            "{n} RDS instances match id {instance_id}"
        ))),
    }
}

pub async fn get_job(client: &Client, job_id: &str) -> Result<Job> {
    let detail: JobDetail = rds(client)
        .get(&format!("/v3/{}/jobs?id={}", client.project_id(), job_id))
        .await?;
    Ok(detail.job)
}

pub async fn rename(client: &Client, instance_id: &str, name: &str) -> Result<()> {
    let _: Option<Value> = rds(client)
        .put(
            &format!("{}/name", instance_path(client, instance_id)),
            &json!({ "name": name }),
        )
        .await?;
    Ok(())
}

pub async fn resize_flavor(
    client: &Client,
    instance_id: &str,
    spec_code: &str,
    auto_pay: bool,
) -> Result<JobResponse> {
    let body = json!({
        "resize_flavor": { "spec_code": spec_code, "is_auto_pay": auto_pay }
    });
    action(client, instance_id, &body).await
}

pub async fn enlarge_volume(client: &Client, instance_id: &str, size: u32) -> Result<JobResponse> {
    let body = json!({ "enlarge_volume": { "size": size } });
    action(client, instance_id, &body).await
}

pub async fn restart(client: &Client, instance_id: &str) -> Result<JobResponse> {
    action(client, instance_id, &json!({ "restart": {} })).await
}

async fn action(client: &Client, instance_id: &str, body: &Value) -> Result<JobResponse> {
    let response: Option<JobResponse> = rds(client)
        .post(&format!("{}/action", instance_path(client, instance_id)), body)
        .await?;
    Ok(response.unwrap_or_default())
}

pub async fn update_backup_policy(
    client: &Client,
    instance_id: &str,
    strategy: &BackupStrategy,
) -> Result<()> {
    let body = json!({
        "backup_policy": {
            "keep_days": strategy.keep_days,
            "start_time": strategy.start_time,
            "period": "1,2,3,4,5,6,7",
        }
    });
    let _: Option<Value> = rds(client)
        .put(
            &format!("{}/backups/policy", instance_path(client, instance_id)),
            &body,
        )
        .await?;
    Ok(())
}

pub async fn update_port(client: &Client, instance_id: &str, port: u16) -> Result<()> {
    let _: Option<Value> = rds(client)
        .put(
            &format!("{}/port", instance_path(client, instance_id)),
            &json!({ "port": port }),
        )
        .await?;
    Ok(())
}

pub async fn update_security_group(
    client: &Client,
    instance_id: &str,
    security_group_id: &str,
) -> Result<()> {
    let _: Option<Value> = rds(client)
        .put(
            &format!("{}/security-group", instance_path(client, instance_id)),
            &json!({ "security_group_id": security_group_id }),
        )
        .await?;
    Ok(())
}

pub async fn update_ssl(client: &Client, instance_id: &str, enabled: bool) -> Result<()> {
    let _: Option<Value> = rds(client)
        .put(
            &format!("{}/ssl", instance_path(client, instance_id)),
            &json!({ "ssl_option": enabled }),
        )
        .await?;
    Ok(())
}

pub async fn reset_root_password(client: &Client, instance_id: &str, password: &str) -> Result<()> {
    let _: Option<Value> = rds(client)
        .post(
            &format!("{}/password", instance_path(client, instance_id)),
            &json!({ "db_user_pwd": password }),
        )
        .await?;
    Ok(())
}

pub async fn get_configurations(
    client: &Client,
    instance_id: &str,
) -> Result<Vec<ConfigurationParameter>> {
    let response: ConfigurationsResponse = rds(client)
        .get(&format!(
            "{}/configurations",
            instance_path(client, instance_id)
        ))
        .await?;
    Ok(response.configuration_parameters)
}

pub async fn modify_configurations(
    client: &Client,
    instance_id: &str,
    values: &BTreeMap<String, String>,
) -> Result<ModifyConfigurationResponse> {
    let response: Option<ModifyConfigurationResponse> = rds(client)
        .put(
            &format!("{}/configurations", instance_path(client, instance_id)),
            &json!({ "values": values }),
        )
        .await?;
    Ok(response.unwrap_or_default())
}

pub async fn get_auto_expansion(client: &Client, instance_id: &str) -> Result<AutoExpansion> {
    rds(client)
        .get(&format!(
            "{}/disk-auto-expansion",
            instance_path(client, instance_id)
        ))
        .await
}

pub async fn enable_auto_expansion(
    client: &Client,
    instance_id: &str,
    limit_size: u32,
    trigger_threshold: u32,
) -> Result<()> {
    let body = json!({
        "switch_option": true,
        "limit_size": limit_size,
        "trigger_threshold": trigger_threshold,
    });
    let _: Option<Value> = rds(client)
        .put(
            &format!("{}/disk-auto-expansion", instance_path(client, instance_id)),
            &body,
        )
        .await?;
    Ok(())
}

pub async fn disable_auto_expansion(client: &Client, instance_id: &str) -> Result<()> {
    let _: Option<Value> = rds(client)
        .put(
            &format!("{}/disk-auto-expansion", instance_path(client, instance_id)),
            &json!({ "switch_option": false }),
        )
        .await?;
    Ok(())
}

pub async fn delete_instance(client: &Client, instance_id: &str) -> Result<JobResponse> {
    let response: Option<JobResponse> = rds(client)
        .delete(&instance_path(client, instance_id))
        .await?;
    Ok(response.unwrap_or_default())
}
