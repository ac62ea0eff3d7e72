//! NAT gateway DNAT rules (`nat_dnat_rule` resource)

use crate::client::Client;
use crate::error::{HuaweiError, Result};
use async_trait::async_trait;
use hcflow_cloud::{CloudResource, Observation, StateChangeConf, Timeouts};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const RESOURCE_TYPE: &str = "nat_dnat_rule";

const DELETED: &str = "DELETED";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
    Any,
}

/// Desired attributes of a DNAT rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DnatRuleConfig {
    pub nat_gateway_id: String,
    pub floating_ip_id: String,
    pub protocol: Protocol,
    /// Backend address inside the VPC (mutually exclusive with `port_id`)
    #[serde(default)]
    pub private_ip: Option<String>,
    /// Backend network port (mutually exclusive with `private_ip`)
    #[serde(default)]
    pub port_id: Option<String>,
    #[serde(default)]
    pub internal_service_port: Option<u16>,
    #[serde(default)]
    pub external_service_port: Option<u16>,
    /// e.g. "23-823"
    #[serde(default)]
    pub internal_service_port_range: Option<String>,
    #[serde(default)]
    pub external_service_port_range: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

fn parse_port_range(range: &str) -> Option<(u16, u16)> {
    let (start, end) = range.split_once('-')?;
    let start: u16 = start.trim().parse().ok()?;
    let end: u16 = end.trim().parse().ok()?;
    (start >= 1 && start <= end).then_some((start, end))
}

impl DnatRuleConfig {
    pub fn validate(&self) -> Result<()> {
        if self.nat_gateway_id.trim().is_empty() || self.floating_ip_id.trim().is_empty() {
            return Err(HuaweiError::InvalidConfig(
                "nat_gateway_id and floating_ip_id are required".into(),
            ));
        }

        if self.private_ip.is_some() == self.port_id.is_some() {
            return Err(HuaweiError::InvalidConfig(
                "exactly one of private_ip and port_id must be set".into(),
            ));
        }

        let has_ports =
            self.internal_service_port.is_some() || self.external_service_port.is_some();
        let has_ranges = self.internal_service_port_range.is_some()
            || self.external_service_port_range.is_some();

        match (has_ports, has_ranges) {
            (true, true) => Err(HuaweiError::InvalidConfig(
                "service ports and service port ranges are mutually exclusive".into(),
            )),
            (_, true) => self.validate_ranges(),
            (_, false) => self.validate_ports(),
        }
    }

    fn validate_ports(&self) -> Result<()> {
        let (Some(internal), Some(external)) =
            (self.internal_service_port, self.external_service_port)
        else {
            return Err(HuaweiError::InvalidConfig(
                "internal_service_port and external_service_port must be set together".into(),
            ));
        };
        if self.protocol == Protocol::Any && (internal != 0 || external != 0) {
            return Err(HuaweiError::InvalidConfig(
                "service ports must be 0 when protocol is \"any\"".into(),
            ));
        }
        Ok(())
    }

    fn validate_ranges(&self) -> Result<()> {
        let (Some(internal), Some(external)) = (
            self.internal_service_port_range.as_deref(),
            self.external_service_port_range.as_deref(),
        ) else {
            return Err(HuaweiError::InvalidConfig(
                "internal and external service port ranges must be set together".into(),
            ));
        };
        let internal = parse_port_range(internal).ok_or_else(|| {
            HuaweiError::InvalidConfig(format!("invalid internal port range \"{internal}\""))
        })?;
        let external = parse_port_range(external).ok_or_else(|| {
            HuaweiError::InvalidConfig(format!("invalid external port range \"{external}\""))
        })?;
        if internal.1 - internal.0 != external.1 - external.0 {
            return Err(HuaweiError::InvalidConfig(
                "internal and external port ranges must have the same length".into(),
            ));
        }
        if self.protocol == Protocol::Any {
            return Err(HuaweiError::InvalidConfig(
                "port ranges require protocol \"tcp\" or \"udp\"".into(),
            ));
        }
        Ok(())
    }
}

/// DNAT rule as returned by the API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnatRule {
    pub id: String,
    pub nat_gateway_id: String,
    #[serde(default)]
    pub floating_ip_id: String,
    #[serde(default)]
    pub floating_ip_address: String,
    pub protocol: Protocol,
    #[serde(default)]
    pub private_ip: String,
    #[serde(default)]
    pub port_id: String,
    #[serde(default)]
    pub internal_service_port: u16,
    #[serde(default)]
    pub external_service_port: u16,
    #[serde(default)]
    pub internal_service_port_range: String,
    #[serde(default)]
    pub external_service_port_range: String,
    #[serde(default)]
    pub description: String,
    pub status: String,
    #[serde(default)]
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
struct DnatRuleEnvelope {
    dnat_rule: DnatRule,
}

#[derive(Debug, Serialize)]
struct RuleBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    nat_gateway_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    floating_ip_id: Option<&'a str>,
    protocol: Protocol,
    #[serde(skip_serializing_if = "Option::is_none")]
    private_ip: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    port_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    internal_service_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    external_service_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    internal_service_port_range: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    external_service_port_range: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
}

impl<'a> RuleBody<'a> {
    fn create(config: &'a DnatRuleConfig) -> Self {
        Self {
            nat_gateway_id: Some(config.nat_gateway_id.as_str()),
            floating_ip_id: Some(config.floating_ip_id.as_str()),
            ..Self::update(config)
        }
    }

    fn update(config: &'a DnatRuleConfig) -> Self {
        Self {
            nat_gateway_id: None,
            floating_ip_id: None,
            protocol: config.protocol,
            private_ip: config.private_ip.as_deref(),
            port_id: config.port_id.as_deref(),
            internal_service_port: config.internal_service_port,
            external_service_port: config.external_service_port,
            internal_service_port_range: config.internal_service_port_range.as_deref(),
            external_service_port_range: config.external_service_port_range.as_deref(),
            description: config.description.as_deref(),
        }
    }
}

#[derive(Debug, Serialize)]
struct RuleRequest<'a> {
    dnat_rule: RuleBody<'a>,
}

pub async fn get_rule(client: &Client, rule_id: &str) -> Result<DnatRule> {
    let envelope: DnatRuleEnvelope = client
        .service("nat")
        .get(&format!(
            "/v2/{}/dnat_rules/{}",
            client.project_id(),
            rule_id
        ))
        .await?;
    Ok(envelope.dnat_rule)
}

async fn rule_status(client: &Client, rule_id: &str) -> Result<Observation<DnatRule>> {
    match get_rule(client, rule_id).await {
        Ok(rule) => {
            let status = rule.status.clone();
            Ok(Observation::new(rule, status))
        }
        Err(e) if e.is_not_found() => Ok(Observation::empty(DELETED)),
        Err(e) => Err(e),
    }
}

fn rule_path(client: &Client, gateway_id: &str, rule_id: &str) -> String {
    format!(
        "/v2/{}/nat_gateways/{}/dnat_rules/{}",
        client.project_id(),
        gateway_id,
        rule_id
    )
}

/// Port forwarding from a floating IP to a backend inside the VPC
pub struct NatDnatRule {
    client: Client,
}

impl NatDnatRule {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn wait_for_rule(&self, rule_id: &str, conf: StateChangeConf) -> Result<DnatRule> {
        let client = &self.client;
        let observation = client
            .state_change(conf)
            .wait_for_state(move || rule_status(client, rule_id))
            .await?;
        observation.into_value().ok_or_else(|| {
            HuaweiError::UnexpectedResponse(format!("DNAT rule {rule_id} disappeared"))
        })
    }
}

#[async_trait]
impl CloudResource for NatDnatRule {
    type Config = DnatRuleConfig;
    type State = DnatRule;
    type Error = HuaweiError;

    fn resource_type(&self) -> &'static str {
        RESOURCE_TYPE
    }

    fn state_id(state: &DnatRule) -> String {
        state.id.clone()
    }

    fn created_id(error: &HuaweiError) -> Option<String> {
        error.created_id().map(String::from)
    }

    fn replacement_reasons(old: &DnatRuleConfig, new: &DnatRuleConfig) -> Vec<&'static str> {
        let mut reasons = Vec::new();
        if old.nat_gateway_id != new.nat_gateway_id {
            reasons.push("nat_gateway_id");
        }
        if old.floating_ip_id != new.floating_ip_id {
            reasons.push("floating_ip_id");
        }
        if old.private_ip != new.private_ip {
            reasons.push("private_ip");
        }
        if old.port_id != new.port_id {
            reasons.push("port_id");
        }
        reasons
    }

    async fn create(&self, config: &DnatRuleConfig, timeouts: &Timeouts) -> Result<DnatRule> {
        config.validate()?;
        let request = RuleRequest {
            dnat_rule: RuleBody::create(config),
        };
        let created: DnatRuleEnvelope = self
            .client
            .service("nat")
            .post(&format!("/v2/{}/dnat_rules", self.client.project_id()), &request)
            .await?;
        let rule_id = created.dnat_rule.id;
        tracing::info!(rule_id = %rule_id, "DNAT rule created");

        self.wait_for_rule(
            &rule_id,
            StateChangeConf::new(["ACTIVE"], timeouts.create)
                .pending(["PENDING_CREATE"])
                .delay(Duration::from_secs(5))
                .min_timeout(Duration::from_secs(3)),
        )
        .await
        .map_err(|e| e.after_create(&rule_id))
    }

    async fn read(&self, id: &str) -> Result<Option<DnatRule>> {
        match get_rule(&self.client, id).await {
            Ok(rule) => Ok(Some(rule)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn update(
        &self,
        id: &str,
        old: &DnatRuleConfig,
        new: &DnatRuleConfig,
        timeouts: &Timeouts,
    ) -> Result<DnatRule> {
        new.validate()?;
        let reasons = Self::replacement_reasons(old, new);
        if !reasons.is_empty() {
            return Err(HuaweiError::RequiresReplacement(reasons.join(", ")));
        }

        let request = RuleRequest {
            dnat_rule: RuleBody::update(new),
        };
        let _: Option<serde_json::Value> = self
            .client
            .service("nat")
            .put(&rule_path(&self.client, &new.nat_gateway_id, id), &request)
            .await?;

        self.wait_for_rule(
            id,
            StateChangeConf::new(["ACTIVE"], timeouts.update)
                .pending(["PENDING_UPDATE"])
                .delay(Duration::from_secs(5))
                .min_timeout(Duration::from_secs(3)),
        )
        .await
    }

    async fn delete(&self, id: &str, config: &DnatRuleConfig, timeouts: &Timeouts) -> Result<()> {
        let result: Result<Option<serde_json::Value>> = self
            .client
            .service("nat")
            .delete(&rule_path(&self.client, &config.nat_gateway_id, id))
            .await;
        match result {
            Ok(_) => {}
            Err(e) if e.is_not_found() => {
                tracing::info!(rule_id = id, "DNAT rule already deleted");
                return Ok(());
            }
            Err(e) => return Err(e),
        }

        let client = &self.client;
        client
            .state_change(
                StateChangeConf::new([DELETED], timeouts.delete)
                    .pending(["ACTIVE", "PENDING_DELETE"])
                    .delay(Duration::from_secs(5))
                    .min_timeout(Duration::from_secs(3)),
            )
            .wait_for_state(move || rule_status(client, id))
            .await?;

        tracing::info!(rule_id = id, "DNAT rule deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderConfig;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sample_config() -> DnatRuleConfig {
        DnatRuleConfig {
            nat_gateway_id: "gw-1".into(),
            floating_ip_id: "eip-1".into(),
            protocol: Protocol::Udp,
            private_ip: Some("192.168.0.20".into()),
            port_id: None,
            internal_service_port: Some(80),
            external_service_port: Some(8080),
            internal_service_port_range: None,
            external_service_port_range: None,
            description: None,
        }
    }

    fn rule_json(status: &str) -> serde_json::Value {
        json!({
            "dnat_rule": {
                "id": "rule-1",
                "nat_gateway_id": "gw-1",
                "floating_ip_id": "eip-1",
                "protocol": "udp",
                "private_ip": "192.168.0.20",
                "internal_service_port": 80,
                "external_service_port": 8080,
                "status": status,
            }
        })
    }

    fn test_resource(server: &MockServer) -> NatDnatRule {
        let config =
            ProviderConfig::new("test-region", "proj", "token").with_endpoint("nat", server.uri());
        NatDnatRule::new(
            Client::new(config)
                .unwrap()
                .with_poll_override(Duration::from_millis(5)),
        )
    }

    #[test]
    fn test_validate_backend_is_exclusive() {
        let mut config = sample_config();
        assert!(config.validate().is_ok());

        config.port_id = Some("port-1".into());
        assert!(config.validate().is_err());

        config.private_ip = None;
        assert!(config.validate().is_ok());

        config.port_id = None;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_ports_and_ranges_are_exclusive() {
        let mut config = sample_config();
        config.protocol = Protocol::Tcp;
        config.internal_service_port_range = Some("23-823".into());
        config.external_service_port_range = Some("8023-8823".into());
        assert!(config.validate().is_err());

        config.internal_service_port = None;
        config.external_service_port = None;
        assert!(config.validate().is_ok());

        config.external_service_port_range = Some("8023-8024".into());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_any_protocol_uses_port_zero() {
        let mut config = sample_config();
        config.protocol = Protocol::Any;
        assert!(config.validate().is_err());

        config.internal_service_port = Some(0);
        config.external_service_port = Some(0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_port_range() {
        assert_eq!(parse_port_range("23-823"), Some((23, 823)));
        assert_eq!(parse_port_range("823-23"), None);
        assert_eq!(parse_port_range("0-10"), None);
        assert_eq!(parse_port_range("80"), None);
    }

    #[tokio::test]
    async fn test_create_waits_for_active() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/proj/dnat_rules"))
            .and(body_json(json!({
                "dnat_rule": {
                    "nat_gateway_id": "gw-1",
                    "floating_ip_id": "eip-1",
                    "protocol": "udp",
                    "private_ip": "192.168.0.20",
                    "internal_service_port": 80,
                    "external_service_port": 8080,
                }
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(rule_json("PENDING_CREATE")))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v2/proj/dnat_rules/rule-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(rule_json("PENDING_CREATE")))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v2/proj/dnat_rules/rule-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(rule_json("ACTIVE")))
            .mount(&server)
            .await;

        let resource = test_resource(&server);
        let rule = resource
            .create(&sample_config(), &Timeouts::default())
            .await
            .unwrap();
        assert_eq!(rule.id, "rule-1");
        assert_eq!(rule.status, "ACTIVE");
    }

    #[tokio::test]
    async fn test_create_fails_on_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/proj/dnat_rules"))
            .respond_with(ResponseTemplate::new(201).set_body_json(rule_json("PENDING_CREATE")))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v2/proj/dnat_rules/rule-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(rule_json("ERROR")))
            .expect(1)
            .mount(&server)
            .await;

        let resource = test_resource(&server);
        let err = resource
            .create(&sample_config(), &Timeouts::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            HuaweiError::CloudError(hcflow_cloud::CloudError::UnexpectedState { .. })
        ));
    }

    #[tokio::test]
    async fn test_update_puts_changed_rule() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/v2/proj/nat_gateways/gw-1/dnat_rules/rule-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(rule_json("ACTIVE")))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v2/proj/dnat_rules/rule-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(rule_json("ACTIVE")))
            .mount(&server)
            .await;

        let old = sample_config();
        let mut new = old.clone();
        new.description = Some("web".into());

        let resource = test_resource(&server);
        let rule = resource
            .update("rule-1", &old, &new, &Timeouts::default())
            .await
            .unwrap();
        assert_eq!(rule.status, "ACTIVE");
    }

    #[tokio::test]
    async fn test_delete_treats_not_found_as_deleted() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/v2/proj/nat_gateways/gw-1/dnat_rules/rule-1"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v2/proj/dnat_rules/rule-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(rule_json("PENDING_DELETE")))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v2/proj/dnat_rules/rule-1"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "NeutronError": {"message": "DNAT rule could not be found"}
            })))
            .mount(&server)
            .await;

        let resource = test_resource(&server);
        resource
            .delete("rule-1", &sample_config(), &Timeouts::default())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_read_missing_rule() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/proj/dnat_rules/rule-1"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let resource = test_resource(&server);
        assert!(resource.read("rule-1").await.unwrap().is_none());
    }
}
