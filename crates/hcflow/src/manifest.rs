//! KDL manifest
//!
//! ```kdl
//! provider "huaweicloud" {
//!     region "ap-southeast-1"
//!     project-id "0123456789abcdef"
//! }
//!
//! rds-instance "main" {
//!     name "orders-db"
//!     flavor "rds.mysql.n1.large.2"
//!     availability-zones "ap-southeast-1a"
//!     vpc-id "vpc-1"
//!     subnet-id "subnet-1"
//!     db {
//!         type "MySQL"
//!         version "8.0"
//!         password env="ORDERS_DB_PASSWORD"
//!     }
//!     volume {
//!         type "CLOUDSSD"
//!         size 40
//!     }
//!     timeouts {
//!         create "45m"
//!     }
//! }
//! ```

use anyhow::{Context, bail};
use hcflow_cloud::Timeouts;
use hcflow_cloud_huawei::{CceAddonConfig, DnatRuleConfig, RdsInstanceConfig, cce, nat, rds};
use kdl::{KdlDocument, KdlNode, KdlValue};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_MANIFEST: &str = "hcflow.kdl";

/// The only provider this tool talks to
const PROVIDER_NAME: &str = "huaweicloud";

/// Keys that always hold a list, even with a single argument
const LIST_KEYS: &[&str] = &["availability_zones"];

/// Keys whose children are user-defined names and keep their spelling
const VERBATIM_KEYS: &[&str] = &["parameters", "values", "endpoints"];

/// Keys whose children are always strings
const STRING_MAP_KEYS: &[&str] = &["parameters", "endpoints"];

/// Provider settings from the `provider` node. The token only comes from the
/// environment.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderSettings {
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub cloud: Option<String>,
    #[serde(default)]
    pub endpoints: BTreeMap<String, String>,
    #[serde(default)]
    pub max_retries: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    RdsInstance,
    DnatRule,
    CceAddon,
}

impl ResourceKind {
    pub fn from_node_name(name: &str) -> Option<Self> {
        match name.replace('-', "_").as_str() {
            "rds_instance" => Some(Self::RdsInstance),
            "dnat_rule" | "nat_dnat_rule" => Some(Self::DnatRule),
            "cce_addon" => Some(Self::CceAddon),
            _ => None,
        }
    }

    pub fn from_resource_type(resource_type: &str) -> Option<Self> {
        [Self::RdsInstance, Self::DnatRule, Self::CceAddon]
            .into_iter()
            .find(|kind| kind.resource_type() == resource_type)
    }

    pub fn resource_type(self) -> &'static str {
        match self {
            Self::RdsInstance => rds::instance::RESOURCE_TYPE,
            Self::DnatRule => nat::RESOURCE_TYPE,
            Self::CceAddon => cce::RESOURCE_TYPE,
        }
    }
}

/// Typed configuration of a declared resource
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceConfig {
    RdsInstance(RdsInstanceConfig),
    DnatRule(DnatRuleConfig),
    CceAddon(CceAddonConfig),
}

impl ResourceConfig {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::RdsInstance(_) => ResourceKind::RdsInstance,
            Self::DnatRule(_) => ResourceKind::DnatRule,
            Self::CceAddon(_) => ResourceKind::CceAddon,
        }
    }

    fn from_value(kind: ResourceKind, value: Value) -> anyhow::Result<Self> {
        Ok(match kind {
            ResourceKind::RdsInstance => {
                let config: RdsInstanceConfig = from_value(value)?;
                config.validate()?;
                Self::RdsInstance(config)
            }
            ResourceKind::DnatRule => {
                let config: DnatRuleConfig = from_value(value)?;
                config.validate()?;
                Self::DnatRule(config)
            }
            ResourceKind::CceAddon => {
                let config: CceAddonConfig = from_value(value)?;
                config.validate()?;
                Self::CceAddon(config)
            }
        })
    }
}

fn from_value<T: DeserializeOwned>(value: Value) -> anyhow::Result<T> {
    serde_json::from_value(value).map_err(|e| anyhow::anyhow!("{e}"))
}

/// Per-resource overrides of the operation budgets
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeoutOverrides {
    pub create: Option<Duration>,
    pub update: Option<Duration>,
    pub delete: Option<Duration>,
}

impl TimeoutOverrides {
    pub fn apply_to(&self, mut timeouts: Timeouts) -> Timeouts {
        if let Some(create) = self.create {
            timeouts = timeouts.with_create(create);
        }
        if let Some(update) = self.update {
            timeouts = timeouts.with_update(update);
        }
        if let Some(delete) = self.delete {
            timeouts = timeouts.with_delete(delete);
        }
        timeouts
    }
}

/// A resource node of the manifest
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceDecl {
    pub name: String,
    pub config: ResourceConfig,
    pub timeouts: TimeoutOverrides,
}

impl ResourceDecl {
    /// `<resource type>.<name>`, e.g. `rds_instance.main`
    pub fn address(&self) -> String {
        format!("{}.{}", self.config.kind().resource_type(), self.name)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Manifest {
    pub provider: ProviderSettings,
    pub resources: Vec<ResourceDecl>,
}

impl Manifest {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read manifest {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid manifest {}", path.display()))
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let doc: KdlDocument = content.parse()?;

        let mut manifest = Manifest::default();
        let mut provider_seen = false;
        let mut addresses = HashSet::new();

        for node in doc.nodes() {
            let node_name = node.name().value();
            if node_name == "provider" {
                if provider_seen {
                    bail!("provider is declared more than once");
                }
                provider_seen = true;
                manifest.provider = parse_provider(node)?;
                continue;
            }

            let Some(kind) = ResourceKind::from_node_name(node_name) else {
                bail!("unknown node '{node_name}'");
            };
            let decl = parse_resource(kind, node)?;
            let address = decl.address();
            if !addresses.insert(address.clone()) {
                bail!("{address} is declared more than once");
            }
            tracing::debug!(%address, "Parsed resource");
            manifest.resources.push(decl);
        }

        Ok(manifest)
    }

    pub fn get(&self, address: &str) -> Option<&ResourceDecl> {
        self.resources.iter().find(|decl| decl.address() == address)
    }
}

/// Directory of the manifest, which holds the `.hcflow` state directory
pub fn project_root(manifest_path: &Path) -> PathBuf {
    match manifest_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn parse_provider(node: &KdlNode) -> anyhow::Result<ProviderSettings> {
    let name = first_argument(node).unwrap_or(PROVIDER_NAME);
    if name != PROVIDER_NAME {
        bail!("unsupported provider '{name}', only '{PROVIDER_NAME}' is available");
    }
    let body = match node.children() {
        Some(children) => Value::Object(document_object(children, true)?),
        None => Value::Object(Map::new()),
    };
    from_value(body).context("invalid provider")
}

fn parse_resource(kind: ResourceKind, node: &KdlNode) -> anyhow::Result<ResourceDecl> {
    let node_name = node.name().value();
    let Some(name) = first_argument(node) else {
        bail!("{node_name} requires a name, e.g. {node_name} \"main\" {{ ... }}");
    };
    if name.is_empty() || name.contains('.') {
        bail!("invalid resource name '{name}'");
    }
    let address = format!("{}.{}", kind.resource_type(), name);

    let mut body = match node.children() {
        Some(children) => document_object(children, true)?,
        None => Map::new(),
    };
    let timeouts = match body.remove("timeouts") {
        Some(value) => parse_timeouts(&value).with_context(|| format!("invalid {address}"))?,
        None => TimeoutOverrides::default(),
    };
    let config = ResourceConfig::from_value(kind, Value::Object(body))
        .with_context(|| format!("invalid {address}"))?;

    Ok(ResourceDecl {
        name: name.to_string(),
        config,
        timeouts,
    })
}

fn parse_timeouts(value: &Value) -> anyhow::Result<TimeoutOverrides> {
    let Value::Object(map) = value else {
        bail!("timeouts must be a block");
    };
    let mut overrides = TimeoutOverrides::default();
    for (key, value) in map {
        let duration = match value {
            Value::String(text) => parse_duration(text)?,
            Value::Number(n) => Duration::from_secs(
                n.as_u64()
                    .with_context(|| format!("timeout {key} must be positive"))?,
            ),
            _ => bail!("timeout {key} must be a duration like \"30m\""),
        };
        match key.as_str() {
            "create" => overrides.create = Some(duration),
            "update" => overrides.update = Some(duration),
            "delete" => overrides.delete = Some(duration),
            other => bail!("unknown timeout '{other}'"),
        }
    }
    Ok(overrides)
}

/// `"90s"`, `"30m"`, `"2h"` or a plain number of seconds
pub fn parse_duration(text: &str) -> anyhow::Result<Duration> {
    let text = text.trim();
    let (number, unit) = match text.find(|c: char| !c.is_ascii_digit()) {
        Some(idx) => text.split_at(idx),
        None => (text, "s"),
    };
    let value: u64 = number
        .parse()
        .with_context(|| format!("invalid duration '{text}'"))?;
    let scale = match unit {
        "s" => 1,
        "m" => 60,
        "h" => 3600,
        _ => bail!("invalid duration unit in '{text}', expected s, m or h"),
    };
    let seconds = value
        .checked_mul(scale)
        .with_context(|| format!("duration '{text}' is too large"))?;
    Ok(Duration::from_secs(seconds))
}

fn first_argument(node: &KdlNode) -> Option<&str> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
}

fn property<'a>(node: &'a KdlNode, key: &str) -> Option<&'a KdlValue> {
    node.entries()
        .iter()
        .find(|e| e.name().map(|n| n.value()) == Some(key))
        .map(|e| e.value())
}

fn normalize_key(key: &str) -> String {
    key.replace('-', "_")
}

fn document_object(doc: &KdlDocument, normalize: bool) -> anyhow::Result<Map<String, Value>> {
    let mut map = Map::new();
    for node in doc.nodes() {
        let raw = node.name().value();
        let key = if normalize {
            normalize_key(raw)
        } else {
            raw.to_string()
        };
        let value = node_value(node, &key, normalize)?;
        if map.insert(key.clone(), value).is_some() {
            bail!("'{raw}' is set more than once");
        }
    }
    Ok(map)
}

fn node_value(node: &KdlNode, key: &str, normalize: bool) -> anyhow::Result<Value> {
    if let Some(var) = property(node, "env") {
        let Some(var) = var.as_string() else {
            bail!("'{key}': env must name a variable");
        };
        let value = std::env::var(var)
            .with_context(|| format!("'{key}' reads {var}, which is not set"))?;
        return Ok(Value::String(value));
    }

    if let Some(children) = node.children() {
        let verbatim = normalize && VERBATIM_KEYS.contains(&key);
        let mut object = document_object(children, normalize && !verbatim)?;
        if normalize && STRING_MAP_KEYS.contains(&key) {
            for value in object.values_mut() {
                if !value.is_string() {
                    *value = Value::String(scalar_text(value));
                }
            }
        }
        return Ok(Value::Object(object));
    }

    let args = node
        .entries()
        .iter()
        .filter(|e| e.name().is_none())
        .map(|e| kdl_to_json(e.value()))
        .collect::<anyhow::Result<Vec<_>>>()?;

    if normalize && LIST_KEYS.contains(&key) {
        return Ok(Value::Array(args));
    }
    match args.len() {
        0 => bail!("'{key}' has no value"),
        1 => Ok(args.into_iter().next().unwrap_or(Value::Null)),
        _ => Ok(Value::Array(args)),
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn kdl_to_json(value: &KdlValue) -> anyhow::Result<Value> {
    Ok(match value {
        KdlValue::String(s) => Value::String(s.clone()),
        KdlValue::Integer(i) => {
            let i = i64::try_from(*i).with_context(|| format!("integer {i} is out of range"))?;
            Value::from(i)
        }
        KdlValue::Float(f) => serde_json::Number::from_f64(*f)
            .map(Value::Number)
            .with_context(|| format!("{f} is not a finite number"))?,
        KdlValue::Bool(b) => Value::Bool(*b),
        KdlValue::Null => Value::Null,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use hcflow_cloud_huawei::{ChargingMode, Protocol};

    const RDS: &str = r##"
        provider "huaweicloud" {
            region "ap-southeast-1"
            project-id "proj"
            endpoints {
                rds "http://localhost:9000"
            }
        }

        rds-instance "main" {
            name "orders-db"
            flavor "rds.mysql.n1.large.2"
            availability-zones "ap-southeast-1a"
            vpc_id "vpc-1"
            subnet-id "subnet-1"
            db {
                type "MySQL"
                version "8.0"
                password "Sup3rSecret!"
                port 3306
            }
            volume {
                type "CLOUDSSD"
                size 40
            }
            parameters {
                max_connections 500
                time_zone "+08:00"
            }
            charging {
                mode "prePaid"
                period-unit "month"
                period 1
                auto-renew #true
            }
            timeouts {
                create "45m"
                delete 600
            }
        }
    "##;

    #[test]
    fn test_parse_rds_instance() {
        let manifest = Manifest::parse(RDS).unwrap();
        assert_eq!(manifest.provider.region.as_deref(), Some("ap-southeast-1"));
        assert_eq!(manifest.provider.project_id.as_deref(), Some("proj"));
        assert_eq!(
            manifest.provider.endpoints.get("rds").map(String::as_str),
            Some("http://localhost:9000")
        );

        assert_eq!(manifest.resources.len(), 1);
        let decl = &manifest.resources[0];
        assert_eq!(decl.address(), "rds_instance.main");
        let ResourceConfig::RdsInstance(config) = &decl.config else {
            panic!("expected an rds instance");
        };
        assert_eq!(config.availability_zones, vec!["ap-southeast-1a"]);
        assert_eq!(config.db.port, Some(3306));
        assert_eq!(config.volume.size, 40);
        assert_eq!(
            config.parameters.get("max_connections").map(String::as_str),
            Some("500")
        );
        assert_eq!(config.charging.mode, ChargingMode::PrePaid);
        assert!(config.charging.auto_renew);
        assert_eq!(decl.timeouts.create, Some(Duration::from_secs(45 * 60)));
        assert_eq!(decl.timeouts.delete, Some(Duration::from_secs(600)));
        assert_eq!(decl.timeouts.update, None);
    }

    #[test]
    fn test_parse_dnat_rule_and_addon() {
        let manifest = Manifest::parse(
            r##"
            dnat-rule "ssh" {
                nat-gateway-id "gw-1"
                floating-ip-id "eip-1"
                protocol "tcp"
                private-ip "192.168.0.10"
                internal-service-port 22
                external-service-port 2222
            }

            cce-addon "autoscaler" {
                cluster-id "cluster-1"
                template-name "autoscaler"
                values {
                    custom {
                        scaleDownEnabled #true
                        "coresTotal" 32000
                    }
                }
            }
            "##,
        )
        .unwrap();

        assert_eq!(manifest.provider, ProviderSettings::default());
        let rule = manifest.get("nat_dnat_rule.ssh").unwrap();
        let ResourceConfig::DnatRule(config) = &rule.config else {
            panic!("expected a dnat rule");
        };
        assert_eq!(config.protocol, Protocol::Tcp);
        assert_eq!(config.external_service_port, Some(2222));

        let addon = manifest.get("cce_addon.autoscaler").unwrap();
        let ResourceConfig::CceAddon(config) = &addon.config else {
            panic!("expected a cce addon");
        };
        assert_eq!(config.version, None);
        assert_eq!(
            config.values.custom.get("scaleDownEnabled"),
            Some(&Value::Bool(true))
        );
        assert_eq!(config.values.custom.get("coresTotal"), Some(&Value::from(32000)));
    }

    #[test]
    fn test_value_from_environment() {
        let manifest = temp_env::with_var("HCFLOW_TEST_CLUSTER_ID", Some("cluster-env"), || {
            Manifest::parse(
                r#"
                cce-addon "metrics" {
                    cluster-id env="HCFLOW_TEST_CLUSTER_ID"
                    template-name "metrics-server"
                }
                "#,
            )
        })
        .unwrap();
        let ResourceConfig::CceAddon(config) = &manifest.resources[0].config else {
            panic!("expected a cce addon");
        };
        assert_eq!(config.cluster_id, "cluster-env");
    }

    #[test]
    fn test_missing_environment_variable_fails() {
        let err = Manifest::parse(
            r#"
            cce-addon "metrics" {
                cluster-id env="HCFLOW_TEST_SURELY_UNSET"
                template-name "metrics-server"
            }
            "#,
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("HCFLOW_TEST_SURELY_UNSET"));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let err = Manifest::parse(
            r#"
            dnat-rule "both" {
                nat-gateway-id "gw-1"
                floating-ip-id "eip-1"
                protocol "tcp"
                private-ip "192.168.0.10"
                port-id "port-1"
                internal-service-port 22
                external-service-port 22
            }
            "#,
        )
        .unwrap_err();
        let message = format!("{err:#}");
        assert!(message.contains("nat_dnat_rule.both"), "{message}");
        assert!(message.contains("private_ip"), "{message}");
    }

    #[test]
    fn test_duplicate_address_is_rejected() {
        let err = Manifest::parse(
            r#"
            cce-addon "a" { cluster-id "c"; template-name "t"; }
            cce-addon "a" { cluster-id "c"; template-name "t"; }
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("cce_addon.a"));
    }

    #[test]
    fn test_unknown_node_and_provider() {
        assert!(Manifest::parse(r#"server "web" {}"#).is_err());
        assert!(Manifest::parse(r#"provider "aws" {}"#).is_err());
        assert!(Manifest::parse(r#"provider "huaweicloud" { zone "x" }"#).is_err());
    }

    #[test]
    fn test_resource_requires_name() {
        let err = Manifest::parse(r#"cce-addon { cluster-id "c"; template-name "t"; }"#)
            .unwrap_err();
        assert!(err.to_string().contains("requires a name"));
    }

    #[test]
    fn test_empty_manifest() {
        let manifest = Manifest::parse("").unwrap();
        assert!(manifest.resources.is_empty());
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("90s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("30m").unwrap(), Duration::from_secs(1800));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_duration("15").unwrap(), Duration::from_secs(15));
        assert!(parse_duration("1d").is_err());
        assert!(parse_duration("m").is_err());

        let err = parse_duration("18446744073709551615h").unwrap_err();
        assert!(err.to_string().contains("too large"), "{err}");
        assert_eq!(
            parse_duration("18446744073709551615s").unwrap(),
            Duration::from_secs(u64::MAX)
        );
    }

    #[test]
    fn test_project_root() {
        assert_eq!(project_root(Path::new("hcflow.kdl")), PathBuf::from("."));
        assert_eq!(
            project_root(Path::new("infra/hcflow.kdl")),
            PathBuf::from("infra")
        );
    }

    #[test]
    fn test_kind_lookup() {
        assert_eq!(
            ResourceKind::from_node_name("nat-dnat-rule"),
            Some(ResourceKind::DnatRule)
        );
        assert_eq!(
            ResourceKind::from_resource_type("rds_instance"),
            Some(ResourceKind::RdsInstance)
        );
        assert_eq!(ResourceKind::from_resource_type("vpc"), None);
    }
}
