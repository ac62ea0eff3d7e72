//! Huawei Cloud provider for hcflow
//!
//! Resources talk to the REST endpoints directly through a shared [`Client`]
//! and wait for asynchronous work with
//! [`StateChangeConf`](hcflow_cloud::StateChangeConf).
//!
//! # Resources
//!
//! - `rds_instance`: managed database instances ([`RdsInstance`])
//! - `nat_dnat_rule`: DNAT rules on a NAT gateway ([`NatDnatRule`])
//! - `cce_addon`: add-ons of a CCE cluster ([`CceAddon`])
//!
//! # Requirements
//!
//! `HW_REGION_NAME`, `HW_PROJECT_ID` and `HW_AUTH_TOKEN` env vars, or an
//! explicit [`ProviderConfig`]. `HW_CLOUD` selects another cloud domain.
//!
//! # Example
//!
//! ```ignore
//! use hcflow_cloud::{CloudResource, Timeouts};
//! use hcflow_cloud_huawei::{Client, NatDnatRule};
//!
//! let client = Client::from_env()?;
//! let rules = NatDnatRule::new(client);
//! let rule = rules.create(&config, &rules.default_timeouts()).await?;
//! ```

pub mod bss;
pub mod cce;
pub mod client;
pub mod config;
pub mod error;
pub mod nat;
pub mod rds;

pub use cce::{AddonValues, CceAddon, CceAddonConfig, CceAddonState};
pub use client::{Client, ServiceClient};
pub use config::ProviderConfig;
pub use error::{HuaweiError, Result};
pub use nat::{DnatRule, DnatRuleConfig, NatDnatRule, Protocol};
pub use rds::instance::{ChargingConfig, ChargingMode, DbConfig, VolumeConfig};
pub use rds::{BackupStrategy, RdsInstance, RdsInstanceConfig, RdsInstanceState};
