//! Cloud resource lifecycle trait definition

use async_trait::async_trait;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::time::Duration;

/// Lifecycle of a single kind of cloud resource
///
/// Each resource (database instance, NAT rule, cluster add-on, ...) maps its
/// typed configuration onto the provider's REST calls and waits for the
/// asynchronous work to settle before returning. The HTTP client and provider
/// settings are owned by the implementing value, so operations take no global
/// context.
#[async_trait]
pub trait CloudResource: Send + Sync {
    /// Desired attributes, validated before any API call
    type Config: Serialize + DeserializeOwned + PartialEq + Send + Sync;

    /// Attributes observed on the remote side
    type State: Serialize + Send + Sync;

    type Error: std::error::Error + Send + Sync + 'static;

    /// Resource type name (e.g. "rds_instance", "nat_dnat_rule")
    fn resource_type(&self) -> &'static str;

    /// Remote identifier of an observed resource
    fn state_id(state: &Self::State) -> String;

    /// Attributes whose change cannot be applied in place
    fn replacement_reasons(_old: &Self::Config, _new: &Self::Config) -> Vec<&'static str> {
        Vec::new()
    }

    /// Remote id carried by a failed `create` whose resource already exists.
    /// Callers record it so the half-created resource is not lost.
    fn created_id(_error: &Self::Error) -> Option<String> {
        None
    }

    /// Default operation budgets for this resource type
    fn default_timeouts(&self) -> Timeouts {
        Timeouts::default()
    }

    /// Create the resource and wait until it is usable. A failure after the
    /// remote create call went through must expose the new id via
    /// [`CloudResource::created_id`].
    async fn create(
        &self,
        config: &Self::Config,
        timeouts: &Timeouts,
    ) -> Result<Self::State, Self::Error>;

    /// Read the resource. `None` means it no longer exists remotely.
    async fn read(&self, id: &str) -> Result<Option<Self::State>, Self::Error>;

    /// Apply the difference between `old` and `new`
    async fn update(
        &self,
        id: &str,
        old: &Self::Config,
        new: &Self::Config,
        timeouts: &Timeouts,
    ) -> Result<Self::State, Self::Error>;

    /// Delete the resource and wait until it is gone
    async fn delete(
        &self,
        id: &str,
        config: &Self::Config,
        timeouts: &Timeouts,
    ) -> Result<(), Self::Error>;
}

/// Per-operation time budgets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeouts {
    #[serde(with = "duration_secs")]
    pub create: Duration,
    #[serde(with = "duration_secs")]
    pub update: Duration,
    #[serde(with = "duration_secs")]
    pub delete: Duration,
    /// Budget for auxiliary waits (e.g. waiting for an instance to become idle)
    #[serde(with = "duration_secs")]
    pub default: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self::uniform(Duration::from_secs(10 * 60))
    }
}

impl Timeouts {
    pub fn uniform(timeout: Duration) -> Self {
        Self {
            create: timeout,
            update: timeout,
            delete: timeout,
            default: timeout,
        }
    }

    pub fn with_create(mut self, timeout: Duration) -> Self {
        self.create = timeout;
        self
    }

    pub fn with_update(mut self, timeout: Duration) -> Self {
        self.update = timeout;
        self
    }

    pub fn with_delete(mut self, timeout: Duration) -> Self {
        self.delete = timeout;
        self
    }

    pub fn with_default(mut self, timeout: Duration) -> Self {
        self.default = timeout;
        self
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}
