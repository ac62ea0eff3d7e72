//! Local record of applied resources
//!
//! Manages the `.hcflow/state.json` file. It only records what was applied
//! (remote id + configuration) so later runs can diff and address resources;
//! live attributes are always read back from the cloud.

use crate::error::{CloudError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

const STATE_VERSION: u32 = 1;
const STATE_DIR: &str = ".hcflow";
const STATE_FILE: &str = "state.json";
const STATE_BACKUP: &str = "state.json.backup";
const LOCK_FILE: &str = "lock.json";

/// Status of a resource whose creation did not finish. It exists remotely
/// but must be replaced before it can be trusted.
pub const TAINTED: &str = "tainted";

/// Age after which a lock left behind by a crashed run is taken over
const STALE_LOCK_HOURS: i64 = 1;

/// All applied resources of a project
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalState {
    /// State file version
    pub version: u32,

    /// Last modified timestamp
    pub updated_at: DateTime<Utc>,

    /// Resources indexed by address (kind.name)
    pub resources: BTreeMap<String, ResourceState>,
}

impl Default for GlobalState {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            updated_at: Utc::now(),
            resources: BTreeMap::new(),
        }
    }
}

impl GlobalState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or update a resource
    pub fn set_resource(&mut self, address: String, state: ResourceState) {
        self.resources.insert(address, state);
        self.updated_at = Utc::now();
    }

    /// Remove a resource
    pub fn remove_resource(&mut self, address: &str) -> Option<ResourceState> {
        let result = self.resources.remove(address);
        if result.is_some() {
            self.updated_at = Utc::now();
        }
        result
    }

    pub fn get_resource(&self, address: &str) -> Option<&ResourceState> {
        self.resources.get(address)
    }
}

/// Applied state of a single resource
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceState {
    /// Provider-specific resource ID
    pub id: String,

    /// Resource type
    pub resource_type: String,

    /// Configuration that was last applied successfully
    pub config: serde_json::Value,

    /// Remote status seen after the last operation
    pub status: Option<String>,

    /// When the resource was created
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl ResourceState {
    pub fn new<C: Serialize>(
        id: impl Into<String>,
        resource_type: impl Into<String>,
        config: &C,
    ) -> Result<Self> {
        let now = Utc::now();
        Ok(Self {
            id: id.into(),
            resource_type: resource_type.into(),
            config: serde_json::to_value(config)?,
            status: None,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn is_tainted(&self) -> bool {
        self.status.as_deref() == Some(TAINTED)
    }

    /// Record a newly applied configuration
    pub fn set_config<C: Serialize>(&mut self, config: &C) -> Result<()> {
        self.config = serde_json::to_value(config)?;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Decode the applied configuration into its typed form
    pub fn typed_config<C: DeserializeOwned>(&self) -> Result<C> {
        Ok(serde_json::from_value(self.config.clone())?)
    }
}

/// State manager for reading/writing state files
pub struct StateManager {
    /// Project root directory
    project_root: PathBuf,
}

impl StateManager {
    pub fn new(project_root: impl AsRef<Path>) -> Self {
        Self {
            project_root: project_root.as_ref().to_path_buf(),
        }
    }

    fn state_dir(&self) -> PathBuf {
        self.project_root.join(STATE_DIR)
    }

    fn state_path(&self) -> PathBuf {
        self.state_dir().join(STATE_FILE)
    }

    fn backup_path(&self) -> PathBuf {
        self.state_dir().join(STATE_BACKUP)
    }

    fn lock_path(&self) -> PathBuf {
        self.state_dir().join(LOCK_FILE)
    }

    async fn ensure_state_dir(&self) -> Result<()> {
        let dir = self.state_dir();
        if !dir.exists() {
            fs::create_dir_all(&dir).await?;
            tracing::debug!("Created state directory: {}", dir.display());
        }
        Ok(())
    }

    /// Load the current state
    pub async fn load(&self) -> Result<GlobalState> {
        let path = self.state_path();
        if !path.exists() {
            tracing::debug!("State file not found, returning empty state");
            return Ok(GlobalState::new());
        }

        let content = fs::read_to_string(&path).await?;
        let state: GlobalState = serde_json::from_str(&content)?;

        if state.version > STATE_VERSION {
            return Err(CloudError::StateError(format!(
                "State file version {} is newer than supported version {}",
                state.version, STATE_VERSION
            )));
        }

        tracing::debug!("Loaded state with {} resources", state.resources.len());
        Ok(state)
    }

    /// Save the state, keeping the previous file as a backup
    pub async fn save(&self, state: &GlobalState) -> Result<()> {
        self.ensure_state_dir().await?;

        let path = self.state_path();
        let backup = self.backup_path();

        if path.exists() {
            if backup.exists() {
                fs::remove_file(&backup).await?;
            }
            fs::rename(&path, &backup).await?;
            tracing::debug!("Created state backup");
        }

        let content = serde_json::to_string_pretty(state)?;
        fs::write(&path, content).await?;

        tracing::debug!("Saved state with {} resources", state.resources.len());
        Ok(())
    }

    /// Take the project lock. A lock older than an hour is treated as left
    /// behind by a crashed run and taken over.
    pub async fn acquire_lock(&self) -> Result<StateLock> {
        self.ensure_state_dir().await?;
        let lock_path = self.lock_path();
        let holder = LockInfo::for_this_host();

        // Exclusive create: of two concurrent runs only one gets the file
        match write_new_lock(&lock_path, &holder).await {
            Err(CloudError::Io(e)) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
            other => return other.map(|()| StateLock::held(lock_path)),
        }

        match fs::read_to_string(&lock_path).await {
            Ok(content) => {
                let current: LockInfo = serde_json::from_str(&content).map_err(|_| {
                    CloudError::LockError(format!(
                        "unreadable lock file {}, remove it if no other run is active",
                        lock_path.display()
                    ))
                })?;
                let age = Utc::now().signed_duration_since(current.acquired_at);
                if age.num_hours() < STALE_LOCK_HOURS {
                    return Err(CloudError::LockError(format!(
                        "state is locked by {} since {}",
                        current.holder, current.acquired_at
                    )));
                }
                tracing::warn!(
                    holder = %current.holder,
                    acquired_at = %current.acquired_at,
                    "Taking over stale state lock"
                );
            }
            // Released in the meantime
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        match fs::remove_file(&lock_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        write_new_lock(&lock_path, &holder).await.map_err(|e| match e {
            CloudError::Io(io) if io.kind() == std::io::ErrorKind::AlreadyExists => {
                CloudError::LockError("state lock was taken by another run".into())
            }
            other => other,
        })?;
        Ok(StateLock::held(lock_path))
    }
}

/// Create the lock file, failing if it already exists
async fn write_new_lock(path: &Path, info: &LockInfo) -> Result<()> {
    let content = serde_json::to_vec_pretty(info)?;
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await?;
    file.write_all(&content).await?;
    file.flush().await?;
    tracing::debug!(holder = %info.holder, "Acquired state lock");
    Ok(())
}

#[derive(Debug, Serialize, Deserialize)]
struct LockInfo {
    holder: String,
    acquired_at: DateTime<Utc>,
}

impl LockInfo {
    fn for_this_host() -> Self {
        let host = std::env::var("HOSTNAME")
            .or_else(|_| std::env::var("HOST"))
            .unwrap_or_else(|_| "unknown".to_string());
        Self {
            holder: format!("{host} (pid {})", std::process::id()),
            acquired_at: Utc::now(),
        }
    }
}

/// Held project lock. Dropping it without [`StateLock::release`] still
/// removes the lock file.
pub struct StateLock {
    path: Option<PathBuf>,
}

impl StateLock {
    fn held(path: PathBuf) -> Self {
        Self { path: Some(path) }
    }

    pub async fn release(mut self) -> Result<()> {
        if let Some(path) = self.path.take() {
            match fs::remove_file(&path).await {
                Ok(()) => tracing::debug!("Released state lock"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            let _ = std::fs::remove_file(path);
        }
    }
}
