//! Persisted resource state
//!
//! `<root>/.tierflow/state.json` records every resource the local backend
//! has provisioned, keyed by `kind:name`. Writes go to a temporary file that
//! is renamed over the state file; the previous state is kept as a backup.

use crate::error::{CloudError, Result};
use crate::kind::ResourceKind;
use crate::provider::Outputs;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

const STATE_VERSION: u32 = 1;
const STATE_DIR: &str = ".tierflow";
const STATE_FILE: &str = "state.json";
const STATE_TMP: &str = "state.json.tmp";
const STATE_BACKUP: &str = "state.json.backup";
const LOCK_FILE: &str = "lock.json";

/// Age after which a lock left behind by a crashed run is taken over
const STALE_LOCK_HOURS: i64 = 1;

/// `kind:name` key of a resource
pub fn state_key(kind: ResourceKind, name: &str) -> String {
    format!("{}:{}", kind, name)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalState {
    pub version: u32,
    pub updated_at: DateTime<Utc>,
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

    pub fn resources_of_kind(&self, kind: ResourceKind) -> Vec<(&String, &ResourceState)> {
        self.resources
            .iter()
            .filter(|(_, r)| r.kind == kind)
            .collect()
    }

    pub fn set_resource(&mut self, key: String, state: ResourceState) {
        self.resources.insert(key, state);
        self.updated_at = Utc::now();
    }

    pub fn remove_resource(&mut self, key: &str) -> Option<ResourceState> {
        let removed = self.resources.remove(key)?;
        self.updated_at = Utc::now();
        Some(removed)
    }

    pub fn get_resource(&self, key: &str) -> Option<&ResourceState> {
        self.resources.get(key)
    }
}

/// What the backend knows about one resource
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceState {
    pub id: String,
    pub kind: ResourceKind,
    pub status: ResourceStatus,

    /// Inputs the resource was last converged to
    pub inputs: serde_json::Value,

    /// Computed attributes (ids, endpoints, ARNs)
    pub outputs: Outputs,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ResourceState {
    pub fn new(id: impl Into<String>, kind: ResourceKind) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            kind,
            status: ResourceStatus::Pending,
            inputs: serde_json::Value::Null,
            outputs: Outputs::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_status(mut self, status: ResourceStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_inputs(mut self, inputs: serde_json::Value) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn with_output(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.outputs.insert(key.into(), value);
        self
    }

    /// Typed output lookup; `None` if absent or of another type
    pub fn get_output<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        serde_json::from_value(self.outputs.get(key)?.clone()).ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    /// Recorded but not yet converged
    Pending,
    /// Converged to `inputs`
    Ready,
}

/// Reads and writes the state file of one project root
#[derive(Debug, Clone)]
pub struct StateManager {
    root: PathBuf,
}

impl StateManager {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn state_dir(&self) -> PathBuf {
        self.root.join(STATE_DIR)
    }

    fn path(&self, file: &str) -> PathBuf {
        self.state_dir().join(file)
    }

    pub async fn load(&self) -> Result<GlobalState> {
        let path = self.path(STATE_FILE);
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No state file yet, starting empty");
                return Ok(GlobalState::new());
            }
            Err(e) => return Err(e.into()),
        };

        let state: GlobalState = serde_json::from_str(&content)?;
        if state.version > STATE_VERSION {
            return Err(CloudError::StateError(format!(
                "{} has version {}, this build supports up to {}",
                path.display(),
                state.version,
                STATE_VERSION
            )));
        }

        tracing::debug!(resources = state.resources.len(), "Loaded state");
        Ok(state)
    }

    /// Replace the state file, keeping the previous one as a backup
    pub async fn save(&self, state: &GlobalState) -> Result<()> {
        fs::create_dir_all(self.state_dir()).await?;

        let current = self.path(STATE_FILE);
        let tmp = self.path(STATE_TMP);
        fs::write(&tmp, serde_json::to_vec_pretty(state)?).await?;

        if fs::try_exists(&current).await? {
            fs::copy(&current, self.path(STATE_BACKUP)).await?;
        }
        fs::rename(&tmp, &current).await?;

        tracing::debug!(resources = state.resources.len(), "Saved state");
        Ok(())
    }

    /// Take the project lock, failing while another live run holds it
    ///
    /// The lock file is created exclusively, so of two concurrent callers
    /// exactly one succeeds.
    pub async fn acquire_lock(&self) -> Result<StateLock> {
        fs::create_dir_all(self.state_dir()).await?;
        let path = self.path(LOCK_FILE);

        let info = LockInfo {
            host: std::env::var("HOSTNAME")
                .or_else(|_| std::env::var("HOST"))
                .unwrap_or_else(|_| "unknown".to_string()),
            pid: std::process::id(),
            acquired_at: Utc::now(),
        };
        let content = serde_json::to_vec_pretty(&info)?;

        // A stale lock is removed once, then creation is retried
        let mut took_over = false;
        loop {
            let created = fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await;

            match created {
                Ok(mut file) => {
                    let lock = StateLock {
                        path,
                        released: false,
                    };
                    file.write_all(&content).await?;
                    file.sync_all().await?;
                    tracing::debug!("Acquired state lock");
                    return Ok(lock);
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists && !took_over => {
                    let holder = Self::lock_holder(&path).await?;
                    let age = Utc::now().signed_duration_since(holder.acquired_at);
                    if age < Duration::hours(STALE_LOCK_HOURS) {
                        return Err(CloudError::LockError(format!(
                            "state is locked by {} (pid {}) since {}",
                            holder.host, holder.pid, holder.acquired_at
                        )));
                    }

                    tracing::warn!(host = %holder.host, pid = holder.pid, "Taking over stale state lock");
                    match fs::remove_file(&path).await {
                        Ok(()) => {}
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                        Err(e) => return Err(e.into()),
                    }
                    took_over = true;
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    return Err(CloudError::LockError(
                        "state lock was taken by another run".to_string(),
                    ));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Current holder of an existing lock file
    async fn lock_holder(path: &Path) -> Result<LockInfo> {
        let content = match fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CloudError::LockError(
                    "state lock was released while checking it".to_string(),
                ));
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_str(&content).map_err(|_| {
            CloudError::LockError(format!(
                "{} is being written or is corrupt; remove it if no other run is active",
                path.display()
            ))
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct LockInfo {
    host: String,
    pid: u32,
    acquired_at: DateTime<Utc>,
}

/// Held project lock; removed on `release` or drop
#[derive(Debug)]
pub struct StateLock {
    path: PathBuf,
    released: bool,
}

impl StateLock {
    pub async fn release(mut self) -> Result<()> {
        self.released = true;
        match fs::remove_file(&self.path).await {
            Ok(()) => {
                tracing::debug!("Released state lock");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        if !self.released {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_state_save_load() {
        let temp_dir = tempdir().unwrap();
        let manager = StateManager::new(temp_dir.path());

        let mut state = GlobalState::new();
        state.set_resource(
            state_key(ResourceKind::Vpc, "main-vpc"),
            ResourceState::new("vpc-0a1b", ResourceKind::Vpc)
                .with_status(ResourceStatus::Ready)
                .with_output("cidr_block", serde_json::json!("10.0.0.0/16")),
        );
        manager.save(&state).await.unwrap();

        let loaded = manager.load().await.unwrap();
        assert_eq!(loaded.resources.len(), 1);
        let vpc = loaded.get_resource("vpc:main-vpc").unwrap();
        assert_eq!(vpc.status, ResourceStatus::Ready);
        assert_eq!(
            vpc.get_output::<String>("cidr_block").as_deref(),
            Some("10.0.0.0/16")
        );
        assert_eq!(vpc.get_output::<u64>("cidr_block"), None);
    }

    #[tokio::test]
    async fn test_missing_state_file_is_empty() {
        let temp_dir = tempdir().unwrap();
        let manager = StateManager::new(temp_dir.path());

        let state = manager.load().await.unwrap();
        assert!(state.resources.is_empty());
    }

    #[tokio::test]
    async fn test_save_keeps_backup_and_no_tmp() {
        let temp_dir = tempdir().unwrap();
        let manager = StateManager::new(temp_dir.path());

        manager.save(&GlobalState::new()).await.unwrap();
        assert!(!manager.path(STATE_BACKUP).exists());

        manager.save(&GlobalState::new()).await.unwrap();
        assert!(manager.path(STATE_BACKUP).exists());
        assert!(!manager.path(STATE_TMP).exists());
    }

    #[tokio::test]
    async fn test_newer_state_version_rejected() {
        let temp_dir = tempdir().unwrap();
        let manager = StateManager::new(temp_dir.path());

        let mut state = GlobalState::new();
        state.version = STATE_VERSION + 1;
        manager.save(&state).await.unwrap();

        assert!(matches!(
            manager.load().await,
            Err(CloudError::StateError(_))
        ));
    }

    #[tokio::test]
    async fn test_lock_is_exclusive_until_released() {
        let temp_dir = tempdir().unwrap();
        let manager = StateManager::new(temp_dir.path());

        let lock = manager.acquire_lock().await.unwrap();
        assert!(matches!(
            manager.acquire_lock().await,
            Err(CloudError::LockError(_))
        ));

        lock.release().await.unwrap();
        let again = manager.acquire_lock().await.unwrap();
        drop(again);
        assert!(!manager.path(LOCK_FILE).exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_lock_has_single_winner() {
        let temp_dir = tempdir().unwrap();
        let manager = StateManager::new(temp_dir.path());

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..8 {
            let manager = manager.clone();
            tasks.spawn(async move { manager.acquire_lock().await });
        }

        let mut held = Vec::new();
        while let Some(result) = tasks.join_next().await {
            match result.unwrap() {
                Ok(lock) => held.push(lock),
                Err(e) => assert!(matches!(e, CloudError::LockError(_)), "{}", e),
            }
        }
        assert_eq!(held.len(), 1);
    }

    #[tokio::test]
    async fn test_unreadable_lock_is_not_taken_over() {
        let temp_dir = tempdir().unwrap();
        let manager = StateManager::new(temp_dir.path());
        fs::create_dir_all(manager.state_dir()).await.unwrap();
        std::fs::write(manager.path(LOCK_FILE), "").unwrap();

        assert!(matches!(
            manager.acquire_lock().await,
            Err(CloudError::LockError(_))
        ));
        assert!(manager.path(LOCK_FILE).exists());
    }

    #[tokio::test]
    async fn test_stale_lock_is_taken_over() {
        let temp_dir = tempdir().unwrap();
        let manager = StateManager::new(temp_dir.path());
        fs::create_dir_all(manager.state_dir()).await.unwrap();

        let stale = LockInfo {
            host: "crashed".to_string(),
            pid: 1,
            acquired_at: Utc::now() - Duration::hours(2),
        };
        std::fs::write(
            manager.path(LOCK_FILE),
            serde_json::to_string(&stale).unwrap(),
        )
        .unwrap();

        let lock = manager.acquire_lock().await.unwrap();
        lock.release().await.unwrap();
    }
}
