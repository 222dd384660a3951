//! Provisioning backend trait definition

use crate::error::Result;
use crate::kind::ResourceKind;
use crate::state::ResourceState;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Computed attributes of a provisioned resource (ids, endpoints, ARNs)
pub type Outputs = BTreeMap<String, serde_json::Value>;

/// Provisioning backend abstraction trait
///
/// A backend creates, updates and deletes resources against a real (or
/// simulated) cloud. All operations are idempotent and keyed by the
/// resource's declared name: calling `create_or_update` twice with the same
/// name converges the existing resource instead of creating a second one.
///
/// Backends must allow at most one in-flight mutation per resource name.
/// The planner never reorders nodes, so concurrent calls always target
/// different names, but a backend shared between runs cannot rely on that.
#[async_trait]
pub trait ProvisioningBackend: Send + Sync {
    /// Returns the backend name (e.g., "local", "aws")
    fn name(&self) -> &str;

    /// Availability zones of a region, in the provider's order
    async fn list_zones(&self, region: &str) -> Result<Vec<Zone>>;

    /// Create the resource, or converge it to `inputs` if it already exists
    async fn create_or_update(
        &self,
        kind: ResourceKind,
        name: &str,
        inputs: &serde_json::Value,
    ) -> Result<ProvisionedResource>;

    /// Delete a resource. Deleting an absent resource is not an error.
    async fn delete(&self, kind: ResourceKind, name: &str) -> Result<DeleteOutcome>;

    /// Current recorded state of a resource, if it exists
    async fn describe(&self, kind: ResourceKind, name: &str) -> Result<Option<ResourceState>>;

    /// Every resource the backend has recorded, oldest first
    ///
    /// Resources are created only after their dependencies, so the reverse
    /// of this order is a valid teardown order.
    async fn list_resources(&self) -> Result<Vec<RecordedResource>>;
}

/// A resource known to the backend, identified by its declared name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedResource {
    pub kind: ResourceKind,
    pub name: String,
    pub id: String,
}

/// Availability zone identifier (e.g., "us-east-1a")
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Zone(String);

impl Zone {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Zone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Zone {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for Zone {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Result of a successful create/update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisionedResource {
    /// Provider-specific resource ID
    pub id: String,

    /// Computed attributes; always contains `id`
    pub outputs: Outputs,
}

impl ProvisionedResource {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        let mut outputs = Outputs::new();
        outputs.insert("id".to_string(), serde_json::json!(id));
        Self { id, outputs }
    }

    pub fn with_output(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.outputs.insert(key.into(), value);
        self
    }
}

/// Result of a delete request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteOutcome {
    /// The resource existed and was removed
    Deleted,
    /// The resource did not exist
    Absent,
}

/// Retry configuration for provider operations
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,

    /// Initial delay between retries
    pub initial_delay: Duration,

    /// Maximum delay between retries
    pub max_delay: Duration,

    /// Backoff multiplier
    pub backoff_multiplier: f64,
}

impl RetryConfig {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Delay before retry number `retry` (1-based)
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1) as i32;
        let delay = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        if !delay.is_finite() || delay >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(delay)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}
