//! Action types for cloud resource management

use crate::kind::ResourceKind;
use crate::provider::Outputs;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Represents a planned action for a cloud resource
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    /// Unique identifier for the action
    pub id: String,

    /// Type of action to perform
    pub action_type: ActionType,

    /// Resource kind
    pub kind: ResourceKind,

    /// Logical resource name
    pub name: String,

    /// Description of the action
    pub description: String,

    /// Additional details about the action (e.g., changed input keys)
    pub details: BTreeMap<String, serde_json::Value>,
}

impl Action {
    pub fn new(action_type: ActionType, kind: ResourceKind, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: format!("{}-{}", action_type, name),
            description: format!("{} {} {}", action_type, kind, name),
            action_type,
            kind,
            name,
            details: BTreeMap::new(),
        }
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.details.insert(key.into(), value);
        self
    }
}

/// Type of action to perform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    /// Create a new resource
    Create,
    /// Update an existing resource
    Update,
    /// Delete a resource
    Delete,
    /// No changes needed
    NoOp,
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionType::Create => write!(f, "create"),
            ActionType::Update => write!(f, "update"),
            ActionType::Delete => write!(f, "delete"),
            ActionType::NoOp => write!(f, "no-op"),
        }
    }
}

/// Plan containing all actions, in provisioning order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    /// List of actions to perform
    pub actions: Vec<Action>,

    /// Whether the plan has any changes
    pub has_changes: bool,
}

impl Plan {
    pub fn new(actions: Vec<Action>) -> Self {
        let has_changes = actions.iter().any(|a| a.action_type != ActionType::NoOp);
        Self {
            actions,
            has_changes,
        }
    }

    pub fn empty() -> Self {
        Self {
            actions: Vec::new(),
            has_changes: false,
        }
    }

    /// Get actions by type
    pub fn actions_by_type(&self, action_type: ActionType) -> Vec<&Action> {
        self.actions
            .iter()
            .filter(|a| a.action_type == action_type)
            .collect()
    }

    /// Summary of the plan
    pub fn summary(&self) -> PlanSummary {
        PlanSummary {
            create: self.actions_by_type(ActionType::Create).len(),
            update: self.actions_by_type(ActionType::Update).len(),
            delete: self.actions_by_type(ActionType::Delete).len(),
            no_change: self.actions_by_type(ActionType::NoOp).len(),
        }
    }
}

/// Summary of planned actions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanSummary {
    pub create: usize,
    pub update: usize,
    pub delete: usize,
    pub no_change: usize,
}

impl std::fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} to create, {} to update, {} to delete, {} unchanged",
            self.create, self.update, self.delete, self.no_change
        )
    }
}

/// Which traversal produced a report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Apply,
    Destroy,
}

/// One entry of the audit artifact: a resource that reached its goal state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRecord {
    pub name: String,
    pub kind: ResourceKind,

    /// Resolved inputs sent to the backend, with secrets redacted
    pub inputs: serde_json::Value,

    /// Computed outputs; for destroyed resources, the delete `outcome`
    pub outputs: Outputs,
}

/// A resource whose operation failed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedResource {
    pub name: String,
    pub kind: ResourceKind,
    pub error: String,

    /// Number of backend attempts made
    pub attempts: u32,
}

/// Result of an apply or destroy run
///
/// `succeeded` follows the plan: declaration order for apply, reverse
/// declaration order for destroy. On failure it is the exact set of
/// resources known to exist (apply) or known to be gone (destroy).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyReport {
    pub operation: Operation,

    /// Resources that reached their goal state
    pub succeeded: Vec<ResourceRecord>,

    /// Recorded resources no longer declared, deleted in teardown order
    #[serde(default)]
    pub pruned: Vec<ResourceRecord>,

    /// Failed resources
    pub failed: Vec<FailedResource>,

    /// Resources never scheduled because the run aborted
    pub skipped: Vec<String>,

    /// Total execution time in milliseconds
    pub duration_ms: u64,
}

impl ApplyReport {
    pub fn new(operation: Operation) -> Self {
        Self {
            operation,
            succeeded: Vec::new(),
            pruned: Vec::new(),
            failed: Vec::new(),
            skipped: Vec::new(),
            duration_ms: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty()
    }

    pub fn add_success(&mut self, record: ResourceRecord) {
        self.succeeded.push(record);
    }

    pub fn add_failure(&mut self, failure: FailedResource) {
        self.failed.push(failure);
    }

    pub fn record(&self, name: &str) -> Option<&ResourceRecord> {
        self.succeeded.iter().find(|r| r.name == name)
    }
}
