//! tierflow cloud backend abstraction
//!
//! This crate defines the boundary between the tierflow planner and the
//! systems that actually create cloud resources.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                 tierflow CLI                     │
//! │        (topology / plan / apply / destroy)       │
//! └─────────────────┬───────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────┐
//! │                tierflow-core                     │
//! │   topology builder · dependency graph · executor │
//! └─────────────────┬───────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────┐
//! │                tierflow-cloud                    │
//! │  ┌──────────────────────────────────────────┐   │
//! │  │          Backend Abstraction              │   │
//! │  │  trait ProvisioningBackend { ... }        │   │
//! │  └──────────────────────────────────────────┘   │
//! │  ┌──────────────┐  ┌──────────────┐            │
//! │  │ LocalBackend │  │  State Mgmt  │            │
//! │  └──────────────┘  └──────────────┘            │
//! └─────────────────────────────────────────────────┘
//! ```

pub mod action;
pub mod error;
pub mod kind;
pub mod local;
pub mod locks;
pub mod provider;
pub mod state;

// Re-exports
pub use action::{
    Action, ActionType, ApplyReport, FailedResource, Operation, Plan, PlanSummary,
    ResourceRecord,
};
pub use error::{CloudError, Result};
pub use kind::ResourceKind;
pub use local::LocalBackend;
pub use locks::NameLocks;
pub use provider::{
    DeleteOutcome, Outputs, ProvisionedResource, ProvisioningBackend, RecordedResource,
    RetryConfig, Zone,
};
pub use state::{GlobalState, ResourceState, ResourceStatus, StateLock, StateManager, state_key};
