use ipnet::IpNet;
use thiserror::Error;
use tierflow_cloud::{CloudError, ResourceKind};

/// Errors raised while computing the network topology.
/// All of them surface before any backend mutation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TopologyError {
    #[error("Invalid prefix length /{requested} for {parent}: {reason}")]
    InvalidPrefix {
        parent: IpNet,
        requested: u8,
        reason: String,
    },

    #[error("No availability zones available")]
    NoZonesAvailable,

    #[error("Zone cap must be at least 1")]
    InvalidZoneCap,

    #[error(
        "Insufficient address space in {parent}: {required} /{prefix_len} blocks required, only {available} available"
    )]
    InsufficientAddressSpace {
        parent: IpNet,
        prefix_len: u8,
        required: usize,
        available: u128,
    },

    #[error("Invalid CIDR '{input}': {reason}")]
    InvalidCidr { input: String, reason: String },
}

/// Errors raised while constructing the dependency graph
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("Resource '{0}' is declared more than once")]
    DuplicateName(String),

    #[error("Resource '{node}' depends on '{dependency}', which has not been declared")]
    UnknownDependency { node: String, dependency: String },

    #[error("Resource '{node}' references outputs of '{reference}' without depending on it")]
    UndeclaredReference { node: String, reference: String },

    #[error("Unknown resource: {0}")]
    UnknownNode(String),
}

/// Errors raised while substituting outputs into inputs
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BindingError {
    #[error("Output '{key}' of '{node}' is not available")]
    MissingOutput { node: String, key: String },

    #[error("Template error: {0}")]
    Template(String),
}

/// Errors raised while executing a plan against a backend
#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("Failed to provision {kind} '{node}' after {attempts} attempt(s): {source}")]
    Provisioning {
        node: String,
        kind: ResourceKind,
        attempts: u32,
        #[source]
        source: CloudError,
    },

    #[error("Failed to delete {kind} '{node}' after {attempts} attempt(s): {source}")]
    Teardown {
        node: String,
        kind: ResourceKind,
        attempts: u32,
        #[source]
        source: CloudError,
    },

    #[error("Failed to resolve inputs of '{node}': {source}")]
    Binding {
        node: String,
        #[source]
        source: BindingError,
    },

    /// The run aborted before this resource was scheduled
    #[error("'{node}' was not scheduled because the run aborted")]
    Aborted { node: String },

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Backend(#[from] CloudError),
}

impl ProvisionError {
    /// Backend attempts made before the error, if any
    pub fn attempts(&self) -> u32 {
        match self {
            ProvisionError::Provisioning { attempts, .. }
            | ProvisionError::Teardown { attempts, .. } => *attempts,
            _ => 0,
        }
    }
}

/// Top-level error of tierflow-core
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] tierflow_config::ConfigError),

    #[error(transparent)]
    Topology(#[from] TopologyError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error(transparent)]
    Backend(#[from] CloudError),
}

pub type Result<T> = std::result::Result<T, Error>;
