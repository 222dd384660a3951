//! tierflow core
//!
//! Computes the network topology of a multi-tier stack and provisions its
//! resources in dependency order.
//!
//! - [`cidr`]: partitions a VPC block into equally sized subnets
//! - [`zones`]: picks the availability zones to spread over
//! - [`topology`]: lays out public and private subnets per zone
//! - [`graph`]: the resource dependency graph
//! - [`binding`]: resource inputs and output substitution
//! - [`executor`]: apply, destroy and preview against a backend
//! - [`stack`]: declares every resource of the stack

pub mod binding;
pub mod cidr;
pub mod error;
pub mod executor;
pub mod graph;
pub mod stack;
pub mod topology;
pub mod zones;

pub use binding::{Input, Inputs, ResolvedInputs, resolve_inputs};
pub use cidr::{NetworkBlock, Partition, parse_block, partition};
pub use error::{BindingError, Error, GraphError, ProvisionError, Result, TopologyError};
pub use executor::{DEFAULT_PARALLELISM, ExecutionState, Executor, NodeStatus};
pub use graph::{DependencyGraph, NodeHandle, ResourceNode};
pub use stack::{Stack, declare_stack, plan_stack, topology_builder};
pub use topology::{
    AssociationSpec, SubnetSpec, Tier, TopologyBuilder, TopologyNames, TopologyPlan,
};
pub use zones::{DEFAULT_ZONE_CAP, Zone, ZoneOrdering, select};
