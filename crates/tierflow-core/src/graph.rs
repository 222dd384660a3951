//! Resource dependency graph
//!
//! Nodes are appended in declaration order and may only depend on nodes
//! declared before them, so the graph is acyclic by construction and
//! declaration order is a topological order.

use crate::binding::{Inputs, referenced_nodes};
use crate::error::GraphError;
use std::collections::{BTreeSet, HashMap};
use tierflow_cloud::ResourceKind;

/// Stable reference to a node within one graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeHandle(usize);

impl NodeHandle {
    pub fn index(&self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone)]
pub struct ResourceNode {
    handle: NodeHandle,
    name: String,
    kind: ResourceKind,
    inputs: Inputs,
    depends_on: Vec<NodeHandle>,
}

impl ResourceNode {
    pub fn handle(&self) -> NodeHandle {
        self.handle
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn inputs(&self) -> &Inputs {
        &self.inputs
    }

    /// Direct dependencies, in declaration order
    pub fn depends_on(&self) -> &[NodeHandle] {
        &self.depends_on
    }
}

#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: Vec<ResourceNode>,
    by_name: HashMap<String, NodeHandle>,
    dependents: Vec<Vec<NodeHandle>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a resource
    ///
    /// Every dependency must already be declared, and every output
    /// referenced by `inputs` must belong to a listed dependency.
    pub fn add_node<I, D>(
        &mut self,
        name: impl Into<String>,
        kind: ResourceKind,
        inputs: Inputs,
        depends_on: I,
    ) -> Result<NodeHandle, GraphError>
    where
        I: IntoIterator<Item = D>,
        D: AsRef<str>,
    {
        let name = name.into();
        if self.by_name.contains_key(&name) {
            return Err(GraphError::DuplicateName(name));
        }

        let mut deps: BTreeSet<NodeHandle> = BTreeSet::new();
        let mut dep_names: BTreeSet<String> = BTreeSet::new();
        for dependency in depends_on {
            let dependency = dependency.as_ref();
            let handle =
                self.handle(dependency)
                    .ok_or_else(|| GraphError::UnknownDependency {
                        node: name.clone(),
                        dependency: dependency.to_string(),
                    })?;
            deps.insert(handle);
            dep_names.insert(dependency.to_string());
        }

        if let Some(reference) = referenced_nodes(&inputs)
            .into_iter()
            .find(|node| !dep_names.contains(*node))
        {
            return Err(GraphError::UndeclaredReference {
                node: name,
                reference: reference.to_string(),
            });
        }

        let handle = NodeHandle(self.nodes.len());
        for dep in &deps {
            self.dependents[dep.0].push(handle);
        }
        tracing::debug!(node = %name, %kind, dependencies = deps.len(), "Declared resource");

        self.by_name.insert(name.clone(), handle);
        self.dependents.push(Vec::new());
        self.nodes.push(ResourceNode {
            handle,
            name,
            kind,
            inputs,
            depends_on: deps.into_iter().collect(),
        });
        Ok(handle)
    }

    pub fn handle(&self, name: &str) -> Option<NodeHandle> {
        self.by_name.get(name).copied()
    }

    pub fn node(&self, handle: NodeHandle) -> &ResourceNode {
        &self.nodes[handle.0]
    }

    pub fn get(&self, name: &str) -> Result<&ResourceNode, GraphError> {
        self.handle(name)
            .map(|handle| self.node(handle))
            .ok_or_else(|| GraphError::UnknownNode(name.to_string()))
    }

    /// Nodes that list `handle` as a direct dependency
    pub fn dependents(&self, handle: NodeHandle) -> &[NodeHandle] {
        &self.dependents[handle.0]
    }

    /// Nodes in declaration order, which is a topological order
    pub fn plan(&self) -> impl DoubleEndedIterator<Item = &ResourceNode> + ExactSizeIterator {
        self.nodes.iter()
    }

    /// Nodes in teardown order: every dependent before its dependencies
    pub fn reverse_plan(&self) -> impl Iterator<Item = &ResourceNode> {
        self.nodes.iter().rev()
    }

    /// Nodes grouped by depth
    ///
    /// Wave 0 holds nodes without dependencies; every other node sits one
    /// wave after its deepest dependency.
    pub fn levels(&self) -> Vec<Vec<NodeHandle>> {
        let mut depth = vec![0usize; self.nodes.len()];
        let mut levels: Vec<Vec<NodeHandle>> = Vec::new();

        for node in &self.nodes {
            let d = node
                .depends_on
                .iter()
                .map(|dep| depth[dep.0] + 1)
                .max()
                .unwrap_or(0);
            depth[node.handle.0] = d;
            if levels.len() <= d {
                levels.resize_with(d + 1, Vec::new);
            }
            levels[d].push(node.handle);
        }

        levels
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
