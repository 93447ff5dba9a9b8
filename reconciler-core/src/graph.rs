//! Asset dependency graph
//!
//! [`AssetGraph`] is the immutable, per-tick view of every asset, its
//! partitioning, and the partition mapping on each parent -> child edge.
//! Construction validates the graph: all parents must be defined, explicit
//! mappings must be able to relate the partitionings they connect, and the
//! graph must be acyclic.

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap};
use thiserror::Error;

use crate::asset::{AssetKey, AssetNode};
use crate::partition_context::PartitionContext;
use crate::partition_mapping::{infer_mapping, PartitionMapping, PartitionMappingError};
use crate::partitions::PartitionsDefinition;
use crate::subset::PartitionSubset;

fn join_keys(keys: &[AssetKey]) -> String {
    keys.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

/// Errors that can occur while building an asset graph
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("Circular dependency detected between assets: {}", join_keys(.assets))]
    CyclicGraph { assets: Vec<AssetKey> },

    #[error("Duplicate asset registered: {0}")]
    DuplicateAsset(AssetKey),

    #[error("Missing dependency {missing} referenced by asset {asset}")]
    MissingDependency { asset: AssetKey, missing: AssetKey },

    #[error("Asset {asset} depends on {upstream} more than once")]
    DuplicateDependency { asset: AssetKey, upstream: AssetKey },

    #[error("Invalid partition mapping from {upstream} to {downstream}: {source}")]
    IncompatibleMapping {
        upstream: AssetKey,
        downstream: AssetKey,
        source: PartitionMappingError,
    },

    #[error("Unknown asset: {0}")]
    UnknownAsset(AssetKey),
}

/// Immutable asset DAG with per-edge partition mappings
#[derive(Debug, Clone)]
pub struct AssetGraph {
    graph: DiGraph<AssetNode, PartitionMapping>,
    index: HashMap<AssetKey, NodeIndex>,
    topo_order: Vec<AssetKey>,
}

impl AssetGraph {
    /// Build and validate a graph from asset definitions
    pub fn from_assets(assets: impl IntoIterator<Item = AssetNode>) -> Result<Self, GraphError> {
        let mut graph: DiGraph<AssetNode, PartitionMapping> = DiGraph::new();
        let mut index = HashMap::new();

        for asset in assets {
            if index.contains_key(&asset.key) {
                return Err(GraphError::DuplicateAsset(asset.key));
            }
            let key = asset.key.clone();
            let idx = graph.add_node(asset);
            index.insert(key, idx);
        }

        let mut edges = Vec::new();
        for child_idx in graph.node_indices() {
            let child = &graph[child_idx];
            let mut seen = BTreeSet::new();
            for dependency in &child.dependencies {
                let parent_idx = *index.get(&dependency.upstream).ok_or_else(|| {
                    GraphError::MissingDependency {
                        asset: child.key.clone(),
                        missing: dependency.upstream.clone(),
                    }
                })?;
                if !seen.insert(&dependency.upstream) {
                    return Err(GraphError::DuplicateDependency {
                        asset: child.key.clone(),
                        upstream: dependency.upstream.clone(),
                    });
                }
                let parent = &graph[parent_idx];
                let mapping = match &dependency.partition_mapping {
                    Some(mapping) => {
                        mapping
                            .validate_compatibility(
                                parent.partitions_def.as_ref(),
                                child.partitions_def.as_ref(),
                            )
                            .map_err(|source| GraphError::IncompatibleMapping {
                                upstream: parent.key.clone(),
                                downstream: child.key.clone(),
                                source,
                            })?;
                        mapping.clone()
                    }
                    None => infer_mapping(parent.partitions_def.as_ref(), child.partitions_def.as_ref()),
                };
                edges.push((parent_idx, child_idx, mapping));
            }
        }
        for (parent, child, mapping) in edges {
            graph.add_edge(parent, child, mapping);
        }

        let topo_order = Self::topological_sort(&graph)?;
        tracing::debug!(
            assets = graph.node_count(),
            edges = graph.edge_count(),
            "Built asset graph"
        );

        Ok(Self {
            graph,
            index,
            topo_order,
        })
    }

    /// Kahn's algorithm; ready nodes are released in ascending key order
    fn topological_sort(
        graph: &DiGraph<AssetNode, PartitionMapping>,
    ) -> Result<Vec<AssetKey>, GraphError> {
        let mut indegree: HashMap<NodeIndex, usize> = graph
            .node_indices()
            .map(|idx| (idx, graph.neighbors_directed(idx, Direction::Incoming).count()))
            .collect();

        let mut ready: BinaryHeap<Reverse<(AssetKey, NodeIndex)>> = indegree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(idx, _)| Reverse((graph[*idx].key.clone(), *idx)))
            .collect();

        let mut order = Vec::with_capacity(graph.node_count());
        while let Some(Reverse((key, idx))) = ready.pop() {
            order.push(key);
            for child in graph.neighbors_directed(idx, Direction::Outgoing) {
                if let Some(degree) = indegree.get_mut(&child) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.push(Reverse((graph[child].key.clone(), child)));
                    }
                }
            }
        }

        if order.len() != graph.node_count() {
            let mut remaining: Vec<AssetKey> = indegree
                .into_iter()
                .filter(|(_, degree)| *degree > 0)
                .map(|(idx, _)| graph[idx].key.clone())
                .collect();
            remaining.sort();
            return Err(GraphError::CyclicGraph { assets: remaining });
        }

        Ok(order)
    }

    /// Assets in topological order, ties broken lexicographically
    pub fn toposort(&self) -> &[AssetKey] {
        &self.topo_order
    }

    /// All asset keys in ascending order
    pub fn asset_keys(&self) -> BTreeSet<&AssetKey> {
        self.index.keys().collect()
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn contains(&self, key: &AssetKey) -> bool {
        self.index.contains_key(key)
    }

    pub fn node(&self, key: &AssetKey) -> Option<&AssetNode> {
        self.index.get(key).map(|idx| &self.graph[*idx])
    }

    pub fn parents_of(&self, key: &AssetKey) -> BTreeSet<&AssetKey> {
        self.neighbors(key, Direction::Incoming)
    }

    pub fn children_of(&self, key: &AssetKey) -> BTreeSet<&AssetKey> {
        self.neighbors(key, Direction::Outgoing)
    }

    fn neighbors(&self, key: &AssetKey, direction: Direction) -> BTreeSet<&AssetKey> {
        match self.index.get(key) {
            Some(idx) => self
                .graph
                .neighbors_directed(*idx, direction)
                .map(|n| &self.graph[n].key)
                .collect(),
            None => BTreeSet::new(),
        }
    }

    /// Partitioning of `key`; `None` for unpartitioned or unknown assets
    pub fn partitions_def(&self, key: &AssetKey) -> Option<&PartitionsDefinition> {
        self.node(key).and_then(|node| node.partitions_def.as_ref())
    }

    /// Source assets are not executable
    pub fn is_executable(&self, key: &AssetKey) -> bool {
        self.node(key).is_some_and(|node| node.executable)
    }

    /// Mapping on the `parent -> child` edge, explicit or inferred
    pub fn partition_mapping(&self, child: &AssetKey, parent: &AssetKey) -> Option<&PartitionMapping> {
        let child_idx = self.index.get(child)?;
        self.graph
            .edges_directed(*child_idx, Direction::Incoming)
            .find(|edge| &self.graph[edge.source()].key == parent)
            .map(|edge| edge.weight())
    }

    fn edge_mapping(
        &self,
        parent: &AssetKey,
        child: &AssetKey,
    ) -> Result<&PartitionMapping, PartitionMappingError> {
        self.partition_mapping(child, parent)
            .ok_or_else(|| PartitionMappingError::UnknownEdge {
                upstream: parent.to_string(),
                downstream: child.to_string(),
            })
    }

    /// Every partition of `key` that exists at the context's time
    pub fn all_partitions(
        &self,
        key: &AssetKey,
        ctx: &PartitionContext<'_>,
    ) -> Result<PartitionSubset, GraphError> {
        let node = self
            .node(key)
            .ok_or_else(|| GraphError::UnknownAsset(key.clone()))?;
        Ok(match &node.partitions_def {
            Some(def) => def.all_subset(ctx),
            None => PartitionSubset::unpartitioned(true),
        })
    }

    /// Empty subset with the partitioning of `key`
    pub fn empty_subset(&self, key: &AssetKey) -> PartitionSubset {
        match self.partitions_def(key) {
            Some(def) => def.empty_subset(),
            None => PartitionSubset::unpartitioned(false),
        }
    }

    /// Push a parent subset to the child partitions fully covered by it
    pub fn map_partitions(
        &self,
        parent: &AssetKey,
        child: &AssetKey,
        subset: &PartitionSubset,
        ctx: &PartitionContext<'_>,
    ) -> Result<PartitionSubset, PartitionMappingError> {
        self.edge_mapping(parent, child)?.downstream_partitions(
            self.partitions_def(parent),
            subset,
            self.partitions_def(child),
            ctx,
        )
    }

    /// Push a parent subset to the child partitions depending on any of it
    pub fn map_partitions_any(
        &self,
        parent: &AssetKey,
        child: &AssetKey,
        subset: &PartitionSubset,
        ctx: &PartitionContext<'_>,
    ) -> Result<PartitionSubset, PartitionMappingError> {
        self.edge_mapping(parent, child)?.downstream_partitions_any(
            self.partitions_def(parent),
            subset,
            self.partitions_def(child),
            ctx,
        )
    }

    /// Parent partitions the child subset depends on
    pub fn upstream_partitions(
        &self,
        child: &AssetKey,
        parent: &AssetKey,
        subset: &PartitionSubset,
        ctx: &PartitionContext<'_>,
    ) -> Result<PartitionSubset, PartitionMappingError> {
        self.edge_mapping(parent, child)?.upstream_partitions(
            self.partitions_def(child),
            subset,
            self.partitions_def(parent),
            ctx,
        )
    }
}
