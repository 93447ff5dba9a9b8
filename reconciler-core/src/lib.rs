//! # Reconciler Core
//!
//! Data model of the asset reconciliation engine: asset keys and nodes, the
//! asset dependency graph, partitions definitions, partition subsets and the
//! mappings between them, auto-materialize policies, and the read-only
//! materialization history snapshot evaluated on every tick.

pub mod asset;
pub mod graph;
pub mod history;
pub mod partition_context;
pub mod partition_mapping;
pub mod partitions;
pub mod policy;
pub mod subset;

// Re-export commonly used types
pub use asset::{
    AssetBuilder, AssetDependency, AssetKey, AssetKeyPartitionKey, AssetMetadata, AssetNode,
};
pub use graph::{AssetGraph, GraphError};
pub use history::{AssetHistory, DataVersion, HistorySnapshot, MaterializationRecord};
pub use partition_context::{DynamicPartitionsSnapshot, PartitionContext};
pub use partition_mapping::{infer_mapping, PartitionMapping, PartitionMappingError};
pub use partitions::{
    DynamicPartitions, PartitionError, PartitionsDefinition, StaticPartitions, TimeGranularity,
    TimeWindow, TimeWindowPartitions,
};
pub use policy::{
    AutoMaterializePolicy, AutoMaterializePolicyType, AutoMaterializeRule, FreshnessPolicy,
    PolicyError, RuleDecision,
};
pub use subset::{IndexRange, PartitionKeys, PartitionSubset};

