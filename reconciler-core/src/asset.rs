//! Asset definitions
//!
//! Assets are persistent data artifacts (tables, files, ML models, reports)
//! identified by a hierarchical [`AssetKey`]. An [`AssetNode`] is the
//! reconciler's view of one asset: its partitioning, its parents, and the
//! policies that decide when it should be materialized.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::partitions::PartitionsDefinition;
use crate::partition_mapping::PartitionMapping;
use crate::policy::{AutoMaterializePolicy, FreshnessPolicy};

/// Stable identity of an asset: a path of string segments.
///
/// Keys are totally ordered by their path segments, which makes every
/// tie-break in the reconciler lexicographic.
///
/// ```
/// use reconciler_core::AssetKey;
///
/// let key = AssetKey::from("warehouse/orders");
/// assert_eq!(key.path(), ["warehouse", "orders"]);
/// assert_eq!(key.to_string(), "warehouse/orders");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetKey(Vec<String>);

impl AssetKey {
    /// Create a key from its path segments
    pub fn new<I, S>(path: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(path.into_iter().map(Into::into).collect())
    }

    /// Parse a slash-separated user string (`"a/b/c"`)
    pub fn from_user_string(value: &str) -> Self {
        Self::new(value.split('/').filter(|segment| !segment.is_empty()))
    }

    /// Path segments of the key
    pub fn path(&self) -> &[String] {
        &self.0
    }

    /// Last path segment, used as a short display name
    pub fn name(&self) -> &str {
        self.0.last().map(String::as_str).unwrap_or_default()
    }

    /// Key with an extra leading segment
    pub fn with_prefix(&self, prefix: impl Into<String>) -> Self {
        let mut path = Vec::with_capacity(self.0.len() + 1);
        path.push(prefix.into());
        path.extend(self.0.iter().cloned());
        Self(path)
    }
}

impl fmt::Display for AssetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("/"))
    }
}

impl From<&str> for AssetKey {
    fn from(value: &str) -> Self {
        Self::from_user_string(value)
    }
}

impl From<String> for AssetKey {
    fn from(value: String) -> Self {
        Self::from_user_string(&value)
    }
}

/// One addressable unit of work: an asset plus an optional partition key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AssetKeyPartitionKey {
    pub asset_key: AssetKey,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub partition_key: Option<String>,
}

impl AssetKeyPartitionKey {
    pub fn new(asset_key: AssetKey, partition_key: Option<String>) -> Self {
        Self {
            asset_key,
            partition_key,
        }
    }

    pub fn unpartitioned(asset_key: AssetKey) -> Self {
        Self::new(asset_key, None)
    }

    pub fn partitioned(asset_key: AssetKey, partition_key: impl Into<String>) -> Self {
        Self::new(asset_key, Some(partition_key.into()))
    }
}

impl fmt::Display for AssetKeyPartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.partition_key {
            Some(partition) => write!(f, "{}[{}]", self.asset_key, partition),
            None => write!(f, "{}", self.asset_key),
        }
    }
}

/// Edge from an asset to one of its parents
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetDependency {
    /// Key of the upstream asset
    pub upstream: AssetKey,

    /// Explicit partition mapping for this edge; inferred when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition_mapping: Option<PartitionMapping>,
}

/// Descriptive metadata carried through to run requests and logs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetMetadata {
    /// Description of the asset
    pub description: Option<String>,

    /// Owner/creator of the asset
    pub owner: Option<String>,

    /// Group the asset belongs to
    pub group: Option<String>,

    /// Tags for categorization
    pub tags: Vec<String>,
}

/// An asset as seen by the reconciler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetNode {
    /// Asset identity
    pub key: AssetKey,

    /// Partitioning scheme; `None` means unpartitioned
    pub partitions_def: Option<PartitionsDefinition>,

    /// Parents of this asset
    pub dependencies: Vec<AssetDependency>,

    /// Policy driving automatic materialization; assets without one are
    /// never evaluated unless selected explicitly
    pub auto_materialize_policy: Option<AutoMaterializePolicy>,

    /// Maximum tolerated staleness
    pub freshness_policy: Option<FreshnessPolicy>,

    /// Source assets are observable but cannot be materialized
    pub executable: bool,

    pub metadata: AssetMetadata,
}

impl AssetNode {
    /// Create an unpartitioned, executable asset with no parents
    pub fn new(key: impl Into<AssetKey>) -> Self {
        Self {
            key: key.into(),
            partitions_def: None,
            dependencies: Vec::new(),
            auto_materialize_policy: None,
            freshness_policy: None,
            executable: true,
            metadata: AssetMetadata::default(),
        }
    }

    /// Start a fluent builder
    pub fn builder(key: impl Into<AssetKey>) -> AssetBuilder {
        AssetBuilder::new(key)
    }

    /// Keys of all parents, in declaration order
    pub fn parent_keys(&self) -> impl Iterator<Item = &AssetKey> {
        self.dependencies.iter().map(|dep| &dep.upstream)
    }

    pub fn is_partitioned(&self) -> bool {
        self.partitions_def.is_some()
    }
}

/// Builder for creating asset nodes
///
/// ```
/// use reconciler_core::{AssetNode, AutoMaterializePolicy, PartitionsDefinition};
///
/// let node = AssetNode::builder("hourly2")
///     .partitions(PartitionsDefinition::hourly("2013-01-05-00:00").unwrap())
///     .depends_on("hourly1")
///     .auto_materialize_policy(AutoMaterializePolicy::eager())
///     .build();
///
/// assert_eq!(node.dependencies.len(), 1);
/// assert!(node.is_partitioned());
/// ```
pub struct AssetBuilder {
    node: AssetNode,
}

impl AssetBuilder {
    pub fn new(key: impl Into<AssetKey>) -> Self {
        Self {
            node: AssetNode::new(key),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.node.metadata.description = Some(description.into());
        self
    }

    pub fn owner(mut self, owner: impl Into<String>) -> Self {
        self.node.metadata.owner = Some(owner.into());
        self
    }

    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.node.metadata.group = Some(group.into());
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.node.metadata.tags.push(tag.into());
        self
    }

    /// Set the partitioning scheme
    pub fn partitions(mut self, partitions_def: PartitionsDefinition) -> Self {
        self.node.partitions_def = Some(partitions_def);
        self
    }

    /// Add a parent with an inferred partition mapping
    pub fn depends_on(mut self, upstream: impl Into<AssetKey>) -> Self {
        self.node.dependencies.push(AssetDependency {
            upstream: upstream.into(),
            partition_mapping: None,
        });
        self
    }

    /// Add a parent with an explicit partition mapping
    pub fn depends_on_with_mapping(
        mut self,
        upstream: impl Into<AssetKey>,
        mapping: PartitionMapping,
    ) -> Self {
        self.node.dependencies.push(AssetDependency {
            upstream: upstream.into(),
            partition_mapping: Some(mapping),
        });
        self
    }

    pub fn auto_materialize_policy(mut self, policy: AutoMaterializePolicy) -> Self {
        self.node.auto_materialize_policy = Some(policy);
        self
    }

    pub fn freshness_policy(mut self, policy: FreshnessPolicy) -> Self {
        self.node.freshness_policy = Some(policy);
        self
    }

    /// Mark the asset as a source asset that cannot be materialized
    pub fn non_executable(mut self) -> Self {
        self.node.executable = false;
        self
    }

    pub fn build(self) -> AssetNode {
        self.node
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_asset_key_ordering_is_lexicographic_by_segment() {
        let mut keys = vec![
            AssetKey::from("b"),
            AssetKey::from("a/z"),
            AssetKey::from("a"),
            AssetKey::from("a/b"),
        ];
        keys.sort();
        let rendered: Vec<String> = keys.iter().map(ToString::to_string).collect();
        assert_eq!(rendered, vec!["a", "a/b", "a/z", "b"]);
    }

    #[test]
    fn test_asset_key_from_user_string_ignores_empty_segments() {
        let key = AssetKey::from("/raw//events/");
        assert_eq!(key.path(), ["raw", "events"]);
        assert_eq!(key.name(), "events");
    }

    #[test]
    fn test_asset_key_with_prefix() {
        let key = AssetKey::from("orders").with_prefix("warehouse");
        assert_eq!(key, AssetKey::new(["warehouse", "orders"]));
    }

    #[test]
    fn test_asset_key_serializes_as_path() {
        let key = AssetKey::from("a/b");
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, r#"["a","b"]"#);
    }

    #[test]
    fn test_asset_key_partition_key_display() {
        let unpartitioned = AssetKeyPartitionKey::unpartitioned(AssetKey::from("a"));
        let partitioned = AssetKeyPartitionKey::partitioned(AssetKey::from("a/b"), "2024-01-01");
        assert_eq!(unpartitioned.to_string(), "a");
        assert_eq!(partitioned.to_string(), "a/b[2024-01-01]");
    }

    #[test]
    fn test_asset_builder() {
        let node = AssetNode::builder("customers")
            .description("Customer dimension")
            .owner("data-team")
            .group("warehouse")
            .tag("pii")
            .depends_on("raw_customers")
            .depends_on_with_mapping("regions", PartitionMapping::AllPartitions)
            .freshness_policy(FreshnessPolicy::new(60))
            .build();

        assert_eq!(node.key, AssetKey::from("customers"));
        assert_eq!(node.metadata.description.as_deref(), Some("Customer dimension"));
        assert_eq!(node.metadata.group.as_deref(), Some("warehouse"));
        assert_eq!(node.metadata.tags, vec!["pii"]);
        assert!(node.executable);
        assert!(!node.is_partitioned());
        assert!(node.auto_materialize_policy.is_none());

        let parents: Vec<&AssetKey> = node.parent_keys().collect();
        assert_eq!(parents, vec![&AssetKey::from("raw_customers"), &AssetKey::from("regions")]);
        assert_eq!(
            node.dependencies[1].partition_mapping,
            Some(PartitionMapping::AllPartitions)
        );
    }

    #[test]
    fn test_non_executable_asset() {
        let node = AssetNode::builder("source").non_executable().build();
        assert!(!node.executable);
    }
}
