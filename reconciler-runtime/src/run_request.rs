//! Run requests emitted by a reconciliation tick

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use reconciler_core::{AssetGraph, AssetKey, PartitionContext};

/// Tag carrying the partition key of a partitioned run
pub const PARTITION_TAG: &str = "reconciler/partition";

/// Tag marking runs requested by the reconciler
pub const AUTO_MATERIALIZE_TAG: &str = "reconciler/auto_materialize";

/// Errors raised when a run request violates its invariants
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum RunRequestError {
    #[error("Run request must select at least one asset")]
    EmptySelection,

    #[error("Run request selects unknown asset: {0}")]
    UnknownAsset(AssetKey),

    #[error("Asset {asset} is not partitioned but the run request has partition key {partition_key}")]
    UnpartitionedAsset { asset: AssetKey, partition_key: String },

    #[error("Asset {0} is partitioned but the run request has no partition key")]
    MissingPartitionKey(AssetKey),

    #[error("Assets {first} and {second} have different partitions definitions")]
    MixedPartitioning { first: AssetKey, second: AssetKey },

    #[error("Partition key {partition_key} is not valid for asset {asset}")]
    InvalidPartitionKey { asset: AssetKey, partition_key: String },
}

/// One unit of requested execution
///
/// The partition key, when set, applies to every selected asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRequest {
    pub asset_selection: BTreeSet<AssetKey>,
    pub partition_key: Option<String>,
    pub tags: BTreeMap<String, String>,
}

impl RunRequest {
    /// Build a validated run request
    pub fn new(
        graph: &AssetGraph,
        asset_selection: BTreeSet<AssetKey>,
        partition_key: Option<String>,
        ctx: &PartitionContext<'_>,
    ) -> Result<Self, RunRequestError> {
        let mut assets = asset_selection.iter();
        let first = assets.next().ok_or(RunRequestError::EmptySelection)?;
        let first_def = graph
            .node(first)
            .ok_or_else(|| RunRequestError::UnknownAsset(first.clone()))?
            .partitions_def
            .as_ref();

        for asset in assets {
            let node = graph
                .node(asset)
                .ok_or_else(|| RunRequestError::UnknownAsset(asset.clone()))?;
            if node.partitions_def.as_ref() != first_def {
                return Err(RunRequestError::MixedPartitioning {
                    first: first.clone(),
                    second: asset.clone(),
                });
            }
        }

        match (&partition_key, first_def) {
            (Some(partition_key), None) => {
                return Err(RunRequestError::UnpartitionedAsset {
                    asset: first.clone(),
                    partition_key: partition_key.clone(),
                })
            }
            (None, Some(_)) => return Err(RunRequestError::MissingPartitionKey(first.clone())),
            (Some(partition_key), Some(def)) if !def.has_partition_key(partition_key, ctx) => {
                return Err(RunRequestError::InvalidPartitionKey {
                    asset: first.clone(),
                    partition_key: partition_key.clone(),
                })
            }
            _ => {}
        }

        let mut tags = BTreeMap::new();
        if let Some(partition_key) = &partition_key {
            tags.insert(PARTITION_TAG.to_string(), partition_key.clone());
        }

        Ok(Self {
            asset_selection,
            partition_key,
            tags,
        })
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Smallest selected asset key, used for ordering
    pub fn min_asset_key(&self) -> Option<&AssetKey> {
        self.asset_selection.iter().next()
    }
}
