//! Per-asset evaluation records

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use reconciler_core::{AssetKey, PartitionSubset};

use crate::condition::{AutoMaterializeCondition, ConditionOutcome, DecisionType};

/// Decision trail for one asset on one tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoMaterializeAssetEvaluation {
    pub asset_key: AssetKey,
    pub conditions: BTreeMap<AutoMaterializeCondition, PartitionSubset>,
    pub decision: PartitionSubset,
    /// Partitions requested this tick
    pub num_requested: u64,
    /// Candidate partitions removed by a skip condition
    pub num_skipped: u64,
    /// Candidate partitions dropped by the rate limit
    pub num_discarded: u64,
    /// Set when the asset could not be evaluated; the decision is then empty
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl AutoMaterializeAssetEvaluation {
    pub fn from_outcome(asset_key: AssetKey, outcome: ConditionOutcome) -> Self {
        let count = |decision_type: DecisionType| -> u64 {
            outcome
                .conditions
                .iter()
                .filter(|(condition, _)| condition.decision_type() == decision_type)
                .map(|(_, subset)| subset.len())
                .sum()
        };
        let num_skipped = count(DecisionType::Skip);
        let num_discarded = count(DecisionType::Discard);

        Self {
            asset_key,
            num_requested: outcome.decision.len(),
            num_skipped,
            num_discarded,
            conditions: outcome.conditions,
            decision: outcome.decision,
            error: None,
            warnings: outcome.warnings,
        }
    }

    /// Record for an asset whose evaluation failed
    pub fn failed(asset_key: AssetKey, empty: PartitionSubset, error: impl ToString) -> Self {
        Self {
            asset_key,
            conditions: BTreeMap::new(),
            decision: empty,
            num_requested: 0,
            num_skipped: 0,
            num_discarded: 0,
            error: Some(error.to_string()),
            warnings: Vec::new(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn condition(&self, condition: AutoMaterializeCondition) -> Option<&PartitionSubset> {
        self.conditions.get(&condition)
    }
}
