//! Reconciliation planner
//!
//! [`reconcile`] walks the asset graph in topological order and evaluates
//! every asset that has an auto-materialize policy (and is in the selection,
//! when one is set). Each asset sees the decisions already made for its
//! parents during the same pass. The per-asset decisions are then batched
//! into run requests.
//!
//! A failure while evaluating one asset never aborts the tick: the asset's
//! decision becomes empty, the error is attached to its evaluation record and
//! its children are evaluated against that empty decision.
//!
//! # Example
//!
//! ```
//! use chrono::{TimeZone, Utc};
//! use reconciler_core::{AssetGraph, AssetNode, AutoMaterializePolicy};
//! use reconciler_runtime::planner::{reconcile, EvaluationContext, TickSnapshot};
//!
//! let graph = AssetGraph::from_assets(vec![AssetNode::builder("orders")
//!     .auto_materialize_policy(AutoMaterializePolicy::eager())
//!     .build()])
//! .unwrap();
//!
//! let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
//! let result = reconcile(&graph, &TickSnapshot::default(), &EvaluationContext::new(now)).unwrap();
//!
//! assert_eq!(result.run_requests.len(), 1);
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, instrument, warn};

use reconciler_core::{
    AssetGraph, AssetKey, AssetNode, AutoMaterializePolicy, DynamicPartitionsSnapshot,
    HistorySnapshot, PartitionContext, PartitionSubset,
};

use crate::batcher::build_run_requests;
use crate::condition::{AssetConditionInput, ConditionEvaluator, PartitionSelection, TickCache};
use crate::evaluation::AutoMaterializeAssetEvaluation;
use crate::metrics::{EVALUATION_ERRORS_TOTAL, PARTITIONS_TOTAL};
use crate::run_request::{RunRequest, AUTO_MATERIALIZE_TAG};
use crate::state_machine::{TickState, TickStateMachine};
use crate::{Error, Result};

/// Per-tick evaluation settings
#[derive(Debug, Clone)]
pub struct EvaluationContext {
    pub evaluation_time: DateTime<Utc>,

    /// When false, any newer parent materialization counts as an update
    pub respect_materialization_data_versions: bool,

    /// Restrict evaluation to these assets
    pub asset_selection: Option<BTreeSet<AssetKey>>,

    /// Policies replacing the ones declared on the assets
    pub policy_overrides: BTreeMap<AssetKey, AutoMaterializePolicy>,

    /// Partitions that must never be requested; exclusion wins over every
    /// materialize condition
    pub exclusions: BTreeMap<AssetKey, PartitionSelection>,

    /// Tags added to every run request
    pub run_tags: BTreeMap<String, String>,
}

impl EvaluationContext {
    pub fn new(evaluation_time: DateTime<Utc>) -> Self {
        Self {
            evaluation_time,
            respect_materialization_data_versions: true,
            asset_selection: None,
            policy_overrides: BTreeMap::new(),
            exclusions: BTreeMap::new(),
            run_tags: BTreeMap::new(),
        }
    }

    pub fn with_respect_data_versions(mut self, respect: bool) -> Self {
        self.respect_materialization_data_versions = respect;
        self
    }

    pub fn with_asset_selection(mut self, selection: impl IntoIterator<Item = AssetKey>) -> Self {
        self.asset_selection = Some(selection.into_iter().collect());
        self
    }

    pub fn with_policy_override(mut self, key: AssetKey, policy: AutoMaterializePolicy) -> Self {
        self.policy_overrides.insert(key, policy);
        self
    }

    pub fn with_exclusion(mut self, key: AssetKey, selection: PartitionSelection) -> Self {
        self.exclusions.insert(key, selection);
        self
    }

    pub fn with_run_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.run_tags.insert(key.into(), value.into());
        self
    }

    /// Policy the asset is evaluated with, or `None` when it is not evaluated
    pub fn policy_for<'a>(&'a self, node: &'a AssetNode) -> Option<&'a AutoMaterializePolicy> {
        if let Some(selection) = &self.asset_selection {
            if !selection.contains(&node.key) {
                return None;
            }
        }
        self.policy_overrides
            .get(&node.key)
            .or(node.auto_materialize_policy.as_ref())
    }
}

/// Read-only inputs loaded at the start of a tick
#[derive(Debug, Clone, Default)]
pub struct TickSnapshot {
    pub history: HistorySnapshot,
    pub dynamic_partitions: DynamicPartitionsSnapshot,
}

impl TickSnapshot {
    pub fn new(history: HistorySnapshot, dynamic_partitions: DynamicPartitionsSnapshot) -> Self {
        Self {
            history,
            dynamic_partitions,
        }
    }
}

/// Output of one tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickResult {
    pub evaluation_time: DateTime<Utc>,
    pub run_requests: Vec<RunRequest>,
    /// One record per evaluated asset, ordered by asset key
    pub evaluations: Vec<AutoMaterializeAssetEvaluation>,
}

impl TickResult {
    pub fn evaluation(&self, key: &AssetKey) -> Option<&AutoMaterializeAssetEvaluation> {
        self.evaluations
            .binary_search_by(|evaluation| evaluation.asset_key.cmp(key))
            .ok()
            .map(|index| &self.evaluations[index])
    }

    /// Decided subset of one asset; `None` when it was not evaluated
    pub fn decision(&self, key: &AssetKey) -> Option<&PartitionSubset> {
        self.evaluation(key).map(|evaluation| &evaluation.decision)
    }

    pub fn num_requested(&self) -> u64 {
        self.evaluations.iter().map(|e| e.num_requested).sum()
    }
}

/// Decide what to materialize for one tick
#[instrument(
    name = "reconciler.reconcile",
    skip_all,
    fields(
        evaluation_time = %ctx.evaluation_time,
        assets = graph.len(),
        run_requests = tracing::field::Empty,
    )
)]
pub fn reconcile(graph: &AssetGraph, snapshot: &TickSnapshot, ctx: &EvaluationContext) -> Result<TickResult> {
    let partitions = PartitionContext::new(ctx.evaluation_time, &snapshot.dynamic_partitions);
    let evaluator = ConditionEvaluator::new(
        graph,
        &snapshot.history,
        partitions,
        ctx.respect_materialization_data_versions,
    );
    let mut state = TickStateMachine::new();
    let mut cache = TickCache::new();
    let mut decisions: BTreeMap<AssetKey, PartitionSubset> = BTreeMap::new();
    let mut evaluations = Vec::new();

    let order = graph.toposort();
    let total = order.len();

    for (index, key) in order.iter().enumerate() {
        state
            .transition(TickState::Evaluating { index, total })
            .map_err(Error::InvalidState)?;

        let Some(node) = graph.node(key) else {
            continue;
        };
        let Some(policy) = ctx.policy_for(node) else {
            continue;
        };

        let input = AssetConditionInput {
            asset_key: key,
            policy,
            exclusion: ctx.exclusions.get(key),
            parent_decisions: &decisions,
        };
        let evaluation = match evaluator.evaluate(&input, &mut cache) {
            Ok(outcome) => AutoMaterializeAssetEvaluation::from_outcome(key.clone(), outcome),
            Err(error) => {
                warn!(asset = %key, error = %error, "Asset evaluation failed; dropping its decision");
                EVALUATION_ERRORS_TOTAL.with_label_values(&[error_kind(&error)]).inc();
                AutoMaterializeAssetEvaluation::failed(key.clone(), graph.empty_subset(key), &error)
            }
        };

        debug!(
            asset = %key,
            requested = evaluation.num_requested,
            skipped = evaluation.num_skipped,
            discarded = evaluation.num_discarded,
            "Evaluated asset"
        );
        PARTITIONS_TOTAL
            .with_label_values(&["requested"])
            .inc_by(evaluation.num_requested);
        PARTITIONS_TOTAL
            .with_label_values(&["skipped"])
            .inc_by(evaluation.num_skipped);
        PARTITIONS_TOTAL
            .with_label_values(&["discarded"])
            .inc_by(evaluation.num_discarded);

        decisions.insert(key.clone(), evaluation.decision.clone());
        evaluations.push(evaluation);
    }

    state.transition(TickState::Done).map_err(Error::InvalidState)?;

    let mut tags = ctx.run_tags.clone();
    tags.insert(AUTO_MATERIALIZE_TAG.to_string(), "true".to_string());
    let run_requests = build_run_requests(graph, &decisions, &partitions, &tags)?;

    evaluations.sort_by(|a, b| a.asset_key.cmp(&b.asset_key));
    tracing::Span::current().record("run_requests", run_requests.len());
    info!(
        evaluated = evaluations.len(),
        run_requests = run_requests.len(),
        "Reconciliation tick evaluated"
    );

    Ok(TickResult {
        evaluation_time: ctx.evaluation_time,
        run_requests,
        evaluations,
    })
}

fn error_kind(error: &crate::condition::EvaluationError) -> &'static str {
    use crate::condition::EvaluationError::*;
    match error {
        UnknownAsset(_) => "unknown_asset",
        InvalidHistory { .. } => "invalid_history",
        Subset { .. } => "subset",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use reconciler_core::{AssetKeyPartitionKey, MaterializationRecord, PartitionsDefinition};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 4, 0, 0, 0).unwrap()
    }

    fn eager(name: &str) -> reconciler_core::AssetBuilder {
        AssetNode::builder(name).auto_materialize_policy(AutoMaterializePolicy::eager())
    }

    #[test]
    fn test_assets_without_policy_are_not_evaluated() {
        let graph = AssetGraph::from_assets(vec![AssetNode::new("manual"), eager("auto").build()]).unwrap();
        let result = reconcile(&graph, &TickSnapshot::default(), &EvaluationContext::new(now())).unwrap();

        assert!(result.evaluation(&AssetKey::from("manual")).is_none());
        assert!(result.evaluation(&AssetKey::from("auto")).is_some());
        assert_eq!(result.run_requests.len(), 1);
        assert_eq!(
            result.run_requests[0].tags.get(AUTO_MATERIALIZE_TAG).map(String::as_str),
            Some("true")
        );
    }

    #[test]
    fn test_parent_decision_propagates_downstream() {
        let graph = AssetGraph::from_assets(vec![
            eager("a").build(),
            eager("b").depends_on("a").build(),
            eager("c").depends_on("b").build(),
        ])
        .unwrap();
        let result = reconcile(&graph, &TickSnapshot::default(), &EvaluationContext::new(now())).unwrap();

        // every asset is missing; parents requested this tick are not missing
        for name in ["a", "b", "c"] {
            assert_eq!(
                result.decision(&AssetKey::from(name)),
                Some(&PartitionSubset::unpartitioned(true))
            );
        }
        assert_eq!(result.run_requests.len(), 1);
        assert_eq!(result.run_requests[0].asset_selection.len(), 3);
    }

    #[test]
    fn test_selection_limits_evaluated_assets() {
        let graph = AssetGraph::from_assets(vec![eager("a").build(), eager("b").depends_on("a").build()]).unwrap();
        let ctx = EvaluationContext::new(now()).with_asset_selection([AssetKey::from("b")]);
        let result = reconcile(&graph, &TickSnapshot::default(), &ctx).unwrap();

        assert_eq!(result.evaluations.len(), 1);
        // a is neither materialized nor requested
        assert!(result.run_requests.is_empty());
    }

    #[test]
    fn test_failed_asset_is_isolated() {
        let graph = AssetGraph::from_assets(vec![
            eager("broken")
                .partitions(PartitionsDefinition::daily("2024-01-01").unwrap())
                .build(),
            eager("healthy").build(),
        ])
        .unwrap();
        let mut history = HistorySnapshot::new();
        history.record_materialization(
            AssetKeyPartitionKey::partitioned(AssetKey::from("broken"), "not-a-date"),
            MaterializationRecord::new(1, now()),
        );
        let snapshot = TickSnapshot::new(history, DynamicPartitionsSnapshot::default());

        let result = reconcile(&graph, &snapshot, &EvaluationContext::new(now())).unwrap();
        let broken = result.evaluation(&AssetKey::from("broken")).unwrap();
        assert!(broken.is_error());
        assert!(broken.decision.is_empty());
        assert_eq!(
            result.decision(&AssetKey::from("healthy")),
            Some(&PartitionSubset::unpartitioned(true))
        );
    }

    #[test]
    fn test_policy_override() {
        let graph = AssetGraph::from_assets(vec![eager("a").build()]).unwrap();
        let ctx = EvaluationContext::new(now()).with_policy_override(AssetKey::from("a"), AutoMaterializePolicy::lazy());
        let result = reconcile(&graph, &TickSnapshot::default(), &ctx).unwrap();
        assert!(result.run_requests.is_empty());
    }

    #[test]
    fn test_result_serializes() {
        let graph = AssetGraph::from_assets(vec![eager("a").build()]).unwrap();
        let result = reconcile(&graph, &TickSnapshot::default(), &EvaluationContext::new(now())).unwrap();
        let json = serde_json::to_string(&result).unwrap();
        let back: TickResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back, result);
    }
}
