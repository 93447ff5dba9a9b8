//! Condition evaluation
//!
//! For one asset, the [`ConditionEvaluator`] classifies partitions into named
//! [`AutoMaterializeCondition`]s and derives the asset's decision subset:
//!
//! 1. positive conditions (`Missing`, `ParentMaterialized`, `ParentOutdated`,
//!    `FreshnessPolicyNotSatisfied`) are unioned into the candidates
//! 2. negative conditions (`ParentMissing`, `AncestorOutdated`,
//!    `SkippedBecauseNonExecutable`, `Excluded`) are computed over the
//!    candidates and subtracted
//! 3. the discard condition (`MaxMaterializationsExceeded`) trims what is left
//!    to the policy's rate limit, keeping the most recent partitions
//!
//! Evaluation only reads the graph, the history snapshot and the decisions
//! already made for the asset's parents during this tick.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use tracing::warn;

use reconciler_core::{
    AssetGraph, AssetKey, AssetKeyPartitionKey, AssetNode, AutoMaterializePolicy,
    AutoMaterializeRule, FreshnessPolicy, HistorySnapshot, MaterializationRecord, PartitionContext,
    PartitionError, PartitionMappingError, PartitionSubset, PartitionsDefinition,
};

/// Effect of a condition on the decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionType {
    Materialize,
    Skip,
    Discard,
}

/// A reason for a partition to be, or not be, materialized
///
/// Variants are declared in evaluation order, so ordered maps keyed by
/// condition iterate in that order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoMaterializeCondition {
    /// Never materialized
    Missing,
    /// A parent was materialized with new data since this partition was
    ParentMaterialized,
    /// A parent will be materialized this tick
    ParentOutdated,
    /// Latest materialization is older than the freshness policy allows
    FreshnessPolicyNotSatisfied,
    /// A required parent partition is neither materialized nor requested
    ParentMissing,
    /// A parent partition that is not requested this tick has an ancestor
    /// with newer or missing data
    AncestorOutdated,
    /// Source assets cannot be materialized
    SkippedBecauseNonExecutable,
    /// Excluded by the evaluation context
    Excluded,
    /// Over the policy's rate limit
    MaxMaterializationsExceeded,
}

impl AutoMaterializeCondition {
    /// Every condition, in the order it is evaluated
    pub const EVALUATION_ORDER: [AutoMaterializeCondition; 9] = [
        AutoMaterializeCondition::Missing,
        AutoMaterializeCondition::ParentMaterialized,
        AutoMaterializeCondition::ParentOutdated,
        AutoMaterializeCondition::FreshnessPolicyNotSatisfied,
        AutoMaterializeCondition::ParentMissing,
        AutoMaterializeCondition::AncestorOutdated,
        AutoMaterializeCondition::SkippedBecauseNonExecutable,
        AutoMaterializeCondition::Excluded,
        AutoMaterializeCondition::MaxMaterializationsExceeded,
    ];

    pub fn decision_type(self) -> DecisionType {
        match self {
            AutoMaterializeCondition::Missing
            | AutoMaterializeCondition::ParentMaterialized
            | AutoMaterializeCondition::ParentOutdated
            | AutoMaterializeCondition::FreshnessPolicyNotSatisfied => DecisionType::Materialize,
            AutoMaterializeCondition::ParentMissing
            | AutoMaterializeCondition::AncestorOutdated
            | AutoMaterializeCondition::SkippedBecauseNonExecutable
            | AutoMaterializeCondition::Excluded => DecisionType::Skip,
            AutoMaterializeCondition::MaxMaterializationsExceeded => DecisionType::Discard,
        }
    }
}

impl fmt::Display for AutoMaterializeCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AutoMaterializeCondition::Missing => "missing",
            AutoMaterializeCondition::ParentMaterialized => "parent_materialized",
            AutoMaterializeCondition::ParentOutdated => "parent_outdated",
            AutoMaterializeCondition::FreshnessPolicyNotSatisfied => "freshness_policy_not_satisfied",
            AutoMaterializeCondition::ParentMissing => "parent_missing",
            AutoMaterializeCondition::AncestorOutdated => "ancestor_outdated",
            AutoMaterializeCondition::SkippedBecauseNonExecutable => "skipped_because_non_executable",
            AutoMaterializeCondition::Excluded => "excluded",
            AutoMaterializeCondition::MaxMaterializationsExceeded => "max_materializations_exceeded",
        };
        f.write_str(name)
    }
}

/// Partitions of an asset excluded from automatic materialization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "keys", rename_all = "snake_case")]
pub enum PartitionSelection {
    /// The whole asset
    All,
    /// Only these partition keys
    Keys(BTreeSet<String>),
}

/// Errors that drop one asset's decision for the tick
#[derive(Debug, thiserror::Error)]
pub enum EvaluationError {
    #[error("Unknown asset: {0}")]
    UnknownAsset(AssetKey),

    #[error("Invalid materialization history for {asset}: {source}")]
    InvalidHistory {
        asset: AssetKey,
        source: PartitionError,
    },

    #[error("Partition subset error while evaluating {asset}: {source}")]
    Subset {
        asset: AssetKey,
        source: PartitionError,
    },
}

/// Per-tick memo of parents' materialized subsets, keyed by asset, and of
/// which partitions are out of date with their ancestors
#[derive(Debug, Default)]
pub struct TickCache {
    materialized: HashMap<AssetKey, PartitionSubset>,
    outdated: HashMap<AssetKeyPartitionKey, bool>,
}

impl TickCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn materialized_subset(
        &mut self,
        key: &AssetKey,
        compute: impl FnOnce() -> PartitionSubset,
    ) -> &PartitionSubset {
        self.materialized.entry(key.clone()).or_insert_with(compute)
    }

    /// Number of cached assets
    pub fn len(&self) -> usize {
        self.materialized.len()
    }

    pub fn is_empty(&self) -> bool {
        self.materialized.is_empty()
    }
}

/// Inputs for evaluating one asset
pub struct AssetConditionInput<'a> {
    pub asset_key: &'a AssetKey,
    pub policy: &'a AutoMaterializePolicy,
    pub exclusion: Option<&'a PartitionSelection>,
    /// Decisions made this tick for assets evaluated before this one
    pub parent_decisions: &'a BTreeMap<AssetKey, PartitionSubset>,
}

/// Conditions and resulting decision for one asset
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionOutcome {
    pub conditions: BTreeMap<AutoMaterializeCondition, PartitionSubset>,
    pub decision: PartitionSubset,
    /// Problems that did not prevent evaluation, such as unmappable edges
    pub warnings: Vec<String>,
}

impl ConditionOutcome {
    fn record(&mut self, condition: AutoMaterializeCondition, subset: PartitionSubset) {
        if !subset.is_empty() {
            self.conditions.insert(condition, subset);
        }
    }

    fn warn(&mut self, message: String) {
        if !self.warnings.contains(&message) {
            self.warnings.push(message);
        }
    }

    /// Union of every recorded subset of the given decision type
    fn union_of(
        &self,
        decision_type: DecisionType,
        empty: &PartitionSubset,
    ) -> Result<PartitionSubset, PartitionError> {
        self.conditions
            .iter()
            .filter(|(condition, _)| condition.decision_type() == decision_type)
            .try_fold(empty.clone(), |acc, (_, subset)| acc.union(subset))
    }
}

/// Evaluates auto-materialize conditions against one tick's snapshot
pub struct ConditionEvaluator<'a> {
    graph: &'a AssetGraph,
    history: &'a HistorySnapshot,
    partitions: PartitionContext<'a>,
    respect_data_versions: bool,
}

impl<'a> ConditionEvaluator<'a> {
    pub fn new(
        graph: &'a AssetGraph,
        history: &'a HistorySnapshot,
        partitions: PartitionContext<'a>,
        respect_data_versions: bool,
    ) -> Self {
        Self {
            graph,
            history,
            partitions,
            respect_data_versions,
        }
    }

    /// Classify the partitions of one asset and derive its decision
    pub fn evaluate(
        &self,
        input: &AssetConditionInput<'_>,
        cache: &mut TickCache,
    ) -> Result<ConditionOutcome, EvaluationError> {
        let key = input.asset_key;
        let node = self
            .graph
            .node(key)
            .ok_or_else(|| EvaluationError::UnknownAsset(key.clone()))?;
        let def = node.partitions_def.as_ref();
        let subset_error = |source| EvaluationError::Subset {
            asset: key.clone(),
            source,
        };

        let all = self
            .graph
            .all_partitions(key, &self.partitions)
            .map_err(|_| EvaluationError::UnknownAsset(key.clone()))?;
        let materialized = self
            .history
            .latest_materialization_partition_subset(key, def, &self.partitions)
            .map_err(|source| EvaluationError::InvalidHistory {
                asset: key.clone(),
                source,
            })?;
        let empty = all.empty_like();

        let mut outcome = ConditionOutcome {
            conditions: BTreeMap::new(),
            decision: empty.clone(),
            warnings: Vec::new(),
        };
        let policy = input.policy;

        if policy.has_rule(AutoMaterializeRule::MaterializeOnMissing) {
            let missing = all.subtract(&materialized).map_err(subset_error)?;
            outcome.record(AutoMaterializeCondition::Missing, missing);
        }

        if policy.has_rule(AutoMaterializeRule::MaterializeOnParentUpdated) {
            let updated = self
                .parent_materialized(node, &materialized, &mut outcome)
                .map_err(subset_error)?;
            outcome.record(AutoMaterializeCondition::ParentMaterialized, updated);

            let outdated = self
                .parent_outdated(node, &all, input.parent_decisions, &mut outcome)
                .map_err(subset_error)?;
            outcome.record(AutoMaterializeCondition::ParentOutdated, outdated);
        }

        if policy.has_rule(AutoMaterializeRule::MaterializeOnRequiredForFreshness) {
            if let Some(freshness) = &node.freshness_policy {
                let stale = self
                    .freshness_violations(node, freshness, &all, &materialized)
                    .map_err(subset_error)?;
                outcome.record(AutoMaterializeCondition::FreshnessPolicyNotSatisfied, stale);
            }
        }

        let candidates = outcome
            .union_of(DecisionType::Materialize, &empty)
            .map_err(subset_error)?;

        if !candidates.is_empty() {
            if !node.executable {
                outcome.record(
                    AutoMaterializeCondition::SkippedBecauseNonExecutable,
                    candidates.clone(),
                );
            }
            if let Some(selection) = input.exclusion {
                let excluded = self
                    .excluded(def, selection, &candidates)
                    .map_err(subset_error)?;
                outcome.record(AutoMaterializeCondition::Excluded, excluded);
            }
            if policy.has_rule(AutoMaterializeRule::SkipOnParentMissing) {
                let missing_parents = self
                    .parent_missing(node, &candidates, input.parent_decisions, cache, &mut outcome)
                    .map_err(subset_error)?;
                outcome.record(AutoMaterializeCondition::ParentMissing, missing_parents);
            }
            if policy.has_rule(AutoMaterializeRule::SkipOnParentOutdated) {
                let waiting = self.ancestor_outdated(
                    node,
                    &candidates,
                    input.parent_decisions,
                    cache,
                    &mut outcome,
                );
                outcome.record(AutoMaterializeCondition::AncestorOutdated, waiting);
            }
        }

        let skipped = outcome
            .union_of(DecisionType::Skip, &empty)
            .map_err(subset_error)?;
        let mut decision = candidates.subtract(&skipped).map_err(subset_error)?;

        if let Some(limit) = policy.max_materializations_per_minute() {
            let limit = u64::from(limit);
            if decision.len() > limit {
                let kept = decision.take_last(limit);
                let discarded = decision.subtract(&kept).map_err(subset_error)?;
                outcome.record(AutoMaterializeCondition::MaxMaterializationsExceeded, discarded);
                decision = kept;
            }
        }

        outcome.decision = decision;
        Ok(outcome)
    }

    /// Latest child partition, when parent updates on an unpartitioned
    /// parent only reach the most recent child partition
    fn latest_only(&self, def: Option<&PartitionsDefinition>) -> Option<PartitionSubset> {
        match def {
            Some(def @ (PartitionsDefinition::TimeWindow(_) | PartitionsDefinition::Dynamic(_))) => {
                Some(match def.last_partition_key(&self.partitions) {
                    Some(last) => def.subset_with_valid_keys([last], &self.partitions),
                    None => def.empty_subset(),
                })
            }
            _ => None,
        }
    }

    fn edge_warning(outcome: &mut ConditionOutcome, parent: &AssetKey, child: &AssetKey, error: impl fmt::Display) {
        warn!(
            parent = %parent,
            child = %child,
            error = %error,
            "Partition mapping failed; treating edge as unmapped"
        );
        outcome.warn(format!("partition mapping from {parent} failed: {error}"));
    }

    /// Whether a parent record is newer than the child's and, when data
    /// versions are respected, differs from the version the child consumed
    fn is_newer(
        &self,
        parent_record: &MaterializationRecord,
        child_record: &MaterializationRecord,
        input: &AssetKeyPartitionKey,
    ) -> bool {
        if parent_record.storage_id <= child_record.storage_id {
            return false;
        }
        if self.respect_data_versions {
            let consumed = child_record.input_versions.get(input);
            if let (Some(current), Some(consumed)) = (&parent_record.data_version, consumed) {
                return current != consumed;
            }
        }
        true
    }

    /// Parent partitions one child partition depends on
    fn parent_partitions(
        &self,
        child: &AssetKey,
        partition: Option<&str>,
        parent: &AssetKey,
    ) -> Result<Vec<Option<String>>, PartitionMappingError> {
        let single = match (self.graph.partitions_def(child), partition) {
            (Some(def), Some(key)) => def.subset_with_valid_keys([key], &self.partitions),
            _ => PartitionSubset::unpartitioned(true),
        };
        let upstream = self
            .graph
            .upstream_partitions(child, parent, &single, &self.partitions)?;
        Ok(match self.graph.partitions_def(parent) {
            None if upstream.is_empty() => Vec::new(),
            None => vec![None],
            Some(_) => upstream.keys().map(Some).collect(),
        })
    }

    /// Materialized partitions with a parent materialization newer than their
    /// own whose data version differs from the version they consumed
    fn parent_materialized(
        &self,
        node: &AssetNode,
        materialized: &PartitionSubset,
        outcome: &mut ConditionOutcome,
    ) -> Result<PartitionSubset, PartitionError> {
        let key = &node.key;
        let def = node.partitions_def.as_ref();
        if materialized.is_empty() {
            return Ok(materialized.empty_like());
        }
        let latest_only = self.latest_only(def);
        let mut updated: BTreeSet<Option<String>> = BTreeSet::new();

        'parents: for parent in self.graph.parents_of(key) {
            let Some(parent_history) = self.history.asset_history(parent) else {
                continue;
            };
            let parent_def = self.graph.partitions_def(parent);

            for (parent_partition, parent_record) in parent_history.records() {
                let single = match (parent_def, parent_partition) {
                    (None, None) => PartitionSubset::unpartitioned(true),
                    (Some(pd), Some(pk)) if pd.has_partition_key(pk, &self.partitions) => {
                        pd.subset_with_valid_keys([pk], &self.partitions)
                    }
                    _ => continue,
                };
                let mut children =
                    match self.graph.map_partitions_any(parent, key, &single, &self.partitions) {
                        Ok(children) => children,
                        Err(error) => {
                            Self::edge_warning(outcome, parent, key, error);
                            continue 'parents;
                        }
                    };
                if parent_def.is_none() {
                    if let Some(latest) = &latest_only {
                        children = children.intersect(latest)?;
                    }
                }
                let children = children.intersect(materialized)?;
                if children.is_empty() {
                    continue;
                }

                let input = AssetKeyPartitionKey::new(parent.clone(), parent_partition.map(str::to_string));
                let child_partitions: Vec<Option<String>> = match def {
                    None => vec![None],
                    Some(_) => children.keys().map(Some).collect(),
                };
                for child_partition in child_partitions {
                    let Some(child_record) = self.history.latest_record(key, child_partition.as_deref())
                    else {
                        continue;
                    };
                    if self.is_newer(parent_record, child_record, &input) {
                        updated.insert(child_partition);
                    }
                }
            }
        }

        Ok(match def {
            None => PartitionSubset::unpartitioned(!updated.is_empty()),
            Some(def) => def.subset_with_valid_keys(updated.iter().flatten(), &self.partitions),
        })
    }

    /// Partitions depending on any parent partition requested this tick
    fn parent_outdated(
        &self,
        node: &AssetNode,
        all: &PartitionSubset,
        parent_decisions: &BTreeMap<AssetKey, PartitionSubset>,
        outcome: &mut ConditionOutcome,
    ) -> Result<PartitionSubset, PartitionError> {
        let key = &node.key;
        let latest_only = self.latest_only(node.partitions_def.as_ref());
        let mut outdated = all.empty_like();

        for parent in self.graph.parents_of(key) {
            let Some(decision) = parent_decisions.get(parent) else {
                continue;
            };
            if decision.is_empty() {
                continue;
            }
            let mut mapped = match self.graph.map_partitions_any(parent, key, decision, &self.partitions) {
                Ok(mapped) => mapped,
                Err(error) => {
                    Self::edge_warning(outcome, parent, key, error);
                    continue;
                }
            };
            if self.graph.partitions_def(parent).is_none() {
                if let Some(latest) = &latest_only {
                    mapped = mapped.intersect(latest)?;
                }
            }
            outdated = outdated.union(&mapped)?;
        }

        outdated.intersect(all)
    }

    /// Partitions whose latest materialization is too old, or that were never
    /// materialized
    fn freshness_violations(
        &self,
        node: &AssetNode,
        freshness: &FreshnessPolicy,
        all: &PartitionSubset,
        materialized: &PartitionSubset,
    ) -> Result<PartitionSubset, PartitionError> {
        let now = self.partitions.current_time;
        let is_stale = |partition: Option<&str>| match self.history.latest_record(&node.key, partition) {
            Some(record) => !freshness.is_satisfied(record.timestamp, now),
            None => true,
        };

        Ok(match node.partitions_def.as_ref() {
            None => PartitionSubset::unpartitioned(!all.is_empty() && is_stale(None)),
            Some(def @ PartitionsDefinition::TimeWindow(_)) => match all.last_key() {
                Some(last) if is_stale(Some(last.as_str())) => {
                    def.subset_with_valid_keys([last], &self.partitions)
                }
                _ => def.empty_subset(),
            },
            Some(def) => {
                let stale: Vec<String> = materialized
                    .keys()
                    .filter(|partition| is_stale(Some(partition.as_str())))
                    .collect();
                def.subset_with_valid_keys(stale, &self.partitions)
            }
        })
    }

    fn excluded(
        &self,
        def: Option<&PartitionsDefinition>,
        selection: &PartitionSelection,
        candidates: &PartitionSubset,
    ) -> Result<PartitionSubset, PartitionError> {
        match (selection, def) {
            (PartitionSelection::All, _) => Ok(candidates.clone()),
            (PartitionSelection::Keys(_), None) => Ok(candidates.empty_like()),
            (PartitionSelection::Keys(keys), Some(def)) => def
                .subset_with_valid_keys(keys, &self.partitions)
                .intersect(candidates),
        }
    }

    /// Candidates with a required parent partition that is neither
    /// materialized nor requested this tick. Source parents never count as
    /// missing.
    fn parent_missing(
        &self,
        node: &AssetNode,
        candidates: &PartitionSubset,
        parent_decisions: &BTreeMap<AssetKey, PartitionSubset>,
        cache: &mut TickCache,
        outcome: &mut ConditionOutcome,
    ) -> Result<PartitionSubset, PartitionError> {
        let key = &node.key;
        let mut missing = candidates.empty_like();

        for parent in self.graph.parents_of(key) {
            if !self.graph.is_executable(parent) {
                continue;
            }
            let parent_def = self.graph.partitions_def(parent);
            let materialized = cache
                .materialized_subset(parent, || {
                    self.history
                        .valid_materialized_subset(parent, parent_def, &self.partitions)
                })
                .clone();
            let available = match parent_decisions.get(parent) {
                Some(decision) => match materialized.union(decision) {
                    Ok(available) => available,
                    Err(error) => {
                        Self::edge_warning(outcome, parent, key, error);
                        materialized
                    }
                },
                None => materialized,
            };
            let covered = match self.graph.map_partitions(parent, key, &available, &self.partitions) {
                Ok(covered) => covered,
                Err(error) => {
                    Self::edge_warning(outcome, parent, key, error);
                    candidates.empty_like()
                }
            };
            missing = missing.union(&candidates.subtract(&covered)?)?;
        }

        Ok(missing)
    }

    /// Candidates with a parent partition that is not requested this tick
    /// and is out of date with its own ancestors
    fn ancestor_outdated(
        &self,
        node: &AssetNode,
        candidates: &PartitionSubset,
        parent_decisions: &BTreeMap<AssetKey, PartitionSubset>,
        cache: &mut TickCache,
        outcome: &mut ConditionOutcome,
    ) -> PartitionSubset {
        let key = &node.key;
        let partitions: Vec<Option<String>> = match node.partitions_def {
            None if candidates.is_empty() => Vec::new(),
            None => vec![None],
            Some(_) => candidates.keys().map(Some).collect(),
        };
        let mut waiting: Vec<Option<String>> = Vec::new();

        'candidates: for partition in partitions {
            for parent in self.graph.parents_of(key) {
                let parent_partitions = match self.parent_partitions(key, partition.as_deref(), parent) {
                    Ok(parent_partitions) => parent_partitions,
                    Err(error) => {
                        Self::edge_warning(outcome, parent, key, error);
                        continue;
                    }
                };
                for parent_partition in parent_partitions {
                    if is_requested(parent_decisions, parent, parent_partition.as_deref()) {
                        continue;
                    }
                    let parent_key = AssetKeyPartitionKey::new(parent.clone(), parent_partition);
                    if self.is_outdated(&parent_key, cache, outcome) {
                        waiting.push(partition);
                        continue 'candidates;
                    }
                }
            }
        }

        match node.partitions_def.as_ref() {
            None => PartitionSubset::unpartitioned(!waiting.is_empty()),
            Some(def) => def.subset_with_valid_keys(waiting.iter().flatten(), &self.partitions),
        }
    }

    /// Whether a partition was never materialized, has a parent with newer or
    /// missing data, or has such a partition among its ancestors. Source
    /// assets are never outdated.
    fn is_outdated(
        &self,
        partition: &AssetKeyPartitionKey,
        cache: &mut TickCache,
        outcome: &mut ConditionOutcome,
    ) -> bool {
        if let Some(&outdated) = cache.outdated.get(partition) {
            return outdated;
        }
        let outdated = self.check_outdated(partition, cache, outcome);
        cache.outdated.insert(partition.clone(), outdated);
        outdated
    }

    fn check_outdated(
        &self,
        partition: &AssetKeyPartitionKey,
        cache: &mut TickCache,
        outcome: &mut ConditionOutcome,
    ) -> bool {
        let key = &partition.asset_key;
        let partition_key = partition.partition_key.as_deref();
        if !self.graph.is_executable(key) {
            return false;
        }
        let Some(record) = self.history.latest_record(key, partition_key) else {
            return true;
        };
        // updates of an unpartitioned parent only reach the latest partition
        let behind_latest = match (self.latest_only(self.graph.partitions_def(key)), partition_key) {
            (Some(latest), Some(partition_key)) => !latest.contains(partition_key),
            _ => false,
        };

        for parent in self.graph.parents_of(key) {
            if !self.graph.is_executable(parent) {
                continue;
            }
            let parent_partitions = match self.parent_partitions(key, partition_key, parent) {
                Ok(parent_partitions) => parent_partitions,
                Err(error) => {
                    Self::edge_warning(outcome, parent, key, error);
                    continue;
                }
            };
            let tracks_updates = !(behind_latest && self.graph.partitions_def(parent).is_none());
            for parent_partition in parent_partitions {
                let input = AssetKeyPartitionKey::new(parent.clone(), parent_partition);
                match self.history.latest_record(parent, input.partition_key.as_deref()) {
                    None => return true,
                    Some(parent_record) if tracks_updates && self.is_newer(parent_record, record, &input) => {
                        return true
                    }
                    Some(_) => {
                        if self.is_outdated(&input, cache, outcome) {
                            return true;
                        }
                    }
                }
            }
        }
        false
    }
}

fn is_requested(
    parent_decisions: &BTreeMap<AssetKey, PartitionSubset>,
    parent: &AssetKey,
    partition: Option<&str>,
) -> bool {
    parent_decisions
        .get(parent)
        .is_some_and(|decision| match partition {
            Some(key) => decision.contains(key),
            None => !decision.is_empty(),
        })
}
