//! Auto-materialize and freshness policies
//!
//! An [`AutoMaterializePolicy`] is a set of rules plus a rate limit. Each
//! materialize rule enables one positive condition; each skip rule enables one
//! negative condition. A rule that is absent disables its condition.
//!
//! # Example
//!
//! ```
//! use reconciler_core::{AutoMaterializePolicy, AutoMaterializePolicyType, AutoMaterializeRule};
//!
//! let policy = AutoMaterializePolicy::eager()
//!     .without_rules([AutoMaterializeRule::SkipOnParentMissing])
//!     .unwrap();
//!
//! assert_eq!(policy.policy_type(), AutoMaterializePolicyType::Eager);
//! assert!(!policy.has_rule(AutoMaterializeRule::SkipOnParentMissing));
//! assert_eq!(policy.max_materializations_per_minute(), Some(1));
//! ```

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Errors raised while constructing policies
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum PolicyError {
    #[error("max_materializations_per_minute must be positive, got {0}")]
    InvalidRateLimit(u32),

    #[error("Cannot remove rules that are not part of the policy: {0}")]
    UnknownRules(String),
}

/// Whether a rule adds partitions to or removes them from a decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleDecision {
    Materialize,
    Skip,
}

/// A single rule of an auto-materialize policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoMaterializeRule {
    /// Materialize partitions that have never been materialized
    MaterializeOnMissing,
    /// Materialize partitions whose parents were updated or will be this tick
    MaterializeOnParentUpdated,
    /// Materialize partitions that violate their freshness policy
    MaterializeOnRequiredForFreshness,
    /// Skip partitions with a parent partition that is neither materialized
    /// nor requested this tick
    SkipOnParentMissing,
    /// Skip partitions waiting on an outdated ancestor that is not requested
    /// this tick
    SkipOnParentOutdated,
}

impl AutoMaterializeRule {
    pub fn decision(self) -> RuleDecision {
        match self {
            AutoMaterializeRule::SkipOnParentMissing | AutoMaterializeRule::SkipOnParentOutdated => {
                RuleDecision::Skip
            }
            _ => RuleDecision::Materialize,
        }
    }
}

impl fmt::Display for AutoMaterializeRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AutoMaterializeRule::MaterializeOnMissing => "materialize_on_missing",
            AutoMaterializeRule::MaterializeOnParentUpdated => "materialize_on_parent_updated",
            AutoMaterializeRule::MaterializeOnRequiredForFreshness => {
                "materialize_on_required_for_freshness"
            }
            AutoMaterializeRule::SkipOnParentMissing => "skip_on_parent_missing",
            AutoMaterializeRule::SkipOnParentOutdated => "skip_on_parent_outdated",
        };
        f.write_str(name)
    }
}

/// Named policy shapes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoMaterializePolicyType {
    /// Materialize as soon as anything upstream changes or data is missing
    Eager,
    /// Materialize only when required to meet a freshness policy
    Lazy,
}

const DEFAULT_MAX_MATERIALIZATIONS_PER_MINUTE: u32 = 1;

/// Rules plus a rate limit deciding when an asset is materialized automatically
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoMaterializePolicy {
    rules: BTreeSet<AutoMaterializeRule>,

    /// `None` disables rate limiting
    max_materializations_per_minute: Option<u32>,
}

impl AutoMaterializePolicy {
    pub fn new(
        rules: impl IntoIterator<Item = AutoMaterializeRule>,
        max_materializations_per_minute: Option<u32>,
    ) -> Result<Self, PolicyError> {
        if let Some(0) = max_materializations_per_minute {
            return Err(PolicyError::InvalidRateLimit(0));
        }
        Ok(Self {
            rules: rules.into_iter().collect(),
            max_materializations_per_minute,
        })
    }

    fn eager_rules() -> BTreeSet<AutoMaterializeRule> {
        BTreeSet::from([
            AutoMaterializeRule::MaterializeOnMissing,
            AutoMaterializeRule::MaterializeOnParentUpdated,
            AutoMaterializeRule::MaterializeOnRequiredForFreshness,
            AutoMaterializeRule::SkipOnParentMissing,
            AutoMaterializeRule::SkipOnParentOutdated,
        ])
    }

    fn lazy_rules() -> BTreeSet<AutoMaterializeRule> {
        BTreeSet::from([
            AutoMaterializeRule::MaterializeOnRequiredForFreshness,
            AutoMaterializeRule::SkipOnParentMissing,
            AutoMaterializeRule::SkipOnParentOutdated,
        ])
    }

    /// Materialize on missing, on parent updates and for freshness
    pub fn eager() -> Self {
        Self {
            rules: Self::eager_rules(),
            max_materializations_per_minute: Some(DEFAULT_MAX_MATERIALIZATIONS_PER_MINUTE),
        }
    }

    /// Materialize only for freshness
    pub fn lazy() -> Self {
        Self {
            rules: Self::lazy_rules(),
            max_materializations_per_minute: Some(DEFAULT_MAX_MATERIALIZATIONS_PER_MINUTE),
        }
    }

    pub fn with_max_materializations_per_minute(
        mut self,
        limit: Option<u32>,
    ) -> Result<Self, PolicyError> {
        if let Some(0) = limit {
            return Err(PolicyError::InvalidRateLimit(0));
        }
        self.max_materializations_per_minute = limit;
        Ok(self)
    }

    /// Add rules to the policy
    pub fn with_rules(mut self, rules: impl IntoIterator<Item = AutoMaterializeRule>) -> Self {
        self.rules.extend(rules);
        self
    }

    /// Remove rules from the policy; every rule must currently be present
    pub fn without_rules(
        mut self,
        rules: impl IntoIterator<Item = AutoMaterializeRule>,
    ) -> Result<Self, PolicyError> {
        let rules: BTreeSet<AutoMaterializeRule> = rules.into_iter().collect();
        let unknown: Vec<String> = rules
            .iter()
            .filter(|rule| !self.rules.contains(rule))
            .map(ToString::to_string)
            .collect();
        if !unknown.is_empty() {
            return Err(PolicyError::UnknownRules(unknown.join(", ")));
        }
        self.rules.retain(|rule| !rules.contains(rule));
        Ok(self)
    }

    pub fn rules(&self) -> &BTreeSet<AutoMaterializeRule> {
        &self.rules
    }

    pub fn has_rule(&self, rule: AutoMaterializeRule) -> bool {
        self.rules.contains(&rule)
    }

    pub fn max_materializations_per_minute(&self) -> Option<u32> {
        self.max_materializations_per_minute
    }

    /// Eager whenever parent updates trigger materializations
    pub fn policy_type(&self) -> AutoMaterializePolicyType {
        if self.has_rule(AutoMaterializeRule::MaterializeOnParentUpdated) {
            AutoMaterializePolicyType::Eager
        } else {
            AutoMaterializePolicyType::Lazy
        }
    }
}

/// Maximum tolerated staleness of an asset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreshnessPolicy {
    pub maximum_lag_minutes: u32,
}

impl FreshnessPolicy {
    pub fn new(maximum_lag_minutes: u32) -> Self {
        Self {
            maximum_lag_minutes,
        }
    }

    pub fn maximum_lag(&self) -> Duration {
        Duration::minutes(i64::from(self.maximum_lag_minutes))
    }

    /// A materialization at `materialized_at` is fresh while no more than the
    /// maximum lag has passed
    pub fn is_satisfied(&self, materialized_at: DateTime<Utc>, evaluation_time: DateTime<Utc>) -> bool {
        evaluation_time - materialized_at <= self.maximum_lag()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_eager_and_lazy_policy_types() {
        assert_eq!(AutoMaterializePolicy::eager().policy_type(), AutoMaterializePolicyType::Eager);
        assert_eq!(AutoMaterializePolicy::lazy().policy_type(), AutoMaterializePolicyType::Lazy);

        let lazy_on_missing = AutoMaterializePolicy::lazy().with_rules([AutoMaterializeRule::MaterializeOnMissing]);
        assert_eq!(lazy_on_missing.policy_type(), AutoMaterializePolicyType::Lazy);

        let eager_without_skips = AutoMaterializePolicy::eager()
            .without_rules([
                AutoMaterializeRule::SkipOnParentMissing,
                AutoMaterializeRule::SkipOnParentOutdated,
            ])
            .unwrap();
        assert_eq!(eager_without_skips.policy_type(), AutoMaterializePolicyType::Eager);

        let eager_without_parent_updates = AutoMaterializePolicy::eager()
            .without_rules([AutoMaterializeRule::MaterializeOnParentUpdated])
            .unwrap();
        assert_eq!(eager_without_parent_updates.policy_type(), AutoMaterializePolicyType::Lazy);
    }

    #[test]
    fn test_both_policies_skip_on_outdated_parents() {
        assert!(AutoMaterializePolicy::eager().has_rule(AutoMaterializeRule::SkipOnParentOutdated));
        assert!(AutoMaterializePolicy::lazy().has_rule(AutoMaterializeRule::SkipOnParentOutdated));
    }

    #[test]
    fn test_default_rate_limit() {
        assert_eq!(AutoMaterializePolicy::eager().max_materializations_per_minute(), Some(1));
        assert_eq!(AutoMaterializePolicy::lazy().max_materializations_per_minute(), Some(1));
    }

    #[test]
    fn test_rate_limit_must_be_positive() {
        assert_eq!(
            AutoMaterializePolicy::new([], Some(0)),
            Err(PolicyError::InvalidRateLimit(0))
        );
        assert!(AutoMaterializePolicy::eager()
            .with_max_materializations_per_minute(Some(0))
            .is_err());

        let unlimited = AutoMaterializePolicy::eager()
            .with_max_materializations_per_minute(None)
            .unwrap();
        assert_eq!(unlimited.max_materializations_per_minute(), None);
    }

    #[test]
    fn test_without_rules_rejects_unknown_rules() {
        let result = AutoMaterializePolicy::lazy().without_rules([AutoMaterializeRule::MaterializeOnMissing]);
        assert!(matches!(result, Err(PolicyError::UnknownRules(_))));

        let policy = AutoMaterializePolicy::eager()
            .without_rules([AutoMaterializeRule::MaterializeOnParentUpdated])
            .unwrap();
        assert!(!policy.has_rule(AutoMaterializeRule::MaterializeOnParentUpdated));
        assert!(policy.has_rule(AutoMaterializeRule::MaterializeOnMissing));
    }

    #[test]
    fn test_rule_decisions() {
        assert_eq!(AutoMaterializeRule::SkipOnParentMissing.decision(), RuleDecision::Skip);
        assert_eq!(AutoMaterializeRule::SkipOnParentOutdated.decision(), RuleDecision::Skip);
        assert_eq!(
            AutoMaterializeRule::MaterializeOnMissing.decision(),
            RuleDecision::Materialize
        );
    }

    #[test]
    fn test_freshness_policy() {
        let policy = FreshnessPolicy::new(60);
        let materialized = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        assert!(policy.is_satisfied(materialized, Utc.with_ymd_and_hms(2024, 1, 1, 13, 0, 0).unwrap()));
        assert!(!policy.is_satisfied(materialized, Utc.with_ymd_and_hms(2024, 1, 1, 13, 1, 0).unwrap()));
    }

    #[test]
    fn test_policy_serialization() {
        let json = serde_json::to_value(AutoMaterializePolicy::lazy()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "rules": [
                    "materialize_on_required_for_freshness",
                    "skip_on_parent_missing",
                    "skip_on_parent_outdated"
                ],
                "max_materializations_per_minute": 1
            })
        );
    }
}
