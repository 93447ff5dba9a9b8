//! Custom assertions for tick results
//!
//! Provides assertion helpers that give better error messages than comparing
//! whole results.

use reconciler_core::AssetKey;
use reconciler_runtime::{AutoMaterializeCondition, TickResult};

/// Tick result assertion helpers
pub struct TickAssertions<'a> {
    result: &'a TickResult,
}

impl<'a> TickAssertions<'a> {
    /// Create assertions for a tick result
    pub fn new(result: &'a TickResult) -> Self {
        Self { result }
    }

    /// Run requests as (selected asset names, partition key), in emitted order
    pub fn run_request_summary(&self) -> Vec<(Vec<String>, Option<String>)> {
        self.result
            .run_requests
            .iter()
            .map(|request| {
                (
                    request.asset_selection.iter().map(ToString::to_string).collect(),
                    request.partition_key.clone(),
                )
            })
            .collect()
    }

    /// Assert the exact run requests, in order
    pub fn assert_run_requests(self, expected: &[(&[&str], Option<&str>)]) -> Self {
        let expected: Vec<(Vec<String>, Option<String>)> = expected
            .iter()
            .map(|(assets, partition)| {
                (
                    assets.iter().map(|a| a.to_string()).collect(),
                    partition.map(str::to_string),
                )
            })
            .collect();
        assert_eq!(
            self.run_request_summary(),
            expected,
            "Unexpected run requests"
        );
        self
    }

    /// Assert no run requests were emitted
    pub fn assert_no_run_requests(self) -> Self {
        assert!(
            self.result.run_requests.is_empty(),
            "Expected no run requests but got {:?}",
            self.run_request_summary()
        );
        self
    }

    /// Assert the decided partition keys of `asset`
    pub fn assert_decision(self, asset: &str, expected: &[&str]) -> Self {
        let key = AssetKey::from(asset);
        let decision = self
            .result
            .decision(&key)
            .unwrap_or_else(|| panic!("Asset {asset} was not evaluated"));
        let keys: Vec<String> = decision.keys().collect();
        assert_eq!(keys, expected, "Unexpected decision for {asset}");
        self
    }

    /// Assert an unpartitioned asset was, or was not, requested
    pub fn assert_requested(self, asset: &str, requested: bool) -> Self {
        let key = AssetKey::from(asset);
        let decision = self
            .result
            .decision(&key)
            .unwrap_or_else(|| panic!("Asset {asset} was not evaluated"));
        assert_eq!(
            !decision.is_empty(),
            requested,
            "Unexpected decision for {asset}: {decision:?}"
        );
        self
    }

    /// Assert `condition` fired on `asset`
    pub fn assert_condition(self, asset: &str, condition: AutoMaterializeCondition) -> Self {
        assert!(
            self.has_condition(asset, condition),
            "Expected {condition} on {asset}"
        );
        self
    }

    /// Assert `condition` did not fire on `asset`
    pub fn assert_no_condition(self, asset: &str, condition: AutoMaterializeCondition) -> Self {
        assert!(
            !self.has_condition(asset, condition),
            "Did not expect {condition} on {asset}"
        );
        self
    }

    /// Assert the evaluation of `asset` carries an error
    pub fn assert_error(self, asset: &str) -> Self {
        let evaluation = self
            .result
            .evaluation(&AssetKey::from(asset))
            .unwrap_or_else(|| panic!("Asset {asset} was not evaluated"));
        assert!(evaluation.is_error(), "Expected an error on {asset}");
        self
    }

    fn has_condition(&self, asset: &str, condition: AutoMaterializeCondition) -> bool {
        self.result
            .evaluation(&AssetKey::from(asset))
            .and_then(|evaluation| evaluation.condition(condition))
            .is_some()
    }
}

/// Serialize a tick result to JSON for byte-level comparison
pub fn to_canonical_json(result: &TickResult) -> String {
    serde_json::to_string(result).expect("tick results serialize")
}
