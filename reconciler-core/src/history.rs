//! Materialization history snapshot
//!
//! The reconciler never reads history storage directly. At tick start the
//! latest materialization record of every (asset, partition) is loaded into a
//! [`HistorySnapshot`], which answers the two questions conditions need:
//! which partitions have ever been materialized, and which data version a
//! partition currently holds.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::asset::{AssetKey, AssetKeyPartitionKey};
use crate::partition_context::PartitionContext;
use crate::partitions::{PartitionError, PartitionsDefinition};
use crate::subset::PartitionSubset;

/// JSON object keys must be strings, so maps with structured keys are
/// written as `[key, value]` pairs
mod map_as_pairs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::BTreeMap;

    pub fn serialize<S, K, V>(map: &BTreeMap<K, V>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        K: Serialize,
        V: Serialize,
    {
        serializer.collect_seq(map.iter())
    }

    pub fn deserialize<'de, D, K, V>(deserializer: D) -> Result<BTreeMap<K, V>, D::Error>
    where
        D: Deserializer<'de>,
        K: Deserialize<'de> + Ord,
        V: Deserialize<'de>,
    {
        let pairs: Vec<(K, V)> = Vec::deserialize(deserializer)?;
        Ok(pairs.into_iter().collect())
    }
}

/// Opaque identifier of materialized content
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataVersion(pub String);

impl DataVersion {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }
}

impl fmt::Display for DataVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The latest materialization of one (asset, partition)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterializationRecord {
    /// Monotonic position in the event log; later events have larger ids
    pub storage_id: i64,

    pub timestamp: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_version: Option<DataVersion>,

    /// Data versions of the parent partitions consumed by this materialization
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty", with = "map_as_pairs")]
    pub input_versions: BTreeMap<AssetKeyPartitionKey, DataVersion>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
}

impl MaterializationRecord {
    pub fn new(storage_id: i64, timestamp: DateTime<Utc>) -> Self {
        Self {
            storage_id,
            timestamp,
            data_version: None,
            input_versions: BTreeMap::new(),
            run_id: None,
        }
    }

    pub fn with_data_version(mut self, version: impl Into<String>) -> Self {
        self.data_version = Some(DataVersion::new(version));
        self
    }

    pub fn with_input_version(mut self, input: AssetKeyPartitionKey, version: impl Into<String>) -> Self {
        self.input_versions.insert(input, DataVersion::new(version));
        self
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }
}

/// Latest records of one asset, keyed by partition (`None` = unpartitioned)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetHistory {
    #[serde(with = "map_as_pairs")]
    records: BTreeMap<Option<String>, MaterializationRecord>,
}

impl AssetHistory {
    pub fn records(&self) -> impl Iterator<Item = (Option<&str>, &MaterializationRecord)> {
        self.records.iter().map(|(key, record)| (key.as_deref(), record))
    }

    pub fn record(&self, partition_key: Option<&str>) -> Option<&MaterializationRecord> {
        self.records.get(&partition_key.map(str::to_string))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Read-only view of materialization history for one tick
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistorySnapshot {
    #[serde(with = "map_as_pairs")]
    assets: BTreeMap<AssetKey, AssetHistory>,
}

impl HistorySnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a materialization, keeping only the latest record per partition
    pub fn record_materialization(&mut self, key: AssetKeyPartitionKey, record: MaterializationRecord) {
        let history = self.assets.entry(key.asset_key).or_default();
        match history.records.get(&key.partition_key) {
            Some(existing) if existing.storage_id >= record.storage_id => {}
            _ => {
                history.records.insert(key.partition_key, record);
            }
        }
    }

    pub fn asset_history(&self, key: &AssetKey) -> Option<&AssetHistory> {
        self.assets.get(key)
    }

    pub fn latest_record(&self, key: &AssetKey, partition_key: Option<&str>) -> Option<&MaterializationRecord> {
        self.assets.get(key)?.record(partition_key)
    }

    /// Data version currently held by the partition
    pub fn data_version_at(&self, key: &AssetKey, partition_key: Option<&str>) -> Option<&DataVersion> {
        self.latest_record(key, partition_key)?.data_version.as_ref()
    }

    /// Largest storage id in the snapshot
    pub fn max_storage_id(&self) -> Option<i64> {
        self.assets
            .values()
            .flat_map(|history| history.records.values())
            .map(|record| record.storage_id)
            .max()
    }

    pub fn asset_keys(&self) -> impl Iterator<Item = &AssetKey> {
        self.assets.keys()
    }

    /// Partitions of `key` that have ever been materialized.
    ///
    /// Fails on the first recorded partition key that is not valid under
    /// `partitions_def`.
    pub fn latest_materialization_partition_subset(
        &self,
        key: &AssetKey,
        partitions_def: Option<&PartitionsDefinition>,
        ctx: &PartitionContext<'_>,
    ) -> Result<PartitionSubset, PartitionError> {
        let Some(history) = self.assets.get(key) else {
            return Ok(empty(partitions_def));
        };
        match partitions_def {
            None => {
                if let Some(partition) = history.records.keys().flatten().next() {
                    return Err(PartitionError::InvalidPartitionKey {
                        key: partition.clone(),
                        reason: format!("asset {key} is not partitioned"),
                    });
                }
                Ok(PartitionSubset::unpartitioned(!history.records.is_empty()))
            }
            Some(def) => {
                if history.records.contains_key(&None) {
                    return Err(PartitionError::InvalidPartitionKey {
                        key: String::new(),
                        reason: format!("asset {key} is partitioned but was materialized without a partition key"),
                    });
                }
                def.subset_with_keys(history.records.keys().flatten(), ctx)
            }
        }
    }

    /// Like [`Self::latest_materialization_partition_subset`], but invalid
    /// partition keys are ignored
    pub fn valid_materialized_subset(
        &self,
        key: &AssetKey,
        partitions_def: Option<&PartitionsDefinition>,
        ctx: &PartitionContext<'_>,
    ) -> PartitionSubset {
        let Some(history) = self.assets.get(key) else {
            return empty(partitions_def);
        };
        match partitions_def {
            None => PartitionSubset::unpartitioned(history.records.contains_key(&None)),
            Some(def) => def.subset_with_valid_keys(history.records.keys().flatten(), ctx),
        }
    }
}

fn empty(partitions_def: Option<&PartitionsDefinition>) -> PartitionSubset {
    match partitions_def {
        Some(def) => def.empty_subset(),
        None => PartitionSubset::unpartitioned(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition_context::DynamicPartitionsSnapshot;
    use chrono::TimeZone;

    fn ts(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 5, hour, 0, 0).unwrap()
    }

    fn partition(asset: &str, key: &str) -> AssetKeyPartitionKey {
        AssetKeyPartitionKey::partitioned(AssetKey::from(asset), key)
    }

    #[test]
    fn test_record_keeps_latest_storage_id() {
        let mut history = HistorySnapshot::new();
        let key = AssetKeyPartitionKey::unpartitioned(AssetKey::from("a"));
        history.record_materialization(key.clone(), MaterializationRecord::new(5, ts(1)).with_data_version("v5"));
        history.record_materialization(key.clone(), MaterializationRecord::new(3, ts(0)).with_data_version("v3"));

        let version = history.data_version_at(&AssetKey::from("a"), None);
        assert_eq!(version, Some(&DataVersion::new("v5")));
        assert_eq!(history.max_storage_id(), Some(5));
    }

    #[test]
    fn test_materialized_subset_for_daily_asset() {
        let def = PartitionsDefinition::daily("2024-01-01").unwrap();
        let dynamic = DynamicPartitionsSnapshot::default();
        let ctx = PartitionContext::new(ts(0), &dynamic);
        let mut history = HistorySnapshot::new();
        history.record_materialization(partition("d", "2024-01-02"), MaterializationRecord::new(1, ts(0)));
        history.record_materialization(partition("d", "2024-01-03"), MaterializationRecord::new(2, ts(0)));

        let subset = history
            .latest_materialization_partition_subset(&AssetKey::from("d"), Some(&def), &ctx)
            .unwrap();
        assert_eq!(subset.keys().collect::<Vec<_>>(), vec!["2024-01-02", "2024-01-03"]);

        let missing = history
            .latest_materialization_partition_subset(&AssetKey::from("other"), Some(&def), &ctx)
            .unwrap();
        assert!(missing.is_empty());
    }

    #[test]
    fn test_invalid_key_is_strict_and_lenient() {
        let def = PartitionsDefinition::hourly("2013-01-05-00:00").unwrap();
        let dynamic = DynamicPartitionsSnapshot::default();
        let ctx = PartitionContext::new(Utc.with_ymd_and_hms(2013, 1, 6, 0, 0, 0).unwrap(), &dynamic);
        let mut history = HistorySnapshot::new();
        history.record_materialization(partition("h", "bad partition key"), MaterializationRecord::new(1, ts(0)));
        history.record_materialization(partition("h", "2013-01-05-00:00"), MaterializationRecord::new(2, ts(0)));

        let strict = history.latest_materialization_partition_subset(&AssetKey::from("h"), Some(&def), &ctx);
        assert!(matches!(strict, Err(PartitionError::InvalidPartitionKey { .. })));

        let lenient = history.valid_materialized_subset(&AssetKey::from("h"), Some(&def), &ctx);
        assert_eq!(lenient.keys().collect::<Vec<_>>(), vec!["2013-01-05-00:00"]);
    }

    #[test]
    fn test_unpartitioned_history() {
        let dynamic = DynamicPartitionsSnapshot::default();
        let ctx = PartitionContext::new(ts(0), &dynamic);
        let mut history = HistorySnapshot::new();
        history.record_materialization(
            AssetKeyPartitionKey::unpartitioned(AssetKey::from("u")),
            MaterializationRecord::new(1, ts(0)),
        );
        let subset = history
            .latest_materialization_partition_subset(&AssetKey::from("u"), None, &ctx)
            .unwrap();
        assert_eq!(subset, PartitionSubset::unpartitioned(true));

        history.record_materialization(partition("u", "2024-01-01"), MaterializationRecord::new(2, ts(0)));
        assert!(history
            .latest_materialization_partition_subset(&AssetKey::from("u"), None, &ctx)
            .is_err());
        assert_eq!(
            history.valid_materialized_subset(&AssetKey::from("u"), None, &ctx),
            PartitionSubset::unpartitioned(true)
        );
    }

    #[test]
    fn test_record_builders() {
        let record = MaterializationRecord::new(7, ts(3))
            .with_data_version("abc")
            .with_input_version(partition("up", "2024-01-01"), "xyz")
            .with_run_id("run-1");
        assert_eq!(record.data_version, Some(DataVersion::new("abc")));
        assert_eq!(
            record.input_versions.get(&partition("up", "2024-01-01")),
            Some(&DataVersion::new("xyz"))
        );
        assert_eq!(record.run_id.as_deref(), Some("run-1"));
    }

    #[test]
    fn test_snapshot_round_trips_through_json() {
        let mut history = HistorySnapshot::new();
        history.record_materialization(
            partition("d", "2024-01-02"),
            MaterializationRecord::new(1, ts(0)).with_input_version(partition("up", "2024-01-02"), "v1"),
        );
        history.record_materialization(
            AssetKeyPartitionKey::unpartitioned(AssetKey::from("u")),
            MaterializationRecord::new(2, ts(1)),
        );
        let json = serde_json::to_string(&history).unwrap();
        let back: HistorySnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, history);
    }
}
