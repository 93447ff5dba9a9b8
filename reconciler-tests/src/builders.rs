//! Builders for constructing test histories
//!
//! [`HistoryBuilder`] assigns increasing storage ids, so materializations
//! recorded later always count as newer.

use chrono::{DateTime, Utc};
use reconciler_core::{
    AssetGraph, AssetKey, AssetKeyPartitionKey, DataVersion, HistorySnapshot,
    MaterializationRecord,
};
use reconciler_runtime::RunRequest;

/// Builder for materialization histories
#[derive(Debug, Clone)]
pub struct HistoryBuilder {
    snapshot: HistorySnapshot,
    next_storage_id: i64,
    timestamp: DateTime<Utc>,
}

impl HistoryBuilder {
    /// Start an empty history whose records are stamped at `timestamp`
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            snapshot: HistorySnapshot::new(),
            next_storage_id: 1,
            timestamp,
        }
    }

    /// Continue from an existing snapshot
    pub fn from_snapshot(snapshot: HistorySnapshot, timestamp: DateTime<Utc>) -> Self {
        let next_storage_id = snapshot.max_storage_id().unwrap_or(0) + 1;
        Self {
            snapshot,
            next_storage_id,
            timestamp,
        }
    }

    /// Stamp subsequent records at `timestamp`
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Record a materialization without data versions
    pub fn materialize(self, asset: &str, partition: Option<&str>) -> Self {
        let record = MaterializationRecord::new(0, self.timestamp);
        self.push(asset, partition, record)
    }

    /// Record every partition in `partitions`
    pub fn materialize_all<'a>(mut self, asset: &str, partitions: impl IntoIterator<Item = &'a str>) -> Self {
        for partition in partitions {
            self = self.materialize(asset, Some(partition));
        }
        self
    }

    /// Record a materialization producing `version`
    pub fn materialize_with_version(self, asset: &str, partition: Option<&str>, version: &str) -> Self {
        let record = MaterializationRecord::new(0, self.timestamp).with_data_version(version);
        self.push(asset, partition, record)
    }

    /// Record a materialization that consumed the current data versions of
    /// `parents`
    pub fn materialize_from(
        self,
        asset: &str,
        partition: Option<&str>,
        version: &str,
        parents: &[(&str, Option<&str>)],
    ) -> Self {
        let mut record = MaterializationRecord::new(0, self.timestamp).with_data_version(version);
        for (parent, parent_partition) in parents {
            let parent_key = AssetKey::from(*parent);
            let consumed = self
                .snapshot
                .data_version_at(&parent_key, *parent_partition)
                .map(|DataVersion(v)| v.clone());
            if let Some(consumed) = consumed {
                record = record.with_input_version(
                    AssetKeyPartitionKey::new(parent_key, parent_partition.map(str::to_string)),
                    consumed,
                );
            }
        }
        self.push(asset, partition, record)
    }

    /// Record the outcome of running `requests` successfully; assets of a
    /// run materialize in topological order
    pub fn execute(mut self, graph: &AssetGraph, requests: &[RunRequest]) -> Self {
        for request in requests {
            let ordered = graph
                .toposort()
                .iter()
                .filter(|key| request.asset_selection.contains(*key));
            for asset in ordered {
                let record = MaterializationRecord::new(0, self.timestamp)
                    .with_run_id(format!("run-{}", self.next_storage_id));
                let key = AssetKeyPartitionKey::new(asset.clone(), request.partition_key.clone());
                self = self.push_key(key, record);
            }
        }
        self
    }

    pub fn build(self) -> HistorySnapshot {
        self.snapshot
    }

    fn push(self, asset: &str, partition: Option<&str>, record: MaterializationRecord) -> Self {
        let key = AssetKeyPartitionKey::new(AssetKey::from(asset), partition.map(str::to_string));
        self.push_key(key, record)
    }

    fn push_key(mut self, key: AssetKeyPartitionKey, mut record: MaterializationRecord) -> Self {
        record.storage_id = self.next_storage_id;
        self.next_storage_id += 1;
        self.snapshot.record_materialization(key, record);
        self
    }
}
