//! Snapshot sources for a tick
//!
//! A tick reads its inputs once, at the start, through these traits. Loading
//! is the only phase that performs I/O and the only one that is retried;
//! evaluation itself runs over the returned in-memory snapshot.

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, error, instrument};

use reconciler_core::{
    AssetGraph, AssetKey, DynamicPartitionsSnapshot, HistorySnapshot, PartitionsDefinition,
};

use crate::planner::TickSnapshot;
use crate::retry::RetryPolicy;

/// Result type for snapshot source operations
pub type SourceResult<T> = std::result::Result<T, SourceError>;

/// Errors raised by snapshot sources
#[derive(Debug, Clone, thiserror::Error)]
pub enum SourceError {
    #[error("Source unavailable: {0}")]
    Unavailable(String),

    #[error("Timeout error: {0}")]
    Timeout(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SourceError {
    /// Unavailable sources and timeouts may succeed on a later attempt;
    /// invalid data and internal errors will not
    pub fn is_retryable(&self) -> bool {
        matches!(self, SourceError::Unavailable(_) | SourceError::Timeout(_))
    }
}

/// Read access to materialization history
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Latest materialization records of the given assets
    ///
    /// Assets with no materializations may be omitted from the snapshot.
    async fn load_history(&self, asset_keys: &[AssetKey]) -> SourceResult<HistorySnapshot>;
}

/// Externally registered partition keys of dynamic partitions definitions
#[async_trait]
pub trait DynamicPartitionsRegistry: Send + Sync {
    /// Keys registered under `definition_name`, in registration order
    async fn partition_keys(&self, definition_name: &str) -> SourceResult<Vec<String>>;
}

/// Source of the asset graph, rebuilt once per tick
#[async_trait]
pub trait AssetGraphSource: Send + Sync {
    async fn load_graph(&self) -> SourceResult<Arc<AssetGraph>>;
}

/// Loads the read-only inputs of a tick, retrying transient failures
#[derive(Clone)]
pub struct SnapshotLoader {
    history: Arc<dyn HistoryStore>,
    dynamic_partitions: Arc<dyn DynamicPartitionsRegistry>,
    retry_policy: RetryPolicy,
}

impl SnapshotLoader {
    pub fn new(
        history: Arc<dyn HistoryStore>,
        dynamic_partitions: Arc<dyn DynamicPartitionsRegistry>,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            history,
            dynamic_partitions,
            retry_policy,
        }
    }

    /// Load history for every asset of `graph` and the keys of every dynamic
    /// partitions definition it uses
    #[instrument(name = "snapshot.load", skip_all, fields(assets = graph.len()))]
    pub async fn load(&self, graph: &AssetGraph) -> crate::Result<TickSnapshot> {
        let asset_keys: Vec<AssetKey> = graph.toposort().to_vec();

        let history = self
            .retry_policy
            .run_if("load_history", SourceError::is_retryable, || {
                self.history.load_history(&asset_keys)
            })
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to load materialization history");
                crate::Error::HistoryUnavailable(e.to_string())
            })?;

        let mut dynamic_partitions = DynamicPartitionsSnapshot::default();
        for name in dynamic_definition_names(graph) {
            let keys = self
                .retry_policy
                .run_if("load_dynamic_partitions", SourceError::is_retryable, || {
                    self.dynamic_partitions.partition_keys(name)
                })
                .await
                .map_err(|e| {
                    error!(error = %e, definition = %name, "Failed to load dynamic partitions");
                    crate::Error::DynamicPartitionsUnavailable(format!("{name}: {e}"))
                })?;
            debug!(definition = %name, keys = keys.len(), "Loaded dynamic partitions");
            dynamic_partitions.insert(name, keys);
        }

        Ok(TickSnapshot::new(history, dynamic_partitions))
    }
}

fn dynamic_definition_names(graph: &AssetGraph) -> BTreeSet<&str> {
    graph
        .toposort()
        .iter()
        .filter_map(|key| match graph.partitions_def(key) {
            Some(PartitionsDefinition::Dynamic(def)) => Some(def.name()),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use reconciler_core::{AssetKeyPartitionKey, AssetNode, MaterializationRecord};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct FlakyHistory {
        failures: u32,
        error: SourceError,
        calls: AtomicU32,
    }

    impl FlakyHistory {
        fn failing(failures: u32, error: SourceError) -> Self {
            Self {
                failures,
                error,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl HistoryStore for FlakyHistory {
        async fn load_history(&self, asset_keys: &[AssetKey]) -> SourceResult<HistorySnapshot> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
                return Err(self.error.clone());
            }
            let mut history = HistorySnapshot::new();
            for key in asset_keys {
                history.record_materialization(
                    AssetKeyPartitionKey::unpartitioned(key.clone()),
                    MaterializationRecord::new(1, Utc::now()),
                );
            }
            Ok(history)
        }
    }

    struct Registry;

    #[async_trait]
    impl DynamicPartitionsRegistry for Registry {
        async fn partition_keys(&self, definition_name: &str) -> SourceResult<Vec<String>> {
            Ok(vec![format!("{definition_name}-1"), format!("{definition_name}-2")])
        }
    }

    fn fast_retry(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_delay: Duration::from_millis(1),
            ..Default::default()
        }
    }

    fn graph() -> AssetGraph {
        AssetGraph::from_assets(vec![
            AssetNode::new("plain"),
            AssetNode::builder("customers")
                .partitions(PartitionsDefinition::dynamic("customers"))
                .build(),
        ])
        .unwrap()
    }

    #[tokio::test]
    async fn test_load_retries_history() {
        let loader = SnapshotLoader::new(
            Arc::new(FlakyHistory::failing(
                2,
                SourceError::Unavailable("event log offline".to_string()),
            )),
            Arc::new(Registry),
            fast_retry(3),
        );

        let snapshot = loader.load(&graph()).await.unwrap();
        assert!(snapshot.history.latest_record(&AssetKey::from("plain"), None).is_some());
        assert_eq!(
            snapshot.dynamic_partitions.partition_keys("customers"),
            &["customers-1".to_string(), "customers-2".to_string()]
        );
    }

    #[tokio::test]
    async fn test_history_unavailable_after_retries() {
        let loader = SnapshotLoader::new(
            Arc::new(FlakyHistory::failing(
                10,
                SourceError::Unavailable("event log offline".to_string()),
            )),
            Arc::new(Registry),
            fast_retry(1),
        );

        let result = loader.load(&graph()).await;
        assert!(matches!(result, Err(crate::Error::HistoryUnavailable(_))));
    }

    #[tokio::test]
    async fn test_timeouts_are_retried() {
        let history = Arc::new(FlakyHistory::failing(
            1,
            SourceError::Timeout("event log query timed out".to_string()),
        ));
        let loader = SnapshotLoader::new(history.clone(), Arc::new(Registry), fast_retry(3));

        assert!(loader.load(&graph()).await.is_ok());
        assert_eq!(history.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_permanent_errors_are_not_retried() {
        for error in [
            SourceError::InvalidData("undecodable record".to_string()),
            SourceError::Internal("storage bug".to_string()),
        ] {
            let history = Arc::new(FlakyHistory::failing(1, error));
            let loader = SnapshotLoader::new(history.clone(), Arc::new(Registry), fast_retry(3));

            let result = loader.load(&graph()).await;
            assert!(matches!(result, Err(crate::Error::HistoryUnavailable(_))));
            assert_eq!(history.calls.load(Ordering::SeqCst), 1);
        }
    }

    #[test]
    fn test_retryable_errors() {
        assert!(SourceError::Unavailable("down".to_string()).is_retryable());
        assert!(SourceError::Timeout("slow".to_string()).is_retryable());
        assert!(!SourceError::InvalidData("garbled".to_string()).is_retryable());
        assert!(!SourceError::Internal("bug".to_string()).is_retryable());
    }
}
