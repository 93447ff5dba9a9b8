//! Mock implementations of the daemon's external sources
//!
//! In-memory stand-ins for the history store, dynamic partitions registry,
//! asset definition layer and run launcher.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use reconciler_core::{AssetGraph, AssetKey, HistorySnapshot};
use reconciler_runtime::launcher::{LaunchError, LaunchResult};
use reconciler_runtime::snapshot::SourceResult;
use reconciler_runtime::{
    AssetGraphSource, DynamicPartitionsRegistry, HistoryStore, RunLauncher, RunRequest, SourceError,
};

/// History store serving a replaceable snapshot
///
/// Can be told to fail a number of upcoming loads.
#[derive(Default)]
pub struct InMemoryHistoryStore {
    snapshot: Mutex<HistorySnapshot>,
    failures_remaining: AtomicU32,
    failure: Mutex<Option<SourceError>>,
    loads: AtomicU32,
}

impl InMemoryHistoryStore {
    pub fn new(snapshot: HistorySnapshot) -> Self {
        Self {
            snapshot: Mutex::new(snapshot),
            ..Default::default()
        }
    }

    /// Replace the served snapshot
    pub fn set(&self, snapshot: HistorySnapshot) {
        *self.snapshot.lock().expect("history lock poisoned") = snapshot;
    }

    /// Current served snapshot
    pub fn snapshot(&self) -> HistorySnapshot {
        self.snapshot.lock().expect("history lock poisoned").clone()
    }

    /// Make the next `count` loads fail as unavailable
    pub fn fail_next(&self, count: u32) {
        self.fail_next_with(count, SourceError::Unavailable("event log unavailable".to_string()));
    }

    /// Make the next `count` loads fail with `error`
    pub fn fail_next_with(&self, count: u32, error: SourceError) {
        *self.failure.lock().expect("history lock poisoned") = Some(error);
        self.failures_remaining.store(count, Ordering::SeqCst);
    }

    /// Number of load attempts, failed ones included
    pub fn loads(&self) -> u32 {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn load_history(&self, _asset_keys: &[AssetKey]) -> SourceResult<HistorySnapshot> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            let error = self.failure.lock().expect("history lock poisoned").clone();
            return Err(error.unwrap_or_else(|| SourceError::Unavailable("event log unavailable".to_string())));
        }
        Ok(self.snapshot())
    }
}

/// Dynamic partitions registry backed by a map
#[derive(Default)]
pub struct InMemoryDynamicPartitions {
    keys: Mutex<BTreeMap<String, Vec<String>>>,
}

impl InMemoryDynamicPartitions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register keys under `definition_name`, after any existing ones
    pub fn add_partitions<I, S>(&self, definition_name: &str, keys: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keys
            .lock()
            .expect("registry lock poisoned")
            .entry(definition_name.to_string())
            .or_default()
            .extend(keys.into_iter().map(Into::into));
    }
}

#[async_trait]
impl DynamicPartitionsRegistry for InMemoryDynamicPartitions {
    async fn partition_keys(&self, definition_name: &str) -> SourceResult<Vec<String>> {
        Ok(self
            .keys
            .lock()
            .expect("registry lock poisoned")
            .get(definition_name)
            .cloned()
            .unwrap_or_default())
    }
}

/// Graph source always returning the same graph
pub struct StaticGraphSource {
    graph: Arc<AssetGraph>,
}

impl StaticGraphSource {
    pub fn new(graph: AssetGraph) -> Self {
        Self {
            graph: Arc::new(graph),
        }
    }
}

#[async_trait]
impl AssetGraphSource for StaticGraphSource {
    async fn load_graph(&self) -> SourceResult<Arc<AssetGraph>> {
        Ok(self.graph.clone())
    }
}

/// Launcher recording every batch it receives
///
/// When gated, each launch waits for [`RecordingLauncher::release`], which
/// keeps a tick in flight for as long as a test needs. Failed launches are
/// not recorded.
#[derive(Default)]
pub struct RecordingLauncher {
    launched: Mutex<Vec<Vec<RunRequest>>>,
    gate: Option<Arc<Notify>>,
    started: Arc<Notify>,
    failures: Mutex<Vec<LaunchError>>,
}

impl RecordingLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Launcher whose launches block until released
    pub fn gated() -> Self {
        Self {
            gate: Some(Arc::new(Notify::new())),
            ..Default::default()
        }
    }

    /// Fail the next launches with `errors`, in order
    pub fn fail_next_with(&self, errors: impl IntoIterator<Item = LaunchError>) {
        let mut failures = self.failures.lock().expect("launcher lock poisoned");
        failures.extend(errors);
    }

    /// Let one blocked launch finish
    pub fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.notify_one();
        }
    }

    /// Wait until a launch has started
    pub async fn wait_for_launch(&self) {
        self.started.notified().await;
    }

    /// Batches received so far, one per tick
    pub fn batches(&self) -> Vec<Vec<RunRequest>> {
        self.launched.lock().expect("launcher lock poisoned").clone()
    }

    /// Every run request received so far
    pub fn run_requests(&self) -> Vec<RunRequest> {
        self.batches().into_iter().flatten().collect()
    }
}

#[async_trait]
impl RunLauncher for RecordingLauncher {
    async fn launch(&self, run_requests: Vec<RunRequest>) -> LaunchResult<()> {
        self.started.notify_one();
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        {
            let mut failures = self.failures.lock().expect("launcher lock poisoned");
            if !failures.is_empty() {
                return Err(failures.remove(0));
            }
        }
        self.launched
            .lock()
            .expect("launcher lock poisoned")
            .push(run_requests);
        Ok(())
    }
}
