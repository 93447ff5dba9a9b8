//! # Reconciler Runtime
//!
//! Tick-level machinery of the asset reconciliation engine: condition
//! evaluation, the topological reconciliation planner, run request batching,
//! snapshot loading with retries, and the daemon loop that runs ticks without
//! overlap.

pub mod batcher;
pub mod concurrency;
pub mod condition;
pub mod config;
pub mod daemon;
pub mod evaluation;
pub mod launcher;
pub mod metrics;
pub mod planner;
pub mod retry;
pub mod run_request;
pub mod snapshot;
pub mod state_machine;
pub mod telemetry;

// Re-export commonly used types
pub use batcher::build_run_requests;
pub use condition::{
    AutoMaterializeCondition, ConditionEvaluator, ConditionOutcome, DecisionType,
    EvaluationError, PartitionSelection, TickCache,
};
pub use config::{DaemonConfig, LogFormat};
pub use daemon::{AssetDaemon, TickOutcome, TickReport};
pub use evaluation::AutoMaterializeAssetEvaluation;
pub use launcher::{LaunchError, RunLauncher};
pub use planner::{reconcile, EvaluationContext, TickResult, TickSnapshot};
pub use retry::{RetryPolicy, RetryStrategy};
pub use run_request::{RunRequest, RunRequestError};
pub use snapshot::{
    AssetGraphSource, DynamicPartitionsRegistry, HistoryStore, SnapshotLoader, SourceError,
};
pub use state_machine::{TickState, TickStateMachine};

/// Result type for runtime operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for runtime operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Asset graph unavailable: {0}")]
    GraphUnavailable(String),

    #[error("History unavailable: {0}")]
    HistoryUnavailable(String),

    #[error("Dynamic partitions unavailable: {0}")]
    DynamicPartitionsUnavailable(String),

    #[error("Launch error: {0}")]
    Launch(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Run request error: {0}")]
    RunRequest(#[from] RunRequestError),
}
