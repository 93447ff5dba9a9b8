//! Run launcher abstraction

use async_trait::async_trait;

use crate::run_request::RunRequest;

/// Result type for run launching operations
pub type LaunchResult<T> = std::result::Result<T, LaunchError>;

/// Errors that can occur while handing run requests off
#[derive(Debug, Clone, thiserror::Error)]
pub enum LaunchError {
    #[error("Launcher unavailable: {0}")]
    Unavailable(String),

    #[error("Rejected run request: {0}")]
    Rejected(String),
}

/// Receives the run requests of a completed tick.
///
/// The daemon does not track what happens to the runs afterwards; their
/// materializations show up in the history snapshot of later ticks.
#[async_trait]
pub trait RunLauncher: Send + Sync {
    /// Submit the run requests of one tick
    ///
    /// # Errors
    ///
    /// Returns an error if the requests could not be handed off. The tick's
    /// decisions are not retried; the next tick recomputes them.
    async fn launch(&self, run_requests: Vec<RunRequest>) -> LaunchResult<()>;
}
