//! Tick overlap control
//!
//! Ticks for the same daemon never overlap. A tick that would start while
//! another one is in flight is skipped rather than queued.

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};

/// Guard allowing at most one tick in flight
#[derive(Debug, Clone)]
pub struct TickGuard {
    semaphore: Arc<Semaphore>,
}

/// Held for the duration of a tick
#[derive(Debug)]
pub struct TickPermit {
    _permit: OwnedSemaphorePermit,
}

impl TickGuard {
    pub fn new() -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(1)),
        }
    }

    /// Claim the tick slot without waiting; `None` if a tick is running
    #[tracing::instrument(
        name = "tick_guard.try_acquire",
        skip(self),
        fields(acquired = tracing::field::Empty)
    )]
    pub fn try_acquire(&self) -> Option<TickPermit> {
        let permit = match self.semaphore.clone().try_acquire_owned() {
            Ok(permit) => Some(TickPermit { _permit: permit }),
            Err(TryAcquireError::NoPermits) | Err(TryAcquireError::Closed) => None,
        };
        tracing::Span::current().record("acquired", permit.is_some());
        permit
    }

    /// Whether a tick is currently in flight
    pub fn is_running(&self) -> bool {
        self.semaphore.available_permits() == 0
    }
}

impl Default for TickGuard {
    fn default() -> Self {
        Self::new()
    }
}
