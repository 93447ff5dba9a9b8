//! Asset daemon: the host loop running reconciliation ticks
//!
//! Each tick loads the asset graph and a read-only snapshot, runs
//! [`reconcile`](crate::planner::reconcile) over it and hands the resulting
//! run requests to the launcher. Ticks never overlap: a tick requested while
//! another is in flight is skipped, not queued. A tick either completes or
//! fails as a whole; a failed tick is retried on the next interval.
//!
//! # Example
//!
//! ```no_run
//! use reconciler_runtime::config::DaemonConfig;
//! use reconciler_runtime::daemon::AssetDaemon;
//! use reconciler_runtime::launcher::RunLauncher;
//! use reconciler_runtime::snapshot::{AssetGraphSource, DynamicPartitionsRegistry, HistoryStore};
//! use std::sync::Arc;
//!
//! # async fn example(
//! #     graphs: Arc<dyn AssetGraphSource>,
//! #     history: Arc<dyn HistoryStore>,
//! #     registry: Arc<dyn DynamicPartitionsRegistry>,
//! #     launcher: Arc<dyn RunLauncher>,
//! # ) -> anyhow::Result<()> {
//! let config = DaemonConfig::from_env()?;
//! let daemon = AssetDaemon::new(graphs, history, registry, launcher, config);
//!
//! daemon.run(async { tokio::signal::ctrl_c().await.ok(); }).await;
//! # Ok(())
//! # }
//! ```

use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::concurrency::TickGuard;
use crate::config::DaemonConfig;
use crate::launcher::RunLauncher;
use crate::metrics::{RUN_REQUESTS_TOTAL, TICKS_TOTAL, TICK_DURATION};
use crate::planner::{reconcile, EvaluationContext, TickResult};
use crate::snapshot::{
    AssetGraphSource, DynamicPartitionsRegistry, HistoryStore, SnapshotLoader, SourceError,
};
use crate::{Error, Result};

/// Summary of a completed tick
#[derive(Debug, Clone)]
pub struct TickReport {
    pub tick_id: Uuid,
    pub result: TickResult,
    pub duration: Duration,
}

/// What happened when a tick was requested
#[derive(Debug, Clone)]
pub enum TickOutcome {
    Completed(TickReport),
    /// Another tick was in flight
    Skipped,
}

/// Runs reconciliation ticks against external sources.
///
/// Cheap to clone; clones share the tick guard, so ticks started from any
/// clone never overlap.
#[derive(Clone)]
pub struct AssetDaemon {
    graph_source: Arc<dyn AssetGraphSource>,
    loader: SnapshotLoader,
    launcher: Arc<dyn RunLauncher>,
    config: DaemonConfig,
    context_template: EvaluationContext,
    guard: TickGuard,
}

impl AssetDaemon {
    pub fn new(
        graph_source: Arc<dyn AssetGraphSource>,
        history: Arc<dyn HistoryStore>,
        dynamic_partitions: Arc<dyn DynamicPartitionsRegistry>,
        launcher: Arc<dyn RunLauncher>,
        config: DaemonConfig,
    ) -> Self {
        let loader = SnapshotLoader::new(history, dynamic_partitions, config.snapshot_retry_policy());
        let context_template = EvaluationContext::new(Utc::now())
            .with_respect_data_versions(config.respect_data_versions);
        Self {
            graph_source,
            loader,
            launcher,
            config,
            context_template,
            guard: TickGuard::new(),
        }
    }

    /// Selection, overrides, exclusions and tags applied to every tick; the
    /// evaluation time is replaced per tick
    pub fn with_evaluation_context(mut self, context: EvaluationContext) -> Self {
        self.context_template = context;
        self
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    /// Run one tick evaluated at the current time
    pub async fn run_tick(&self) -> Result<TickOutcome> {
        self.run_tick_at(Utc::now()).await
    }

    /// Run one tick evaluated at `evaluation_time`
    #[instrument(
        name = "daemon.tick",
        skip(self),
        fields(tick_id = tracing::field::Empty)
    )]
    pub async fn run_tick_at(&self, evaluation_time: DateTime<Utc>) -> Result<TickOutcome> {
        let Some(_permit) = self.guard.try_acquire() else {
            warn!("Previous tick still in flight; skipping");
            TICKS_TOTAL.with_label_values(&["skipped"]).inc();
            return Ok(TickOutcome::Skipped);
        };

        let tick_id = Uuid::new_v4();
        tracing::Span::current().record("tick_id", tracing::field::display(tick_id));
        let start = Instant::now();

        match self.tick(evaluation_time).await {
            Ok(result) => {
                let duration = start.elapsed();
                TICKS_TOTAL.with_label_values(&["completed"]).inc();
                TICK_DURATION.observe(duration.as_secs_f64());
                info!(
                    run_requests = result.run_requests.len(),
                    evaluated = result.evaluations.len(),
                    duration_ms = duration.as_millis() as u64,
                    "Tick completed"
                );
                Ok(TickOutcome::Completed(TickReport {
                    tick_id,
                    result,
                    duration,
                }))
            }
            Err(e) => {
                TICKS_TOTAL.with_label_values(&["failed"]).inc();
                error!(error = %e, "Tick failed; will retry next interval");
                Err(e)
            }
        }
    }

    async fn tick(&self, evaluation_time: DateTime<Utc>) -> Result<TickResult> {
        let graph = self
            .config
            .snapshot_retry_policy()
            .run_if("load_graph", SourceError::is_retryable, || {
                self.graph_source.load_graph()
            })
            .await
            .map_err(|e| Error::GraphUnavailable(e.to_string()))?;
        let snapshot = self.loader.load(&graph).await?;

        let mut ctx = self.context_template.clone();
        ctx.evaluation_time = evaluation_time;
        let result = reconcile(&graph, &snapshot, &ctx)?;

        if !result.run_requests.is_empty() {
            self.launcher
                .launch(result.run_requests.clone())
                .await
                .map_err(|e| Error::Launch(e.to_string()))?;
            RUN_REQUESTS_TOTAL.inc_by(result.run_requests.len() as u64);
        }
        Ok(result)
    }

    /// Tick every `tick_interval` until `shutdown` resolves
    ///
    /// Failed ticks are logged and retried on the next interval.
    pub async fn run(&self, shutdown: impl Future<Output = ()>) {
        let mut interval = tokio::time::interval(self.config.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        info!(
            interval_secs = self.config.tick_interval.as_secs_f64(),
            "Asset daemon started"
        );
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Asset daemon shutting down");
                    return;
                }
                _ = interval.tick() => {
                    // failures are already logged and counted
                    let _ = self.run_tick().await;
                }
            }
        }
    }
}
