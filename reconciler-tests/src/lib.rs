//! Shared test utilities for the reconciler crates
//!
//! This crate provides:
//! - **Fixtures**: Pre-built asset graphs and evaluation times
//! - **Builders**: A history builder with monotonic storage ids
//! - **Mocks**: In-memory history store, dynamic partitions registry, graph
//!   source and a recording run launcher
//! - **Assertions**: Assertions over tick results
//!
//! # Example
//!
//! ```
//! use reconciler_runtime::{reconcile, EvaluationContext, TickSnapshot};
//! use reconciler_tests::{assertions::TickAssertions, builders::HistoryBuilder, fixtures};
//!
//! let now = fixtures::time::at(2013, 1, 5, 4, 0);
//! let history = HistoryBuilder::new(now).materialize("a", None).build();
//! let snapshot = TickSnapshot::new(history, Default::default());
//!
//! let result = reconcile(&fixtures::graph::linear(), &snapshot, &EvaluationContext::new(now)).unwrap();
//! TickAssertions::new(&result).assert_run_requests(&[(&["b", "c"], None)]);
//! ```

pub mod assertions;
pub mod builders;
pub mod fixtures;
pub mod mocks;

// Re-export commonly used items
pub use assertions::TickAssertions;
pub use builders::HistoryBuilder;
pub use fixtures::{graph, time};
pub use mocks::{InMemoryDynamicPartitions, InMemoryHistoryStore, RecordingLauncher, StaticGraphSource};
