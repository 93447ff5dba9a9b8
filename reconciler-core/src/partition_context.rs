//! Partition resolution context
//!
//! Partition existence depends on two inputs that change between ticks: the
//! evaluation time (time-window partitions only exist once their window has
//! closed) and the externally registered dynamic partition keys. Both are
//! captured once per tick and threaded through every partition operation as a
//! [`PartitionContext`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Read-only copy of the dynamic partitions registry, keyed by definition name
///
/// # Example
///
/// ```
/// use reconciler_core::DynamicPartitionsSnapshot;
///
/// let mut snapshot = DynamicPartitionsSnapshot::default();
/// snapshot.insert("customers", vec!["acme".to_string()]);
///
/// assert_eq!(snapshot.partition_keys("customers"), ["acme"]);
/// assert!(snapshot.partition_keys("unknown").is_empty());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DynamicPartitionsSnapshot {
    keys_by_definition: BTreeMap<String, Vec<String>>,
}

impl DynamicPartitionsSnapshot {
    /// Register the keys of one dynamic definition, replacing any previous keys.
    /// Duplicate keys keep their first position.
    pub fn insert(&mut self, name: impl Into<String>, keys: Vec<String>) {
        let mut unique = Vec::with_capacity(keys.len());
        for key in keys {
            if !unique.contains(&key) {
                unique.push(key);
            }
        }
        self.keys_by_definition.insert(name.into(), unique);
    }

    /// Keys registered under `name`; unknown definitions have no partitions
    pub fn partition_keys(&self, name: &str) -> &[String] {
        self.keys_by_definition
            .get(name)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Names of all registered definitions
    pub fn definition_names(&self) -> impl Iterator<Item = &str> {
        self.keys_by_definition.keys().map(String::as_str)
    }
}

/// Evaluation time plus dynamic partitions, shared by all partition operations
/// of one tick
#[derive(Debug, Clone, Copy)]
pub struct PartitionContext<'a> {
    /// Time at which partition existence is evaluated
    pub current_time: DateTime<Utc>,

    /// Dynamic partition keys loaded at tick start
    pub dynamic_partitions: &'a DynamicPartitionsSnapshot,
}

impl<'a> PartitionContext<'a> {
    pub fn new(current_time: DateTime<Utc>, dynamic_partitions: &'a DynamicPartitionsSnapshot) -> Self {
        Self {
            current_time,
            dynamic_partitions,
        }
    }
}
