//! Partition mapping for asset dependencies
//!
//! A [`PartitionMapping`] relates the partitions of a parent asset to the
//! partitions of a child asset. It supports:
//!
//! - **Identity**: same key on both sides (static/dynamic assets)
//! - **Time window**: child windows relate to the parent windows they overlap,
//!   across cadences (e.g. 24 hourly -> 1 daily)
//! - **Time offset**: child window depends on the parent window `offset`
//!   periods away (same cadence)
//! - **All partitions**: every child partition depends on every parent partition
//! - **Last partition**: every child partition depends on the parent's most
//!   recent partition
//! - **Static**: explicit parent key -> child keys table
//!
//! Subsets are pushed downstream with two semantics:
//!
//! - [`PartitionMapping::downstream_partitions`] is conservative: a child
//!   partition is included only if *all* the parent partitions it depends on
//!   are in the subset
//! - [`PartitionMapping::downstream_partitions_any`] includes a child
//!   partition if *any* parent partition it depends on is in the subset
//!
//! # Example
//!
//! ```rust
//! use chrono::{TimeZone, Utc};
//! use reconciler_core::{
//!     DynamicPartitionsSnapshot, PartitionContext, PartitionMapping, PartitionsDefinition,
//! };
//!
//! let hourly = PartitionsDefinition::hourly("2024-01-01-00:00").unwrap();
//! let daily = PartitionsDefinition::daily("2024-01-01").unwrap();
//! let dynamic = DynamicPartitionsSnapshot::default();
//! let ctx = PartitionContext::new(Utc.with_ymd_and_hms(2024, 1, 3, 0, 0, 0).unwrap(), &dynamic);
//!
//! let first_day = hourly.subset_with_keys(
//!     (0..24).map(|h| format!("2024-01-01-{h:02}:00")),
//!     &ctx,
//! ).unwrap();
//! let mapped = PartitionMapping::TimeWindow
//!     .downstream_partitions(Some(&hourly), &first_day, Some(&daily), &ctx)
//!     .unwrap();
//! assert_eq!(mapped.keys().collect::<Vec<_>>(), vec!["2024-01-01"]);
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::partition_context::PartitionContext;
use crate::partitions::{PartitionError, PartitionsDefinition, TimeWindowPartitions};
use crate::subset::{IndexRange, PartitionSubset};

/// Error types for partition mapping operations
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum PartitionMappingError {
    /// The mapping cannot relate these two partitionings
    #[error("{mapping} mapping cannot map {upstream} partitions to {downstream} partitions")]
    IncompatibleTypes {
        mapping: String,
        upstream: String,
        downstream: String,
    },

    /// Subset does not belong to the expected partitioning
    #[error("Subset does not match the partitioning of {asset_side}: {source}")]
    SubsetMismatch {
        asset_side: &'static str,
        source: PartitionError,
    },

    /// The edge is not part of the graph
    #[error("No dependency from {upstream} to {downstream}")]
    UnknownEdge { upstream: String, downstream: String },
}

/// Partition mapping strategies
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PartitionMapping {
    /// Same key on both sides
    #[default]
    Identity,

    /// Child windows relate to overlapping parent windows
    TimeWindow,

    /// Child window `i` depends on parent window `i + offset` (negative = past)
    TimeOffset { offset: i32 },

    /// Every child partition depends on every parent partition
    AllPartitions,

    /// Every child partition depends on the parent's last partition
    LastPartition,

    /// Explicit table from parent key to the child keys depending on it
    Static {
        downstream_by_upstream: BTreeMap<String, BTreeSet<String>>,
    },
}

/// Which direction a subset is pushed with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Coverage {
    /// Child included when all its parent partitions are included
    All,
    /// Child included when any of its parent partitions is included
    Any,
}

/// Default mapping for an edge whose mapping was not declared
pub fn infer_mapping(
    upstream: Option<&PartitionsDefinition>,
    downstream: Option<&PartitionsDefinition>,
) -> PartitionMapping {
    match (upstream, downstream) {
        (Some(PartitionsDefinition::TimeWindow(_)), Some(PartitionsDefinition::TimeWindow(_))) => {
            PartitionMapping::TimeWindow
        }
        (Some(up), Some(down)) if up == down => PartitionMapping::Identity,
        _ => PartitionMapping::AllPartitions,
    }
}

impl PartitionMapping {
    /// Short name for logs and errors
    pub fn name(&self) -> &'static str {
        match self {
            PartitionMapping::Identity => "identity",
            PartitionMapping::TimeWindow => "time window",
            PartitionMapping::TimeOffset { .. } => "time offset",
            PartitionMapping::AllPartitions => "all partitions",
            PartitionMapping::LastPartition => "last partition",
            PartitionMapping::Static { .. } => "static",
        }
    }

    fn incompatible(
        &self,
        upstream: Option<&PartitionsDefinition>,
        downstream: Option<&PartitionsDefinition>,
    ) -> PartitionMappingError {
        let describe = |def: Option<&PartitionsDefinition>| {
            def.map(PartitionsDefinition::describe)
                .unwrap_or_else(|| "unpartitioned".to_string())
        };
        PartitionMappingError::IncompatibleTypes {
            mapping: self.name().to_string(),
            upstream: describe(upstream),
            downstream: describe(downstream),
        }
    }

    /// Check that this mapping can relate the two partitionings
    ///
    /// Edges touching an unpartitioned asset accept every mapping.
    pub fn validate_compatibility(
        &self,
        upstream: Option<&PartitionsDefinition>,
        downstream: Option<&PartitionsDefinition>,
    ) -> Result<(), PartitionMappingError> {
        let (Some(up), Some(down)) = (upstream, downstream) else {
            return Ok(());
        };
        let compatible = match self {
            PartitionMapping::AllPartitions | PartitionMapping::LastPartition => true,
            PartitionMapping::TimeWindow => up.time_window().is_some() && down.time_window().is_some(),
            PartitionMapping::TimeOffset { .. } => match (up.time_window(), down.time_window()) {
                (Some(u), Some(d)) => u.granularity() == d.granularity(),
                _ => false,
            },
            PartitionMapping::Identity => match (up, down) {
                (PartitionsDefinition::TimeWindow(u), PartitionsDefinition::TimeWindow(d)) => {
                    u.granularity() == d.granularity()
                }
                (PartitionsDefinition::TimeWindow(_), _) | (_, PartitionsDefinition::TimeWindow(_)) => {
                    false
                }
                _ => true,
            },
            PartitionMapping::Static { .. } => {
                up.time_window().is_none() && down.time_window().is_none()
            }
        };
        if compatible {
            Ok(())
        } else {
            Err(self.incompatible(upstream, downstream))
        }
    }

    /// Child partitions all of whose parent partitions are in `subset`
    pub fn downstream_partitions(
        &self,
        upstream_def: Option<&PartitionsDefinition>,
        subset: &PartitionSubset,
        downstream_def: Option<&PartitionsDefinition>,
        ctx: &PartitionContext<'_>,
    ) -> Result<PartitionSubset, PartitionMappingError> {
        self.map_downstream(upstream_def, subset, downstream_def, ctx, Coverage::All)
    }

    /// Child partitions depending on at least one partition in `subset`
    pub fn downstream_partitions_any(
        &self,
        upstream_def: Option<&PartitionsDefinition>,
        subset: &PartitionSubset,
        downstream_def: Option<&PartitionsDefinition>,
        ctx: &PartitionContext<'_>,
    ) -> Result<PartitionSubset, PartitionMappingError> {
        self.map_downstream(upstream_def, subset, downstream_def, ctx, Coverage::Any)
    }

    /// Parent partitions that the child partitions in `subset` depend on
    ///
    /// Parent partitions that do not exist yet are left out.
    pub fn upstream_partitions(
        &self,
        downstream_def: Option<&PartitionsDefinition>,
        subset: &PartitionSubset,
        upstream_def: Option<&PartitionsDefinition>,
        ctx: &PartitionContext<'_>,
    ) -> Result<PartitionSubset, PartitionMappingError> {
        if subset.is_empty() {
            return Ok(empty_subset(upstream_def));
        }
        let (down, up) = match (downstream_def, upstream_def) {
            (_, None) => return Ok(PartitionSubset::unpartitioned(true)),
            (None, Some(up)) => {
                return match self {
                    PartitionMapping::LastPartition => Ok(last_subset(up, ctx)),
                    _ => Ok(up.all_subset(ctx)),
                }
            }
            (Some(down), Some(up)) => (down, up),
        };
        match self {
            PartitionMapping::AllPartitions => Ok(up.all_subset(ctx)),
            PartitionMapping::LastPartition => Ok(last_subset(up, ctx)),
            PartitionMapping::Identity
            | PartitionMapping::TimeWindow
            | PartitionMapping::TimeOffset { .. } => match (down, up) {
                (PartitionsDefinition::TimeWindow(d), PartitionsDefinition::TimeWindow(u)) => {
                    let offset = self.offset_for(d, u).ok_or_else(|| {
                        self.incompatible(upstream_def, downstream_def)
                    })?;
                    let shifted: Vec<IndexRange> = subset
                        .ranges()
                        .iter()
                        .map(|r| IndexRange::new(r.start + offset, r.end + offset))
                        .collect();
                    let ranges = cover_ranges(d, &shifted, u, Coverage::Any);
                    Ok(clamp(u, ranges, ctx))
                }
                (PartitionsDefinition::TimeWindow(_), _) | (_, PartitionsDefinition::TimeWindow(_)) => {
                    Err(self.incompatible(upstream_def, downstream_def))
                }
                _ if matches!(self, PartitionMapping::Identity) => {
                    let keys: Vec<String> = subset.keys().collect();
                    Ok(up.subset_with_valid_keys(keys, ctx))
                }
                _ => Err(self.incompatible(upstream_def, downstream_def)),
            },
            PartitionMapping::Static {
                downstream_by_upstream,
            } => {
                if up.time_window().is_some() || down.time_window().is_some() {
                    return Err(self.incompatible(upstream_def, downstream_def));
                }
                let keys = downstream_by_upstream
                    .iter()
                    .filter(|(_, children)| children.iter().any(|c| subset.contains(c)))
                    .map(|(parent, _)| parent.as_str());
                Ok(up.subset_with_valid_keys(keys, ctx))
            }
        }
    }

    /// Index shift between child and parent windows for same-cadence mappings
    fn offset_for(&self, down: &TimeWindowPartitions, up: &TimeWindowPartitions) -> Option<i64> {
        match self {
            PartitionMapping::TimeOffset { offset } => {
                (down.granularity() == up.granularity()).then_some(i64::from(*offset))
            }
            PartitionMapping::Identity => (down.granularity() == up.granularity()).then_some(0),
            _ => Some(0),
        }
    }

    fn map_downstream(
        &self,
        upstream_def: Option<&PartitionsDefinition>,
        subset: &PartitionSubset,
        downstream_def: Option<&PartitionsDefinition>,
        ctx: &PartitionContext<'_>,
        coverage: Coverage,
    ) -> Result<PartitionSubset, PartitionMappingError> {
        check_subset(upstream_def, subset)?;
        match (upstream_def, downstream_def) {
            (None, None) => Ok(subset.clone()),
            // unpartitioned parent: every child partition depends on it
            (None, Some(down)) => Ok(if subset.is_empty() {
                down.empty_subset()
            } else {
                down.all_subset(ctx)
            }),
            (Some(up), None) => Ok(PartitionSubset::unpartitioned(
                self.fans_in(up, subset, ctx, coverage),
            )),
            (Some(up), Some(down)) => self.map_partitioned(up, subset, down, ctx, coverage),
        }
    }

    /// Whether a fan-in edge (partitioned parent, unpartitioned child) is
    /// satisfied by `subset`
    fn fans_in(
        &self,
        up: &PartitionsDefinition,
        subset: &PartitionSubset,
        ctx: &PartitionContext<'_>,
        coverage: Coverage,
    ) -> bool {
        match self {
            PartitionMapping::LastPartition => up
                .last_partition_key(ctx)
                .is_some_and(|last| subset.contains(&last)),
            PartitionMapping::AllPartitions => match coverage {
                Coverage::Any => !subset.is_empty(),
                Coverage::All => {
                    let all = up.all_subset(ctx);
                    !all.is_empty()
                        && all.subtract(subset).map(|rest| rest.is_empty()).unwrap_or(false)
                }
            },
            // not a fan-in edge
            _ => false,
        }
    }

    fn map_partitioned(
        &self,
        up: &PartitionsDefinition,
        subset: &PartitionSubset,
        down: &PartitionsDefinition,
        ctx: &PartitionContext<'_>,
        coverage: Coverage,
    ) -> Result<PartitionSubset, PartitionMappingError> {
        let upstream_def = Some(up);
        let downstream_def = Some(down);
        match self {
            PartitionMapping::AllPartitions | PartitionMapping::LastPartition => {
                Ok(if self.fans_in(up, subset, ctx, coverage) {
                    down.all_subset(ctx)
                } else {
                    down.empty_subset()
                })
            }
            PartitionMapping::Identity
            | PartitionMapping::TimeWindow
            | PartitionMapping::TimeOffset { .. } => match (up, down) {
                (PartitionsDefinition::TimeWindow(u), PartitionsDefinition::TimeWindow(d)) => {
                    let offset = self
                        .offset_for(d, u)
                        .ok_or_else(|| self.incompatible(upstream_def, downstream_def))?;
                    let covered = cover_ranges(u, subset.ranges(), d, coverage);
                    let shifted = covered
                        .into_iter()
                        .map(|r| IndexRange::new(r.start - offset, r.end - offset))
                        .collect();
                    Ok(clamp(d, shifted, ctx))
                }
                (PartitionsDefinition::TimeWindow(_), _) | (_, PartitionsDefinition::TimeWindow(_)) => {
                    Err(self.incompatible(upstream_def, downstream_def))
                }
                _ if matches!(self, PartitionMapping::Identity) => {
                    let keys: Vec<String> = subset.keys().collect();
                    Ok(down.subset_with_valid_keys(keys, ctx))
                }
                _ => Err(self.incompatible(upstream_def, downstream_def)),
            },
            PartitionMapping::Static {
                downstream_by_upstream,
            } => {
                if up.time_window().is_some() || down.time_window().is_some() {
                    return Err(self.incompatible(upstream_def, downstream_def));
                }
                let mut parents_by_child: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
                for (parent, children) in downstream_by_upstream {
                    for child in children {
                        parents_by_child
                            .entry(child.as_str())
                            .or_default()
                            .push(parent.as_str());
                    }
                }
                let keys = parents_by_child
                    .into_iter()
                    .filter(|(_, parents)| match coverage {
                        Coverage::All => parents.iter().all(|p| subset.contains(p)),
                        Coverage::Any => parents.iter().any(|p| subset.contains(p)),
                    })
                    .map(|(child, _)| child);
                Ok(down.subset_with_valid_keys(keys, ctx))
            }
        }
    }
}

fn empty_subset(def: Option<&PartitionsDefinition>) -> PartitionSubset {
    def.map(PartitionsDefinition::empty_subset)
        .unwrap_or_else(|| PartitionSubset::unpartitioned(false))
}

fn last_subset(def: &PartitionsDefinition, ctx: &PartitionContext<'_>) -> PartitionSubset {
    match def.last_partition_key(ctx) {
        Some(last) => def.subset_with_valid_keys([last], ctx),
        None => def.empty_subset(),
    }
}

/// Reject subsets that do not belong to `def`
fn check_subset(
    def: Option<&PartitionsDefinition>,
    subset: &PartitionSubset,
) -> Result<(), PartitionMappingError> {
    let expected = empty_subset(def);
    expected
        .union(subset)
        .map(|_| ())
        .map_err(|source| PartitionMappingError::SubsetMismatch {
            asset_side: "upstream asset",
            source,
        })
}

/// Map index ranges of `from` windows onto `to` windows.
///
/// With [`Coverage::All`] a `to` window is kept only when it lies entirely
/// inside a range; with [`Coverage::Any`] it is kept when it overlaps one.
fn cover_ranges(
    from: &TimeWindowPartitions,
    ranges: &[IndexRange],
    to: &TimeWindowPartitions,
    coverage: Coverage,
) -> Vec<IndexRange> {
    ranges
        .iter()
        .filter_map(|range| {
            let start = from.window_start(range.start)?;
            let end = from.window_start(range.end)?;
            let mapped = match coverage {
                Coverage::All => IndexRange::new(to.ceil_index(start), to.floor_index(end)),
                Coverage::Any => IndexRange::new(to.floor_index(start), to.ceil_index(end)),
            };
            Some(mapped)
        })
        .collect()
}

/// Restrict ranges to the windows of `def` that exist at the context's time
fn clamp(def: &TimeWindowPartitions, ranges: Vec<IndexRange>, ctx: &PartitionContext<'_>) -> PartitionSubset {
    let count = def.partition_count(ctx.current_time);
    let clamped = ranges
        .into_iter()
        .map(|r| IndexRange::new(r.start.max(0), r.end.min(count)))
        .collect();
    PartitionSubset::from_ranges(def.clone(), clamped)
}
