//! Partitions definitions
//!
//! A [`PartitionsDefinition`] describes how an asset's instances are split:
//!
//! - **Time window**: half-open, contiguous windows of a fixed cadence starting
//!   at a boundary, keyed by the formatted window start (UTC)
//! - **Static**: a fixed, declared set of keys
//! - **Dynamic**: keys registered externally under a definition name, read
//!   from the tick's [`DynamicPartitionsSnapshot`](crate::DynamicPartitionsSnapshot)
//!
//! Only completed windows exist: at evaluation time `t` the last partition of a
//! time-window definition is the last window whose end is `<= t`.
//!
//! # Example
//!
//! ```rust
//! use chrono::{TimeZone, Utc};
//! use reconciler_core::{DynamicPartitionsSnapshot, PartitionContext, PartitionsDefinition};
//!
//! let daily = PartitionsDefinition::daily("2024-01-01").unwrap();
//! let dynamic = DynamicPartitionsSnapshot::default();
//! let ctx = PartitionContext::new(Utc.with_ymd_and_hms(2024, 1, 3, 12, 0, 0).unwrap(), &dynamic);
//!
//! assert_eq!(daily.last_partition_key(&ctx).as_deref(), Some("2024-01-02"));
//! assert!(daily.validate_key("2024-01-01", &ctx).is_ok());
//! assert!(daily.validate_key("2024-01-03", &ctx).is_err());
//! ```

use chrono::{
    DateTime, Datelike, Duration, Months, NaiveDate, NaiveDateTime, TimeZone, Timelike, Utc,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::partition_context::PartitionContext;
use crate::subset::{IndexRange, PartitionSubset};

/// Errors raised by partition definitions and subsets
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum PartitionError {
    /// Key is malformed, misaligned, or outside the definition's range
    #[error("Invalid partition key '{key}': {reason}")]
    InvalidPartitionKey { key: String, reason: String },

    /// Set operation between subsets of different partitionings
    #[error("Incompatible partition subsets: {left} and {right}")]
    IncompatibleSubsets { left: String, right: String },

    /// Definition cannot be constructed
    #[error("Invalid partitions definition: {0}")]
    InvalidDefinition(String),
}

impl PartitionError {
    fn invalid_key(key: &str, reason: impl Into<String>) -> Self {
        Self::InvalidPartitionKey {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

/// Cadence of a time-window partitions definition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeGranularity {
    Hourly,
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl TimeGranularity {
    /// Default key format for the cadence
    pub fn default_format(self) -> &'static str {
        match self {
            TimeGranularity::Hourly => "%Y-%m-%d-%H:%M",
            _ => "%Y-%m-%d",
        }
    }

    /// True when `self` windows are strictly shorter than `other` windows
    pub fn is_finer_than(self, other: TimeGranularity) -> bool {
        self < other
    }

    fn fixed_step(self) -> Option<Duration> {
        match self {
            TimeGranularity::Hourly => Some(Duration::hours(1)),
            TimeGranularity::Daily => Some(Duration::days(1)),
            TimeGranularity::Weekly => Some(Duration::weeks(1)),
            TimeGranularity::Monthly | TimeGranularity::Yearly => None,
        }
    }

    fn months_per_window(self) -> u32 {
        match self {
            TimeGranularity::Yearly => 12,
            _ => 1,
        }
    }

    /// Largest window boundary `<= t`
    fn floor_boundary(self, t: DateTime<Utc>) -> DateTime<Utc> {
        let date = t.date_naive();
        let naive = match self {
            TimeGranularity::Hourly => date.and_hms_opt(t.hour(), 0, 0),
            TimeGranularity::Daily => date.and_hms_opt(0, 0, 0),
            TimeGranularity::Weekly => {
                let monday = date - Duration::days(i64::from(date.weekday().num_days_from_monday()));
                monday.and_hms_opt(0, 0, 0)
            }
            TimeGranularity::Monthly => date.with_day(1).and_then(|d| d.and_hms_opt(0, 0, 0)),
            TimeGranularity::Yearly => {
                NaiveDate::from_ymd_opt(date.year(), 1, 1).and_then(|d| d.and_hms_opt(0, 0, 0))
            }
        };
        naive.map(|n| Utc.from_utc_datetime(&n)).unwrap_or(t)
    }

    /// Smallest window boundary `>= t`
    fn ceil_boundary(self, t: DateTime<Utc>) -> DateTime<Utc> {
        let floor = self.floor_boundary(t);
        if floor == t {
            return t;
        }
        match self.fixed_step() {
            Some(step) => floor + step,
            None => floor
                .checked_add_months(Months::new(self.months_per_window()))
                .unwrap_or(floor),
        }
    }
}

impl fmt::Display for TimeGranularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TimeGranularity::Hourly => "hourly",
            TimeGranularity::Daily => "daily",
            TimeGranularity::Weekly => "weekly",
            TimeGranularity::Monthly => "monthly",
            TimeGranularity::Yearly => "yearly",
        };
        f.write_str(name)
    }
}

/// A half-open time window `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Contiguous time-window partitions of a fixed cadence
///
/// Windows are indexed from 0 at the first boundary at or after the
/// configured start. Index arithmetic is the basis of every subset and
/// mapping operation on time-window assets.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeWindowPartitions {
    granularity: TimeGranularity,
    start: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    end: Option<DateTime<Utc>>,
    format: String,
}

impl TimeWindowPartitions {
    /// Windows of `granularity` starting at the first boundary `>= start`
    pub fn new(granularity: TimeGranularity, start: DateTime<Utc>) -> Self {
        Self {
            granularity,
            start: granularity.ceil_boundary(start),
            end: None,
            format: granularity.default_format().to_string(),
        }
    }

    /// Parse `start` using the cadence's default key format
    pub fn parse(granularity: TimeGranularity, start: &str) -> Result<Self, PartitionError> {
        let format = granularity.default_format();
        let start = parse_time(start, format).ok_or_else(|| {
            PartitionError::InvalidDefinition(format!(
                "start '{start}' does not match format '{format}'"
            ))
        })?;
        Ok(Self::new(granularity, start))
    }

    /// Stop creating windows that would end after `end`
    pub fn with_end(mut self, end: DateTime<Utc>) -> Self {
        self.end = Some(end);
        self
    }

    /// Use a custom key format
    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = format.into();
        self
    }

    pub fn granularity(&self) -> TimeGranularity {
        self.granularity
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> Option<DateTime<Utc>> {
        self.end
    }

    pub fn format(&self) -> &str {
        &self.format
    }

    /// Start of window `index` (negative indices lie before the first window)
    pub fn window_start(&self, index: i64) -> Option<DateTime<Utc>> {
        match self.granularity.fixed_step() {
            Some(step) => {
                let offset = step.num_seconds().checked_mul(index)?;
                self.start.checked_add_signed(Duration::seconds(offset))
            }
            None => {
                let months = i64::from(self.granularity.months_per_window()).checked_mul(index)?;
                let magnitude = u32::try_from(months.unsigned_abs()).ok()?;
                if months >= 0 {
                    self.start.checked_add_months(Months::new(magnitude))
                } else {
                    self.start.checked_sub_months(Months::new(magnitude))
                }
            }
        }
    }

    pub fn window(&self, index: i64) -> Option<TimeWindow> {
        Some(TimeWindow {
            start: self.window_start(index)?,
            end: self.window_start(index + 1)?,
        })
    }

    /// Largest index whose window starts at or before `t`
    pub fn floor_index(&self, t: DateTime<Utc>) -> i64 {
        match self.granularity.fixed_step() {
            Some(step) => (t - self.start).num_seconds().div_euclid(step.num_seconds()),
            None => {
                let months = i64::from(t.year() - self.start.year()) * 12
                    + i64::from(t.month()) - i64::from(self.start.month());
                months.div_euclid(i64::from(self.granularity.months_per_window()))
            }
        }
    }

    /// Smallest index whose window starts at or after `t`
    pub fn ceil_index(&self, t: DateTime<Utc>) -> i64 {
        let floor = self.floor_index(t);
        if self.window_start(floor) == Some(t) {
            floor
        } else {
            floor + 1
        }
    }

    /// Number of completed windows at `current_time`
    pub fn partition_count(&self, current_time: DateTime<Utc>) -> i64 {
        let completed = self.floor_index(current_time).max(0);
        match self.end {
            Some(end) => completed.min(self.floor_index(end).max(0)),
            None => completed,
        }
    }

    /// Key of window `index`
    pub fn key_for_index(&self, index: i64) -> Option<String> {
        self.window_start(index)
            .map(|start| start.format(&self.format).to_string())
    }

    /// Index of a well-formed, aligned key, without checking that the window exists
    pub fn aligned_index(&self, key: &str) -> Result<i64, PartitionError> {
        let time = parse_time(key, &self.format).ok_or_else(|| {
            PartitionError::invalid_key(key, format!("does not match format '{}'", self.format))
        })?;
        let index = self.floor_index(time);
        if self.window_start(index) != Some(time) {
            return Err(PartitionError::invalid_key(
                key,
                format!("not aligned to a {} window boundary", self.granularity),
            ));
        }
        if self.key_for_index(index).as_deref() != Some(key) {
            return Err(PartitionError::invalid_key(key, "not in canonical form"));
        }
        Ok(index)
    }

    /// Index of `key`, requiring the window to exist at `current_time`
    pub fn index_of_key(&self, key: &str, current_time: DateTime<Utc>) -> Result<i64, PartitionError> {
        let index = self.aligned_index(key)?;
        if index < 0 || index >= self.partition_count(current_time) {
            return Err(PartitionError::invalid_key(
                key,
                "outside the range of existing partitions",
            ));
        }
        Ok(index)
    }
}

fn parse_time(value: &str, format: &str) -> Option<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(value, format).ok().or_else(|| {
        NaiveDate::parse_from_str(value, format)
            .ok()
            .and_then(|date| date.and_hms_opt(0, 0, 0))
    })?;
    Some(Utc.from_utc_datetime(&naive))
}

/// Fixed, declared partition keys
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StaticPartitions {
    keys: Vec<String>,
}

impl StaticPartitions {
    pub fn keys(&self) -> &[String] {
        &self.keys
    }
}

/// Externally registered partition keys, looked up by definition name
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DynamicPartitions {
    name: String,
}

impl DynamicPartitions {
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// How an asset is partitioned
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PartitionsDefinition {
    TimeWindow(TimeWindowPartitions),
    Static(StaticPartitions),
    Dynamic(DynamicPartitions),
}

impl PartitionsDefinition {
    pub fn hourly(start: &str) -> Result<Self, PartitionError> {
        TimeWindowPartitions::parse(TimeGranularity::Hourly, start).map(Self::TimeWindow)
    }

    pub fn daily(start: &str) -> Result<Self, PartitionError> {
        TimeWindowPartitions::parse(TimeGranularity::Daily, start).map(Self::TimeWindow)
    }

    pub fn weekly(start: &str) -> Result<Self, PartitionError> {
        TimeWindowPartitions::parse(TimeGranularity::Weekly, start).map(Self::TimeWindow)
    }

    pub fn monthly(start: &str) -> Result<Self, PartitionError> {
        TimeWindowPartitions::parse(TimeGranularity::Monthly, start).map(Self::TimeWindow)
    }

    pub fn yearly(start: &str) -> Result<Self, PartitionError> {
        TimeWindowPartitions::parse(TimeGranularity::Yearly, start).map(Self::TimeWindow)
    }

    /// Static keys; must be non-empty and unique
    pub fn static_keys<I, S>(keys: I) -> Result<Self, PartitionError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let keys: Vec<String> = keys.into_iter().map(Into::into).collect();
        if keys.is_empty() {
            return Err(PartitionError::InvalidDefinition(
                "static partitions require at least one key".to_string(),
            ));
        }
        let unique: BTreeSet<&String> = keys.iter().collect();
        if unique.len() != keys.len() {
            return Err(PartitionError::InvalidDefinition(
                "static partition keys must be unique".to_string(),
            ));
        }
        Ok(Self::Static(StaticPartitions { keys }))
    }

    pub fn dynamic(name: impl Into<String>) -> Self {
        Self::Dynamic(DynamicPartitions { name: name.into() })
    }

    pub fn time_window(&self) -> Option<&TimeWindowPartitions> {
        match self {
            PartitionsDefinition::TimeWindow(tw) => Some(tw),
            _ => None,
        }
    }

    /// Short description used in logs and errors
    pub fn describe(&self) -> String {
        match self {
            PartitionsDefinition::TimeWindow(tw) => {
                format!("{} since {}", tw.granularity, tw.start.format(&tw.format))
            }
            PartitionsDefinition::Static(s) => format!("static ({} keys)", s.keys.len()),
            PartitionsDefinition::Dynamic(d) => format!("dynamic '{}'", d.name),
        }
    }

    /// Keys of a static or dynamic definition, in declaration order
    fn declared_keys<'a>(&'a self, ctx: &PartitionContext<'a>) -> &'a [String] {
        match self {
            PartitionsDefinition::Static(s) => &s.keys,
            PartitionsDefinition::Dynamic(d) => ctx.dynamic_partitions.partition_keys(&d.name),
            PartitionsDefinition::TimeWindow(_) => &[],
        }
    }

    /// Check that `key` names an existing partition
    pub fn validate_key(&self, key: &str, ctx: &PartitionContext<'_>) -> Result<(), PartitionError> {
        match self {
            PartitionsDefinition::TimeWindow(tw) => {
                tw.index_of_key(key, ctx.current_time).map(|_| ())
            }
            _ => {
                if self.declared_keys(ctx).iter().any(|k| k == key) {
                    Ok(())
                } else {
                    Err(PartitionError::invalid_key(
                        key,
                        format!("not a partition of {}", self.describe()),
                    ))
                }
            }
        }
    }

    pub fn has_partition_key(&self, key: &str, ctx: &PartitionContext<'_>) -> bool {
        self.validate_key(key, ctx).is_ok()
    }

    pub fn empty_subset(&self) -> PartitionSubset {
        match self {
            PartitionsDefinition::TimeWindow(tw) => PartitionSubset::from_ranges(tw.clone(), Vec::new()),
            _ => PartitionSubset::Keys {
                keys: BTreeSet::new(),
            },
        }
    }

    /// Every partition that exists at the context's current time
    pub fn all_subset(&self, ctx: &PartitionContext<'_>) -> PartitionSubset {
        match self {
            PartitionsDefinition::TimeWindow(tw) => {
                let count = tw.partition_count(ctx.current_time);
                PartitionSubset::from_ranges(tw.clone(), vec![IndexRange::new(0, count)])
            }
            _ => PartitionSubset::Keys {
                keys: self.declared_keys(ctx).iter().cloned().collect(),
            },
        }
    }

    /// Most recent partition for time windows, last declared key otherwise
    pub fn last_partition_key(&self, ctx: &PartitionContext<'_>) -> Option<String> {
        match self {
            PartitionsDefinition::TimeWindow(tw) => {
                let count = tw.partition_count(ctx.current_time);
                if count == 0 {
                    None
                } else {
                    tw.key_for_index(count - 1)
                }
            }
            _ => self.declared_keys(ctx).last().cloned(),
        }
    }

    /// Subset containing exactly `keys`; fails on the first invalid key
    pub fn subset_with_keys<I, S>(
        &self,
        keys: I,
        ctx: &PartitionContext<'_>,
    ) -> Result<PartitionSubset, PartitionError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        match self {
            PartitionsDefinition::TimeWindow(tw) => {
                let ranges = keys
                    .into_iter()
                    .map(|key| {
                        tw.index_of_key(key.as_ref(), ctx.current_time)
                            .map(|index| IndexRange::new(index, index + 1))
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(PartitionSubset::from_ranges(tw.clone(), ranges))
            }
            _ => {
                let mut out = BTreeSet::new();
                for key in keys {
                    self.validate_key(key.as_ref(), ctx)?;
                    out.insert(key.as_ref().to_string());
                }
                Ok(PartitionSubset::Keys { keys: out })
            }
        }
    }

    /// Subset containing the valid members of `keys`; invalid keys are dropped
    pub fn subset_with_valid_keys<I, S>(&self, keys: I, ctx: &PartitionContext<'_>) -> PartitionSubset
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let valid: Vec<S> = keys
            .into_iter()
            .filter(|key| self.has_partition_key(key.as_ref(), ctx))
            .collect();
        self.subset_with_keys(valid, ctx)
            .unwrap_or_else(|_| self.empty_subset())
    }
}
