//! Asset graph fixtures and evaluation times
//!
//! Provides pre-built graphs with sensible defaults. Every asset in these
//! graphs carries an eager policy unless noted otherwise.

use chrono::{DateTime, TimeZone, Utc};
use reconciler_core::{
    AssetGraph, AssetNode, AutoMaterializePolicy, PartitionMapping, PartitionsDefinition,
};

/// Fixed evaluation times
pub mod time {
    use super::*;

    /// UTC instant from calendar fields
    pub fn at(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(year, month, day, hour, minute, 0)
            .single()
            .expect("valid fixture time")
    }

    /// Start of the hourly scenario partitions
    pub fn hourly_start() -> DateTime<Utc> {
        at(2013, 1, 5, 0, 0)
    }
}

/// Eager policy without a rate limit
pub fn unlimited_eager() -> AutoMaterializePolicy {
    AutoMaterializePolicy::eager()
        .with_max_materializations_per_minute(None)
        .expect("None is a valid rate limit")
}

fn hourly_since_2013() -> PartitionsDefinition {
    PartitionsDefinition::hourly("2013-01-05-00:00").expect("valid hourly start")
}

/// Graph fixture factories
pub mod graph {
    use super::*;

    /// `a -> b -> c`, unpartitioned
    pub fn linear() -> AssetGraph {
        AssetGraph::from_assets(vec![
            AssetNode::builder("a")
                .auto_materialize_policy(AutoMaterializePolicy::eager())
                .build(),
            AssetNode::builder("b")
                .depends_on("a")
                .auto_materialize_policy(AutoMaterializePolicy::eager())
                .build(),
            AssetNode::builder("c")
                .depends_on("b")
                .auto_materialize_policy(AutoMaterializePolicy::eager())
                .build(),
        ])
        .expect("linear graph")
    }

    /// `hourly1 -> hourly2`, both hourly since 2013-01-05-00:00
    pub fn hourly_chain() -> AssetGraph {
        AssetGraph::from_assets(vec![
            AssetNode::builder("hourly1")
                .partitions(hourly_since_2013())
                .auto_materialize_policy(AutoMaterializePolicy::eager())
                .build(),
            AssetNode::builder("hourly2")
                .partitions(hourly_since_2013())
                .depends_on("hourly1")
                .auto_materialize_policy(AutoMaterializePolicy::eager())
                .build(),
        ])
        .expect("hourly chain")
    }

    /// `hourly -> daily`, both starting 2013-01-05, without rate limits
    pub fn hourly_to_daily() -> AssetGraph {
        AssetGraph::from_assets(vec![
            AssetNode::builder("hourly")
                .partitions(hourly_since_2013())
                .build(),
            AssetNode::builder("daily")
                .partitions(PartitionsDefinition::daily("2013-01-05").expect("valid daily start"))
                .depends_on("hourly")
                .auto_materialize_policy(unlimited_eager())
                .build(),
        ])
        .expect("hourly to daily graph")
    }

    /// Two independent chains: `left_up -> left_down` (daily) and
    /// `right_up -> right_down` (unpartitioned)
    pub fn two_chains() -> AssetGraph {
        let daily = || PartitionsDefinition::daily("2013-01-05").expect("valid daily start");
        AssetGraph::from_assets(vec![
            AssetNode::builder("left_up")
                .partitions(daily())
                .auto_materialize_policy(unlimited_eager())
                .build(),
            AssetNode::builder("left_down")
                .partitions(daily())
                .depends_on("left_up")
                .auto_materialize_policy(unlimited_eager())
                .build(),
            AssetNode::builder("right_up")
                .auto_materialize_policy(AutoMaterializePolicy::eager())
                .build(),
            AssetNode::builder("right_down")
                .depends_on("right_up")
                .auto_materialize_policy(AutoMaterializePolicy::eager())
                .build(),
        ])
        .expect("two chains graph")
    }

    /// `events -> rolling`, daily, where each day depends on the previous day
    pub fn daily_with_offset() -> AssetGraph {
        let daily = || PartitionsDefinition::daily("2013-01-05").expect("valid daily start");
        AssetGraph::from_assets(vec![
            AssetNode::builder("events").partitions(daily()).build(),
            AssetNode::builder("rolling")
                .partitions(daily())
                .depends_on_with_mapping("events", PartitionMapping::TimeOffset { offset: -1 })
                .auto_materialize_policy(unlimited_eager())
                .build(),
        ])
        .expect("offset graph")
    }

    /// `regions` (static) fanning into unpartitioned `summary`
    pub fn static_fan_in() -> AssetGraph {
        AssetGraph::from_assets(vec![
            AssetNode::builder("regions")
                .partitions(
                    PartitionsDefinition::static_keys(["emea", "amer", "apac"])
                        .expect("valid static keys"),
                )
                .auto_materialize_policy(unlimited_eager())
                .build(),
            AssetNode::builder("summary")
                .depends_on("regions")
                .auto_materialize_policy(AutoMaterializePolicy::eager())
                .build(),
        ])
        .expect("static fan-in graph")
    }

    /// `a -> b -> c <- d`, unpartitioned, where only `c` has a policy
    pub fn diamond() -> AssetGraph {
        AssetGraph::from_assets(vec![
            AssetNode::new("a"),
            AssetNode::builder("b").depends_on("a").build(),
            AssetNode::new("d"),
            AssetNode::builder("c")
                .depends_on("b")
                .depends_on("d")
                .auto_materialize_policy(unlimited_eager())
                .build(),
        ])
        .expect("diamond graph")
    }

    /// `customers` with dynamic partitions registered under "customers"
    pub fn dynamic_customers() -> AssetGraph {
        AssetGraph::from_assets(vec![AssetNode::builder("customers")
            .partitions(PartitionsDefinition::dynamic("customers"))
            .auto_materialize_policy(unlimited_eager())
            .build()])
        .expect("dynamic graph")
    }
}
