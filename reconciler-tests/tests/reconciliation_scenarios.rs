//! End-to-end reconciliation scenarios
//!
//! Each test builds a graph and a history, runs one or more ticks through
//! `reconcile` and checks the run requests and per-asset evaluations.

use reconciler_core::{
    AssetGraph, AssetKey, AssetNode, AutoMaterializePolicy, DynamicPartitionsSnapshot,
    HistorySnapshot,
};
use reconciler_runtime::{
    reconcile, AutoMaterializeCondition, EvaluationContext, PartitionSelection, TickResult,
    TickSnapshot,
};
use reconciler_tests::assertions::to_canonical_json;
use reconciler_tests::{graph, time, HistoryBuilder, TickAssertions};

fn tick(graph: &AssetGraph, history: HistorySnapshot, ctx: &EvaluationContext) -> TickResult {
    let snapshot = TickSnapshot::new(history, DynamicPartitionsSnapshot::default());
    reconcile(graph, &snapshot, ctx).expect("tick completes")
}

#[test]
fn test_bad_upstream_partition_key_requests_nothing() {
    let graph = graph::hourly_chain();
    let now = time::at(2013, 1, 5, 4, 0);
    let ctx = EvaluationContext::new(now).with_asset_selection([AssetKey::from("hourly2")]);

    let history = HistoryBuilder::new(now)
        .materialize("hourly1", Some("bad partition key"))
        .build();
    let result = tick(&graph, history, &ctx);

    TickAssertions::new(&result)
        .assert_no_run_requests()
        .assert_condition("hourly2", AutoMaterializeCondition::Missing)
        .assert_condition("hourly2", AutoMaterializeCondition::ParentMissing)
        .assert_decision("hourly2", &[]);
}

#[test]
fn test_materialized_upstream_partition_unblocks_one_request() {
    let graph = graph::hourly_chain();
    let now = time::at(2013, 1, 5, 4, 0);
    let ctx = EvaluationContext::new(now).with_asset_selection([AssetKey::from("hourly2")]);

    let history = HistoryBuilder::new(now)
        .materialize("hourly1", Some("bad partition key"))
        .materialize_with_version("hourly1", Some("2013-01-05-00:00"), "v1")
        .build();
    let result = tick(&graph, history, &ctx);

    TickAssertions::new(&result)
        .assert_run_requests(&[(&["hourly2"], Some("2013-01-05-00:00"))])
        .assert_decision("hourly2", &["2013-01-05-00:00"]);
}

#[test]
fn test_full_day_of_hours_requests_daily_partition() {
    let graph = graph::hourly_to_daily();
    let now = time::at(2013, 1, 6, 0, 0);
    let hours: Vec<String> = (0..24).map(|h| format!("2013-01-05-{h:02}:00")).collect();

    let history = HistoryBuilder::new(now)
        .materialize_all("hourly", hours.iter().map(String::as_str))
        .build();
    let result = tick(&graph, history, &EvaluationContext::new(now));

    TickAssertions::new(&result)
        .assert_run_requests(&[(&["daily"], Some("2013-01-05"))])
        .assert_no_condition("daily", AutoMaterializeCondition::ParentMissing);
}

#[test]
fn test_partial_day_of_hours_requests_nothing() {
    let graph = graph::hourly_to_daily();
    let now = time::at(2013, 1, 6, 0, 0);
    let hours: Vec<String> = (0..23).map(|h| format!("2013-01-05-{h:02}:00")).collect();

    let history = HistoryBuilder::new(now)
        .materialize_all("hourly", hours.iter().map(String::as_str))
        .build();
    let result = tick(&graph, history, &EvaluationContext::new(now));

    TickAssertions::new(&result)
        .assert_no_run_requests()
        .assert_condition("daily", AutoMaterializeCondition::ParentMissing)
        .assert_decision("daily", &[]);
}

#[test]
fn test_determinism() {
    let now = time::at(2013, 1, 8, 0, 0);
    let history = HistoryBuilder::new(now)
        .materialize("left_up", Some("2013-01-05"))
        .materialize("right_up", None)
        .materialize("right_down", None)
        .materialize("right_up", None)
        .build();

    let first = tick(&graph::two_chains(), history.clone(), &EvaluationContext::new(now));
    let second = tick(&graph::two_chains(), history, &EvaluationContext::new(now));

    assert_eq!(to_canonical_json(&first), to_canonical_json(&second));
}

#[test]
fn test_declaration_order_does_not_change_output() {
    let now = time::at(2013, 1, 5, 4, 0);
    let node = |name: &str, parent: Option<&str>| {
        let builder =
            AssetNode::builder(name).auto_materialize_policy(AutoMaterializePolicy::eager());
        match parent {
            Some(parent) => builder.depends_on(parent).build(),
            None => builder.build(),
        }
    };
    let forward = AssetGraph::from_assets(vec![
        node("root", None),
        node("b", Some("root")),
        node("a", Some("root")),
    ])
    .unwrap();
    let reversed = AssetGraph::from_assets(vec![
        node("a", Some("root")),
        node("b", Some("root")),
        node("root", None),
    ])
    .unwrap();

    let first = tick(&forward, HistorySnapshot::new(), &EvaluationContext::new(now));
    let second = tick(&reversed, HistorySnapshot::new(), &EvaluationContext::new(now));

    assert_eq!(to_canonical_json(&first), to_canonical_json(&second));
}

#[test]
fn test_empty_parent_decision_never_marks_child_outdated() {
    let graph = graph::linear();
    let now = time::at(2013, 1, 5, 4, 0);
    let history = HistoryBuilder::new(now)
        .materialize("a", None)
        .materialize("b", None)
        .materialize("c", None)
        .build();

    let result = tick(&graph, history, &EvaluationContext::new(now));

    TickAssertions::new(&result)
        .assert_no_run_requests()
        .assert_no_condition("b", AutoMaterializeCondition::ParentOutdated)
        .assert_no_condition("c", AutoMaterializeCondition::ParentOutdated);
}

#[test]
fn test_parent_update_propagates_through_the_chain() {
    let graph = graph::linear();
    let now = time::at(2013, 1, 5, 4, 0);
    let history = HistoryBuilder::new(now)
        .materialize("a", None)
        .materialize("b", None)
        .materialize("c", None)
        .materialize("a", None)
        .build();

    let result = tick(&graph, history, &EvaluationContext::new(now));

    TickAssertions::new(&result)
        .assert_condition("b", AutoMaterializeCondition::ParentMaterialized)
        .assert_condition("c", AutoMaterializeCondition::ParentOutdated)
        .assert_run_requests(&[(&["b", "c"], None)]);
}

#[test]
fn test_child_waits_while_parent_is_outdated() {
    let graph = graph::diamond();
    let now = time::at(2013, 1, 5, 4, 0);
    let history = HistoryBuilder::new(now)
        .materialize("a", None)
        .materialize("b", None)
        .materialize("d", None)
        .materialize("c", None)
        .materialize("a", None)
        .materialize("d", None);

    let result = tick(&graph, history.clone().build(), &EvaluationContext::new(now));
    TickAssertions::new(&result)
        .assert_no_run_requests()
        .assert_condition("c", AutoMaterializeCondition::ParentMaterialized)
        .assert_condition("c", AutoMaterializeCondition::AncestorOutdated)
        .assert_requested("c", false);

    // once b catches up with a, c is no longer held back
    let caught_up = history.materialize("b", None).build();
    let result = tick(&graph, caught_up, &EvaluationContext::new(now));
    TickAssertions::new(&result)
        .assert_run_requests(&[(&["c"], None)])
        .assert_no_condition("c", AutoMaterializeCondition::AncestorOutdated);
}

#[test]
fn test_identical_data_version_does_not_trigger_update() {
    let graph = graph::linear();
    let now = time::at(2013, 1, 5, 4, 0);
    let base = HistoryBuilder::new(now)
        .materialize_with_version("a", None, "v1")
        .materialize_from("b", None, "b1", &[("a", None)])
        .materialize_from("c", None, "c1", &[("b", None)]);

    let rerun = base.clone().materialize_with_version("a", None, "v1").build();
    let result = tick(&graph, rerun.clone(), &EvaluationContext::new(now));
    TickAssertions::new(&result).assert_no_run_requests();

    // without data versions any newer parent materialization counts
    let ctx = EvaluationContext::new(now).with_respect_data_versions(false);
    let result = tick(&graph, rerun, &ctx);
    TickAssertions::new(&result).assert_requested("b", true);

    let changed = base.materialize_with_version("a", None, "v2").build();
    let result = tick(&graph, changed, &EvaluationContext::new(now));
    TickAssertions::new(&result).assert_run_requests(&[(&["b", "c"], None)]);
}

#[test]
fn test_idempotence_after_executing_requests() {
    let graph = graph::two_chains();
    let now = time::at(2013, 1, 8, 0, 0);

    let first = tick(&graph, HistorySnapshot::new(), &EvaluationContext::new(now));
    TickAssertions::new(&first).assert_run_requests(&[
        (&["left_down", "left_up"], Some("2013-01-05")),
        (&["left_down", "left_up"], Some("2013-01-06")),
        (&["left_down", "left_up"], Some("2013-01-07")),
        (&["right_down", "right_up"], None),
    ]);

    let history = HistoryBuilder::new(now)
        .execute(&graph, &first.run_requests)
        .build();
    let second = tick(&graph, history, &EvaluationContext::new(now));

    TickAssertions::new(&second).assert_no_run_requests();
}

#[test]
fn test_invalid_key_in_one_asset_is_isolated() {
    let graph = graph::two_chains();
    let now = time::at(2013, 1, 8, 0, 0);
    let clean = HistoryBuilder::new(now).materialize("left_up", Some("2013-01-05"));
    let corrupted = clean.clone().materialize("right_up", Some("not-a-partition"));

    let baseline = tick(&graph, clean.build(), &EvaluationContext::new(now));
    let result = tick(&graph, corrupted.build(), &EvaluationContext::new(now));

    TickAssertions::new(&result).assert_error("right_up");
    for asset in ["left_up", "left_down"] {
        let key = AssetKey::from(asset);
        assert_eq!(result.evaluation(&key), baseline.evaluation(&key), "{asset} changed");
    }
}

#[test]
fn test_rate_limit_keeps_latest_partitions() {
    let graph = graph::hourly_chain();
    let now = time::at(2013, 1, 5, 4, 0);
    let ctx = EvaluationContext::new(now).with_asset_selection([AssetKey::from("hourly1")]);

    let result = tick(&graph, HistorySnapshot::new(), &ctx);

    TickAssertions::new(&result)
        .assert_run_requests(&[(&["hourly1"], Some("2013-01-05-03:00"))])
        .assert_condition("hourly1", AutoMaterializeCondition::MaxMaterializationsExceeded);
    let evaluation = result.evaluation(&AssetKey::from("hourly1")).unwrap();
    assert_eq!(evaluation.num_discarded, 3);
}

#[test]
fn test_excluded_partitions_are_never_requested() {
    let graph = graph::two_chains();
    let now = time::at(2013, 1, 8, 0, 0);
    let ctx = EvaluationContext::new(now)
        .with_exclusion(
            AssetKey::from("left_up"),
            PartitionSelection::Keys(["2013-01-06".to_string()].into_iter().collect()),
        )
        .with_exclusion(AssetKey::from("right_up"), PartitionSelection::All);

    let result = tick(&graph, HistorySnapshot::new(), &ctx);

    TickAssertions::new(&result)
        .assert_decision("left_up", &["2013-01-05", "2013-01-07"])
        .assert_decision("left_down", &["2013-01-05", "2013-01-07"])
        .assert_condition("left_down", AutoMaterializeCondition::ParentMissing)
        .assert_requested("right_up", false)
        .assert_requested("right_down", false)
        .assert_condition("right_up", AutoMaterializeCondition::Excluded);
}
