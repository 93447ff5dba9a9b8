//! Run request batching
//!
//! Assets that share a partitions definition are requested together, one run
//! per partition key. Unpartitioned assets share a single run. Assets with
//! different partitionings are never batched.

use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

use reconciler_core::{AssetGraph, AssetKey, PartitionContext, PartitionSubset, PartitionsDefinition};

use crate::run_request::{RunRequest, RunRequestError, PARTITION_TAG};

type KeyedSelection = BTreeMap<Option<String>, BTreeSet<AssetKey>>;

/// Turn per-asset decisions into run requests ordered by
/// (smallest selected asset key, partition key)
///
/// A user tag named [`PARTITION_TAG`] is ignored; the tag always carries the
/// request's own partition key.
pub fn build_run_requests(
    graph: &AssetGraph,
    decisions: &BTreeMap<AssetKey, PartitionSubset>,
    ctx: &PartitionContext<'_>,
    tags: &BTreeMap<String, String>,
) -> Result<Vec<RunRequest>, RunRequestError> {
    // definitions are compared by value
    let mut groups: Vec<(Option<&PartitionsDefinition>, KeyedSelection)> = Vec::new();

    for (asset, decision) in decisions {
        if decision.is_empty() {
            continue;
        }
        let def = graph.partitions_def(asset);
        let position = match groups.iter().position(|(existing, _)| *existing == def) {
            Some(position) => position,
            None => {
                groups.push((def, BTreeMap::new()));
                groups.len() - 1
            }
        };
        let selection = &mut groups[position].1;

        match def {
            None => {
                selection.entry(None).or_default().insert(asset.clone());
            }
            Some(_) => {
                for partition_key in decision.keys() {
                    selection
                        .entry(Some(partition_key))
                        .or_default()
                        .insert(asset.clone());
                }
            }
        }
    }

    if tags.contains_key(PARTITION_TAG) {
        warn!(tag = PARTITION_TAG, "Ignoring run tag reserved for the partition key");
    }
    let mut requests = Vec::new();
    for (_, selection) in groups {
        for (partition_key, assets) in selection {
            let mut request = RunRequest::new(graph, assets, partition_key, ctx)?;
            for (key, value) in tags.iter().filter(|(key, _)| key.as_str() != PARTITION_TAG) {
                request = request.with_tag(key.clone(), value.clone());
            }
            requests.push(request);
        }
    }

    requests.sort_by(|a, b| {
        (a.min_asset_key(), &a.partition_key).cmp(&(b.min_asset_key(), &b.partition_key))
    });
    debug!(run_requests = requests.len(), "Built run requests");
    Ok(requests)
}
