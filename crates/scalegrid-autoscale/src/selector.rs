//! Unit selection — turns a capacity delta into concrete sub-units.
//!
//! Removals:
//! - compute: walk the preference list from the top on every step and take
//!   one node from the first group that can still give one up (LIFO within
//!   the group). Groups the list never mentions are left alone.
//! - stream: merge adjacent shard pairs in ascending key order; a shard is
//!   used by at most one merge per action.
//!
//! Additions mirror this: compute nodes go to the first preferred group with
//! headroom, streams split their widest shards.

use tracing::debug;

use scalegrid_core::{
    Addition, InstanceGroup, Inventory, MergePair, PreferenceEntry, Removal, Shard,
};

use crate::error::CapacityExhausted;

/// Units picked for one action, plus the shortfall if fewer were found
/// than requested.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection<T> {
    pub units: Vec<T>,
    pub shortfall: Option<CapacityExhausted>,
}

impl<T> Selection<T> {
    fn new(resource_id: &str, requested: u32, units: Vec<T>) -> Self {
        let achievable = u32::try_from(units.len()).unwrap_or(u32::MAX);
        let shortfall = (achievable < requested).then(|| CapacityExhausted {
            resource: resource_id.to_string(),
            requested,
            achievable,
        });
        Self { units, shortfall }
    }

    pub fn achieved(&self) -> u32 {
        u32::try_from(self.units.len()).unwrap_or(u32::MAX)
    }
}

/// Pick up to `count` units to remove.
pub fn select_removals(
    resource_id: &str,
    preference: &[PreferenceEntry],
    inventory: &Inventory,
    count: u32,
) -> Selection<Removal> {
    let units = match inventory {
        Inventory::Compute { groups } => select_nodes(preference, groups, count as usize),
        Inventory::Stream { shards } => select_merges(shards, count as usize),
    };
    debug!(resource = %resource_id, requested = count, selected = units.len(), "removal candidates selected");
    Selection::new(resource_id, count, units)
}

/// Pick up to `count` units to add.
pub fn select_additions(
    resource_id: &str,
    preference: &[PreferenceEntry],
    inventory: &Inventory,
    count: u32,
) -> Selection<Addition> {
    let units = match inventory {
        Inventory::Compute { groups } => place_nodes(preference, groups, count as usize),
        Inventory::Stream { shards } => place_splits(shards, count as usize),
    };
    debug!(resource = %resource_id, requested = count, selected = units.len(), "additions placed");
    Selection::new(resource_id, count, units)
}

// ── Compute ───────────────────────────────────────────────────────

fn select_nodes(preference: &[PreferenceEntry], groups: &[InstanceGroup], count: usize) -> Vec<Removal> {
    // Per-group count already taken in this selection. Duplicate preference
    // entries resolve to the same index, so a node is never counted twice.
    let mut removed = vec![0u32; groups.len()];
    let mut selected = Vec::with_capacity(count);

    while selected.len() < count {
        let next = preference.iter().find_map(|entry| {
            groups
                .iter()
                .enumerate()
                .find(|(idx, g)| entry.matches(g) && g.removable() > removed[*idx])
                .map(|(idx, _)| idx)
        });
        let Some(idx) = next else { break };

        let group = &groups[idx];
        let node = &group.nodes[group.nodes.len() - 1 - removed[idx] as usize];
        selected.push(Removal::Node {
            group_id: group.id.clone(),
            node_id: node.clone(),
            market: group.market,
        });
        removed[idx] += 1;
    }

    selected
}

fn place_nodes(preference: &[PreferenceEntry], groups: &[InstanceGroup], count: usize) -> Vec<Addition> {
    let mut added = vec![0u32; groups.len()];
    let mut placed = Vec::with_capacity(count);

    while placed.len() < count {
        let has_room = |idx: usize, g: &InstanceGroup| g.headroom() > added[idx];
        let next = preference
            .iter()
            .find_map(|entry| {
                groups
                    .iter()
                    .enumerate()
                    .find(|(idx, g)| entry.matches(g) && has_room(*idx, g))
                    .map(|(idx, _)| idx)
            })
            .or_else(|| {
                groups
                    .iter()
                    .enumerate()
                    .find(|(idx, g)| has_room(*idx, g))
                    .map(|(idx, _)| idx)
            });
        let Some(idx) = next else { break };

        placed.push(Addition::Node {
            group_id: groups[idx].id.clone(),
            market: groups[idx].market,
        });
        added[idx] += 1;
    }

    placed
}

// ── Stream ────────────────────────────────────────────────────────

fn select_merges(shards: &[Shard], count: usize) -> Vec<Removal> {
    let mut sorted: Vec<&Shard> = shards.iter().collect();
    sorted.sort_by_key(|s| s.range.start);

    let mut selected = Vec::with_capacity(count);
    let mut i = 0;
    while selected.len() < count && i + 1 < sorted.len() {
        match MergePair::new(sorted[i].clone(), sorted[i + 1].clone()) {
            Ok(pair) => {
                selected.push(Removal::Merge(pair));
                // Both shards leave the candidate pool.
                i += 2;
            }
            Err((left, right)) => {
                debug!(left = %left.id, right = %right.id, "shards not adjacent, skipping");
                i += 1;
            }
        }
    }

    selected
}

fn place_splits(shards: &[Shard], count: usize) -> Vec<Addition> {
    let mut candidates: Vec<(&Shard, u128)> = shards
        .iter()
        .filter_map(|s| s.range.split().map(|(_, upper)| (s, upper.start)))
        .collect();
    candidates.sort_by(|(a, _), (b, _)| {
        b.range
            .width()
            .cmp(&a.range.width())
            .then(a.range.start.cmp(&b.range.start))
    });

    candidates
        .into_iter()
        .take(count)
        .map(|(shard, key)| Addition::Split {
            shard_id: shard.id.clone(),
            new_starting_hash_key: key,
        })
        .collect()
}
