//! Domain types shared by the decision engine, the selector, and the
//! control loop.

use std::fmt;

use serde::{Deserialize, Serialize, Serializer};

/// Identifier of a managed resource (cluster id or stream name).
pub type ResourceId = String;

/// What a resource's capacity counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Elastic compute cluster; capacity is the node count.
    Compute,
    /// Sharded event stream; capacity is the shard count.
    Stream,
}

impl ResourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::Compute => "compute",
            ResourceKind::Stream => "stream",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provisioning class of an instance group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Market {
    OnDemand,
    Spot,
    Reserved,
}

impl Market {
    /// Case-insensitive parse accepting `ON_DEMAND`, `on-demand`, `ondemand`, ...
    pub fn parse(s: &str) -> Option<Self> {
        let normalized: String = s
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "ondemand" => Some(Market::OnDemand),
            "spot" => Some(Market::Spot),
            "reserved" => Some(Market::Reserved),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Market::OnDemand => "on_demand",
            Market::Spot => "spot",
            Market::Reserved => "reserved",
        }
    }
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Compute sub-units ─────────────────────────────────────────────

/// A named pool of compute nodes sharing one market class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstanceGroup {
    pub id: String,
    pub market: Market,
    /// The group never shrinks below this many nodes.
    pub min_size: u32,
    pub max_size: u32,
    /// Node ids, oldest first.
    pub nodes: Vec<String>,
}

impl InstanceGroup {
    pub fn size(&self) -> u32 {
        u32::try_from(self.nodes.len()).unwrap_or(u32::MAX)
    }

    /// Nodes that can go before the group hits its own floor.
    pub fn removable(&self) -> u32 {
        self.size().saturating_sub(self.min_size)
    }

    /// Nodes that can be added before the group hits `max_size`.
    pub fn headroom(&self) -> u32 {
        self.max_size.saturating_sub(self.size())
    }
}

// ── Stream sub-units ──────────────────────────────────────────────

/// Inclusive range of partition hash keys owned by a shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct HashKeyRange {
    #[serde(serialize_with = "as_string")]
    pub start: u128,
    #[serde(serialize_with = "as_string")]
    pub end: u128,
}

impl HashKeyRange {
    /// `None` unless `start <= end`.
    pub fn new(start: u128, end: u128) -> Option<Self> {
        (start <= end).then_some(Self { start, end })
    }

    /// Number of keys minus one; zero for a single-key range.
    pub fn width(&self) -> u128 {
        self.end - self.start
    }

    /// True when the two ranges touch with no gap and no overlap.
    pub fn is_adjacent_to(&self, other: &HashKeyRange) -> bool {
        self.end.checked_add(1) == Some(other.start) || other.end.checked_add(1) == Some(self.start)
    }

    pub fn overlaps(&self, other: &HashKeyRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    /// The union of two adjacent ranges.
    pub fn merge(&self, other: &HashKeyRange) -> Option<HashKeyRange> {
        self.is_adjacent_to(other).then(|| HashKeyRange {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        })
    }

    /// Split at the midpoint. `None` for a single-key range.
    pub fn split(&self) -> Option<(HashKeyRange, HashKeyRange)> {
        if self.width() == 0 {
            return None;
        }
        self.split_at(self.start + self.width() / 2 + 1)
    }

    /// Split so the upper half starts at `key`.
    pub fn split_at(&self, key: u128) -> Option<(HashKeyRange, HashKeyRange)> {
        if key <= self.start || key > self.end {
            return None;
        }
        Some((
            HashKeyRange {
                start: self.start,
                end: key - 1,
            },
            HashKeyRange {
                start: key,
                end: self.end,
            },
        ))
    }
}

/// A partition of a stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Shard {
    pub id: String,
    pub range: HashKeyRange,
}

impl Shard {
    pub fn new(id: &str, start: u128, end: u128) -> Option<Self> {
        HashKeyRange::new(start, end).map(|range| Self {
            id: id.to_string(),
            range,
        })
    }
}

/// Two shards selected to merge into one.
///
/// Can only be constructed from shards whose ranges are adjacent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergePair {
    left: Shard,
    right: Shard,
}

impl MergePair {
    /// Pair two shards, ordering them by key range. Returns the shards
    /// back if they are not adjacent.
    pub fn new(a: Shard, b: Shard) -> Result<Self, (Shard, Shard)> {
        if !a.range.is_adjacent_to(&b.range) {
            return Err((a, b));
        }
        let (left, right) = if a.range.start < b.range.start { (a, b) } else { (b, a) };
        Ok(Self { left, right })
    }

    pub fn left(&self) -> &Shard {
        &self.left
    }

    pub fn right(&self) -> &Shard {
        &self.right
    }

    pub fn merged_range(&self) -> HashKeyRange {
        HashKeyRange {
            start: self.left.range.start,
            end: self.right.range.end,
        }
    }
}

// ── Inventory ─────────────────────────────────────────────────────

/// The removable units a resource currently owns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Inventory {
    Compute { groups: Vec<InstanceGroup> },
    Stream { shards: Vec<Shard> },
}

impl Inventory {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Inventory::Compute { .. } => ResourceKind::Compute,
            Inventory::Stream { .. } => ResourceKind::Stream,
        }
    }

    /// Current capacity: node count or shard count.
    pub fn capacity(&self) -> u32 {
        match self {
            Inventory::Compute { groups } => groups.iter().map(InstanceGroup::size).sum(),
            Inventory::Stream { shards } => u32::try_from(shards.len()).unwrap_or(u32::MAX),
        }
    }

    #[cfg(test)]
    pub fn group(&self, id: &str) -> Option<&InstanceGroup> {
        match self {
            Inventory::Compute { groups } => groups.iter().find(|g| g.id == id),
            Inventory::Stream { .. } => None,
        }
    }

    /// Stream shards ordered by key range; empty for compute resources.
    pub fn shards_by_key(&self) -> Vec<&Shard> {
        match self {
            Inventory::Compute { .. } => Vec::new(),
            Inventory::Stream { shards } => {
                let mut sorted: Vec<&Shard> = shards.iter().collect();
                sorted.sort_by_key(|s| s.range.start);
                sorted
            }
        }
    }

    /// Advance the model by a confirmed action.
    ///
    /// Nodes added by the model get placeholder ids until the real ones
    /// are known; shards created by merges and splits are named after
    /// their starting hash key.
    pub fn apply(&mut self, action: &ScalingAction) {
        match self {
            Inventory::Compute { groups } => {
                for removal in &action.removals {
                    if let Removal::Node { group_id, node_id, .. } = removal
                        && let Some(group) = groups.iter_mut().find(|g| &g.id == group_id)
                    {
                        group.nodes.retain(|n| n != node_id);
                    }
                }
                for addition in &action.additions {
                    if let Addition::Node { group_id, .. } = addition
                        && let Some(group) = groups.iter_mut().find(|g| &g.id == group_id)
                    {
                        let mut seq = group.nodes.len() + 1;
                        let mut id = format!("{group_id}-pending-{seq}");
                        while group.nodes.contains(&id) {
                            seq += 1;
                            id = format!("{group_id}-pending-{seq}");
                        }
                        group.nodes.push(id);
                    }
                }
            }
            Inventory::Stream { shards } => {
                for removal in &action.removals {
                    if let Removal::Merge(pair) = removal {
                        shards.retain(|s| s.id != pair.left().id && s.id != pair.right().id);
                        let range = pair.merged_range();
                        shards.push(Shard {
                            id: shard_id_for(&range),
                            range,
                        });
                    }
                }
                for addition in &action.additions {
                    if let Addition::Split {
                        shard_id,
                        new_starting_hash_key: key,
                    } = addition
                        && let Some(idx) = shards.iter().position(|s| &s.id == shard_id)
                        && let Some((lower, upper)) = shards[idx].range.split_at(*key)
                    {
                        shards[idx].range = lower;
                        shards.push(Shard {
                            id: shard_id_for(&upper),
                            range: upper,
                        });
                    }
                }
                shards.sort_by_key(|s| s.range.start);
            }
        }
    }
}

fn shard_id_for(range: &HashKeyRange) -> String {
    format!("shard-{:032x}", range.start)
}

// ── Actions ───────────────────────────────────────────────────────

/// One unit selected for removal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Removal {
    /// Terminate one node of an instance group.
    Node {
        group_id: String,
        node_id: String,
        market: Market,
    },
    /// Merge two adjacent shards, retiring one shard's worth of capacity.
    Merge(MergePair),
}

/// One unit of capacity to add.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Addition {
    /// Add one node to an instance group.
    Node { group_id: String, market: Market },
    /// Split a shard; the new upper shard starts at `new_starting_hash_key`.
    Split {
        shard_id: String,
        #[serde(serialize_with = "as_string")]
        new_starting_hash_key: u128,
    },
}

/// The decision engine's output for one resource and one iteration.
///
/// Handed to the actuator exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScalingAction {
    pub resource_id: ResourceId,
    pub kind: ResourceKind,
    /// Signed capacity change actually planned.
    pub delta: i64,
    /// What the rule asked for before bounds and selection were applied.
    pub requested_delta: i64,
    pub capacity_before: u32,
    pub removals: Vec<Removal>,
    pub additions: Vec<Addition>,
}

impl ScalingAction {
    pub fn is_downscale(&self) -> bool {
        self.delta < 0
    }

    /// Whether the planned delta falls short of the requested one.
    pub fn is_partial(&self) -> bool {
        self.delta != self.requested_delta
    }

    pub fn target_capacity(&self) -> u32 {
        let target = i64::from(self.capacity_before) + self.delta;
        u32::try_from(target.max(0)).unwrap_or(u32::MAX)
    }
}

fn as_string<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shard(id: &str, start: u128, end: u128) -> Shard {
        Shard::new(id, start, end).unwrap()
    }

    fn group(id: &str, market: Market, min: u32, nodes: &[&str]) -> InstanceGroup {
        InstanceGroup {
            id: id.to_string(),
            market,
            min_size: min,
            max_size: 10,
            nodes: nodes.iter().map(|n| n.to_string()).collect(),
        }
    }

    #[test]
    fn market_parse_is_lenient() {
        assert_eq!(Market::parse("ON_DEMAND"), Some(Market::OnDemand));
        assert_eq!(Market::parse("on-demand"), Some(Market::OnDemand));
        assert_eq!(Market::parse("Spot"), Some(Market::Spot));
        assert_eq!(Market::parse("RESERVED"), Some(Market::Reserved));
        assert_eq!(Market::parse("ig-1"), None);
    }

    #[test]
    fn adjacency() {
        let a = HashKeyRange::new(0, 9).unwrap();
        let b = HashKeyRange::new(10, 19).unwrap();
        let c = HashKeyRange::new(21, 30).unwrap();
        assert!(a.is_adjacent_to(&b));
        assert!(b.is_adjacent_to(&a));
        assert!(!b.is_adjacent_to(&c));
        assert!(!a.is_adjacent_to(&a));
        assert_eq!(a.merge(&b), HashKeyRange::new(0, 19));
        assert_eq!(b.merge(&c), None);
    }

    #[test]
    fn adjacency_at_key_space_end() {
        let top = HashKeyRange::new(100, u128::MAX).unwrap();
        let other = HashKeyRange::new(0, 99).unwrap();
        assert!(top.is_adjacent_to(&other));
        assert!(!top.is_adjacent_to(&top));
    }

    #[test]
    fn split_halves() {
        let r = HashKeyRange::new(0, 9).unwrap();
        let (lo, hi) = r.split().unwrap();
        assert_eq!((lo.start, lo.end, hi.start, hi.end), (0, 4, 5, 9));
        assert!(HashKeyRange::new(7, 7).unwrap().split().is_none());
    }

    #[test]
    fn merge_pair_requires_adjacency() {
        let pair = MergePair::new(shard("b", 10, 19), shard("a", 0, 9)).unwrap();
        assert_eq!(pair.left().id, "a");
        assert_eq!(pair.merged_range(), HashKeyRange::new(0, 19).unwrap());

        assert!(MergePair::new(shard("a", 0, 9), shard("c", 21, 30)).is_err());
    }

    #[test]
    fn capacity_counts_units() {
        let compute = Inventory::Compute {
            groups: vec![
                group("ig-1", Market::OnDemand, 1, &["n1", "n2"]),
                group("ig-2", Market::Spot, 0, &["n3"]),
            ],
        };
        assert_eq!(compute.capacity(), 3);
        assert_eq!(compute.group("ig-1").unwrap().removable(), 1);

        let stream = Inventory::Stream {
            shards: vec![shard("a", 0, 9), shard("b", 10, 19)],
        };
        assert_eq!(stream.capacity(), 2);
        assert_eq!(stream.kind(), ResourceKind::Stream);
    }

    #[test]
    fn apply_compute_action() {
        let mut inv = Inventory::Compute {
            groups: vec![group("ig-1", Market::Spot, 0, &["n1", "n2"])],
        };
        let action = ScalingAction {
            resource_id: "c-1".to_string(),
            kind: ResourceKind::Compute,
            delta: 0,
            requested_delta: 0,
            capacity_before: 2,
            removals: vec![Removal::Node {
                group_id: "ig-1".to_string(),
                node_id: "n1".to_string(),
                market: Market::Spot,
            }],
            additions: vec![Addition::Node {
                group_id: "ig-1".to_string(),
                market: Market::Spot,
            }],
        };
        inv.apply(&action);
        let group = inv.group("ig-1").unwrap();
        assert_eq!(group.nodes, vec!["n2", "ig-1-pending-2"]);
    }

    #[test]
    fn apply_stream_merge_and_split() {
        let mut inv = Inventory::Stream {
            shards: vec![shard("a", 0, 9), shard("b", 10, 19), shard("c", 20, 39)],
        };
        let pair = MergePair::new(shard("a", 0, 9), shard("b", 10, 19)).unwrap();
        let action = ScalingAction {
            resource_id: "s-1".to_string(),
            kind: ResourceKind::Stream,
            delta: 0,
            requested_delta: 0,
            capacity_before: 3,
            removals: vec![Removal::Merge(pair)],
            additions: vec![Addition::Split {
                shard_id: "c".to_string(),
                new_starting_hash_key: 30,
            }],
        };
        inv.apply(&action);

        let ranges: Vec<(u128, u128)> = inv
            .shards_by_key()
            .iter()
            .map(|s| (s.range.start, s.range.end))
            .collect();
        assert_eq!(ranges, vec![(0, 19), (20, 29), (30, 39)]);
        assert_eq!(inv.capacity(), 3);
    }

    #[test]
    fn target_capacity() {
        let action = ScalingAction {
            resource_id: "c-1".to_string(),
            kind: ResourceKind::Compute,
            delta: -3,
            requested_delta: -3,
            capacity_before: 10,
            removals: Vec::new(),
            additions: Vec::new(),
        };
        assert_eq!(action.target_capacity(), 7);
        assert!(action.is_downscale());
        assert!(!action.is_partial());
    }

    #[test]
    fn hash_keys_serialize_as_strings() {
        let range = HashKeyRange::new(0, u128::MAX).unwrap();
        let json = serde_json::to_string(&range).unwrap();
        assert_eq!(json, format!(r#"{{"start":"0","end":"{}"}}"#, u128::MAX));
    }
}
