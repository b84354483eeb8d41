//! Clustering keys and the in-partition position order.

use std::{cmp::Ordering, fmt, ops::Bound};

use crate::fragment::cell::Value;

/// Clustering key: typed components compared lexicographically.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClusteringKey(Vec<Value>);

impl ClusteringKey {
    /// Key from its components.
    pub fn new(components: Vec<Value>) -> Self {
        Self(components)
    }

    /// Single-component key.
    pub fn single(component: impl Into<Value>) -> Self {
        Self(vec![component.into()])
    }

    /// Key components in order.
    pub fn components(&self) -> &[Value] {
        &self.0
    }

    pub(crate) fn memory_usage(&self) -> usize {
        self.0.iter().map(Value::memory_usage).sum()
    }
}

impl fmt::Debug for ClusteringKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ck{:?}", self.0)
    }
}

/// Region of a partition stream a position belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum Region {
    PartitionStart,
    StaticRow,
    Clustered,
    PartitionEnd,
}

/// Total order for in-partition fragments.
///
/// Within the clustered region a position is `before_all`, `before(k)`,
/// `at(k)`, `after(k)`, or `after_all`; the partition start/end and the
/// static row occupy their own sentinel regions.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PositionInPartition {
    region: Region,
    key: Option<ClusteringKey>,
    weight: i8,
}

impl PositionInPartition {
    /// Sentinel position of the partition-start fragment.
    pub fn partition_start() -> Self {
        Self {
            region: Region::PartitionStart,
            key: None,
            weight: 0,
        }
    }

    /// Position of the static row.
    pub fn static_row() -> Self {
        Self {
            region: Region::StaticRow,
            key: None,
            weight: 0,
        }
    }

    /// Before every clustered row.
    pub fn before_all_clustered_rows() -> Self {
        Self {
            region: Region::Clustered,
            key: None,
            weight: -1,
        }
    }

    /// Immediately before the row keyed `key`.
    pub fn before_key(key: ClusteringKey) -> Self {
        Self {
            region: Region::Clustered,
            key: Some(key),
            weight: -1,
        }
    }

    /// Exactly at the row keyed `key`.
    pub fn at_key(key: ClusteringKey) -> Self {
        Self {
            region: Region::Clustered,
            key: Some(key),
            weight: 0,
        }
    }

    /// Immediately after the row keyed `key`.
    pub fn after_key(key: ClusteringKey) -> Self {
        Self {
            region: Region::Clustered,
            key: Some(key),
            weight: 1,
        }
    }

    /// After every clustered row.
    pub fn after_all_clustered_rows() -> Self {
        Self {
            region: Region::Clustered,
            key: None,
            weight: 1,
        }
    }

    /// Sentinel position of the partition-end fragment.
    pub fn partition_end() -> Self {
        Self {
            region: Region::PartitionEnd,
            key: None,
            weight: 0,
        }
    }

    /// Clustering key the position refers to, if any.
    pub fn key(&self) -> Option<&ClusteringKey> {
        self.key.as_ref()
    }

    /// Whether the position lies in the clustered-row region.
    pub fn is_clustered(&self) -> bool {
        self.region == Region::Clustered
    }

    pub(crate) fn memory_usage(&self) -> usize {
        2 + self.key.as_ref().map_or(0, ClusteringKey::memory_usage)
    }
}

impl Ord for PositionInPartition {
    fn cmp(&self, other: &Self) -> Ordering {
        self.region
            .cmp(&other.region)
            .then_with(|| match (&self.key, &other.key) {
                (Some(a), Some(b)) => a.cmp(b).then(self.weight.cmp(&other.weight)),
                (Some(_), None) => 0.cmp(&other.weight),
                (None, Some(_)) => self.weight.cmp(&0),
                (None, None) => self.weight.cmp(&other.weight),
            })
    }
}

impl PartialOrd for PositionInPartition {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Debug for PositionInPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.region, &self.key, self.weight) {
            (Region::PartitionStart, ..) => f.write_str("Pos(partition start)"),
            (Region::StaticRow, ..) => f.write_str("Pos(static row)"),
            (Region::PartitionEnd, ..) => f.write_str("Pos(partition end)"),
            (Region::Clustered, None, w) if w < 0 => f.write_str("Pos(before all rows)"),
            (Region::Clustered, None, _) => f.write_str("Pos(after all rows)"),
            (Region::Clustered, Some(k), -1) => write!(f, "Pos(before {k:?})"),
            (Region::Clustered, Some(k), 0) => write!(f, "Pos(at {k:?})"),
            (Region::Clustered, Some(k), _) => write!(f, "Pos(after {k:?})"),
        }
    }
}

/// Half-open `[start, end)` window over in-partition positions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PositionRange {
    /// First position inside the window.
    pub start: PositionInPartition,
    /// First position past the window.
    pub end: PositionInPartition,
}

impl PositionRange {
    /// Window `[start, end)`.
    pub fn new(start: PositionInPartition, end: PositionInPartition) -> Self {
        Self { start, end }
    }

    /// Window spanning the whole clustered region.
    pub fn all_clustered_rows() -> Self {
        Self {
            start: PositionInPartition::before_all_clustered_rows(),
            end: PositionInPartition::after_all_clustered_rows(),
        }
    }

    /// Whether `position` lies inside the window.
    pub fn contains(&self, position: &PositionInPartition) -> bool {
        self.start <= *position && *position < self.end
    }

    /// Whether the window covers no positions.
    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }
}

/// Range over clustering keys used by slices; bounds default inclusive.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusteringRange {
    start: Bound<ClusteringKey>,
    end: Bound<ClusteringKey>,
}

impl ClusteringRange {
    /// Inclusive range `[start, end]`.
    pub fn inclusive(start: ClusteringKey, end: ClusteringKey) -> Self {
        Self {
            start: Bound::Included(start),
            end: Bound::Included(end),
        }
    }

    /// Range with explicit bounds.
    pub fn new(start: Bound<ClusteringKey>, end: Bound<ClusteringKey>) -> Self {
        Self { start, end }
    }

    /// Range covering every row.
    pub fn full() -> Self {
        Self {
            start: Bound::Unbounded,
            end: Bound::Unbounded,
        }
    }

    /// The position window equivalent to this key range.
    pub fn to_position_range(&self) -> PositionRange {
        let start = match &self.start {
            Bound::Included(k) => PositionInPartition::before_key(k.clone()),
            Bound::Excluded(k) => PositionInPartition::after_key(k.clone()),
            Bound::Unbounded => PositionInPartition::before_all_clustered_rows(),
        };
        let end = match &self.end {
            Bound::Included(k) => PositionInPartition::after_key(k.clone()),
            Bound::Excluded(k) => PositionInPartition::before_key(k.clone()),
            Bound::Unbounded => PositionInPartition::after_all_clustered_rows(),
        };
        PositionRange::new(start, end)
    }
}
