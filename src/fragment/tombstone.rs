//! Deletion markers: tombstones, range tombstones, and the normalized
//! per-partition tombstone list.

use std::fmt;

use crate::fragment::position::{PositionInPartition, PositionRange};

/// `(timestamp, deletion_time)` deletion marker.
///
/// A tombstone shadows writes with timestamp less than or equal to its
/// own. Two tombstones join to the lexicographically greater pair, so an
/// equal-timestamp conflict resolves to the greater deletion time.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tombstone {
    /// Write timestamp of the deletion.
    pub timestamp: i64,
    /// Wall-clock second the deletion was issued at.
    pub deletion_time: i64,
}

impl Tombstone {
    /// Absent deletion; less than every live tombstone.
    pub const NONE: Self = Tombstone {
        timestamp: i64::MIN,
        deletion_time: i64::MIN,
    };

    /// Live tombstone.
    pub fn new(timestamp: i64, deletion_time: i64) -> Self {
        Self {
            timestamp,
            deletion_time,
        }
    }

    /// Whether this marks no deletion at all.
    pub fn is_none(&self) -> bool {
        *self == Self::NONE
    }

    /// Join of two markers.
    pub fn join(self, other: Tombstone) -> Tombstone {
        self.max(other)
    }

    /// Whether a write at `timestamp` is deleted by this marker.
    pub fn shadows(&self, timestamp: i64) -> bool {
        !self.is_none() && timestamp <= self.timestamp
    }
}

impl fmt::Debug for Tombstone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            f.write_str("Tombstone(none)")
        } else {
            write!(f, "Tombstone({}@{})", self.timestamp, self.deletion_time)
        }
    }
}

/// Deletion of the half-open position range `[start, end)`.
#[derive(Clone, PartialEq, Eq)]
pub struct RangeTombstone {
    /// First deleted position.
    pub start: PositionInPartition,
    /// First position past the deletion.
    pub end: PositionInPartition,
    /// Deletion marker applied over the range.
    pub tombstone: Tombstone,
}

impl RangeTombstone {
    /// Range tombstone `[start, end) @ tombstone`.
    pub fn new(start: PositionInPartition, end: PositionInPartition, tombstone: Tombstone) -> Self {
        Self {
            start,
            end,
            tombstone,
        }
    }

    /// Whether `position` falls inside the deleted range.
    pub fn covers(&self, position: &PositionInPartition) -> bool {
        self.start <= *position && *position < self.end
    }

    /// Whether the range deletes no positions.
    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    /// The part of this tombstone lying inside `window`, if any.
    pub fn trimmed_to(&self, window: &PositionRange) -> Option<RangeTombstone> {
        let start = self.start.clone().max(window.start.clone());
        let end = self.end.clone().min(window.end.clone());
        if start >= end {
            return None;
        }
        Some(RangeTombstone::new(start, end, self.tombstone))
    }

    pub(crate) fn memory_usage(&self) -> usize {
        16 + self.start.memory_usage() + self.end.memory_usage()
    }
}

impl fmt::Debug for RangeTombstone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Rt[{:?}, {:?}) {:?}", self.start, self.end, self.tombstone)
    }
}

/// Canonical set of range tombstones for one partition.
///
/// Segments are position-sorted and non-overlapping, each carrying the
/// maximal tombstone over its region; adjacent segments with equal
/// tombstones are coalesced. Two lists built from any interleavings of
/// the same deletions therefore compare equal.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RangeTombstoneList {
    segments: Vec<RangeTombstone>,
}

impl RangeTombstoneList {
    /// Empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the list holds no deletions.
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Segments in position order.
    pub fn iter(&self) -> impl Iterator<Item = &RangeTombstone> {
        self.segments.iter()
    }

    /// Greatest tombstone covering `position`, or [`Tombstone::NONE`].
    pub fn tombstone_at(&self, position: &PositionInPartition) -> Tombstone {
        self.segments
            .iter()
            .filter(|seg| seg.covers(position))
            .map(|seg| seg.tombstone)
            .fold(Tombstone::NONE, Tombstone::join)
    }

    /// Fold `rt` into the list, re-establishing the canonical form.
    pub fn apply(&mut self, rt: RangeTombstone) {
        if rt.is_empty() {
            return;
        }
        let mut bounds: Vec<PositionInPartition> = Vec::with_capacity(self.segments.len() * 2 + 2);
        for seg in &self.segments {
            bounds.push(seg.start.clone());
            bounds.push(seg.end.clone());
        }
        bounds.push(rt.start.clone());
        bounds.push(rt.end.clone());
        bounds.sort();
        bounds.dedup();

        let mut rebuilt: Vec<RangeTombstone> = Vec::with_capacity(self.segments.len() + 1);
        for pair in bounds.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            let mut tomb = Tombstone::NONE;
            if rt.covers(a) {
                tomb = tomb.join(rt.tombstone);
            }
            for seg in &self.segments {
                if seg.covers(a) {
                    tomb = tomb.join(seg.tombstone);
                }
            }
            if tomb.is_none() {
                continue;
            }
            match rebuilt.last_mut() {
                Some(last) if last.end == *a && last.tombstone == tomb => {
                    last.end = b.clone();
                }
                _ => rebuilt.push(RangeTombstone::new(a.clone(), b.clone(), tomb)),
            }
        }
        self.segments = rebuilt;
    }
}

impl FromIterator<RangeTombstone> for RangeTombstoneList {
    fn from_iter<T: IntoIterator<Item = RangeTombstone>>(iter: T) -> Self {
        let mut list = Self::new();
        for rt in iter {
            list.apply(rt);
        }
        list
    }
}
