//! Mutation fragments and their stream order.
//!
//! A reader stream is a sequence of partitions, each encoded as
//! `PartitionStart`, an optional `StaticRow`, interleaved `ClusteringRow`
//! and `RangeTombstone` fragments in position order, and a closing
//! `PartitionEnd`. The total order used by the merge is partition order,
//! then [`PositionInPartition`], then a kind tie-break.

pub mod cell;
pub mod mutation;
pub mod position;
pub mod tombstone;

use std::cmp::Ordering;

pub use cell::{Cell, CellPayload, ColumnId, Row, Value};
pub use mutation::Mutation;
pub use position::{ClusteringKey, ClusteringRange, PositionInPartition, PositionRange};
pub use tombstone::{RangeTombstone, RangeTombstoneList, Tombstone};

use crate::key::DecoratedKey;

/// Fragment discriminant; declaration order resolves ties between kinds
/// sharing a position (a range tombstone opening at a row's position
/// precedes the row).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FragmentKind {
    /// Opens a partition.
    PartitionStart,
    /// Range deletion positioned at its start.
    RangeTombstone,
    /// The partition's static row.
    StaticRow,
    /// A clustered row.
    ClusteringRow,
    /// Closes a partition.
    PartitionEnd,
}

/// One atomic unit in a reader stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MutationFragment {
    /// Opens a partition and carries its partition-level tombstone.
    PartitionStart {
        /// Key of the partition being opened.
        key: DecoratedKey,
        /// Partition-level deletion.
        tombstone: Tombstone,
    },
    /// The partition's static row.
    StaticRow(Row),
    /// One clustered row.
    ClusteringRow {
        /// Clustering key of the row.
        key: ClusteringKey,
        /// The row's cells.
        row: Row,
    },
    /// Range deletion inside the partition.
    RangeTombstone(RangeTombstone),
    /// Closes the current partition.
    PartitionEnd,
}

impl MutationFragment {
    /// Kind of this fragment.
    pub fn kind(&self) -> FragmentKind {
        match self {
            MutationFragment::PartitionStart { .. } => FragmentKind::PartitionStart,
            MutationFragment::StaticRow(_) => FragmentKind::StaticRow,
            MutationFragment::ClusteringRow { .. } => FragmentKind::ClusteringRow,
            MutationFragment::RangeTombstone(_) => FragmentKind::RangeTombstone,
            MutationFragment::PartitionEnd => FragmentKind::PartitionEnd,
        }
    }

    /// In-partition position of this fragment.
    pub fn position(&self) -> PositionInPartition {
        match self {
            MutationFragment::PartitionStart { .. } => PositionInPartition::partition_start(),
            MutationFragment::StaticRow(_) => PositionInPartition::static_row(),
            MutationFragment::ClusteringRow { key, .. } => {
                PositionInPartition::at_key(key.clone())
            }
            MutationFragment::RangeTombstone(rt) => rt.start.clone(),
            MutationFragment::PartitionEnd => PositionInPartition::partition_end(),
        }
    }

    /// Whether this fragment opens a partition.
    pub fn is_partition_start(&self) -> bool {
        matches!(self, MutationFragment::PartitionStart { .. })
    }

    /// Whether this fragment closes a partition.
    pub fn is_partition_end(&self) -> bool {
        matches!(self, MutationFragment::PartitionEnd)
    }

    /// In-partition order: position first, kind rank on ties.
    pub fn cmp_in_partition(&self, other: &Self) -> Ordering {
        self.position()
            .cmp(&other.position())
            .then(self.kind().cmp(&other.kind()))
    }

    /// Approximate heap footprint, used for buffer budgeting.
    pub fn memory_usage(&self) -> usize {
        8 + match self {
            MutationFragment::PartitionStart { key, .. } => key.memory_usage() + 16,
            MutationFragment::StaticRow(row) => row.memory_usage(),
            MutationFragment::ClusteringRow { key, row } => {
                key.memory_usage() + row.memory_usage()
            }
            MutationFragment::RangeTombstone(rt) => rt.memory_usage(),
            MutationFragment::PartitionEnd => 0,
        }
    }
}
