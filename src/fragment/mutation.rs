//! Whole-partition state and fragment-stream conversion.

use std::collections::BTreeMap;

use crate::{
    fragment::{
        cell::Row,
        position::{ClusteringKey, PositionInPartition},
        tombstone::{RangeTombstone, RangeTombstoneList, Tombstone},
        MutationFragment,
    },
    key::DecoratedKey,
    schema::Slice,
};

/// State of a single partition: partition tombstone, static row, clustered
/// rows, and range tombstones.
///
/// All collections are kept canonical (rows sorted by clustering key,
/// range tombstones normalized), so two mutations built from different
/// interleavings of the same writes compare equal.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mutation {
    key: DecoratedKey,
    partition_tombstone: Tombstone,
    static_row: Row,
    clustered: BTreeMap<ClusteringKey, Row>,
    range_tombstones: RangeTombstoneList,
}

impl Mutation {
    /// Empty mutation for `key`.
    pub fn new(key: DecoratedKey) -> Self {
        Self {
            key,
            partition_tombstone: Tombstone::NONE,
            static_row: Row::new(),
            clustered: BTreeMap::new(),
            range_tombstones: RangeTombstoneList::new(),
        }
    }

    /// Partition key.
    pub fn key(&self) -> &DecoratedKey {
        &self.key
    }

    /// Partition-level tombstone.
    pub fn partition_tombstone(&self) -> Tombstone {
        self.partition_tombstone
    }

    /// Static row.
    pub fn static_row(&self) -> &Row {
        &self.static_row
    }

    /// Clustered rows in key order.
    pub fn clustered_rows(&self) -> &BTreeMap<ClusteringKey, Row> {
        &self.clustered
    }

    /// Normalized range tombstones.
    pub fn range_tombstones(&self) -> &RangeTombstoneList {
        &self.range_tombstones
    }

    /// Apply a partition-level deletion.
    pub fn apply_partition_tombstone(&mut self, tombstone: Tombstone) {
        self.partition_tombstone = self.partition_tombstone.join(tombstone);
    }

    /// Write one static cell.
    pub fn set_static_cell(&mut self, column: u32, cell: crate::fragment::cell::Cell) {
        self.static_row.set(column, cell);
    }

    /// Write one clustered cell.
    pub fn set_clustered_cell(
        &mut self,
        key: ClusteringKey,
        column: u32,
        cell: crate::fragment::cell::Cell,
    ) {
        self.clustered.entry(key).or_default().set(column, cell);
    }

    /// Apply a range deletion.
    pub fn apply_range_tombstone(&mut self, rt: RangeTombstone) {
        self.range_tombstones.apply(rt);
    }

    /// Cell-wise merge of another mutation for the same partition.
    pub fn apply(&mut self, other: Mutation) {
        debug_assert_eq!(self.key, other.key, "merging mutations of different partitions");
        self.partition_tombstone = self.partition_tombstone.join(other.partition_tombstone);
        self.static_row.merge(other.static_row);
        for (key, row) in other.clustered {
            match self.clustered.get_mut(&key) {
                Some(existing) => existing.merge(row),
                None => {
                    self.clustered.insert(key, row);
                }
            }
        }
        for rt in other.range_tombstones.iter() {
            self.range_tombstones.apply(rt.clone());
        }
    }

    /// Fold one in-partition fragment into this mutation.
    pub fn apply_fragment(&mut self, fragment: MutationFragment) {
        match fragment {
            MutationFragment::PartitionStart { tombstone, .. } => {
                self.apply_partition_tombstone(tombstone);
            }
            MutationFragment::StaticRow(row) => self.static_row.merge(row),
            MutationFragment::ClusteringRow { key, row } => match self.clustered.get_mut(&key) {
                Some(existing) => existing.merge(row),
                None => {
                    self.clustered.insert(key, row);
                }
            },
            MutationFragment::RangeTombstone(rt) => self.range_tombstones.apply(rt),
            MutationFragment::PartitionEnd => {}
        }
    }

    /// Effective deletion covering `position`: the partition tombstone
    /// joined with every range tombstone over it.
    pub fn tombstone_for(&self, position: &PositionInPartition) -> Tombstone {
        self.partition_tombstone
            .join(self.range_tombstones.tombstone_at(position))
    }

    /// Full fragment stream for this partition, `PartitionStart` through
    /// `PartitionEnd`.
    pub fn fragments(&self) -> Vec<MutationFragment> {
        self.fragments_for_slice(&Slice::full())
    }

    /// Fragment stream restricted to `slice`: rows outside the sliced
    /// clustering ranges are elided and range tombstones are trimmed to
    /// them.
    pub fn fragments_for_slice(&self, slice: &Slice) -> Vec<MutationFragment> {
        let mut out = Vec::with_capacity(self.clustered.len() + 4);
        out.push(MutationFragment::PartitionStart {
            key: self.key.clone(),
            tombstone: self.partition_tombstone,
        });

        let static_row = self.static_row.project(slice.column_set());
        if !static_row.is_empty() {
            out.push(MutationFragment::StaticRow(static_row));
        }

        let windows = slice.position_ranges();
        let mut clustered: Vec<MutationFragment> = Vec::new();
        for (key, row) in &self.clustered {
            let position = PositionInPartition::at_key(key.clone());
            if windows.iter().any(|w| w.contains(&position)) {
                let row = row.project(slice.column_set());
                clustered.push(MutationFragment::ClusteringRow {
                    key: key.clone(),
                    row,
                });
            }
        }
        for rt in self.range_tombstones.iter() {
            for window in &windows {
                if let Some(trimmed) = rt.trimmed_to(window) {
                    clustered.push(MutationFragment::RangeTombstone(trimmed));
                }
            }
        }
        clustered.sort_by(|a, b| a.cmp_in_partition(b));
        out.extend(clustered);

        out.push(MutationFragment::PartitionEnd);
        out
    }
}
