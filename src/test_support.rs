//! Shared fixtures and assertion helpers for reader tests.

use std::sync::Arc;

use crate::{
    fragment::{
        Cell, ClusteringKey, Mutation, MutationFragment, PositionInPartition, PositionRange,
        RangeTombstone, Tombstone,
    },
    key::{DecoratedKey, PartitionKey, PartitionRange},
    reader::{BoxedReader, Deadline, FragmentReader},
    schema::{ColumnKind, ColumnType, Schema},
};

/// Column id of the static column in [`SimpleSchema`].
pub(crate) const STATIC_COL: u32 = 2;
/// Column id of the regular value column in [`SimpleSchema`].
pub(crate) const VALUE_COL: u32 = 3;

/// Fixed `pk / ck / s / v` schema used across reader tests.
pub(crate) struct SimpleSchema {
    schema: Arc<Schema>,
}

impl SimpleSchema {
    pub(crate) fn new() -> Self {
        let schema = Schema::builder("ks.cf")
            .with_column("pk", ColumnKind::PartitionKey, ColumnType::Bytes)
            .with_column("ck", ColumnKind::Clustering, ColumnType::Int)
            .with_column("s", ColumnKind::Static, ColumnType::Text)
            .with_column("v", ColumnKind::Regular, ColumnType::Text)
            .build();
        Self { schema }
    }

    pub(crate) fn schema(&self) -> Arc<Schema> {
        self.schema.clone()
    }

    pub(crate) fn pkey(&self, raw: &str) -> DecoratedKey {
        self.schema.decorate(PartitionKey::from(raw))
    }

    /// `count` distinct partition keys in ring order.
    pub(crate) fn pkeys(&self, count: usize) -> Vec<DecoratedKey> {
        let mut keys: Vec<DecoratedKey> = (0..count)
            .map(|n| self.pkey(&format!("key{n:04}")))
            .collect();
        keys.sort();
        keys
    }

    pub(crate) fn ckey(&self, n: i64) -> ClusteringKey {
        ClusteringKey::single(n)
    }

    pub(crate) fn ckeys(&self, count: i64) -> Vec<ClusteringKey> {
        (0..count).map(|n| self.ckey(n)).collect()
    }

    pub(crate) fn new_mutation(&self, key: DecoratedKey) -> Mutation {
        Mutation::new(key)
    }

    pub(crate) fn add_row(&self, m: &mut Mutation, ck: ClusteringKey, value: &str, ts: i64) {
        m.set_clustered_cell(ck, VALUE_COL, Cell::live(ts, value));
    }

    pub(crate) fn add_static_row(&self, m: &mut Mutation, value: &str, ts: i64) {
        m.set_static_cell(STATIC_COL, Cell::live(ts, value));
    }

    /// Delete the inclusive clustering range `[lo, hi]`.
    pub(crate) fn delete_range(&self, m: &mut Mutation, lo: i64, hi: i64, ts: i64) -> RangeTombstone {
        let rt = RangeTombstone::new(
            PositionInPartition::before_key(self.ckey(lo)),
            PositionInPartition::after_key(self.ckey(hi)),
            Tombstone::new(ts, ts),
        );
        m.apply_range_tombstone(rt.clone());
        rt
    }

    /// One-row mutation, the staple of the merge scenarios.
    pub(crate) fn row_mutation(&self, pk: &str, ck: i64, value: &str, ts: i64) -> Mutation {
        let mut m = self.new_mutation(self.pkey(pk));
        self.add_row(&mut m, self.ckey(ck), value, ts);
        m
    }
}

/// Drive a reader and assert on what it produces, in the fluent style of
/// the storage test harness.
pub(crate) struct ReaderAssertions {
    reader: BoxedReader,
}

pub(crate) fn assert_that(reader: impl FragmentReader + 'static) -> ReaderAssertions {
    ReaderAssertions {
        reader: Box::new(reader),
    }
}

impl ReaderAssertions {
    async fn next_fragment(&mut self) -> Option<MutationFragment> {
        loop {
            if let Some(fragment) = self.reader.pop_fragment() {
                return Some(fragment);
            }
            if self.reader.is_end_of_stream() {
                return None;
            }
            self.reader
                .fill_buffer(Deadline::NONE)
                .await
                .expect("fill_buffer failed");
            if self.reader.is_buffer_empty() && self.reader.is_end_of_stream() {
                return None;
            }
        }
    }

    async fn read_mutation(&mut self) -> Option<Mutation> {
        let first = self.next_fragment().await?;
        let MutationFragment::PartitionStart { key, tombstone } = first else {
            panic!("expected a partition start, got {first:?}");
        };
        let mut mutation = Mutation::new(key);
        mutation.apply_partition_tombstone(tombstone);
        loop {
            match self.next_fragment().await {
                Some(MutationFragment::PartitionEnd) => return Some(mutation),
                Some(fragment) => mutation.apply_fragment(fragment),
                None => panic!("stream ended inside a partition"),
            }
        }
    }

    /// Expect one whole partition equal to `expected`.
    pub(crate) async fn produces(mut self, expected: &Mutation) -> Self {
        let got = self.read_mutation().await.expect("expected a partition");
        assert_eq!(&got, expected);
        self
    }

    /// Expect one partition equal to the merge of `parts`.
    pub(crate) async fn produces_merged(self, parts: &[&Mutation]) -> Self {
        let mut expected = (*parts.first().expect("at least one part")).clone();
        for part in &parts[1..] {
            expected.apply((*part).clone());
        }
        self.produces(&expected).await
    }

    /// Expect a partition start for `key`.
    pub(crate) async fn produces_partition_start(mut self, key: &DecoratedKey) -> Self {
        match self.next_fragment().await {
            Some(MutationFragment::PartitionStart { key: got, .. }) => assert_eq!(&got, key),
            other => panic!("expected partition start for {key:?}, got {other:?}"),
        }
        self
    }

    /// Expect a clustering row keyed `ck`.
    pub(crate) async fn produces_row_with_key(mut self, ck: &ClusteringKey) -> Self {
        loop {
            match self.next_fragment().await {
                Some(MutationFragment::ClusteringRow { key, .. }) => {
                    assert_eq!(&key, ck);
                    return self;
                }
                // Tombstone fragments may legitimately precede the row.
                Some(MutationFragment::RangeTombstone(_)) => continue,
                other => panic!("expected row {ck:?}, got {other:?}"),
            }
        }
    }

    /// Expect the stream to be exhausted.
    pub(crate) async fn produces_end_of_stream(mut self) -> Self {
        let next = self.next_fragment().await;
        assert!(next.is_none(), "expected end of stream, got {next:?}");
        self
    }

    pub(crate) async fn fast_forward_to(mut self, range: PartitionRange) -> Self {
        self.reader
            .fast_forward_to(range, Deadline::NONE)
            .await
            .expect("fast_forward_to failed");
        self
    }

    pub(crate) async fn fast_forward_rows_to(mut self, range: PositionRange) -> Self {
        self.reader
            .fast_forward_rows_to(range, Deadline::NONE)
            .await
            .expect("fast_forward_rows_to failed");
        self
    }

    pub(crate) fn next_partition(mut self) -> Self {
        self.reader.next_partition();
        self
    }
}

/// Drain every fragment out of a reader.
pub(crate) async fn collect_fragments(mut reader: BoxedReader) -> Vec<MutationFragment> {
    let mut out = Vec::new();
    loop {
        reader
            .fill_buffer(Deadline::NONE)
            .await
            .expect("fill_buffer failed");
        while let Some(fragment) = reader.pop_fragment() {
            out.push(fragment);
        }
        if reader.is_end_of_stream() && reader.is_buffer_empty() {
            return out;
        }
    }
}

/// Drain a reader and rebuild the mutations it produced.
pub(crate) async fn collect_mutations(reader: BoxedReader) -> Vec<Mutation> {
    let mut assertions = ReaderAssertions { reader };
    let mut out = Vec::new();
    while let Some(mutation) = assertions.read_mutation().await {
        out.push(mutation);
    }
    out
}

/// Assert the stream invariants of a full (non-windowed) fragment
/// sequence: alternating start/end delimiters, strictly increasing
/// partition keys, non-decreasing positions, static rows first, and
/// non-overlapping range tombstones.
pub(crate) fn check_stream_invariants(fragments: &[MutationFragment]) {
    let mut current_key: Option<DecoratedKey> = None;
    let mut last_key: Option<DecoratedKey> = None;
    let mut last_position: Option<(PositionInPartition, crate::fragment::FragmentKind)> = None;
    let mut last_rt_end: Option<PositionInPartition> = None;
    let mut saw_clustered = false;

    for fragment in fragments {
        match fragment {
            MutationFragment::PartitionStart { key, .. } => {
                assert!(current_key.is_none(), "nested partition start at {key:?}");
                if let Some(last) = &last_key {
                    assert!(key > last, "partition keys not strictly increasing");
                }
                current_key = Some(key.clone());
                last_position = None;
                last_rt_end = None;
                saw_clustered = false;
            }
            MutationFragment::PartitionEnd => {
                assert!(current_key.is_some(), "partition end without a start");
                last_key = current_key.take();
            }
            MutationFragment::StaticRow(_) => {
                assert!(current_key.is_some(), "static row outside a partition");
                assert!(!saw_clustered, "static row after clustered content");
            }
            other => {
                assert!(current_key.is_some(), "clustered fragment outside a partition");
                saw_clustered = true;
                let entry = (other.position(), other.kind());
                if let Some(prev) = &last_position {
                    let ord = prev.0.cmp(&entry.0).then(prev.1.cmp(&entry.1));
                    assert_ne!(
                        ord,
                        std::cmp::Ordering::Greater,
                        "fragments out of order: {prev:?} then {entry:?}"
                    );
                }
                if let MutationFragment::RangeTombstone(rt) = other {
                    if let Some(prev_end) = &last_rt_end {
                        assert!(
                            rt.start >= *prev_end,
                            "overlapping range tombstones in output"
                        );
                    }
                    last_rt_end = Some(rt.end.clone());
                }
                last_position = Some(entry);
            }
        }
    }
    assert!(current_key.is_none(), "stream ended inside a partition");
}
