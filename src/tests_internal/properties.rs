//! Randomized merge-equivalence checks.
//!
//! For any finite set of mutations spread across K readers, the combined
//! reader's output collected back into mutations must equal the cell-wise
//! merge of the inputs, and the stream must satisfy the ordering
//! invariants.

use std::collections::BTreeMap;

use proptest::prelude::*;

use crate::{
    fragment::Mutation,
    key::DecoratedKey,
    reader::{BoxedReader, CombinedReader, MemoryReader, ReaderForwarding, StreamedForwarding},
    test_support::{check_stream_invariants, collect_fragments, SimpleSchema},
};

/// `(partition, clustering key, timestamp, value tag)`
type RowSpec = (u8, i64, i64, u8);
/// `(partition, range start, range length, timestamp)`
type TombstoneSpec = (u8, i64, i64, i64);

fn row_specs() -> impl Strategy<Value = Vec<RowSpec>> {
    prop::collection::vec((0u8..4, 0i64..6, 1i64..50, 0u8..4), 0..12)
}

fn tombstone_specs() -> impl Strategy<Value = Vec<TombstoneSpec>> {
    prop::collection::vec((0u8..4, 0i64..6, 0i64..3, 1i64..50), 0..4)
}

fn reader_specs() -> impl Strategy<Value = Vec<(Vec<RowSpec>, Vec<TombstoneSpec>)>> {
    prop::collection::vec((row_specs(), tombstone_specs()), 1..4)
}

fn build_reader_mutations(
    s: &SimpleSchema,
    rows: &[RowSpec],
    tombstones: &[TombstoneSpec],
) -> Vec<Mutation> {
    let mut by_key: BTreeMap<DecoratedKey, Mutation> = BTreeMap::new();
    for &(pk, ck, ts, tag) in rows {
        let key = s.pkey(&format!("pk{pk}"));
        let m = by_key
            .entry(key.clone())
            .or_insert_with(|| s.new_mutation(key));
        m.set_clustered_cell(
            crate::fragment::ClusteringKey::single(ck),
            crate::test_support::VALUE_COL,
            crate::fragment::Cell::live(ts, format!("v{tag}")),
        );
    }
    for &(pk, lo, len, ts) in tombstones {
        let key = s.pkey(&format!("pk{pk}"));
        let m = by_key
            .entry(key.clone())
            .or_insert_with(|| s.new_mutation(key));
        s.delete_range(m, lo, lo + len, ts);
    }
    by_key.into_values().collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn combined_output_equals_cellwise_merge(specs in reader_specs()) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .expect("runtime");
        runtime.block_on(async move {
            let s = SimpleSchema::new();

            let mut expected: BTreeMap<DecoratedKey, Mutation> = BTreeMap::new();
            let mut readers: Vec<BoxedReader> = Vec::new();
            for (rows, tombstones) in &specs {
                let mutations = build_reader_mutations(&s, rows, tombstones);
                for m in &mutations {
                    match expected.get_mut(m.key()) {
                        Some(acc) => acc.apply(m.clone()),
                        None => {
                            expected.insert(m.key().clone(), m.clone());
                        }
                    }
                }
                readers.push(Box::new(MemoryReader::from_mutations(s.schema(), mutations)));
            }

            let combined = CombinedReader::from_readers(
                s.schema(),
                readers,
                StreamedForwarding::No,
                ReaderForwarding::No,
            );
            let fragments = collect_fragments(Box::new(combined)).await;
            check_stream_invariants(&fragments);

            let mut got: Vec<Mutation> = Vec::new();
            for fragment in fragments {
                match fragment {
                    crate::fragment::MutationFragment::PartitionStart { key, tombstone } => {
                        let mut m = Mutation::new(key);
                        m.apply_partition_tombstone(tombstone);
                        got.push(m);
                    }
                    crate::fragment::MutationFragment::PartitionEnd => {}
                    other => got
                        .last_mut()
                        .expect("fragment inside a partition")
                        .apply_fragment(other),
                }
            }

            let expected: Vec<Mutation> = expected.into_values().collect();
            assert_eq!(got, expected);
        });
    }

    #[test]
    fn duplicate_readers_collapse_to_one_copy(rows in row_specs()) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .expect("runtime");
        runtime.block_on(async move {
            let s = SimpleSchema::new();
            let mutations = build_reader_mutations(&s, &rows, &[]);

            let readers: Vec<BoxedReader> = (0..3)
                .map(|_| {
                    Box::new(MemoryReader::from_mutations(s.schema(), mutations.clone()))
                        as BoxedReader
                })
                .collect();
            let combined = CombinedReader::from_readers(
                s.schema(),
                readers,
                StreamedForwarding::No,
                ReaderForwarding::No,
            );
            let fragments = collect_fragments(Box::new(combined)).await;
            check_stream_invariants(&fragments);

            let mut got: Vec<Mutation> = Vec::new();
            for fragment in fragments {
                match fragment {
                    crate::fragment::MutationFragment::PartitionStart { key, tombstone } => {
                        let mut m = Mutation::new(key);
                        m.apply_partition_tombstone(tombstone);
                        got.push(m);
                    }
                    crate::fragment::MutationFragment::PartitionEnd => {}
                    other => got
                        .last_mut()
                        .expect("fragment inside a partition")
                        .apply_fragment(other),
                }
            }
            assert_eq!(got, mutations);
        });
    }
}
