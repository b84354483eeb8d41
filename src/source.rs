//! Reader factories.

use std::{fmt, sync::Arc};

use crate::{
    fragment::Mutation,
    key::PartitionRange,
    reader::{
        combined::CombinedReader, empty_reader, memory::MemoryReader, BoxedReader,
        ReaderForwarding, StreamedForwarding,
    },
    resource::ResourceTracker,
    schema::{Schema, Slice},
};

type MakeReaderFn = dyn Fn(
        Arc<Schema>,
        PartitionRange,
        Slice,
        StreamedForwarding,
        ReaderForwarding,
        ResourceTracker,
    ) -> BoxedReader
    + Send
    + Sync;

/// Factory producing readers over some underlying store.
///
/// External sources (sstables, memtables) plug into the merge by
/// providing one of these; the crate ships in-memory, empty, and combined
/// implementations.
#[derive(Clone)]
pub struct MutationSource {
    make: Arc<MakeReaderFn>,
}

impl MutationSource {
    /// Source from a factory closure.
    pub fn new(
        make: impl Fn(
                Arc<Schema>,
                PartitionRange,
                Slice,
                StreamedForwarding,
                ReaderForwarding,
                ResourceTracker,
            ) -> BoxedReader
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            make: Arc::new(make),
        }
    }

    /// Create a reader over `range` and `slice` with the given
    /// capabilities.
    pub fn make_reader(
        &self,
        schema: Arc<Schema>,
        range: PartitionRange,
        slice: Slice,
        fwd_sm: StreamedForwarding,
        fwd_mr: ReaderForwarding,
        tracker: ResourceTracker,
    ) -> BoxedReader {
        (self.make)(schema, range, slice, fwd_sm, fwd_mr, tracker)
    }

    /// Source over in-memory mutations.
    pub fn from_mutations(mutations: Vec<Mutation>) -> Self {
        Self::new(move |schema, range, slice, fwd_sm, fwd_mr, _tracker| {
            Box::new(MemoryReader::new(
                schema,
                mutations.clone(),
                range,
                slice,
                fwd_sm,
                fwd_mr,
            ))
        })
    }

    /// Source whose readers are end-of-stream from the start.
    pub fn empty() -> Self {
        Self::new(|schema, _range, _slice, _fwd_sm, _fwd_mr, _tracker| empty_reader(schema))
    }

    /// Source merging the outputs of `addends` through a combined reader.
    pub fn combined(addends: Vec<MutationSource>) -> Self {
        Self::new(move |schema, range, slice, fwd_sm, _fwd_mr, tracker| {
            let readers: Vec<BoxedReader> = addends
                .iter()
                .map(|source| {
                    source.make_reader(
                        schema.clone(),
                        range.clone(),
                        slice.clone(),
                        fwd_sm,
                        ReaderForwarding::Yes,
                        tracker.clone(),
                    )
                })
                .collect();
            Box::new(CombinedReader::from_readers(
                schema,
                readers,
                fwd_sm,
                ReaderForwarding::Yes,
            ))
        })
    }
}

impl fmt::Debug for MutationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutationSource").finish()
    }
}
