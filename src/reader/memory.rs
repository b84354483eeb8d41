//! Reader over in-memory mutations.

use std::{collections::VecDeque, sync::Arc};

use async_trait::async_trait;

use crate::{
    error::{ReadError, ReadResult},
    fragment::{Mutation, MutationFragment, PositionInPartition, PositionRange},
    key::{PartitionRange, RingPosition},
    reader::{Deadline, FragmentBuffer, FragmentReader, ReaderForwarding, StreamedForwarding},
    schema::{Schema, Slice},
};

struct PartitionCursor {
    /// Clustered fragments of the partition, used to rebuild windows in
    /// streamed-forwarding mode.
    clustered: Vec<MutationFragment>,
    /// Fragments still to be pushed into the buffer.
    pending: VecDeque<MutationFragment>,
    /// Start of the last revealed window; window starts are monotonic.
    window_start: PositionInPartition,
}

/// Reader over a sorted set of in-memory mutations, honouring a partition
/// range, a slice, and both forwarding modes.
///
/// Mutations are sorted on construction and same-key inputs are merged,
/// so any collection of mutations yields a valid stream.
pub struct MemoryReader {
    schema: Arc<Schema>,
    mutations: Vec<Mutation>,
    range: PartitionRange,
    range_start: RingPosition,
    slice: Slice,
    fwd_sm: StreamedForwarding,
    fwd_mr: ReaderForwarding,
    buffer: FragmentBuffer,
    next_idx: usize,
    current: Option<PartitionCursor>,
    end_of_stream: bool,
}

impl MemoryReader {
    /// Reader over `mutations` restricted to `range` and `slice`.
    pub fn new(
        schema: Arc<Schema>,
        mutations: Vec<Mutation>,
        range: PartitionRange,
        slice: Slice,
        fwd_sm: StreamedForwarding,
        fwd_mr: ReaderForwarding,
    ) -> Self {
        let mut sorted: Vec<Mutation> = Vec::with_capacity(mutations.len());
        let mut inputs = mutations;
        inputs.sort_by(|a, b| a.key().cmp(b.key()));
        for mutation in inputs {
            match sorted.last_mut() {
                Some(last) if last.key() == mutation.key() => last.apply(mutation),
                _ => sorted.push(mutation),
            }
        }
        let range_start = range.start_position();
        Self {
            schema,
            mutations: sorted,
            range,
            range_start,
            slice,
            fwd_sm,
            fwd_mr,
            buffer: FragmentBuffer::new(),
            next_idx: 0,
            current: None,
            end_of_stream: false,
        }
    }

    /// Reader over the full ring with a full slice and no forwarding.
    pub fn from_mutations(schema: Arc<Schema>, mutations: Vec<Mutation>) -> Self {
        Self::new(
            schema,
            mutations,
            PartitionRange::open_both(),
            Slice::full(),
            StreamedForwarding::No,
            ReaderForwarding::No,
        )
    }

    /// Opens the next in-range partition; returns `false` when the range
    /// is exhausted.
    fn open_next_partition(&mut self) -> bool {
        while self.next_idx < self.mutations.len() {
            let key = self.mutations[self.next_idx].key();
            if self.range.before(key) {
                self.next_idx += 1;
                continue;
            }
            if self.range.after(key) {
                // Stays pending; a later fast-forward may cover it.
                return false;
            }
            break;
        }
        if self.next_idx >= self.mutations.len() {
            return false;
        }

        let mutation = &self.mutations[self.next_idx];
        self.next_idx += 1;

        let mut frags = mutation.fragments_for_slice(&self.slice);
        frags.pop(); // PartitionEnd, re-synthesised on drain
        let mut iter = frags.into_iter();
        let start = iter.next().expect("partition start fragment");
        self.buffer.push(start);
        let mut rest: Vec<MutationFragment> = iter.collect();
        let static_row = match rest.first() {
            Some(MutationFragment::StaticRow(_)) => Some(rest.remove(0)),
            _ => None,
        };

        let cursor = match self.fwd_sm {
            StreamedForwarding::Yes => {
                if let Some(stat) = static_row {
                    self.buffer.push(stat);
                }
                PartitionCursor {
                    clustered: rest,
                    pending: VecDeque::new(),
                    window_start: PositionInPartition::before_all_clustered_rows(),
                }
            }
            StreamedForwarding::No => {
                let mut pending = VecDeque::with_capacity(rest.len() + 1);
                if let Some(stat) = static_row {
                    pending.push_back(stat);
                }
                pending.extend(rest);
                PartitionCursor {
                    clustered: Vec::new(),
                    pending,
                    window_start: PositionInPartition::before_all_clustered_rows(),
                }
            }
        };
        self.current = Some(cursor);
        true
    }
}

#[async_trait]
impl FragmentReader for MemoryReader {
    fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    async fn fill_buffer(&mut self, deadline: Deadline) -> ReadResult<()> {
        if deadline.expired() {
            return Err(ReadError::Timeout);
        }
        if self.end_of_stream {
            return Ok(());
        }
        while !self.buffer.is_full() {
            let Some(cursor) = self.current.as_mut() else {
                if !self.open_next_partition() {
                    self.end_of_stream = true;
                    return Ok(());
                }
                continue;
            };
            match cursor.pending.pop_front() {
                Some(fragment) => self.buffer.push(fragment),
                None => match self.fwd_sm {
                    StreamedForwarding::No => {
                        self.buffer.push(MutationFragment::PartitionEnd);
                        self.current = None;
                    }
                    StreamedForwarding::Yes => {
                        // Window exhausted; a position fast-forward
                        // reveals the next one.
                        self.end_of_stream = true;
                        return Ok(());
                    }
                },
            }
        }
        Ok(())
    }

    fn pop_fragment(&mut self) -> Option<MutationFragment> {
        self.buffer.pop()
    }

    fn peek(&self) -> Option<&MutationFragment> {
        self.buffer.peek()
    }

    fn is_buffer_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    fn is_end_of_stream(&self) -> bool {
        self.end_of_stream
    }

    fn next_partition(&mut self) {
        self.buffer.clear_to_next_partition();
        if !self.buffer.is_empty() {
            return;
        }
        self.current = None;
        if self.next_idx < self.mutations.len() {
            self.end_of_stream = false;
        }
    }

    async fn fast_forward_to(
        &mut self,
        range: PartitionRange,
        deadline: Deadline,
    ) -> ReadResult<()> {
        if self.fwd_mr == ReaderForwarding::No {
            return Err(ReadError::ProtocolMisuse(
                "partition fast-forward on a non-forwarding reader",
            ));
        }
        if deadline.expired() {
            return Err(ReadError::Timeout);
        }
        let new_start = range.start_position();
        if new_start < self.range_start {
            return Err(ReadError::ProtocolMisuse(
                "partition fast-forward moved backwards",
            ));
        }
        self.range_start = new_start;
        self.range = range;
        self.buffer.clear();
        self.current = None;
        self.end_of_stream = false;
        Ok(())
    }

    async fn fast_forward_rows_to(
        &mut self,
        range: PositionRange,
        deadline: Deadline,
    ) -> ReadResult<()> {
        if self.fwd_sm == StreamedForwarding::No {
            return Err(ReadError::ProtocolMisuse(
                "position fast-forward on a non-streamed reader",
            ));
        }
        if deadline.expired() {
            return Err(ReadError::Timeout);
        }
        let Some(cursor) = self.current.as_mut() else {
            return Err(ReadError::ProtocolMisuse(
                "position fast-forward without an active partition",
            ));
        };
        if range.start < cursor.window_start {
            return Err(ReadError::ProtocolMisuse(
                "position fast-forward moved backwards",
            ));
        }

        self.buffer.forward_to(&range.start);
        let mut pending = VecDeque::new();
        for fragment in &cursor.clustered {
            match fragment {
                MutationFragment::ClusteringRow { .. } => {
                    if range.contains(&fragment.position()) {
                        pending.push_back(fragment.clone());
                    }
                }
                MutationFragment::RangeTombstone(rt) => {
                    if let Some(trimmed) = rt.trimmed_to(&range) {
                        pending.push_back(MutationFragment::RangeTombstone(trimmed));
                    }
                }
                _ => {}
            }
        }
        cursor.pending = pending;
        cursor.window_start = range.start;
        self.end_of_stream = false;
        Ok(())
    }
}
