//! Reader spanning a sequence of disjoint partition ranges.

use std::{collections::VecDeque, sync::Arc};

use async_trait::async_trait;

use crate::{
    error::ReadResult,
    fragment::{MutationFragment, PositionRange},
    key::PartitionRange,
    reader::{BoxedReader, Deadline, FragmentReader, ReaderForwarding, StreamedForwarding},
    resource::ResourceTracker,
    schema::{Schema, Slice},
    source::MutationSource,
};

/// Drives one underlying reader across a vector of partition ranges,
/// fast-forwarding to the next range whenever the current one runs dry.
///
/// Ranges must be non-overlapping and ascending, matching the forward-only
/// contract of the inner reader.
pub struct MultiRangeReader {
    inner: BoxedReader,
    remaining: VecDeque<PartitionRange>,
    end_of_stream: bool,
}

impl MultiRangeReader {
    /// Reader over `ranges`, creating the inner reader from `source` for
    /// the first range.
    pub fn new(
        schema: Arc<Schema>,
        source: &MutationSource,
        ranges: Vec<PartitionRange>,
        slice: Slice,
        fwd_sm: StreamedForwarding,
        fwd_mr: ReaderForwarding,
        tracker: ResourceTracker,
    ) -> Self {
        let mut remaining: VecDeque<PartitionRange> = ranges.into();
        let first = remaining
            .pop_front()
            .unwrap_or_else(PartitionRange::open_both);
        // The inner reader must be re-aimable whenever more ranges follow.
        let inner_fwd_mr = if remaining.is_empty() { fwd_mr } else { ReaderForwarding::Yes };
        let inner = source.make_reader(schema, first, slice, fwd_sm, inner_fwd_mr, tracker);
        Self {
            inner,
            remaining,
            end_of_stream: false,
        }
    }
}

#[async_trait]
impl FragmentReader for MultiRangeReader {
    fn schema(&self) -> &Arc<Schema> {
        self.inner.schema()
    }

    async fn fill_buffer(&mut self, deadline: Deadline) -> ReadResult<()> {
        loop {
            self.inner.fill_buffer(deadline).await?;
            if !self.inner.is_buffer_empty() || !self.inner.is_end_of_stream() {
                return Ok(());
            }
            match self.remaining.pop_front() {
                Some(next) => self.inner.fast_forward_to(next, deadline).await?,
                None => {
                    self.end_of_stream = true;
                    return Ok(());
                }
            }
        }
    }

    fn pop_fragment(&mut self) -> Option<MutationFragment> {
        self.inner.pop_fragment()
    }

    fn peek(&self) -> Option<&MutationFragment> {
        self.inner.peek()
    }

    fn is_buffer_empty(&self) -> bool {
        self.inner.is_buffer_empty()
    }

    fn is_end_of_stream(&self) -> bool {
        self.end_of_stream
    }

    fn next_partition(&mut self) {
        self.inner.next_partition();
        if !self.end_of_stream {
            return;
        }
        if !self.remaining.is_empty() {
            self.end_of_stream = false;
        }
    }

    async fn fast_forward_to(
        &mut self,
        range: PartitionRange,
        deadline: Deadline,
    ) -> ReadResult<()> {
        // An explicit fast-forward overrides whatever ranges were left.
        self.remaining.clear();
        self.end_of_stream = false;
        self.inner.fast_forward_to(range, deadline).await
    }

    async fn fast_forward_rows_to(
        &mut self,
        range: PositionRange,
        deadline: Deadline,
    ) -> ReadResult<()> {
        self.inner.fast_forward_rows_to(range, deadline).await
    }
}
