//! Partition-filtering decorator.

use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    error::ReadResult,
    fragment::{MutationFragment, PositionRange},
    key::{DecoratedKey, PartitionRange},
    reader::{BoxedReader, Deadline, FragmentBuffer, FragmentReader},
    schema::Schema,
};

/// Drops whole partitions based on a predicate over decorated keys;
/// semantically equivalent to reading everything and filtering after.
pub struct FilteringReader<F> {
    inner: BoxedReader,
    predicate: F,
    buffer: FragmentBuffer,
    skipping: bool,
    end_of_stream: bool,
}

impl<F> FilteringReader<F>
where
    F: FnMut(&DecoratedKey) -> bool + Send,
{
    /// Keep only partitions whose key satisfies `predicate`.
    pub fn new(inner: BoxedReader, predicate: F) -> Self {
        Self {
            inner,
            predicate,
            buffer: FragmentBuffer::new(),
            skipping: false,
            end_of_stream: false,
        }
    }
}

#[async_trait]
impl<F> FragmentReader for FilteringReader<F>
where
    F: FnMut(&DecoratedKey) -> bool + Send,
{
    fn schema(&self) -> &Arc<Schema> {
        self.inner.schema()
    }

    async fn fill_buffer(&mut self, deadline: Deadline) -> ReadResult<()> {
        while !self.buffer.is_full() && !self.end_of_stream {
            if self.inner.is_buffer_empty() {
                if self.skipping {
                    // Let the source skip the rest of the partition
                    // locally instead of producing it for us to drop.
                    self.inner.next_partition();
                    self.skipping = false;
                    continue;
                }
                if self.inner.is_end_of_stream() {
                    self.end_of_stream = true;
                    break;
                }
                self.inner.fill_buffer(deadline).await?;
                if self.inner.is_buffer_empty() && self.inner.is_end_of_stream() {
                    self.end_of_stream = true;
                    break;
                }
                continue;
            }
            let fragment = self.inner.pop_fragment().expect("buffered fragment");
            if self.skipping {
                if fragment.is_partition_end() {
                    self.skipping = false;
                }
                continue;
            }
            if let MutationFragment::PartitionStart { key, .. } = &fragment {
                if !(self.predicate)(key) {
                    self.skipping = true;
                    continue;
                }
            }
            self.buffer.push(fragment);
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
        if self.buffer.is_empty() {
            self.inner.next_partition();
            self.skipping = false;
            if !self.inner.is_end_of_stream() {
                self.end_of_stream = false;
            }
        }
    }

    async fn fast_forward_to(
        &mut self,
        range: PartitionRange,
        deadline: Deadline,
    ) -> ReadResult<()> {
        self.buffer.clear();
        self.skipping = false;
        self.end_of_stream = false;
        self.inner.fast_forward_to(range, deadline).await
    }

    async fn fast_forward_rows_to(
        &mut self,
        range: PositionRange,
        deadline: Deadline,
    ) -> ReadResult<()> {
        self.buffer.forward_to(&range.start);
        self.end_of_stream = false;
        self.inner.fast_forward_rows_to(range, deadline).await
    }
}
