//! The pull-based, bufferable, forward-only reader contract and its
//! implementations.

mod buffer;
pub mod combined;
pub mod filtering;
pub mod memory;
pub mod multi_range;
pub mod restricted;
pub mod selector;

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;

pub use buffer::FragmentBuffer;
pub use combined::CombinedReader;
pub use filtering::FilteringReader;
pub use memory::MemoryReader;
pub use multi_range::MultiRangeReader;
pub use restricted::RestrictedReader;
pub use selector::{ListSelector, ReaderSelector};

use crate::{
    error::ReadResult,
    fragment::{MutationFragment, PositionRange},
    key::PartitionRange,
    schema::Schema,
};

/// Deadline for a suspending operation; [`Deadline::NONE`] never expires.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Deadline(Option<tokio::time::Instant>);

impl Deadline {
    /// No deadline.
    pub const NONE: Deadline = Deadline(None);

    /// Deadline at an absolute instant.
    pub fn at(instant: tokio::time::Instant) -> Self {
        Self(Some(instant))
    }

    /// Deadline `timeout` from now.
    pub fn after(timeout: Duration) -> Self {
        Self(Some(tokio::time::Instant::now() + timeout))
    }

    /// Whether the deadline has already passed.
    pub fn expired(&self) -> bool {
        self.0.is_some_and(|at| at <= tokio::time::Instant::now())
    }

    pub(crate) fn instant(&self) -> Option<tokio::time::Instant> {
        self.0
    }
}

/// Whether a reader may be re-aimed across partition ranges after it
/// reports end-of-stream.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReaderForwarding {
    /// End-of-stream is final.
    #[default]
    No,
    /// `fast_forward_to` may re-aim the reader at a later range.
    Yes,
}

/// Whether clustering content is revealed only through position
/// fast-forwards.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StreamedForwarding {
    /// Partitions stream in full.
    #[default]
    No,
    /// Each partition initially exposes only its start (and static row);
    /// `fast_forward_rows_to` reveals clustering windows.
    Yes,
}

/// Pull-based, bufferable, forward-only stream of mutation fragments.
///
/// `fill_buffer` is the only way to make progress; it suspends at most at
/// the declared suspension points and respects its deadline. All other
/// methods are non-suspending and act on the already-buffered content.
#[async_trait]
pub trait FragmentReader: Send {
    /// Schema the stream is read under.
    fn schema(&self) -> &Arc<Schema>;

    /// Advance production until the buffer is full, end-of-stream is
    /// reached, or `deadline` elapses (failing with
    /// [`crate::ReadError::Timeout`]).
    async fn fill_buffer(&mut self, deadline: Deadline) -> ReadResult<()>;

    /// Remove and return the next buffered fragment.
    fn pop_fragment(&mut self) -> Option<MutationFragment>;

    /// Next buffered fragment without consuming it.
    fn peek(&self) -> Option<&MutationFragment>;

    /// Whether the buffer is empty.
    fn is_buffer_empty(&self) -> bool;

    /// Whether no further fragments will be produced (until a
    /// fast-forward, where permitted).
    fn is_end_of_stream(&self) -> bool;

    /// Fast local skip: drop the rest of the current partition. Clears
    /// end-of-stream unless the underlying source is also exhausted.
    fn next_partition(&mut self);

    /// Re-aim the reader at `range`; requires [`ReaderForwarding::Yes`]
    /// and a range starting at or after the current cursor.
    async fn fast_forward_to(&mut self, range: PartitionRange, deadline: Deadline)
        -> ReadResult<()>;

    /// Reveal the clustering window `range` of the current partition;
    /// requires [`StreamedForwarding::Yes`] and monotonically
    /// non-decreasing window starts.
    async fn fast_forward_rows_to(
        &mut self,
        range: PositionRange,
        deadline: Deadline,
    ) -> ReadResult<()>;
}

/// Boxed reader as produced by factories.
pub type BoxedReader = Box<dyn FragmentReader>;

struct EmptyReader {
    schema: Arc<Schema>,
}

#[async_trait]
impl FragmentReader for EmptyReader {
    fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    async fn fill_buffer(&mut self, _deadline: Deadline) -> ReadResult<()> {
        Ok(())
    }

    fn pop_fragment(&mut self) -> Option<MutationFragment> {
        None
    }

    fn peek(&self) -> Option<&MutationFragment> {
        None
    }

    fn is_buffer_empty(&self) -> bool {
        true
    }

    fn is_end_of_stream(&self) -> bool {
        true
    }

    fn next_partition(&mut self) {}

    async fn fast_forward_to(
        &mut self,
        _range: PartitionRange,
        _deadline: Deadline,
    ) -> ReadResult<()> {
        Ok(())
    }

    async fn fast_forward_rows_to(
        &mut self,
        _range: PositionRange,
        _deadline: Deadline,
    ) -> ReadResult<()> {
        Ok(())
    }
}

/// Reader that is end-of-stream from the start.
pub fn empty_reader(schema: Arc<Schema>) -> BoxedReader {
    Box::new(EmptyReader { schema })
}
