//! Incremental reader selection for the combined reader.

use std::{mem, sync::Arc};

use crate::{
    key::{PartitionRange, RingPosition, Token},
    reader::BoxedReader,
    schema::Schema,
};

/// Produces readers as the merge cursor approaches their key range.
///
/// Implementations hand each reader out exactly once. The selector
/// position is the ring position of the earliest partition for which no
/// reader has been produced yet; it only ever moves forward, reaching
/// [`RingPosition::max`] once the selector is exhausted. Every produced
/// reader's first partition must lie at or after the cursor it was
/// requested with; the combined reader treats anything at or below its
/// last emitted key as protocol misuse.
pub trait ReaderSelector: Send {
    /// Schema of the produced readers.
    fn schema(&self) -> &Arc<Schema>;

    /// Ring position of the earliest pending reader.
    fn position(&self) -> &RingPosition;

    /// Readers whose first partition's token is at or below `cursor`;
    /// with no cursor, a single seed reader (the earliest pending one).
    fn create_new_readers(&mut self, cursor: Option<&Token>) -> Vec<BoxedReader>;

    /// Drop pending readers wholly before `range` and return the pending
    /// readers intersecting it.
    fn fast_forward_to(&mut self, range: &PartitionRange) -> Vec<BoxedReader>;

    /// Whether [`ReaderSelector::create_new_readers`] would currently
    /// return anything for `cursor`.
    fn has_new_readers(&self, cursor: Option<&Token>) -> bool {
        let position = self.position();
        if position.is_max() {
            return false;
        }
        match cursor {
            None => true,
            Some(token) => *token >= position.token(),
        }
    }
}

/// Selector that hands its whole reader list to the merge on the first
/// request.
pub struct ListSelector {
    schema: Arc<Schema>,
    readers: Vec<BoxedReader>,
    position: RingPosition,
}

impl ListSelector {
    /// Selector over a fixed list of readers.
    pub fn new(schema: Arc<Schema>, readers: Vec<BoxedReader>) -> Self {
        let position = if readers.is_empty() {
            RingPosition::max()
        } else {
            RingPosition::min()
        };
        Self {
            schema,
            readers,
            position,
        }
    }
}

impl ReaderSelector for ListSelector {
    fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    fn position(&self) -> &RingPosition {
        &self.position
    }

    fn create_new_readers(&mut self, _cursor: Option<&Token>) -> Vec<BoxedReader> {
        self.position = RingPosition::max();
        mem::take(&mut self.readers)
    }

    fn fast_forward_to(&mut self, _range: &PartitionRange) -> Vec<BoxedReader> {
        Vec::new()
    }
}
