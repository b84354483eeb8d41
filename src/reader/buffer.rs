//! Shared fragment staging buffer with a byte budget.

use std::collections::VecDeque;

use crate::fragment::{MutationFragment, PositionInPartition};

/// Default byte budget for a reader's buffer.
pub(crate) const DEFAULT_MAX_BUFFER_SIZE: usize = 8 * 1024;

/// FIFO fragment staging area used by every reader implementation.
///
/// `fill_buffer` implementations push into it until it reports full;
/// consumers pop from the front.
#[derive(Debug)]
pub struct FragmentBuffer {
    fragments: VecDeque<MutationFragment>,
    bytes: usize,
    max_bytes: usize,
}

impl FragmentBuffer {
    /// Buffer with the default byte budget.
    pub fn new() -> Self {
        Self::with_budget(DEFAULT_MAX_BUFFER_SIZE)
    }

    /// Buffer with an explicit byte budget.
    pub fn with_budget(max_bytes: usize) -> Self {
        Self {
            fragments: VecDeque::new(),
            bytes: 0,
            max_bytes,
        }
    }

    /// Append a fragment.
    pub fn push(&mut self, fragment: MutationFragment) {
        self.bytes += fragment.memory_usage();
        self.fragments.push_back(fragment);
    }

    /// Remove and return the front fragment.
    pub fn pop(&mut self) -> Option<MutationFragment> {
        let fragment = self.fragments.pop_front()?;
        self.bytes -= fragment.memory_usage();
        Some(fragment)
    }

    /// Front fragment without removing it.
    pub fn peek(&self) -> Option<&MutationFragment> {
        self.fragments.front()
    }

    /// Whether no fragments are buffered.
    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// Number of buffered fragments.
    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    /// Whether the byte budget has been reached.
    pub fn is_full(&self) -> bool {
        self.bytes >= self.max_bytes
    }

    /// Drop every buffered fragment.
    pub fn clear(&mut self) {
        self.fragments.clear();
        self.bytes = 0;
    }

    /// Drop buffered fragments of the current partition, keeping anything
    /// from partitions after it. A `PartitionStart` already at the front
    /// is left in place.
    pub fn clear_to_next_partition(&mut self) {
        while let Some(front) = self.fragments.front() {
            if front.is_partition_start() {
                break;
            }
            self.pop();
        }
    }

    /// Drop buffered fragments positioned before `position`.
    pub fn forward_to(&mut self, position: &PositionInPartition) {
        while let Some(front) = self.fragments.front() {
            if front.position() >= *position {
                break;
            }
            self.pop();
        }
    }
}

impl Default for FragmentBuffer {
    fn default() -> Self {
        Self::new()
    }
}
