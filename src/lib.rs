//! Merging mutation-reader core for a log-structured, wide-column
//! storage engine.
//!
//! The crate fuses multiple ordered streams of partitioned, clustered,
//! timestamped row fragments into one totally-ordered stream:
//! - [`fragment`]: the fragment model, cells, tombstones, and whole-
//!   partition [`fragment::Mutation`]s.
//! - [`reader`]: the pull-based [`FragmentReader`] contract, the
//!   in-memory source, and the heap-merging
//!   [`reader::CombinedReader`] with its lazy [`reader::ReaderSelector`].
//! - [`semaphore`]: admission control with count and memory accounting,
//!   and [`resource`] for charging file buffers back to a permit.
//!
//! All operations are cooperative and forward-only: every suspending call
//! takes a [`Deadline`], and repositioning is done exclusively through
//! the fast-forward protocol.

pub mod error;
pub mod fragment;
pub mod key;
pub(crate) mod logging;
pub mod reader;
pub mod resource;
pub mod schema;
pub mod semaphore;
pub mod source;

#[cfg(test)]
mod test_support;
#[cfg(test)]
mod tests_internal;

pub use error::{ReadError, ReadResult};
pub use reader::{
    empty_reader, BoxedReader, CombinedReader, Deadline, FilteringReader, FragmentReader,
    MemoryReader, MultiRangeReader, ReaderForwarding, RestrictedReader, StreamedForwarding,
};
pub use semaphore::{Permit, ReaderSemaphore, SemaphoreOptions};
pub use source::MutationSource;
