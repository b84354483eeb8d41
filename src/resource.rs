//! Permit-charged file access.
//!
//! A [`ResourceTracker`] carries the permit a reader was admitted under;
//! wrapping a file with it makes every `read_dma` buffer count against
//! the semaphore's memory budget for as long as the buffer lives. Buffers
//! hold their own permit clone and may outlive the tracked file.

use std::ops::Deref;

use async_trait::async_trait;

use crate::{error::ReadResult, semaphore::Permit};

/// Contract for the external random-access file surface. Only `read_dma`
/// buffers are accounted; the remaining operations pass through
/// uncharged.
#[async_trait]
pub trait DmaFile: Send + Sync {
    /// Read `len` bytes at `offset`.
    async fn read_dma(&self, offset: u64, len: usize) -> ReadResult<Vec<u8>>;

    /// Write `data` at `offset`, returning the bytes written.
    async fn write_dma(&self, offset: u64, data: &[u8]) -> ReadResult<usize>;

    /// Flush pending writes.
    async fn flush(&self) -> ReadResult<()>;

    /// File size in bytes.
    async fn size(&self) -> ReadResult<u64>;

    /// Close the file.
    async fn close(&self) -> ReadResult<()>;
}

/// Optional permit carrier handed through reader factories.
#[derive(Clone, Debug, Default)]
pub struct ResourceTracker {
    permit: Option<Permit>,
}

impl ResourceTracker {
    /// Tracker charging against `permit`.
    pub fn new(permit: Permit) -> Self {
        Self {
            permit: Some(permit),
        }
    }

    /// Tracker that charges nothing.
    pub fn none() -> Self {
        Self::default()
    }

    /// The permit charges flow to, if any.
    pub fn permit(&self) -> Option<&Permit> {
        self.permit.as_ref()
    }

    /// Wrap `file` so its read buffers are charged to the permit.
    pub fn track<F: DmaFile>(&self, file: F) -> TrackedFile<F> {
        TrackedFile {
            inner: file,
            permit: self.permit.clone(),
        }
    }
}

/// File wrapper charging every `read_dma` buffer to a permit.
pub struct TrackedFile<F> {
    inner: F,
    permit: Option<Permit>,
}

impl<F: DmaFile> TrackedFile<F> {
    /// Read `len` bytes at `offset`; the returned buffer stays charged
    /// until dropped.
    pub async fn read_dma(&self, offset: u64, len: usize) -> ReadResult<TrackedBuffer> {
        let data = self.inner.read_dma(offset, len).await?;
        Ok(TrackedBuffer::charged(data, self.permit.clone()))
    }

    /// Uncharged write passthrough.
    pub async fn write_dma(&self, offset: u64, data: &[u8]) -> ReadResult<usize> {
        self.inner.write_dma(offset, data).await
    }

    /// Uncharged flush passthrough.
    pub async fn flush(&self) -> ReadResult<()> {
        self.inner.flush().await
    }

    /// Uncharged size passthrough.
    pub async fn size(&self) -> ReadResult<u64> {
        self.inner.size().await
    }

    /// Uncharged close passthrough.
    pub async fn close(&self) -> ReadResult<()> {
        self.inner.close().await
    }
}

/// Buffer whose size is charged against a permit for its lifetime.
pub struct TrackedBuffer {
    data: Vec<u8>,
    permit: Option<Permit>,
}

impl TrackedBuffer {
    fn charged(data: Vec<u8>, permit: Option<Permit>) -> Self {
        if let Some(permit) = &permit {
            permit.consume(data.len());
        }
        Self { data, permit }
    }

    /// Buffer length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Deref for TrackedBuffer {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.data
    }
}

impl Drop for TrackedBuffer {
    fn drop(&mut self) {
        if let Some(permit) = &self.permit {
            permit.signal(self.data.len());
        }
    }
}
