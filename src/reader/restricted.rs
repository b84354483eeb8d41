//! Admission-controlled lazy reader.

use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    error::ReadResult,
    fragment::{MutationFragment, PositionRange},
    key::PartitionRange,
    logging::read_event,
    reader::{BoxedReader, Deadline, FragmentReader, ReaderForwarding, StreamedForwarding},
    resource::ResourceTracker,
    schema::{Schema, Slice},
    semaphore::{Permit, ReaderSemaphore},
    source::MutationSource,
};

/// Base cost deducted for a freshly admitted reader.
pub const NEW_READER_BASE_COST: usize = 16 * 1024;

struct PendingRead {
    source: MutationSource,
    range: PartitionRange,
    slice: Slice,
    fwd_sm: StreamedForwarding,
    fwd_mr: ReaderForwarding,
}

/// Wraps a reader factory behind the admission semaphore.
///
/// The underlying reader is created on the first suspending operation,
/// after a permit has been granted; subsequent operations reuse it. A
/// fast-forward issued before any `fill_buffer` still acquires.
pub struct RestrictedReader {
    schema: Arc<Schema>,
    semaphore: ReaderSemaphore,
    base_cost: usize,
    pending: Option<PendingRead>,
    active: Option<(BoxedReader, Permit)>,
}

impl RestrictedReader {
    /// Restricted reader with the default base cost.
    pub fn new(
        semaphore: ReaderSemaphore,
        source: MutationSource,
        schema: Arc<Schema>,
        range: PartitionRange,
        slice: Slice,
        fwd_sm: StreamedForwarding,
        fwd_mr: ReaderForwarding,
    ) -> Self {
        Self::with_base_cost(
            semaphore,
            NEW_READER_BASE_COST,
            source,
            schema,
            range,
            slice,
            fwd_sm,
            fwd_mr,
        )
    }

    /// Restricted reader deducting `base_cost` at admission.
    #[allow(clippy::too_many_arguments)]
    pub fn with_base_cost(
        semaphore: ReaderSemaphore,
        base_cost: usize,
        source: MutationSource,
        schema: Arc<Schema>,
        range: PartitionRange,
        slice: Slice,
        fwd_sm: StreamedForwarding,
        fwd_mr: ReaderForwarding,
    ) -> Self {
        Self {
            schema,
            semaphore,
            base_cost,
            pending: Some(PendingRead {
                source,
                range,
                slice,
                fwd_sm,
                fwd_mr,
            }),
            active: None,
        }
    }

    /// Whether the underlying reader has been created yet.
    pub fn is_created(&self) -> bool {
        self.active.is_some()
    }

    async fn ensure_admitted(&mut self, deadline: Deadline) -> ReadResult<()> {
        if self.active.is_some() {
            return Ok(());
        }
        let permit = self.semaphore.wait_admission(self.base_cost, deadline).await?;
        let pending = self.pending.take().expect("unadmitted reader has a pending read");
        read_event!(trace, "restricted reader created", base_cost = self.base_cost);
        let reader = pending.source.make_reader(
            self.schema.clone(),
            pending.range,
            pending.slice,
            pending.fwd_sm,
            pending.fwd_mr,
            ResourceTracker::new(permit.clone()),
        );
        self.active = Some((reader, permit));
        Ok(())
    }
}

#[async_trait]
impl FragmentReader for RestrictedReader {
    fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    async fn fill_buffer(&mut self, deadline: Deadline) -> ReadResult<()> {
        self.ensure_admitted(deadline).await?;
        let (reader, _) = self.active.as_mut().expect("admitted reader");
        reader.fill_buffer(deadline).await
    }

    fn pop_fragment(&mut self) -> Option<MutationFragment> {
        let (reader, _) = self.active.as_mut()?;
        reader.pop_fragment()
    }

    fn peek(&self) -> Option<&MutationFragment> {
        let (reader, _) = self.active.as_ref()?;
        reader.peek()
    }

    fn is_buffer_empty(&self) -> bool {
        self.active
            .as_ref()
            .is_none_or(|(reader, _)| reader.is_buffer_empty())
    }

    fn is_end_of_stream(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|(reader, _)| reader.is_end_of_stream())
    }

    fn next_partition(&mut self) {
        if let Some((reader, _)) = self.active.as_mut() {
            reader.next_partition();
        }
    }

    async fn fast_forward_to(
        &mut self,
        range: PartitionRange,
        deadline: Deadline,
    ) -> ReadResult<()> {
        self.ensure_admitted(deadline).await?;
        let (reader, _) = self.active.as_mut().expect("admitted reader");
        reader.fast_forward_to(range, deadline).await
    }

    async fn fast_forward_rows_to(
        &mut self,
        range: PositionRange,
        deadline: Deadline,
    ) -> ReadResult<()> {
        self.ensure_admitted(deadline).await?;
        let (reader, _) = self.active.as_mut().expect("admitted reader");
        reader.fast_forward_rows_to(range, deadline).await
    }
}
