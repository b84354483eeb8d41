//! Heap-merging combined reader.
//!
//! Active readers are keyed in a min-heap by the decorated key of their
//! buffered head. Entries are popped, advanced, and re-pushed rather than
//! mutated in place. Partitions produced by exactly one reader are
//! spliced through verbatim; partitions with several producers are merged
//! fragment by fragment: partition tombstones join, equal-key rows
//! reconcile cell-wise, and range tombstones run through a sweep merger
//! whose output segments are non-overlapping and position-ordered.

use std::{
    cmp::{Ordering, Reverse},
    collections::BinaryHeap,
    mem,
    sync::Arc,
};

use async_trait::async_trait;

use crate::{
    error::{ReadError, ReadResult},
    fragment::{
        ClusteringKey, FragmentKind, MutationFragment, PositionInPartition, PositionRange,
        RangeTombstone, Row, Tombstone,
    },
    key::{DecoratedKey, PartitionRange, RingPosition},
    logging::read_event,
    reader::{
        selector::{ListSelector, ReaderSelector},
        BoxedReader, Deadline, FragmentBuffer, FragmentReader, ReaderForwarding,
        StreamedForwarding,
    },
    schema::Schema,
};

type ReaderId = usize;

struct HeapEntry {
    key: DecoratedKey,
    id: ReaderId,
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key
            .cmp(&other.key)
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum MergeState {
    /// Between partitions; the heap decides what comes next.
    Boundary,
    /// Merging the partition held by `current`.
    Partition,
}

/// Sweep merger turning overlapping input range tombstones into
/// position-ordered, non-overlapping output segments carrying the maximal
/// active tombstone. Segments close at every event boundary: a stronger
/// tombstone opening, an active tombstone expiring, or a row passing
/// through.
#[derive(Debug, Default)]
struct RangeTombstoneMerger {
    active: Vec<(PositionInPartition, Tombstone)>,
    open: Option<(PositionInPartition, Tombstone)>,
}

impl RangeTombstoneMerger {
    fn reset(&mut self) {
        self.active.clear();
        self.open = None;
    }

    fn emit(
        out: &mut FragmentBuffer,
        start: PositionInPartition,
        end: PositionInPartition,
        tombstone: Tombstone,
    ) {
        if start < end {
            out.push(MutationFragment::RangeTombstone(RangeTombstone::new(
                start, end, tombstone,
            )));
        }
    }

    /// Expire active tombstones ending at or before `position`.
    fn advance_to(&mut self, position: &PositionInPartition, out: &mut FragmentBuffer) {
        loop {
            let min_end = self
                .active
                .iter()
                .map(|(end, _)| end)
                .filter(|end| *end <= position)
                .min()
                .cloned();
            let Some(min_end) = min_end else { break };
            self.active.retain(|(end, _)| *end != min_end);
            let remaining = self.active.iter().map(|(_, t)| *t).max();
            let (start, winner) = self.open.take().expect("open segment while tombstones active");
            match remaining {
                Some(next) if next == winner => {
                    // An equally strong tombstone continues the segment.
                    self.open = Some((start, winner));
                }
                Some(next) => {
                    Self::emit(out, start, min_end.clone(), winner);
                    self.open = Some((min_end, next));
                }
                None => Self::emit(out, start, min_end, winner),
            }
        }
    }

    /// Feed one input tombstone positioned at the sweep line.
    fn apply(&mut self, rt: RangeTombstone, out: &mut FragmentBuffer) {
        if rt.is_empty() {
            return;
        }
        self.advance_to(&rt.start, out);
        match self.open.take() {
            None => self.open = Some((rt.start.clone(), rt.tombstone)),
            Some((start, winner)) => {
                let joined = winner.join(rt.tombstone);
                if joined != winner {
                    Self::emit(out, start, rt.start.clone(), winner);
                    self.open = Some((rt.start.clone(), joined));
                } else {
                    self.open = Some((start, winner));
                }
            }
        }
        self.active.push((rt.end, rt.tombstone));
    }

    /// Close the open segment just past a row so emission order stays
    /// position-sorted; the segment reopens right after the row.
    fn observe_row(&mut self, key: &ClusteringKey, out: &mut FragmentBuffer) {
        if let Some((start, winner)) = self.open.take() {
            let boundary = PositionInPartition::after_key(key.clone());
            Self::emit(out, start, boundary.clone(), winner);
            self.open = Some((boundary, winner));
        }
    }

    /// Expire everything, emitting the remaining segments.
    fn flush(&mut self, out: &mut FragmentBuffer) {
        self.advance_to(&PositionInPartition::partition_end(), out);
        debug_assert!(self.open.is_none());
        self.active.clear();
    }
}

/// Merges the ordered streams of K readers into one ordered stream,
/// pulling additional readers from a [`ReaderSelector`] as the merge
/// cursor advances.
pub struct CombinedReader {
    schema: Arc<Schema>,
    selector: Box<dyn ReaderSelector>,
    fwd_sm: StreamedForwarding,
    fwd_mr: ReaderForwarding,
    buffer: FragmentBuffer,
    end_of_stream: bool,
    readers: Vec<Option<BoxedReader>>,
    heap: BinaryHeap<Reverse<HeapEntry>>,
    to_prepare: Vec<ReaderId>,
    current: Vec<ReaderId>,
    state: MergeState,
    tombstones: RangeTombstoneMerger,
    last_key: Option<DecoratedKey>,
    window_start: Option<PositionInPartition>,
    last_range_start: Option<RingPosition>,
}

impl CombinedReader {
    /// Combined reader fed by `selector`.
    pub fn new(
        schema: Arc<Schema>,
        selector: Box<dyn ReaderSelector>,
        fwd_sm: StreamedForwarding,
        fwd_mr: ReaderForwarding,
    ) -> Self {
        Self {
            schema,
            selector,
            fwd_sm,
            fwd_mr,
            buffer: FragmentBuffer::new(),
            end_of_stream: false,
            readers: Vec::new(),
            heap: BinaryHeap::new(),
            to_prepare: Vec::new(),
            current: Vec::new(),
            state: MergeState::Boundary,
            tombstones: RangeTombstoneMerger::default(),
            last_key: None,
            window_start: None,
            last_range_start: None,
        }
    }

    /// Combined reader over a fixed list of readers.
    pub fn from_readers(
        schema: Arc<Schema>,
        readers: Vec<BoxedReader>,
        fwd_sm: StreamedForwarding,
        fwd_mr: ReaderForwarding,
    ) -> Self {
        let selector = Box::new(ListSelector::new(schema.clone(), readers));
        Self::new(schema, selector, fwd_sm, fwd_mr)
    }

    fn insert(&mut self, reader: BoxedReader) -> ReaderId {
        if let Some(id) = self.readers.iter().position(Option::is_none) {
            self.readers[id] = Some(reader);
            id
        } else {
            self.readers.push(Some(reader));
            self.readers.len() - 1
        }
    }

    /// Fill `id` until it has a head fragment or runs dry, then classify
    /// it: partition heads park in the heap, exhausted readers are
    /// dropped unless they may be fast-forwarded later.
    async fn park(&mut self, id: ReaderId, deadline: Deadline) -> ReadResult<()> {
        {
            let reader = self.readers[id].as_mut().expect("active reader");
            while reader.is_buffer_empty() && !reader.is_end_of_stream() {
                reader.fill_buffer(deadline).await?;
            }
        }
        let head_key = {
            let reader = self.readers[id].as_ref().expect("active reader");
            match reader.peek() {
                None => None,
                Some(MutationFragment::PartitionStart { key, .. }) => Some(key.clone()),
                Some(_) => {
                    return Err(ReadError::ProtocolMisuse(
                        "stream does not begin at a partition boundary",
                    ))
                }
            }
        };
        match head_key {
            Some(key) => {
                if self.last_key.as_ref().is_some_and(|last| key <= *last) {
                    return Err(ReadError::ProtocolMisuse(
                        "reader positioned at or before the merge cursor",
                    ));
                }
                self.heap.push(Reverse(HeapEntry { key, id }));
            }
            None => {
                if self.fwd_mr == ReaderForwarding::No {
                    self.readers[id] = None;
                }
            }
        }
        Ok(())
    }

    /// Park readers waiting for classification, then pull in selector
    /// readers while the selector position stays at or below the cursor.
    async fn prepare(&mut self, deadline: Deadline) -> ReadResult<()> {
        while let Some(&id) = self.to_prepare.last() {
            self.park(id, deadline).await?;
            self.to_prepare.pop();
        }
        loop {
            let cursor = self.heap.peek().map(|rev| rev.0.key.token());
            if !self.selector.has_new_readers(cursor.as_ref()) {
                break;
            }
            let new_readers = self.selector.create_new_readers(cursor.as_ref());
            if new_readers.is_empty() {
                break;
            }
            read_event!(debug, "combined reader grew", count = new_readers.len());
            for reader in new_readers {
                let id = self.insert(reader);
                self.to_prepare.push(id);
            }
            while let Some(&id) = self.to_prepare.last() {
                self.park(id, deadline).await?;
                self.to_prepare.pop();
            }
        }
        Ok(())
    }

    /// Pop the minimum-key reader group off the heap and open its
    /// partition; returns `false` when nothing is left.
    fn begin_partition(&mut self) -> ReadResult<bool> {
        let Some(rev) = self.heap.peek() else {
            return Ok(false);
        };
        let key = rev.0.key.clone();
        let mut group = Vec::new();
        while let Some(rev) = self.heap.peek() {
            if rev.0.key != key {
                break;
            }
            let Some(Reverse(entry)) = self.heap.pop() else {
                break;
            };
            group.push(entry.id);
        }

        let mut tombstone = Tombstone::NONE;
        for &id in &group {
            let reader = self.readers[id].as_mut().expect("active reader");
            match reader.pop_fragment() {
                Some(MutationFragment::PartitionStart { tombstone: t, .. }) => {
                    tombstone = tombstone.join(t);
                }
                _ => {
                    return Err(ReadError::ProtocolMisuse(
                        "parked reader lost its partition head",
                    ))
                }
            }
        }
        self.buffer.push(MutationFragment::PartitionStart {
            key: key.clone(),
            tombstone,
        });
        self.last_key = Some(key);
        self.current = group;
        self.tombstones.reset();
        self.window_start = None;
        self.state = MergeState::Partition;
        Ok(true)
    }

    fn close_partition_readers(&mut self) {
        let current = mem::take(&mut self.current);
        self.to_prepare.extend(current);
        self.tombstones.reset();
        self.window_start = None;
        self.state = MergeState::Boundary;
    }

    /// All producers of the current partition ran out before closing it;
    /// legal only for windowed (streamed-forwarding) reads.
    fn finish_window(&mut self) -> ReadResult<()> {
        if self.fwd_sm == StreamedForwarding::Yes {
            self.tombstones.flush(&mut self.buffer);
            self.end_of_stream = true;
            Ok(())
        } else {
            Err(ReadError::ProtocolMisuse("source ended inside a partition"))
        }
    }

    /// Single-producer partition: pass fragments through verbatim.
    async fn splice_step(&mut self, deadline: Deadline) -> ReadResult<()> {
        let id = self.current[0];
        let reader = self.readers[id].as_mut().expect("active reader");
        while reader.is_buffer_empty() && !reader.is_end_of_stream() {
            reader.fill_buffer(deadline).await?;
        }
        if reader.is_buffer_empty() {
            return self.finish_window();
        }
        let fragment = reader.pop_fragment().expect("buffered fragment");
        let ends_partition = fragment.is_partition_end();
        self.buffer.push(fragment);
        if ends_partition {
            self.close_partition_readers();
        }
        Ok(())
    }

    /// One merge step of a multi-producer partition.
    async fn merge_step(&mut self, deadline: Deadline) -> ReadResult<()> {
        if self.current.len() == 1 {
            return self.splice_step(deadline).await;
        }
        debug_assert!(!self.current.is_empty());

        for idx in 0..self.current.len() {
            let id = self.current[idx];
            let reader = self.readers[id].as_mut().expect("active reader");
            while reader.is_buffer_empty() && !reader.is_end_of_stream() {
                reader.fill_buffer(deadline).await?;
            }
        }

        let mut ended = 0usize;
        let mut exhausted = 0usize;
        let mut best: Option<(PositionInPartition, FragmentKind)> = None;
        for &id in &self.current {
            let reader = self.readers[id].as_ref().expect("active reader");
            match reader.peek() {
                None => exhausted += 1,
                Some(MutationFragment::PartitionEnd) => ended += 1,
                Some(MutationFragment::PartitionStart { .. }) => {
                    return Err(ReadError::ProtocolMisuse(
                        "partition start inside a partition",
                    ))
                }
                Some(fragment) => {
                    let candidate = (fragment.position(), fragment.kind());
                    let better = best.as_ref().is_none_or(|(pos, kind)| {
                        candidate.0.cmp(pos).then(candidate.1.cmp(kind)) == Ordering::Less
                    });
                    if better {
                        best = Some(candidate);
                    }
                }
            }
        }

        if exhausted > 0 && self.fwd_sm == StreamedForwarding::No {
            return Err(ReadError::ProtocolMisuse("source ended inside a partition"));
        }
        if exhausted == self.current.len() {
            return self.finish_window();
        }
        if ended == self.current.len() {
            for &id in &self.current {
                let reader = self.readers[id].as_mut().expect("active reader");
                let end = reader.pop_fragment();
                debug_assert!(matches!(end, Some(MutationFragment::PartitionEnd)));
            }
            self.tombstones.flush(&mut self.buffer);
            self.buffer.push(MutationFragment::PartitionEnd);
            self.close_partition_readers();
            return Ok(());
        }
        let Some((position, kind)) = best else {
            return Err(ReadError::ProtocolMisuse(
                "inconsistent partition termination across sources",
            ));
        };

        match kind {
            FragmentKind::RangeTombstone => {
                let mut tombstones = Vec::new();
                for &id in &self.current {
                    loop {
                        let reader = self.readers[id].as_mut().expect("active reader");
                        let take = matches!(
                            reader.peek(),
                            Some(MutationFragment::RangeTombstone(rt)) if rt.start == position
                        );
                        if !take {
                            break;
                        }
                        match reader.pop_fragment() {
                            Some(MutationFragment::RangeTombstone(rt)) => tombstones.push(rt),
                            _ => unreachable!("peeked fragment vanished"),
                        }
                    }
                }
                self.tombstones.advance_to(&position, &mut self.buffer);
                for rt in tombstones {
                    self.tombstones.apply(rt, &mut self.buffer);
                }
            }
            FragmentKind::StaticRow => {
                let mut merged: Option<Row> = None;
                for &id in &self.current {
                    let reader = self.readers[id].as_mut().expect("active reader");
                    if !matches!(reader.peek(), Some(MutationFragment::StaticRow(_))) {
                        continue;
                    }
                    match reader.pop_fragment() {
                        Some(MutationFragment::StaticRow(row)) => match &mut merged {
                            None => merged = Some(row),
                            Some(acc) => acc.merge(row),
                        },
                        _ => unreachable!("peeked fragment vanished"),
                    }
                }
                let row = merged.expect("static head");
                self.buffer.push(MutationFragment::StaticRow(row));
            }
            FragmentKind::ClusteringRow => {
                let mut merged: Option<(ClusteringKey, Row)> = None;
                for &id in &self.current {
                    let reader = self.readers[id].as_mut().expect("active reader");
                    let take = match reader.peek() {
                        Some(fragment @ MutationFragment::ClusteringRow { .. }) => {
                            fragment.position() == position
                        }
                        _ => false,
                    };
                    if !take {
                        continue;
                    }
                    match reader.pop_fragment() {
                        Some(MutationFragment::ClusteringRow { key, row }) => match &mut merged {
                            None => merged = Some((key, row)),
                            Some((_, acc)) => acc.merge(row),
                        },
                        _ => unreachable!("peeked fragment vanished"),
                    }
                }
                let (key, row) = merged.expect("row head");
                self.tombstones.advance_to(&position, &mut self.buffer);
                self.tombstones.observe_row(&key, &mut self.buffer);
                self.buffer.push(MutationFragment::ClusteringRow { key, row });
            }
            FragmentKind::PartitionStart | FragmentKind::PartitionEnd => {
                unreachable!("boundary kinds filtered above")
            }
        }
        Ok(())
    }
}

#[async_trait]
impl FragmentReader for CombinedReader {
    fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    async fn fill_buffer(&mut self, deadline: Deadline) -> ReadResult<()> {
        while !self.buffer.is_full() && !self.end_of_stream {
            match self.state {
                MergeState::Boundary => {
                    self.prepare(deadline).await?;
                    if !self.begin_partition()? {
                        self.end_of_stream = true;
                    }
                }
                MergeState::Partition => self.merge_step(deadline).await?,
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
        if self.state == MergeState::Partition {
            for &id in &self.current {
                if let Some(reader) = self.readers[id].as_mut() {
                    reader.next_partition();
                }
            }
            self.close_partition_readers();
        }
        // End-of-stream stays sticky once the heap, the pending readers,
        // and the selector are all out of partitions.
        if !self.heap.is_empty()
            || !self.to_prepare.is_empty()
            || self.selector.has_new_readers(None)
        {
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
        let new_start = range.start_position();
        if self
            .last_range_start
            .as_ref()
            .is_some_and(|prev| new_start < *prev)
        {
            return Err(ReadError::ProtocolMisuse(
                "partition fast-forward moved backwards",
            ));
        }
        self.last_range_start = Some(new_start);
        read_event!(debug, "combined fast-forward", range = &range);

        self.buffer.clear();
        self.heap.clear();
        self.current.clear();
        self.to_prepare.clear();
        self.tombstones.reset();
        self.window_start = None;
        self.state = MergeState::Boundary;
        self.end_of_stream = false;

        for id in 0..self.readers.len() {
            if self.readers[id].is_some() {
                let reader = self.readers[id].as_mut().expect("active reader");
                reader.fast_forward_to(range.clone(), deadline).await?;
                self.to_prepare.push(id);
            }
        }
        for reader in self.selector.fast_forward_to(&range) {
            let id = self.insert(reader);
            self.to_prepare.push(id);
        }
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
        if self.state != MergeState::Partition {
            return Err(ReadError::ProtocolMisuse(
                "position fast-forward without an active partition",
            ));
        }
        if self
            .window_start
            .as_ref()
            .is_some_and(|prev| range.start < *prev)
        {
            return Err(ReadError::ProtocolMisuse(
                "position fast-forward moved backwards",
            ));
        }

        self.buffer.forward_to(&range.start);
        self.tombstones.reset();
        for idx in 0..self.current.len() {
            let id = self.current[idx];
            let reader = self.readers[id].as_mut().expect("active reader");
            reader.fast_forward_rows_to(range.clone(), deadline).await?;
        }
        self.window_start = Some(range.start);
        self.end_of_stream = false;
        Ok(())
    }
}
