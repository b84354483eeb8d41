//! Admission-controlled reader scenarios.

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use crate::{
    error::ReadError,
    fragment::Mutation,
    key::PartitionRange,
    reader::{
        restricted::NEW_READER_BASE_COST, Deadline, FragmentReader, MemoryReader,
        ReaderForwarding, RestrictedReader, StreamedForwarding,
    },
    schema::Slice,
    semaphore::{ReaderResources, ReaderSemaphore, SemaphoreOptions},
    source::MutationSource,
    test_support::SimpleSchema,
};

fn fixture_mutations(s: &SimpleSchema) -> Vec<Mutation> {
    s.pkeys(8)
        .into_iter()
        .enumerate()
        .map(|(i, key)| {
            let mut m = s.new_mutation(key);
            s.add_row(&mut m, s.ckey(0), &format!("val_{i}"), 1);
            m
        })
        .collect()
}

/// Source that counts how many readers it actually creates.
fn counting_source(s: &SimpleSchema, creations: Arc<AtomicUsize>) -> MutationSource {
    let mutations = fixture_mutations(s);
    MutationSource::new(move |schema, range, slice, fwd_sm, fwd_mr, _tracker| {
        creations.fetch_add(1, Ordering::SeqCst);
        Box::new(MemoryReader::new(
            schema,
            mutations.clone(),
            range,
            slice,
            fwd_sm,
            fwd_mr,
        ))
    })
}

fn restricted(s: &SimpleSchema, semaphore: &ReaderSemaphore, source: &MutationSource) -> RestrictedReader {
    RestrictedReader::new(
        semaphore.clone(),
        source.clone(),
        s.schema(),
        PartitionRange::open_both(),
        Slice::full(),
        StreamedForwarding::No,
        ReaderForwarding::Yes,
    )
}

async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn admission_gates_reader_creation_under_pressure() {
    let s = SimpleSchema::new();
    let semaphore = ReaderSemaphore::new(SemaphoreOptions::new(2, NEW_READER_BASE_COST));
    let creations = Arc::new(AtomicUsize::new(0));
    let source = counting_source(&s, creations.clone());

    let mut reader1 = restricted(&s, &semaphore, &source);
    reader1.fill_buffer(Deadline::NONE).await.expect("admitted");
    assert_eq!(creations.load(Ordering::SeqCst), 1);
    assert!(semaphore.available().count <= 1);
    assert!(semaphore.available().memory <= 0);

    let mut reader2 = restricted(&s, &semaphore, &source);
    let handle2 = tokio::spawn(async move {
        reader2.fill_buffer(Deadline::NONE).await.map(|()| reader2)
    });
    eventually(|| semaphore.waiters() == 1).await;
    assert_eq!(creations.load(Ordering::SeqCst), 1);

    let mut reader3 = restricted(&s, &semaphore, &source);
    let handle3 = tokio::spawn(async move {
        reader3.fill_buffer(Deadline::NONE).await.map(|()| reader3)
    });
    eventually(|| semaphore.waiters() == 2).await;
    assert_eq!(creations.load(Ordering::SeqCst), 1);

    // Dropping the admitted reader frees its units for the next in line.
    drop(reader1);
    let reader2 = handle2.await.expect("join").expect("admitted");
    assert_eq!(creations.load(Ordering::SeqCst), 2);
    assert_eq!(semaphore.waiters(), 1);

    drop(reader2);
    let reader3 = handle3.await.expect("join").expect("admitted");
    assert_eq!(creations.load(Ordering::SeqCst), 3);
    assert_eq!(semaphore.waiters(), 0);

    drop(reader3);
    assert_eq!(
        semaphore.available(),
        ReaderResources {
            count: 2,
            memory: NEW_READER_BASE_COST as i64
        }
    );
}

#[tokio::test(start_paused = true)]
async fn queued_readers_time_out() {
    let s = SimpleSchema::new();
    let semaphore = ReaderSemaphore::new(SemaphoreOptions::new(2, NEW_READER_BASE_COST));
    let creations = Arc::new(AtomicUsize::new(0));
    let source = counting_source(&s, creations.clone());

    let mut reader1 = restricted(&s, &semaphore, &source);
    reader1.fill_buffer(Deadline::NONE).await.expect("admitted");

    let deadline = Deadline::after(Duration::from_millis(10));
    let mut reader2 = restricted(&s, &semaphore, &source);
    let err = reader2
        .fill_buffer(deadline)
        .await
        .expect_err("must time out");
    assert_eq!(err, ReadError::Timeout);
    assert!(!reader2.is_created());
    assert_eq!(semaphore.waiters(), 0);

    drop(reader1);
    assert_eq!(
        semaphore.available(),
        ReaderResources {
            count: 2,
            memory: NEW_READER_BASE_COST as i64
        }
    );
}

#[tokio::test]
async fn saturated_queue_rejects_new_readers() {
    let s = SimpleSchema::new();
    let options = SemaphoreOptions::new(2, NEW_READER_BASE_COST)
        .with_max_queue(2)
        .with_overflow_error(|| ReadError::QueueOverflow("reader queue overloaded".to_owned()));
    let semaphore = ReaderSemaphore::new(options);
    let creations = Arc::new(AtomicUsize::new(0));
    let source = counting_source(&s, creations.clone());

    let mut reader1 = restricted(&s, &semaphore, &source);
    reader1.fill_buffer(Deadline::NONE).await.expect("admitted");

    let mut reader2 = restricted(&s, &semaphore, &source);
    let handle2 = tokio::spawn(async move {
        reader2.fill_buffer(Deadline::NONE).await.map(|()| reader2)
    });
    let mut reader3 = restricted(&s, &semaphore, &source);
    let handle3 = tokio::spawn(async move {
        reader3.fill_buffer(Deadline::NONE).await.map(|()| reader3)
    });
    eventually(|| semaphore.waiters() == 2).await;

    let mut reader4 = restricted(&s, &semaphore, &source);
    let err = reader4
        .fill_buffer(Deadline::NONE)
        .await
        .expect_err("queue is full");
    assert_eq!(
        err,
        ReadError::QueueOverflow("reader queue overloaded".to_owned())
    );

    drop(reader1);
    drop(handle2.await.expect("join").expect("admitted"));
    drop(handle3.await.expect("join").expect("admitted"));
    assert_eq!(
        semaphore.available(),
        ReaderResources {
            count: 2,
            memory: NEW_READER_BASE_COST as i64
        }
    );
}

#[tokio::test]
async fn fast_forward_before_reading_still_acquires() {
    let s = SimpleSchema::new();
    let semaphore = ReaderSemaphore::new(SemaphoreOptions::new(100, NEW_READER_BASE_COST));
    let creations = Arc::new(AtomicUsize::new(0));
    let source = counting_source(&s, creations.clone());

    {
        let mut reader = restricted(&s, &semaphore, &source);
        assert!(!reader.is_created());
        reader
            .fast_forward_to(PartitionRange::open_both(), Deadline::NONE)
            .await
            .expect("admitted via fast-forward");
        assert!(reader.is_created());
        assert_eq!(creations.load(Ordering::SeqCst), 1);
        assert!(semaphore.available().memory <= 0);
    }
    assert_eq!(semaphore.available().memory, NEW_READER_BASE_COST as i64);

    {
        let mut reader = restricted(&s, &semaphore, &source);
        reader.fill_buffer(Deadline::NONE).await.expect("admitted");
        assert!(reader.is_created());
        assert_eq!(creations.load(Ordering::SeqCst), 2);

        // A second fill does not re-acquire.
        reader.fill_buffer(Deadline::NONE).await.expect("no re-admission");
        assert_eq!(creations.load(Ordering::SeqCst), 2);
    }
    assert_eq!(semaphore.available().memory, NEW_READER_BASE_COST as i64);
}
