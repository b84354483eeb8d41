//! Reader admission control: count and memory budgeting, FIFO waiting,
//! per-request deadlines, and queue-overflow rejection.

use std::{
    collections::VecDeque,
    fmt,
    sync::{Arc, Mutex},
};

use futures::channel::oneshot;

use crate::{
    error::{ReadError, ReadResult},
    logging::read_event,
    reader::Deadline,
};

/// Signed resource snapshot; memory may go negative while charged
/// buffers over-commit the budget.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReaderResources {
    /// Remaining admission slots.
    pub count: i64,
    /// Remaining memory budget in bytes.
    pub memory: i64,
}

/// Configuration recognised by [`ReaderSemaphore`].
#[derive(Clone)]
pub struct SemaphoreOptions {
    /// Maximum concurrently admitted readers.
    pub max_count: u32,
    /// Initial memory budget in bytes.
    pub max_memory: usize,
    /// Maximum queued admission requests; requests past it fail with the
    /// overflow error.
    pub max_queue: usize,
    /// Factory producing the error returned on queue saturation.
    pub overflow_error: Arc<dyn Fn() -> ReadError + Send + Sync>,
}

impl SemaphoreOptions {
    /// Options with the given budget and an unbounded queue.
    pub fn new(max_count: u32, max_memory: usize) -> Self {
        Self {
            max_count,
            max_memory,
            ..Self::default()
        }
    }

    /// Cap the wait queue at `max_queue` requests.
    pub fn with_max_queue(mut self, max_queue: usize) -> Self {
        self.max_queue = max_queue;
        self
    }

    /// Replace the queue-overflow error factory.
    pub fn with_overflow_error(
        mut self,
        factory: impl Fn() -> ReadError + Send + Sync + 'static,
    ) -> Self {
        self.overflow_error = Arc::new(factory);
        self
    }
}

impl Default for SemaphoreOptions {
    fn default() -> Self {
        Self {
            max_count: 100,
            max_memory: 4 * 1024 * 1024,
            max_queue: usize::MAX,
            overflow_error: Arc::new(|| {
                ReadError::QueueOverflow("admission queue is full".to_owned())
            }),
        }
    }
}

impl fmt::Debug for SemaphoreOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SemaphoreOptions")
            .field("max_count", &self.max_count)
            .field("max_memory", &self.max_memory)
            .field("max_queue", &self.max_queue)
            .finish()
    }
}

struct Waiter {
    id: u64,
    base_cost: usize,
    tx: oneshot::Sender<()>,
}

struct State {
    resources: ReaderResources,
    queue: VecDeque<Waiter>,
    next_waiter_id: u64,
}

struct Inner {
    state: Mutex<State>,
    max_queue: usize,
    overflow_error: Arc<dyn Fn() -> ReadError + Send + Sync>,
}

impl Inner {
    fn fits(state: &State, base_cost: usize) -> bool {
        state.resources.count >= 1 && state.resources.memory >= base_cost as i64
    }

    fn deduct(state: &mut State, base_cost: usize) {
        state.resources.count -= 1;
        state.resources.memory -= base_cost as i64;
    }

    /// Grant queued requests in arrival order while they fit.
    fn wake_waiters(state: &mut State) {
        while let Some(front) = state.queue.front() {
            if !Self::fits(state, front.base_cost) {
                break;
            }
            let waiter = state.queue.pop_front().expect("non-empty queue");
            Self::deduct(state, waiter.base_cost);
            if waiter.tx.send(()).is_err() {
                // The waiter gave up in the meantime; undo and move on.
                state.resources.count += 1;
                state.resources.memory += waiter.base_cost as i64;
            }
        }
    }

    fn release(&self, count: i64, memory: i64) {
        let mut state = self.state.lock().expect("semaphore state poisoned");
        state.resources.count += count;
        state.resources.memory += memory;
        Self::wake_waiters(&mut state);
    }

    fn charge_memory(&self, bytes: i64) {
        let mut state = self.state.lock().expect("semaphore state poisoned");
        state.resources.memory -= bytes;
    }
}

/// Admission semaphore shared by every reader of a shard.
///
/// `wait_admission` deducts `(1, base_cost)` when granted; requests that
/// do not fit wait in FIFO order. Additional buffer charges flow through
/// [`Permit::consume`]/[`Permit::signal`] and may drive the memory budget
/// negative; new admissions stay blocked until it recovers.
#[derive(Clone)]
pub struct ReaderSemaphore {
    inner: Arc<Inner>,
}

impl ReaderSemaphore {
    /// Semaphore with the given options.
    pub fn new(options: SemaphoreOptions) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    resources: ReaderResources {
                        count: options.max_count as i64,
                        memory: options.max_memory as i64,
                    },
                    queue: VecDeque::new(),
                    next_waiter_id: 0,
                }),
                max_queue: options.max_queue,
                overflow_error: options.overflow_error,
            }),
        }
    }

    /// Currently available resources.
    pub fn available(&self) -> ReaderResources {
        self.inner
            .state
            .lock()
            .expect("semaphore state poisoned")
            .resources
    }

    /// Number of queued admission requests.
    pub fn waiters(&self) -> usize {
        self.inner
            .state
            .lock()
            .expect("semaphore state poisoned")
            .queue
            .len()
    }

    /// Wait until `(1, base_cost)` can be deducted from the budget.
    ///
    /// Fails immediately with the configured overflow error when the
    /// queue is saturated, and with [`ReadError::Timeout`] when
    /// `deadline` elapses first; a timed-out request leaves nothing
    /// reserved behind.
    pub async fn wait_admission(&self, base_cost: usize, deadline: Deadline) -> ReadResult<Permit> {
        let (id, mut rx) = {
            let mut state = self.inner.state.lock().expect("semaphore state poisoned");
            if state.queue.is_empty() && Inner::fits(&state, base_cost) {
                Inner::deduct(&mut state, base_cost);
                return Ok(self.permit(base_cost));
            }
            if state.queue.len() >= self.inner.max_queue {
                read_event!(debug, "admission queue overflow", waiters = state.queue.len());
                return Err((self.inner.overflow_error)());
            }
            let id = state.next_waiter_id;
            state.next_waiter_id += 1;
            let (tx, rx) = oneshot::channel();
            state.queue.push_back(Waiter { id, base_cost, tx });
            (id, rx)
        };

        let granted = match deadline.instant() {
            None => rx.await.is_ok(),
            Some(at) => match tokio::time::timeout_at(at, &mut rx).await {
                Ok(result) => result.is_ok(),
                Err(_elapsed) => {
                    let mut state = self.inner.state.lock().expect("semaphore state poisoned");
                    if let Some(idx) = state.queue.iter().position(|w| w.id == id) {
                        state.queue.remove(idx);
                        read_event!(debug, "admission timed out", base_cost = base_cost);
                        return Err(ReadError::Timeout);
                    }
                    // Granted concurrently with the timeout: the units
                    // were already deducted on our behalf, return them.
                    drop(state);
                    if matches!(rx.try_recv(), Ok(Some(()))) {
                        self.inner.release(1, base_cost as i64);
                    }
                    return Err(ReadError::Timeout);
                }
            },
        };
        if !granted {
            return Err(ReadError::Source("admission semaphore shut down".to_owned()));
        }
        Ok(self.permit(base_cost))
    }

    fn permit(&self, base_cost: usize) -> Permit {
        read_event!(trace, "admission granted", base_cost = base_cost);
        Permit {
            inner: Arc::new(PermitInner {
                sem: Arc::clone(&self.inner),
                base_cost,
            }),
        }
    }
}

impl fmt::Debug for ReaderSemaphore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let resources = self.available();
        f.debug_struct("ReaderSemaphore")
            .field("available", &resources)
            .field("waiters", &self.waiters())
            .finish()
    }
}

struct PermitInner {
    sem: Arc<Inner>,
    base_cost: usize,
}

impl Drop for PermitInner {
    fn drop(&mut self) {
        self.sem.release(1, self.base_cost as i64);
    }
}

/// Reference-counted admission ticket.
///
/// Dropping the last clone returns `(1, base_cost)` to the budget and
/// wakes the queue head while it fits. Charged buffers hold a clone, so
/// the permit outlives everything accounted against it.
#[derive(Clone)]
pub struct Permit {
    inner: Arc<PermitInner>,
}

impl Permit {
    /// Charge `bytes` of buffer memory against the budget; the budget
    /// may go negative.
    pub fn consume(&self, bytes: usize) {
        self.inner.sem.charge_memory(bytes as i64);
    }

    /// Return `bytes` previously charged with [`Permit::consume`].
    pub fn signal(&self, bytes: usize) {
        self.inner.sem.release(0, bytes as i64);
    }

    /// Base cost deducted at admission.
    pub fn base_cost(&self) -> usize {
        self.inner.base_cost
    }
}

impl fmt::Debug for Permit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Permit")
            .field("base_cost", &self.inner.base_cost)
            .finish()
    }
}
