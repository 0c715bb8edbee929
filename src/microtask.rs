use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;

/// Result of [`MicrotaskQueue::drain`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Drain {
    /// The queue ran dry after this many jobs.
    Empty(usize),

    /// The limit was reached with jobs still queued.
    Limited(usize),
}

/// A strict FIFO queue of microtasks.
///
/// Jobs can be enqueued through a shared reference while [`drain`](MicrotaskQueue::drain) is
/// running one of them, and those jobs are drained in the same call.
pub struct MicrotaskQueue<T> {
    inner: RefCell<VecDeque<T>>,
}

impl<T> MicrotaskQueue<T> {
    /// Creates an empty queue.
    pub const fn new() -> MicrotaskQueue<T> {
        MicrotaskQueue {
            inner: RefCell::new(VecDeque::new()),
        }
    }

    /// Appends a job to the tail.
    pub fn enqueue(&self, job: T) {
        self.inner.borrow_mut().push_back(job)
    }

    /// Removes the job at the head.
    pub fn pop(&self) -> Option<T> {
        self.inner.borrow_mut().pop_front()
    }

    /// Runs jobs from the head until the queue is empty.
    ///
    /// Emptiness is re-checked after every job, so a job that keeps enqueuing more jobs keeps
    /// the drain going forever unless `limit` is set.
    pub fn drain(&self, limit: Option<usize>, mut run: impl FnMut(T)) -> Drain {
        let mut ran = 0;
        loop {
            if limit.map_or(false, |limit| ran >= limit) && !self.is_empty() {
                return Drain::Limited(ran);
            }

            // The borrow must end before `run`, which may enqueue.
            let job = self.pop();
            match job {
                None => return Drain::Empty(ran),
                Some(job) => {
                    run(job);
                    ran += 1;
                }
            }
        }
    }

    /// Number of queued jobs.
    pub fn len(&self) -> usize {
        self.inner.borrow().len()
    }

    /// Returns `true` if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.inner.borrow().is_empty()
    }

    /// Drops every queued job.
    pub fn clear(&self) {
        let jobs = std::mem::take(&mut *self.inner.borrow_mut());
        drop(jobs);
    }
}

impl<T> Default for MicrotaskQueue<T> {
    fn default() -> MicrotaskQueue<T> {
        MicrotaskQueue::new()
    }
}

impl<T> fmt::Debug for MicrotaskQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.try_borrow() {
            Ok(queue) => f.debug_struct("MicrotaskQueue").field("len", &queue.len()).finish(),
            Err(_) => f.write_str("MicrotaskQueue { <draining> }"),
        }
    }
}
