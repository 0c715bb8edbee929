use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::Arc;

use async_task::Runnable;
use concurrent_queue::ConcurrentQueue;

use crate::call_stack::CallStack;
use crate::error::panic_message;
use crate::microtask::Drain;
use crate::task::{Job, Task, TaskKind};
use crate::{
    Callback, Clock, Error, ErrorSink, EventLoop, HostError, MicrotaskQueue, PromiseId, Sequence,
    TaskId, TimerId, TimerQueue, Timestamp, Value,
};

/// What a single [`EventLoop::tick`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Drained the microtask queue, running this many microtasks.
    Microtasks(usize),

    /// Ran one timer callback.
    Timer(TimerId),

    /// Nothing was ready; waited for the clock to reach the next timer.
    Waited(Timestamp),

    /// Both queues are empty.
    Idle,
}

/// State owned by one event loop and shared with its promises.
pub(crate) struct Shared {
    /// The time source.
    pub(crate) clock: Rc<dyn Clock>,

    /// Task id generator, shared by timers and microtasks.
    seq: Sequence,

    /// Promise id generator.
    promise_seq: Cell<u64>,

    /// Delayed callbacks.
    timers: RefCell<TimerQueue<Callback>>,

    /// Promise reactions, plain microtasks and async function resumptions.
    microtasks: MicrotaskQueue<Task>,

    /// Busy while a task runs.
    pub(crate) call_stack: CallStack,

    /// Async functions woken since the last check.
    ///
    /// Wakers may fire on any thread, so they only push here. The loop thread is the only
    /// consumer and moves each runnable onto the microtask queue.
    pub(crate) woken: Arc<ConcurrentQueue<Runnable>>,

    /// Failures waiting to be handed to the sink.
    reports: RefCell<VecDeque<HostError>>,

    /// Where failures go.
    sink: Box<dyn ErrorSink>,

    /// Optional cap on one microtask drain.
    microtask_limit: Option<usize>,
}

impl Shared {
    pub(crate) fn new(
        clock: Rc<dyn Clock>,
        sink: Box<dyn ErrorSink>,
        microtask_limit: Option<usize>,
    ) -> Shared {
        Shared {
            clock,
            seq: Sequence::new(),
            promise_seq: Cell::new(0),
            timers: RefCell::new(TimerQueue::new()),
            microtasks: MicrotaskQueue::new(),
            call_stack: CallStack::new(),
            woken: Arc::new(ConcurrentQueue::unbounded()),
            reports: RefCell::new(VecDeque::new()),
            sink,
            microtask_limit,
        }
    }

    pub(crate) fn next_promise_id(&self) -> PromiseId {
        let id = self.promise_seq.get();
        self.promise_seq.set(id + 1);
        PromiseId::new(id)
    }

    /// Queues a timer. The delay has already been validated.
    pub(crate) fn schedule_timer(&self, delay_ms: u64, callback: Callback) -> TimerId {
        let now = self.clock.now();
        let id = self.seq.next();
        let timer = self
            .timers
            .borrow_mut()
            .schedule(id, now, delay_ms, callback);

        tracing::trace!(
            event = "loop.timer.set",
            %timer,
            delay_ms,
            eligible_at = %now.saturating_add(delay_ms),
            "Timer scheduled"
        );

        timer
    }

    pub(crate) fn cancel_timer(&self, timer: TimerId) -> bool {
        let cancelled = self.timers.borrow_mut().cancel(timer);
        tracing::trace!(event = "loop.timer.cancel", %timer, cancelled, "Timer cancelled");
        cancelled
    }

    /// Appends a job to the microtask queue.
    pub(crate) fn enqueue(&self, job: Job) -> TaskId {
        let id = self.seq.next();
        self.microtasks.enqueue(Task {
            id,
            kind: TaskKind::Microtask,
            job,
        });
        id
    }

    pub(crate) fn pending_timers(&self) -> usize {
        self.timers.borrow().len()
    }

    pub(crate) fn pending_microtasks(&self) -> usize {
        self.microtasks.len() + self.woken.len()
    }

    /// Queues a failure for the sink.
    pub(crate) fn defer_report(&self, error: HostError) {
        self.reports.borrow_mut().push_back(error);
    }

    /// Hands queued failures to the sink.
    fn flush_reports(&self) {
        loop {
            let next = self.reports.borrow_mut().pop_front();
            match next {
                Some(error) => self.sink.report(error),
                None => break,
            }
        }
    }

    /// Moves woken async functions onto the microtask queue, in wake order.
    fn collect_woken(&self) {
        while let Ok(runnable) = self.woken.pop() {
            let task = self.enqueue(Job::Poll(runnable));
            tracing::trace!(event = "loop.async.woken", %task, "Async function resumed");
        }
    }

    /// Polls the async functions an `.await` reaction just woke, inside that reaction's turn.
    ///
    /// Only runnables already queued are polled; one that wakes itself again goes through
    /// `collect_woken` like any other wakeup.
    fn resume_woken(&self) {
        for _ in 0..self.woken.len() {
            match self.woken.pop() {
                Ok(runnable) => {
                    tracing::trace!(event = "loop.async.resume", "Async function resumed inline");
                    runnable.run();
                }
                Err(_) => break,
            }
        }
    }

    /// Runs one step of the loop.
    pub(crate) fn tick(&self, lp: &EventLoop) -> Result<Step, Error> {
        if self.call_stack.is_busy() {
            return Err(Error::Reentrant);
        }

        self.flush_reports();
        self.collect_woken();

        // Microtasks first, including the ones they enqueue.
        if !self.microtasks.is_empty() {
            let drained = self.microtasks.drain(self.microtask_limit, |task| {
                self.run_task(lp, task);
                self.collect_woken();
            });
            self.flush_reports();

            return match drained {
                Drain::Empty(ran) => {
                    tracing::trace!(event = "loop.microtasks.drained", ran, "Microtasks drained");
                    Ok(Step::Microtasks(ran))
                }
                Drain::Limited(ran) => {
                    let limit = self.microtask_limit.unwrap_or(ran);
                    tracing::warn!(event = "loop.microtasks.limit", limit, "Microtask limit reached");
                    Err(Error::MicrotaskLimit { limit })
                }
            };
        }

        // Then at most one timer.
        let now = self.clock.now();
        let expired = self.timers.borrow_mut().pop_ready(now);
        if let Some(expired) = expired {
            let timer = expired.id;
            self.run_task(
                lp,
                Task {
                    id: timer.task(),
                    kind: TaskKind::Timer {
                        timer,
                        eligible_at: expired.eligible_at,
                    },
                    job: Job::Callback(expired.payload),
                },
            );
            self.flush_reports();
            return Ok(Step::Timer(timer));
        }

        // Nothing ready: wait for the earliest timer.
        let next = self.timers.borrow_mut().next_eligible();
        if let Some(deadline) = next {
            tracing::debug!(
                event = "loop.idle.wait",
                now = %now,
                until = %deadline,
                "Waiting for next timer"
            );
            self.clock.wait_until(deadline);
            return Ok(Step::Waited(deadline));
        }

        tracing::trace!(event = "loop.idle", "No work left");
        Ok(Step::Idle)
    }

    /// Runs a task with the call stack marked busy.
    fn run_task(&self, lp: &EventLoop, task: Task) {
        let Task { id, kind, job } = task;
        let _frame = self.call_stack.enter();

        match kind {
            TaskKind::Timer { timer, eligible_at } => tracing::debug!(
                event = "loop.timer.fire",
                %timer,
                eligible_at = %eligible_at,
                now = %self.clock.now(),
                "Running timer"
            ),
            TaskKind::Microtask => {
                tracing::trace!(event = "loop.microtask.run", task = %id, "Running microtask")
            }
        }

        match job {
            Job::Callback(callback) => self.invoke(lp, id, callback),
            Job::Reaction(reaction, settlement) => {
                let resumes = reaction.resumes();
                reaction.run(lp, settlement);
                if resumes {
                    self.resume_woken();
                }
            }
            Job::Poll(runnable) => {
                runnable.run();
            }
        }
    }

    /// Calls a callback, containing whatever it throws.
    pub(crate) fn invoke(
        &self,
        lp: &EventLoop,
        task: TaskId,
        callback: impl FnOnce(&EventLoop) -> Result<(), Value>,
    ) {
        match panic::catch_unwind(AssertUnwindSafe(|| callback(lp))) {
            Ok(Ok(())) => {}
            Ok(Err(reason)) => self.defer_report(HostError::Uncaught { task, reason }),
            Err(payload) => self.defer_report(HostError::Panic {
                task,
                message: panic_message(&*payload),
            }),
        }
    }

    /// Runs a host block as a task of its own.
    pub(crate) fn execute(
        &self,
        lp: &EventLoop,
        main: impl FnOnce(&EventLoop) -> Result<(), Value>,
    ) -> Result<TaskId, Error> {
        let frame = self.call_stack.enter().ok_or(Error::Reentrant)?;
        let id = self.seq.next();
        tracing::debug!(event = "loop.execute", task = %id, "Running synchronous block");
        self.invoke(lp, id, main);
        drop(frame);
        self.flush_reports();
        Ok(id)
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        // Failures from the last stretch of work still reach the sink.
        self.flush_reports();

        // Late wakeups must not reach a dead loop.
        self.woken.close();

        self.microtasks.clear();
        while let Ok(runnable) = self.woken.pop() {
            drop(runnable);
        }
    }
}

impl fmt::Debug for Shared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoop")
            .field("now", &self.clock.now())
            .field("busy", &self.call_stack.is_busy())
            .field("timers", &self.pending_timers())
            .field("microtasks", &self.pending_microtasks())
            .finish()
    }
}
