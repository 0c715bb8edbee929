//! A deterministic, single-threaded event loop.
//!
//! The loop owns a timer queue and a microtask queue and runs one task at a time. Every tick
//! follows the same priority order:
//!
//! 1. Drain the microtask queue, including microtasks queued while draining.
//! 2. Otherwise run the earliest eligible timer.
//! 3. Otherwise wait on the clock until the next timer becomes eligible.
//! 4. Otherwise stop.
//!
//! Promises feed the microtask queue: settling a promise queues one microtask per reaction.
//!
//! # Examples
//!
//! ```
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! use async_event_loop::{EventLoop, Value};
//!
//! let lp = EventLoop::new();
//! let log = Rc::new(RefCell::new(Vec::new()));
//!
//! let l = log.clone();
//! lp.set_timeout(0, move |_| {
//!     l.borrow_mut().push("timeout");
//!     Ok(())
//! })
//! .unwrap();
//!
//! let l = log.clone();
//! lp.resolve(Value::Undefined).then(move |_, value| {
//!     l.borrow_mut().push("promise");
//!     Ok(value)
//! });
//!
//! log.borrow_mut().push("sync");
//! lp.run_until_idle().unwrap();
//!
//! assert_eq!(*log.borrow(), ["sync", "promise", "timeout"]);
//! ```

#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]

use std::fmt;
use std::future::Future;
use std::rc::Rc;

mod call_stack;
mod clock;
mod combinators;
mod error;
mod microtask;
mod promise;
mod scheduler;
mod spawn;
mod task;
mod timer;
mod value;

pub use crate::clock::{Clock, SystemClock, Timestamp, VirtualClock};
pub use crate::combinators::Combinator;
pub use crate::error::{Error, ErrorSink, HostError, TracingSink};
pub use crate::microtask::{Drain, MicrotaskQueue};
pub use crate::promise::{Handler, Promise, PromiseFuture, PromiseId, PromiseState, Resolver};
pub use crate::scheduler::Step;
pub use crate::task::{Callback, Sequence, TaskId, TimerId};
pub use crate::timer::{Expired, TimerQueue};
pub use crate::value::{ErrorKind, ErrorObject, Settlement, Value};

use crate::scheduler::Shared;
use crate::spawn::Settle;
use crate::task::Job;

/// A handle to an event loop.
///
/// Handles are cheap to clone and all refer to the same loop. Loops are independent of each
/// other; nothing is global.
///
/// # Examples
///
/// ```
/// use async_event_loop::EventLoop;
///
/// let lp = EventLoop::new();
/// let timer = lp.set_timeout(10, |_| Ok(())).unwrap();
/// assert_eq!(lp.pending_timers(), 1);
///
/// lp.clear_timeout(timer);
/// lp.run_until_idle().unwrap();
/// assert_eq!(lp.now().as_millis(), 0);
/// ```
#[derive(Clone)]
pub struct EventLoop {
    shared: Rc<Shared>,
}

impl EventLoop {
    /// Creates a loop on a [`VirtualClock`] starting at zero.
    pub fn new() -> EventLoop {
        Builder::new().build()
    }

    /// Returns a builder for a configured loop.
    pub fn builder() -> Builder {
        Builder::new()
    }

    /// The current time on the loop's clock.
    pub fn now(&self) -> Timestamp {
        self.shared.clock.now()
    }

    /// Schedules `callback` to run no earlier than `delay_ms` from now.
    ///
    /// The delay is a lower bound. A zero delay still goes through the timer queue, so the
    /// callback never runs before the current task finishes and the microtask queue drains.
    pub fn set_timeout<F>(&self, delay_ms: i64, callback: F) -> Result<TimerId, Error>
    where
        F: FnOnce(&EventLoop) -> Result<(), Value> + 'static,
    {
        let delay_ms = u64::try_from(delay_ms).map_err(|_| Error::NegativeDelay { delay_ms })?;
        Ok(self.shared.schedule_timer(delay_ms, Box::new(callback)))
    }

    /// Cancels a timer that has not run yet.
    ///
    /// Cancelling a timer that already ran or was already cancelled does nothing and returns
    /// `false`.
    pub fn clear_timeout(&self, timer: TimerId) -> bool {
        self.shared.cancel_timer(timer)
    }

    /// Appends `callback` to the microtask queue.
    pub fn queue_microtask<F>(&self, callback: F) -> TaskId
    where
        F: FnOnce(&EventLoop) -> Result<(), Value> + 'static,
    {
        let task = self.shared.enqueue(Job::Callback(Box::new(callback)));
        tracing::trace!(event = "loop.microtask.queue", %task, "Microtask queued");
        task
    }

    /// Creates a promise, calling `executor` right away with its resolver.
    ///
    /// If the executor returns `Err` or panics before resolving, the promise rejects.
    ///
    /// # Examples
    ///
    /// ```
    /// use async_event_loop::{EventLoop, PromiseState, Value};
    ///
    /// let lp = EventLoop::new();
    /// let p = lp.new_promise(|lp, resolver| {
    ///     lp.set_timeout(100, move |_| {
    ///         resolver.resolve("done");
    ///         Ok(())
    ///     })
    ///     .map_err(|err| Value::error(err.to_string()))?;
    ///     Ok(())
    /// });
    ///
    /// lp.run_until_idle().unwrap();
    /// assert_eq!(p.state(), PromiseState::Fulfilled("done".into()));
    /// assert_eq!(lp.now().as_millis(), 100);
    /// ```
    pub fn new_promise<F>(&self, executor: F) -> Promise
    where
        F: FnOnce(&EventLoop, Resolver) -> Result<(), Value>,
    {
        let promise = Promise::pending(&self.shared);
        let resolver = Resolver::new(promise.clone());
        let capability = resolver.clone();

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            executor(self, capability)
        }));
        let thrown = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(reason)) => Some(reason),
            Err(payload) => Some(Value::error(format!(
                "promise executor panicked: {}",
                error::panic_message(&*payload)
            ))),
        };
        if let Some(reason) = thrown {
            resolver.reject(reason);
        }

        promise
    }

    /// Returns `value` if it is a promise, otherwise a promise fulfilled with it.
    pub fn resolve(&self, value: impl Into<Value>) -> Promise {
        match value.into() {
            Value::Promise(promise) => promise,
            value => {
                let promise = Promise::pending(&self.shared);
                promise.resolve_with(value);
                promise
            }
        }
    }

    /// Returns a promise rejected with `reason`.
    pub fn reject(&self, reason: impl Into<Value>) -> Promise {
        let promise = Promise::pending(&self.shared);
        promise.reject_with(reason.into());
        promise
    }

    /// Returns a promise fulfilled with `value` by a timer `delay_ms` from now.
    pub fn delay(&self, delay_ms: u64, value: impl Into<Value>) -> Promise {
        let value = value.into();
        self.new_promise(|lp, resolver| {
            lp.shared.schedule_timer(
                delay_ms,
                Box::new(move |_| {
                    resolver.resolve(value);
                    Ok(())
                }),
            );
            Ok(())
        })
    }

    /// Runs a future as an async function and returns the promise it settles.
    ///
    /// The future is polled once right away, so everything up to its first pending `.await`
    /// runs synchronously. Later polls happen in microtasks.
    ///
    /// # Examples
    ///
    /// ```
    /// use async_event_loop::{EventLoop, PromiseState, Value};
    ///
    /// let lp = EventLoop::new();
    /// let order = lp.delay(500, "order123");
    ///
    /// let handle = lp.clone();
    /// let summary = lp.spawn(async move {
    ///     let id = order.await?;
    ///     let payment = handle.delay(500, format!("paid {id}")).await?;
    ///     Ok::<_, Value>(payment)
    /// });
    ///
    /// lp.run_until_idle().unwrap();
    /// assert_eq!(summary.state(), PromiseState::Fulfilled("paid order123".into()));
    /// assert_eq!(lp.now().as_millis(), 1000);
    /// ```
    pub fn spawn<F>(&self, future: F) -> Promise
    where
        F: Future<Output = Result<Value, Value>> + 'static,
    {
        let promise = Promise::pending(&self.shared);
        let woken = self.shared.woken.clone();

        let (runnable, task) = async_task::spawn_local(
            Settle::new(future, promise.clone()),
            move |runnable| {
                // A closed queue means the loop is gone; dropping the runnable cancels it.
                if let Err(err) = woken.push(runnable) {
                    drop(err.into_inner());
                }
            },
        );
        task.detach();

        tracing::trace!(event = "loop.async.spawn", promise = %promise.id(), "Async function started");
        runnable.run();
        promise
    }

    /// See [`Combinator::All`].
    pub fn all(&self, inputs: impl IntoIterator<Item = Value>) -> Promise {
        combinators::all(self, inputs)
    }

    /// See [`Combinator::AllSettled`].
    pub fn all_settled(&self, inputs: impl IntoIterator<Item = Value>) -> Promise {
        combinators::all_settled(self, inputs)
    }

    /// See [`Combinator::Race`].
    pub fn race(&self, inputs: impl IntoIterator<Item = Value>) -> Promise {
        combinators::race(self, inputs)
    }

    /// See [`Combinator::Any`].
    pub fn any(&self, inputs: impl IntoIterator<Item = Value>) -> Promise {
        combinators::any(self, inputs)
    }

    /// Applies a combinator to a value that must be a [`Value::List`].
    pub fn combine(&self, combinator: Combinator, input: Value) -> Result<Promise, Error> {
        combinator.apply(self, input)
    }

    /// Consumes `ms` of clock time as synchronous work in the current task.
    ///
    /// Timers that become eligible meanwhile stay queued until the task returns.
    pub fn block_for(&self, ms: u64) {
        tracing::trace!(event = "loop.block", ms, "Simulating blocking work");
        self.shared.clock.consume(ms);
    }

    /// Runs `main` as a task, with the call stack busy.
    ///
    /// This is how a host runs its synchronous script before driving the loop.
    pub fn execute<F>(&self, main: F) -> Result<TaskId, Error>
    where
        F: FnOnce(&EventLoop) -> Result<(), Value>,
    {
        self.shared.execute(self, main)
    }

    /// Runs `main`, then drives the loop until it is idle.
    pub fn run<F>(&self, main: F) -> Result<(), Error>
    where
        F: FnOnce(&EventLoop) -> Result<(), Value>,
    {
        self.execute(main)?;
        self.run_until_idle()
    }

    /// Performs one step of the loop.
    ///
    /// Fails with [`Error::Reentrant`] when called from inside a running task.
    pub fn tick(&self) -> Result<Step, Error> {
        self.shared.tick(self)
    }

    /// Ticks until both queues are empty.
    ///
    /// A microtask that keeps queueing microtasks makes this run forever unless a
    /// [`Builder::microtask_limit`] is set.
    pub fn run_until_idle(&self) -> Result<(), Error> {
        loop {
            if self.tick()? == Step::Idle {
                return Ok(());
            }
        }
    }

    /// Number of timers that have not run or been cancelled.
    pub fn pending_timers(&self) -> usize {
        self.shared.pending_timers()
    }

    /// Number of queued microtasks.
    pub fn pending_microtasks(&self) -> usize {
        self.shared.pending_microtasks()
    }

    /// Returns `true` while a task is running.
    pub fn is_busy(&self) -> bool {
        self.shared.call_stack.is_busy()
    }

    /// Returns `true` if there is nothing left to run.
    pub fn is_idle(&self) -> bool {
        self.pending_timers() == 0 && self.pending_microtasks() == 0
    }
}

impl Default for EventLoop {
    fn default() -> EventLoop {
        EventLoop::new()
    }
}

impl fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.shared, f)
    }
}

/// Configures an [`EventLoop`].
///
/// # Examples
///
/// ```
/// use std::rc::Rc;
///
/// use async_event_loop::{EventLoop, HostError, Timestamp, VirtualClock};
///
/// let clock = Rc::new(VirtualClock::new(Timestamp::from_millis(1_000)));
/// let lp = EventLoop::builder()
///     .clock(clock.clone())
///     .microtask_limit(10_000)
///     .error_sink(|err: HostError| eprintln!("{err}"))
///     .build();
///
/// clock.advance(5);
/// assert_eq!(lp.now().as_millis(), 1_005);
/// ```
pub struct Builder {
    clock: Option<Rc<dyn Clock>>,
    microtask_limit: Option<usize>,
    sink: Option<Box<dyn ErrorSink>>,
}

impl Builder {
    /// Creates a builder with the default configuration.
    pub fn new() -> Builder {
        Builder {
            clock: None,
            microtask_limit: None,
            sink: None,
        }
    }

    /// Uses `clock` as the loop's time source. Defaults to a [`VirtualClock`] at zero.
    pub fn clock<C: Clock + 'static>(mut self, clock: Rc<C>) -> Builder {
        self.clock = Some(clock as Rc<dyn Clock>);
        self
    }

    /// Stops a single microtask drain after `limit` jobs.
    ///
    /// Unset by default: a microtask that keeps queueing microtasks starves timers forever.
    pub fn microtask_limit(mut self, limit: usize) -> Builder {
        self.microtask_limit = Some(limit);
        self
    }

    /// Sends contained failures to `sink`. Defaults to [`TracingSink`].
    pub fn error_sink(mut self, sink: impl ErrorSink + 'static) -> Builder {
        self.sink = Some(Box::new(sink) as Box<dyn ErrorSink>);
        self
    }

    /// Creates the loop.
    pub fn build(self) -> EventLoop {
        let clock = self
            .clock
            .unwrap_or_else(|| Rc::new(VirtualClock::new(Timestamp::ZERO)) as Rc<dyn Clock>);
        let sink = self
            .sink
            .unwrap_or_else(|| Box::new(TracingSink) as Box<dyn ErrorSink>);

        EventLoop {
            shared: Rc::new(Shared::new(clock, sink, self.microtask_limit)),
        }
    }
}

impl Default for Builder {
    fn default() -> Builder {
        Builder::new()
    }
}

impl fmt::Debug for Builder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Builder")
            .field("custom_clock", &self.clock.is_some())
            .field("microtask_limit", &self.microtask_limit)
            .field("custom_sink", &self.sink.is_some())
            .finish()
    }
}
