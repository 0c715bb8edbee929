//! The promise state machine.
//!
//! A promise starts pending and settles at most once, either fulfilled with a value or
//! rejected with a reason. Settling is synchronous, but reactions never run inline: each one
//! becomes a microtask on the owning loop, in the order the reactions were attached.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::future::{Future, IntoFuture};
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll, Waker};

use crate::error::panic_message;
use crate::scheduler::Shared;
use crate::task::Job;
use crate::{EventLoop, HostError, Settlement, Value};

/// A fulfillment or rejection handler.
///
/// Returning `Ok` fulfills the derived promise (adopting the value if it is a promise);
/// returning `Err` rejects it.
pub type Handler = Box<dyn FnOnce(&EventLoop, Value) -> Result<Value, Value>>;

/// Identifies a promise within its loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PromiseId(u64);

impl PromiseId {
    /// Id of a promise derived after its loop was dropped. Such a promise never settles.
    pub const DETACHED: PromiseId = PromiseId(u64::MAX);

    pub(crate) const fn new(id: u64) -> PromiseId {
        PromiseId(id)
    }
}

impl fmt::Display for PromiseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "promise#{}", self.0)
    }
}

/// The observable state of a promise.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum PromiseState {
    /// Not settled yet.
    #[default]
    Pending,

    /// Fulfilled with a value.
    Fulfilled(Value),

    /// Rejected with a reason.
    Rejected(Value),
}

impl From<Settlement> for PromiseState {
    fn from(s: Settlement) -> PromiseState {
        match s {
            Settlement::Fulfilled(v) => PromiseState::Fulfilled(v),
            Settlement::Rejected(r) => PromiseState::Rejected(r),
        }
    }
}

/// Something waiting on a promise.
pub(crate) enum Reaction {
    /// A `then` pair and the promise it feeds.
    Then {
        on_fulfilled: Option<Handler>,
        on_rejected: Option<Handler>,
        derived: Promise,
    },

    /// An async function suspended on `.await`.
    Wake(Rc<Wakeup>),
}

impl Reaction {
    /// Returns `true` if running this reaction resumes an async function.
    pub(crate) fn resumes(&self) -> bool {
        matches!(self, Reaction::Wake(_))
    }

    /// Runs the reaction as a microtask.
    pub(crate) fn run(self, lp: &EventLoop, settlement: Settlement) {
        let (on_fulfilled, on_rejected, derived) = match self {
            Reaction::Wake(wakeup) => return wakeup.fire(),
            Reaction::Then {
                on_fulfilled,
                on_rejected,
                derived,
            } => (on_fulfilled, on_rejected, derived),
        };

        let outcome = match settlement {
            Settlement::Fulfilled(value) => match on_fulfilled {
                Some(handler) => call(lp, handler, value),
                None => Ok(value),
            },
            Settlement::Rejected(reason) => match on_rejected {
                Some(handler) => call(lp, handler, reason),
                None => Err(reason),
            },
        };

        match outcome {
            Ok(value) => derived.resolve_with(value),
            Err(reason) => derived.reject_with(reason),
        }
    }
}

/// The single subscription behind one `.await`.
///
/// Repeated polls only swap the stored waker, so a future polled many times while pending
/// still holds exactly one reaction.
#[derive(Debug, Default)]
pub(crate) struct Wakeup {
    waker: RefCell<Option<Waker>>,
    fired: Cell<bool>,
}

impl Wakeup {
    fn register(&self, waker: &Waker) {
        let mut slot = self.waker.borrow_mut();
        let stale = slot.as_ref().map_or(true, |current| !current.will_wake(waker));
        if stale {
            *slot = Some(waker.clone());
        }
    }

    fn fire(&self) {
        self.fired.set(true);
        let waker = self.waker.borrow_mut().take();
        if let Some(waker) = waker {
            waker.wake();
        }
    }
}

/// Calls a handler, turning a panic into a rejection.
fn call(lp: &EventLoop, handler: Handler, arg: Value) -> Result<Value, Value> {
    panic::catch_unwind(AssertUnwindSafe(|| handler(lp, arg))).unwrap_or_else(|payload| {
        Err(Value::error(format!(
            "reaction panicked: {}",
            panic_message(&*payload)
        )))
    })
}

struct Inner {
    id: PromiseId,
    state: RefCell<PromiseState>,

    /// Reactions attached while pending, in attachment order.
    reactions: RefCell<Vec<Reaction>>,

    /// Set once anything subscribes. A rejection nobody subscribed to is reported on drop.
    handled: Cell<bool>,

    event_loop: Weak<Shared>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if self.handled.get() {
            return;
        }
        if let PromiseState::Rejected(reason) = self.state.get_mut() {
            if let Some(shared) = self.event_loop.upgrade() {
                shared.defer_report(HostError::UnhandledRejection {
                    promise: self.id,
                    reason: std::mem::take(reason),
                });
            }
        }
    }
}

/// A shared handle to a promise.
///
/// Cloning is cheap; every clone observes the same state.
#[derive(Clone)]
pub struct Promise {
    inner: Rc<Inner>,
}

impl Promise {
    /// Creates a pending promise owned by the given loop.
    pub(crate) fn pending(shared: &Rc<Shared>) -> Promise {
        Promise::with_id(shared.next_promise_id(), Rc::downgrade(shared))
    }

    fn with_id(id: PromiseId, event_loop: Weak<Shared>) -> Promise {
        Promise {
            inner: Rc::new(Inner {
                id,
                state: RefCell::new(PromiseState::Pending),
                reactions: RefCell::new(Vec::new()),
                handled: Cell::new(false),
                event_loop,
            }),
        }
    }

    /// Creates a pending promise on the same loop as `self`.
    fn sibling(&self) -> Promise {
        match self.inner.event_loop.upgrade() {
            Some(shared) => Promise::pending(&shared),
            None => Promise::with_id(PromiseId::DETACHED, Weak::new()),
        }
    }

    /// Returns this promise's id.
    pub fn id(&self) -> PromiseId {
        self.inner.id
    }

    /// Returns a snapshot of the current state.
    pub fn state(&self) -> PromiseState {
        self.inner.state.borrow().clone()
    }

    /// Returns `true` if the promise has not settled.
    pub fn is_pending(&self) -> bool {
        matches!(*self.inner.state.borrow(), PromiseState::Pending)
    }

    /// Returns the settlement, if any.
    pub fn settlement(&self) -> Option<Settlement> {
        match &*self.inner.state.borrow() {
            PromiseState::Pending => None,
            PromiseState::Fulfilled(v) => Some(Settlement::Fulfilled(v.clone())),
            PromiseState::Rejected(r) => Some(Settlement::Rejected(r.clone())),
        }
    }

    /// Attaches a fulfillment handler. Rejections pass through to the returned promise.
    pub fn then<F>(&self, on_fulfilled: F) -> Promise
    where
        F: FnOnce(&EventLoop, Value) -> Result<Value, Value> + 'static,
    {
        self.react(Some(Box::new(on_fulfilled)), None)
    }

    /// Attaches both handlers.
    ///
    /// Exactly one of them runs, in a microtask, once this promise settles.
    pub fn then_or<F, R>(&self, on_fulfilled: F, on_rejected: R) -> Promise
    where
        F: FnOnce(&EventLoop, Value) -> Result<Value, Value> + 'static,
        R: FnOnce(&EventLoop, Value) -> Result<Value, Value> + 'static,
    {
        self.react(Some(Box::new(on_fulfilled)), Some(Box::new(on_rejected)))
    }

    /// Attaches a rejection handler. Fulfillments pass through to the returned promise.
    pub fn catch<R>(&self, on_rejected: R) -> Promise
    where
        R: FnOnce(&EventLoop, Value) -> Result<Value, Value> + 'static,
    {
        self.react(None, Some(Box::new(on_rejected)))
    }

    /// Attaches a callback that runs on either outcome.
    ///
    /// The returned promise settles like this one, unless the callback fails, in which case it
    /// rejects with the callback's reason. A promise returned by the callback is waited on
    /// first, and its rejection also replaces the outcome. Any other returned value is ignored.
    pub fn finally<F>(&self, on_settled: F) -> Promise
    where
        F: FnOnce(&EventLoop) -> Result<Value, Value> + 'static,
    {
        let callback = Rc::new(Cell::new(Some(on_settled)));
        let again = callback.clone();

        self.then_or(
            move |lp, value| match run_once(&callback, lp)? {
                Value::Promise(cleanup) => Ok(cleanup.then(move |_, _| Ok(value)).into()),
                _ => Ok(value),
            },
            move |lp, reason| match run_once(&again, lp)? {
                Value::Promise(cleanup) => Ok(cleanup.then(move |_, _| Err(reason)).into()),
                _ => Err(reason),
            },
        )
    }

    /// Attaches a raw handler pair, either of which may be absent.
    pub fn react(&self, on_fulfilled: Option<Handler>, on_rejected: Option<Handler>) -> Promise {
        let derived = self.sibling();
        self.subscribe(Reaction::Then {
            on_fulfilled,
            on_rejected,
            derived: derived.clone(),
        });
        derived
    }

    /// Registers a reaction, or schedules it right away if already settled.
    pub(crate) fn subscribe(&self, reaction: Reaction) {
        self.inner.handled.set(true);

        let settlement = self.settlement();
        match settlement {
            None => self.inner.reactions.borrow_mut().push(reaction),
            Some(settlement) => self.schedule(reaction, settlement),
        }
    }

    /// Queues a reaction as a microtask on the owning loop.
    fn schedule(&self, reaction: Reaction, settlement: Settlement) {
        match self.inner.event_loop.upgrade() {
            Some(shared) => {
                let task = shared.enqueue(Job::Reaction(reaction, settlement));
                tracing::trace!(
                    event = "loop.promise.reaction",
                    promise = %self.inner.id,
                    %task,
                    "Reaction queued"
                );
            }
            None => {
                tracing::trace!(
                    event = "loop.promise.orphaned",
                    promise = %self.inner.id,
                    "Loop dropped, reaction discarded"
                );
            }
        }
    }

    /// Resolves the promise: adopts `value` if it is a promise, fulfills otherwise.
    pub(crate) fn resolve_with(&self, value: Value) {
        if !self.is_pending() {
            return;
        }

        match value {
            Value::Promise(other) if other == *self => {
                self.reject_with(Value::type_error("cannot resolve a promise with itself"));
            }
            Value::Promise(other) => {
                tracing::trace!(
                    event = "loop.promise.adopt",
                    promise = %self.inner.id,
                    inner = %other.inner.id,
                    "Adopting inner promise"
                );
                other.subscribe(Reaction::Then {
                    on_fulfilled: None,
                    on_rejected: None,
                    derived: self.clone(),
                });
            }
            value => self.settle(Settlement::Fulfilled(value)),
        }
    }

    pub(crate) fn reject_with(&self, reason: Value) {
        self.settle(Settlement::Rejected(reason));
    }

    /// Moves out of pending and schedules every stored reaction.
    fn settle(&self, settlement: Settlement) {
        {
            let mut state = self.inner.state.borrow_mut();
            if !matches!(*state, PromiseState::Pending) {
                return;
            }
            *state = settlement.clone().into();
        }

        let reactions = std::mem::take(&mut *self.inner.reactions.borrow_mut());
        tracing::trace!(
            event = "loop.promise.settle",
            promise = %self.inner.id,
            fulfilled = settlement.is_fulfilled(),
            reactions = reactions.len(),
            "Promise settled"
        );

        for reaction in reactions {
            self.schedule(reaction, settlement.clone());
        }
    }
}

fn run_once<F>(callback: &Cell<Option<F>>, lp: &EventLoop) -> Result<Value, Value>
where
    F: FnOnce(&EventLoop) -> Result<Value, Value>,
{
    match callback.take() {
        Some(f) => f(lp),
        None => Ok(Value::Undefined),
    }
}

impl PartialEq for Promise {
    fn eq(&self, other: &Promise) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Promise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Promise");
        s.field("id", &self.inner.id);
        match self.inner.state.try_borrow() {
            Ok(state) => s.field("state", &*state),
            Err(_) => s.field("state", &"<settling>"),
        };
        s.finish()
    }
}

impl IntoFuture for Promise {
    type Output = Result<Value, Value>;
    type IntoFuture = PromiseFuture;

    fn into_future(self) -> PromiseFuture {
        PromiseFuture {
            promise: self,
            wakeup: None,
        }
    }
}

/// Future returned by awaiting a [`Promise`].
///
/// Resumption takes exactly one microtask, even for a promise that settled long ago, and runs
/// in the queue position of the reaction the first poll attached. Only await promises inside
/// [`EventLoop::spawn`]: the wakeup is delivered by the loop.
#[derive(Debug)]
pub struct PromiseFuture {
    promise: Promise,
    wakeup: Option<Rc<Wakeup>>,
}

impl Future for PromiseFuture {
    type Output = Result<Value, Value>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Some(wakeup) = &self.wakeup {
            if wakeup.fired.get() {
                if let Some(settlement) = self.promise.settlement() {
                    return Poll::Ready(settlement.into_result());
                }
            }
            wakeup.register(cx.waker());
            return Poll::Pending;
        }

        let wakeup = Rc::new(Wakeup::default());
        wakeup.register(cx.waker());
        self.promise.subscribe(Reaction::Wake(wakeup.clone()));
        self.wakeup = Some(wakeup);
        Poll::Pending
    }
}

/// The two capabilities handed to a promise executor.
///
/// The first call to either method wins; later calls on this resolver or any clone of it are
/// ignored.
#[derive(Debug, Clone)]
pub struct Resolver {
    promise: Promise,
    resolved: Rc<Cell<bool>>,
}

impl Resolver {
    pub(crate) fn new(promise: Promise) -> Resolver {
        Resolver {
            promise,
            resolved: Rc::new(Cell::new(false)),
        }
    }

    /// The promise this resolver settles.
    pub fn promise(&self) -> &Promise {
        &self.promise
    }

    /// Fulfills the promise, or adopts `value` if it is itself a promise.
    pub fn resolve(&self, value: impl Into<Value>) {
        if self.resolved.replace(true) {
            tracing::trace!(
                event = "loop.promise.ignored",
                promise = %self.promise.id(),
                "Promise already resolved"
            );
            return;
        }
        self.promise.resolve_with(value.into());
    }

    /// Rejects the promise.
    pub fn reject(&self, reason: impl Into<Value>) {
        if self.resolved.replace(true) {
            tracing::trace!(
                event = "loop.promise.ignored",
                promise = %self.promise.id(),
                "Promise already resolved"
            );
            return;
        }
        self.promise.reject_with(reason.into());
    }

    /// Returns `true` once `resolve` or `reject` has been called.
    pub fn is_resolved(&self) -> bool {
        self.resolved.get()
    }
}
