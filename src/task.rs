//! Task identities and the units of work the loop dispatches.

use std::cell::Cell;
use std::fmt;

use async_task::Runnable;

use crate::promise::Reaction;
use crate::{EventLoop, Settlement, Timestamp, Value};

/// A timer or microtask callback.
///
/// Returning `Err` is the equivalent of throwing: the task ends, the error is reported to the
/// loop's error sink, and the loop moves on.
pub type Callback = Box<dyn FnOnce(&EventLoop) -> Result<(), Value>>;

/// Identifies one enqueued task.
///
/// Ids are handed out by a single [`Sequence`] per loop, so they are unique and strictly
/// increasing in enqueue order across timers and microtasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(u64);

impl TaskId {
    /// Returns the raw sequence number.
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

/// Identifies a scheduled timer, for cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId(TaskId);

impl TimerId {
    /// The task id the timer was scheduled under.
    pub const fn task(self) -> TaskId {
        self.0
    }
}

impl From<TaskId> for TimerId {
    fn from(id: TaskId) -> TimerId {
        TimerId(id)
    }
}

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer#{}", self.0 .0)
    }
}

/// A monotonic id generator.
#[derive(Debug, Default)]
pub struct Sequence {
    next: Cell<u64>,
}

impl Sequence {
    /// Creates a sequence starting at zero.
    pub const fn new() -> Sequence {
        Sequence { next: Cell::new(0) }
    }

    /// Returns the next id.
    pub fn next(&self) -> TaskId {
        let id = self.next.get();
        self.next.set(id + 1);
        TaskId(id)
    }
}

/// Where a task came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TaskKind {
    Timer { timer: TimerId, eligible_at: Timestamp },
    Microtask,
}

/// The work a microtask performs.
pub(crate) enum Job {
    /// A callback from `queue_microtask`.
    Callback(Callback),

    /// A promise reaction, with the settlement that triggered it.
    Reaction(Reaction, Settlement),

    /// Resumes an async function.
    Poll(Runnable),
}

/// A unit of work, moved out of its queue exactly once.
pub(crate) struct Task {
    pub(crate) id: TaskId,
    pub(crate) kind: TaskKind,
    pub(crate) job: Job,
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let job = match self.job {
            Job::Callback(_) => "callback",
            Job::Reaction(..) => "reaction",
            Job::Poll(_) => "poll",
        };
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("job", &job)
            .finish()
    }
}
