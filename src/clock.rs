//! Time sources for the event loop.
//!
//! The loop never reads the wall clock directly. It asks a [`Clock`] for the current
//! [`Timestamp`], and when nothing is ready it asks the clock to wait until the next timer
//! becomes eligible. A [`VirtualClock`] makes that wait instantaneous, which is what keeps
//! tests deterministic.

use std::cell::Cell;
use std::fmt;
use std::time::{Duration, Instant};

use futures_lite::future;

/// A point in time, in milliseconds since the clock's origin.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(u64);

impl Timestamp {
    /// The clock origin.
    pub const ZERO: Timestamp = Timestamp(0);

    /// Creates a timestamp from milliseconds since the origin.
    pub const fn from_millis(ms: u64) -> Timestamp {
        Timestamp(ms)
    }

    /// Returns the number of milliseconds since the origin.
    pub const fn as_millis(self) -> u64 {
        self.0
    }

    /// Returns the timestamp `ms` milliseconds later, saturating at the end of time.
    pub const fn saturating_add(self, ms: u64) -> Timestamp {
        Timestamp(self.0.saturating_add(ms))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// A monotonic time source.
pub trait Clock {
    /// Returns the current time. Never decreases.
    fn now(&self) -> Timestamp;

    /// Blocks until `deadline`, or returns immediately if it has already passed.
    ///
    /// Called by the loop when no work is ready but a timer is queued.
    fn wait_until(&self, deadline: Timestamp);

    /// Consumes `ms` milliseconds as if the current task were doing synchronous work.
    fn consume(&self, ms: u64);
}

/// A deterministic clock that only moves when told to.
///
/// Idle waits jump straight to the deadline, so a loop driven by this clock runs as fast as
/// the callbacks allow while still observing every timer in the right order.
#[derive(Debug, Default)]
pub struct VirtualClock {
    now: Cell<u64>,
}

impl VirtualClock {
    /// Creates a virtual clock reading `start`.
    pub const fn new(start: Timestamp) -> VirtualClock {
        VirtualClock {
            now: Cell::new(start.0),
        }
    }

    /// Moves the clock forward by `ms` milliseconds.
    pub fn advance(&self, ms: u64) {
        self.now.set(self.now.get().saturating_add(ms));
    }

    /// Moves the clock forward to `t`. Earlier timestamps are ignored.
    pub fn advance_to(&self, t: Timestamp) {
        if t.0 > self.now.get() {
            self.now.set(t.0);
        }
    }
}

impl Clock for VirtualClock {
    fn now(&self) -> Timestamp {
        Timestamp(self.now.get())
    }

    fn wait_until(&self, deadline: Timestamp) {
        self.advance_to(deadline);
    }

    fn consume(&self, ms: u64) {
        self.advance(ms);
    }
}

/// A clock backed by [`Instant`].
///
/// Idle waits park the thread on an `async-io` timer.
#[derive(Debug)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    /// Creates a system clock whose origin is the current instant.
    pub fn new() -> SystemClock {
        SystemClock {
            origin: Instant::now(),
        }
    }

    fn instant(&self, t: Timestamp) -> Instant {
        self.origin + Duration::from_millis(t.0)
    }
}

impl Default for SystemClock {
    fn default() -> SystemClock {
        SystemClock::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        let ms = self.origin.elapsed().as_millis();
        Timestamp(u64::try_from(ms).unwrap_or(u64::MAX))
    }

    fn wait_until(&self, deadline: Timestamp) {
        let at = self.instant(deadline);
        if at > Instant::now() {
            future::block_on(async_io::Timer::at(at));
        }
    }

    fn consume(&self, ms: u64) {
        // Spin rather than sleep: the point is to keep the thread busy.
        let until = Instant::now() + Duration::from_millis(ms);
        while Instant::now() < until {
            std::hint::spin_loop();
        }
    }
}
