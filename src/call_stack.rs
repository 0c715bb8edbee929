use std::cell::Cell;

/// Tracks whether the loop's single thread of control is running a task.
///
/// Only busy or idle matters for scheduling, so there is no depth.
#[derive(Debug, Default)]
pub(crate) struct CallStack {
    busy: Cell<bool>,
}

impl CallStack {
    pub(crate) const fn new() -> CallStack {
        CallStack {
            busy: Cell::new(false),
        }
    }

    /// Marks the stack busy until the returned frame is dropped.
    ///
    /// Returns `None` if a task is already running.
    pub(crate) fn enter(&self) -> Option<Frame<'_>> {
        if self.busy.replace(true) {
            return None;
        }
        Some(Frame { stack: self })
    }

    pub(crate) fn is_busy(&self) -> bool {
        self.busy.get()
    }
}

/// The running task's hold on the call stack.
#[derive(Debug)]
pub(crate) struct Frame<'a> {
    stack: &'a CallStack,
}

impl Drop for Frame<'_> {
    fn drop(&mut self) {
        self.stack.busy.set(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_frame_at_a_time() {
        let stack = CallStack::new();
        let frame = stack.enter().unwrap();
        assert!(stack.is_busy());
        assert!(stack.enter().is_none());
        assert!(stack.is_busy());

        drop(frame);
        assert!(!stack.is_busy());
        assert!(stack.enter().is_some());
    }
}
