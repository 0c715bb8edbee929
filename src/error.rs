//! Errors returned at the call boundary and failures reported to the host.

use crate::{PromiseId, TaskId, Value};

/// An error returned synchronously by an event loop operation.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A timer was scheduled with a negative delay.
    #[error("timer delay must be non-negative, got {delay_ms}ms")]
    NegativeDelay {
        /// The rejected delay.
        delay_ms: i64,
    },

    /// A combinator was given something other than a list.
    #[error("combinator input must be a list, got {found}")]
    NotAList {
        /// The kind of value that was passed.
        found: &'static str,
    },

    /// The loop was driven from inside one of its own tasks.
    #[error("event loop is already running a task")]
    Reentrant,

    /// A microtask drain hit the configured safety limit.
    #[error("microtask drain stopped after {limit} jobs with work still queued")]
    MicrotaskLimit {
        /// The configured limit.
        limit: usize,
    },
}

/// A contained failure, delivered to the loop's [`ErrorSink`].
///
/// None of these stop the loop.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    /// A timer or microtask callback returned `Err`.
    #[error("uncaught error in {task}: {reason}")]
    Uncaught {
        /// The task that failed.
        task: TaskId,
        /// What it threw.
        reason: Value,
    },

    /// A timer or microtask callback panicked.
    #[error("{task} panicked: {message}")]
    Panic {
        /// The task that panicked.
        task: TaskId,
        /// The panic payload, if it was a string.
        message: String,
    },

    /// A rejected promise was dropped without ever getting a reaction.
    #[error("unhandled rejection of {promise}: {reason}")]
    UnhandledRejection {
        /// The rejected promise.
        promise: PromiseId,
        /// Its rejection reason.
        reason: Value,
    },
}

/// Receives contained failures.
pub trait ErrorSink {
    /// Reports one failure.
    fn report(&self, error: HostError);
}

impl<F: Fn(HostError)> ErrorSink for F {
    fn report(&self, error: HostError) {
        self(error)
    }
}

/// The default sink: logs every failure through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl ErrorSink for TracingSink {
    fn report(&self, error: HostError) {
        match &error {
            HostError::UnhandledRejection { promise, .. } => {
                tracing::warn!(event = "loop.rejection.unhandled", %promise, "{error}");
            }
            HostError::Uncaught { task, .. } | HostError::Panic { task, .. } => {
                tracing::error!(event = "loop.task.failed", %task, "{error}");
            }
        }
    }
}

/// Extracts a message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Box<dyn Any>".to_owned()
    }
}
