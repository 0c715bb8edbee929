use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::task::{Context, Poll};

use pin_project_lite::pin_project;

use crate::error::panic_message;
use crate::{Promise, Value};

pin_project! {
    /// Settles a promise with the output of the wrapped future.
    pub(crate) struct Settle<F> {
        #[pin]
        future: F,
        promise: Option<Promise>,
    }
}

impl<F> Settle<F> {
    pub(crate) fn new(future: F, promise: Promise) -> Settle<F> {
        Settle {
            future,
            promise: Some(promise),
        }
    }
}

impl<F: Future<Output = Result<Value, Value>>> Future for Settle<F> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.project();
        let mut future = this.future;

        let outcome = match panic::catch_unwind(AssertUnwindSafe(|| future.as_mut().poll(cx))) {
            Ok(Poll::Pending) => return Poll::Pending,
            Ok(Poll::Ready(outcome)) => outcome,
            Err(payload) => Err(Value::error(format!(
                "async function panicked: {}",
                panic_message(&*payload)
            ))),
        };

        if let Some(promise) = this.promise.take() {
            match outcome {
                Ok(value) => promise.resolve_with(value),
                Err(reason) => promise.reject_with(reason),
            }
        }
        Poll::Ready(())
    }
}
