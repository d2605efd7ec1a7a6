//! One-shot deferred results.

use crate::error::{CoreError, CoreResult};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

/// The eventual result of one engine operation.
///
/// A `Deferred` is a future that resolves exactly once, with either the
/// operation's value or its error. If the engine drops the operation without
/// ever signalling it, the future resolves to [`CoreError::Dropped`].
///
/// Operations are issued when the `Deferred` is created, not when it is
/// first polled, so dropping a `Deferred` does not cancel anything.
#[must_use = "a Deferred reports the outcome of an operation that is already running"]
pub struct Deferred<T> {
    receiver: oneshot::Receiver<CoreResult<T>>,
}

impl<T> Deferred<T> {
    pub(crate) fn new(receiver: oneshot::Receiver<CoreResult<T>>) -> Self {
        Self { receiver }
    }

    /// Creates a deferred that is already resolved.
    pub fn ready(result: CoreResult<T>) -> Self {
        let (sender, receiver) = oneshot::channel();
        // The receiver is alive, so the send cannot fail.
        let _ = sender.send(result);
        Self::new(receiver)
    }

    /// Creates a deferred that has already failed.
    pub fn failed(error: CoreError) -> Self {
        Self::ready(Err(error))
    }
}

impl<T> Future for Deferred<T> {
    type Output = CoreResult<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(CoreError::Dropped)),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T> fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred").finish_non_exhaustive()
    }
}
