//! Turns engine completion signals into [`Deferred`] results.
//!
//! The engine reports outcomes through separate success and error
//! callbacks. A bridge installs one handler on each channel of a single
//! completion and feeds both into the same one-shot sender. Whichever
//! signal arrives first takes the sender; anything after that is ignored.
//! The bridge touches nothing but the two channels it is given.

use crate::deferred::Deferred;
use crate::error::CoreError;
use parking_lot::Mutex;
use std::sync::Arc;
use stowdb_engine::{Completion, EngineError};
use tokio::sync::oneshot;

/// Bridges a single request, mapping engine errors with `map_err`.
pub fn request<T, C, M>(completion: &C, map_err: M) -> Deferred<T>
where
    T: Send + 'static,
    C: Completion<T> + ?Sized,
    M: FnOnce(EngineError) -> CoreError + Send + 'static,
{
    let (sender, receiver) = oneshot::channel();
    let sender = Arc::new(Mutex::new(Some(sender)));

    let on_success = Arc::clone(&sender);
    completion.on_success(Box::new(move |value| {
        if let Some(sender) = on_success.lock().take() {
            let _ = sender.send(Ok(value));
        }
    }));

    let mut map_err = Some(map_err);
    completion.on_error(Box::new(move |err| {
        if let Some(sender) = sender.lock().take() {
            if let Some(map_err) = map_err.take() {
                let _ = sender.send(Err(map_err(err)));
            }
        }
    }));

    Deferred::new(receiver)
}

/// Bridges a whole transaction: success once it commits, failure with the
/// cause of the abort.
pub fn transaction<C>(completion: &C) -> Deferred<()>
where
    C: Completion<()> + ?Sized,
{
    request(completion, CoreError::from_transaction)
}
