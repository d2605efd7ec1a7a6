//! Native completion signals.
//!
//! Engine operations do not return their results. They hand back a
//! [`Request`] on which the caller installs callbacks; the engine worker
//! later signals either success (with a value) or an error.

use crate::error::EngineError;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// Callback receiving a success value.
pub type SuccessHandler<T> = Box<dyn FnMut(T) + Send + 'static>;

/// Callback receiving an error.
pub type ErrorHandler = Box<dyn FnMut(EngineError) + Send + 'static>;

/// Something that eventually signals success or failure through callbacks.
///
/// The two channels are independent: installing a success handler never
/// replaces or removes the error handler, and vice versa.
pub trait Completion<T> {
    /// Installs the success callback.
    fn on_success(&self, handler: SuccessHandler<T>);

    /// Installs the error callback.
    fn on_error(&self, handler: ErrorHandler);
}

/// Whether a request has signalled yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    /// No signal has been raised.
    Pending,
    /// At least one signal has been raised.
    Done,
}

enum Signal<T> {
    Success(T),
    Error(EngineError),
}

struct Slot<T> {
    on_success: Option<SuccessHandler<T>>,
    on_error: Option<ErrorHandler>,
    // Signals raised before a matching handler was installed.
    buffered: Vec<Signal<T>>,
    state: ReadyState,
}

/// A single in-flight engine request.
///
/// Cloning a request yields another handle to the same request.
pub struct Request<T> {
    slot: Arc<Mutex<Slot<T>>>,
}

impl<T> Clone for Request<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T: Send + 'static> Request<T> {
    /// Creates a pending request.
    ///
    /// Engines create requests; this is public so fakes can be built in
    /// tests.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slot: Arc::new(Mutex::new(Slot {
                on_success: None,
                on_error: None,
                buffered: Vec::new(),
                state: ReadyState::Pending,
            })),
        }
    }

    /// Creates a request that has already failed.
    #[must_use]
    pub fn failed(error: EngineError) -> Self {
        let request = Self::new();
        request.reject(error);
        request
    }

    /// Returns whether the request has signalled.
    #[must_use]
    pub fn ready_state(&self) -> ReadyState {
        self.slot.lock().state
    }

    /// Signals success.
    pub fn resolve(&self, value: T) {
        self.raise(Signal::Success(value));
    }

    /// Signals failure.
    pub fn reject(&self, error: EngineError) {
        self.raise(Signal::Error(error));
    }

    fn raise(&self, signal: Signal<T>) {
        let mut slot = self.slot.lock();
        slot.state = ReadyState::Done;
        match signal {
            Signal::Success(value) => match slot.on_success.take() {
                Some(mut handler) => {
                    drop(slot);
                    handler(value);
                    self.restore_success(handler);
                }
                None => slot.buffered.push(Signal::Success(value)),
            },
            Signal::Error(error) => match slot.on_error.take() {
                Some(mut handler) => {
                    drop(slot);
                    handler(error);
                    self.restore_error(handler);
                }
                None => slot.buffered.push(Signal::Error(error)),
            },
        }
    }

    // Handlers run without the slot lock held, so they may touch the request.
    fn restore_success(&self, handler: SuccessHandler<T>) {
        let mut slot = self.slot.lock();
        if slot.on_success.is_none() {
            slot.on_success = Some(handler);
        }
    }

    fn restore_error(&self, handler: ErrorHandler) {
        let mut slot = self.slot.lock();
        if slot.on_error.is_none() {
            slot.on_error = Some(handler);
        }
    }
}

fn take_buffered<T>(slot: &mut Slot<T>, successes: bool) -> Vec<Signal<T>> {
    let (matching, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut slot.buffered)
        .into_iter()
        .partition(|s| matches!(s, Signal::Success(_)) == successes);
    slot.buffered = rest;
    matching
}

impl<T: Send + 'static> Default for Request<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + 'static> Completion<T> for Request<T> {
    fn on_success(&self, mut handler: SuccessHandler<T>) {
        loop {
            let pending = {
                let mut slot = self.slot.lock();
                let pending = take_buffered(&mut slot, true);
                if pending.is_empty() {
                    slot.on_success = Some(handler);
                    return;
                }
                pending
            };
            for signal in pending {
                if let Signal::Success(value) = signal {
                    handler(value);
                }
            }
        }
    }

    fn on_error(&self, mut handler: ErrorHandler) {
        loop {
            let pending = {
                let mut slot = self.slot.lock();
                let pending = take_buffered(&mut slot, false);
                if pending.is_empty() {
                    slot.on_error = Some(handler);
                    return;
                }
                pending
            };
            for signal in pending {
                if let Signal::Error(error) = signal {
                    handler(error);
                }
            }
        }
    }
}

impl<T> fmt::Debug for Request<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slot = self.slot.lock();
        f.debug_struct("Request")
            .field("state", &slot.state)
            .field("buffered", &slot.buffered.len())
            .finish()
    }
}
