// Last-error diagnostics, scoped per thread.
//
// Every failing public operation in this crate writes a human-readable
// message here before returning its `Err`. The slot is thread-local, so a
// host loop on its own thread and a client polled from the main thread never
// overwrite each other's message. Success never clears the slot; the next
// failure on the same thread overwrites it. `clear_last_error` exists for
// callers that want a clean slate (tests, mostly).
//
// Engines additionally keep their own `ErrorSlot` so `Client::last_error`
// and `Host::last_error` work no matter which thread asks.

use std::cell::RefCell;
use std::fmt::Display;

thread_local! {
    static LAST_ERROR: RefCell<Option<String>> = const { RefCell::new(None) };
}

/// Overwrite the calling thread's last-error message.
pub fn set_last_error(message: impl Into<String>) {
    let message = message.into();
    LAST_ERROR.with(|slot| *slot.borrow_mut() = Some(message));
}

/// The calling thread's last-error message, copied out.
pub fn last_error() -> Option<String> {
    LAST_ERROR.with(|slot| slot.borrow().clone())
}

/// Borrow the calling thread's last-error message without copying it.
pub fn with_last_error<R>(f: impl FnOnce(Option<&str>) -> R) -> R {
    LAST_ERROR.with(|slot| f(slot.borrow().as_deref()))
}

pub fn clear_last_error() {
    LAST_ERROR.with(|slot| *slot.borrow_mut() = None);
}

/// Write `err` to the calling thread's slot and hand it back, for failures
/// that happen outside any engine (construction, config loading, joins).
pub(crate) fn fail<E: Display>(err: E) -> E {
    set_last_error(err.to_string());
    err
}

/// Per-engine copy of the most recent failure message.
#[derive(Debug, Default)]
pub(crate) struct ErrorSlot {
    message: Option<String>,
}

impl ErrorSlot {
    /// Record `err` in this slot and in the thread-local channel, then hand
    /// it back so call sites can write `return Err(self.errors.record(e))`.
    pub(crate) fn record<E: Display>(&mut self, err: E) -> E {
        let message = err.to_string();
        set_last_error(message.clone());
        self.message = Some(message);
        err
    }

    /// Record a failure that has no error value (dropped frames and the like).
    pub(crate) fn note(&mut self, message: impl Into<String>) {
        let message = message.into();
        set_last_error(message.clone());
        self.message = Some(message);
    }

    pub(crate) fn get(&self) -> Option<&str> {
        self.message.as_deref()
    }
}
