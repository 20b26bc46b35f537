//! Per-thread error channel of the wrapped native engine
//!
//! Native libraries of this kind report failures through a "last error"
//! slot that belongs to the calling thread. Compute phases must read it right
//! after the failing call, on the same thread, before anything else can
//! overwrite it.

use std::cell::RefCell;

use warden_errors::{Error, JobError};

thread_local! {
    static LAST_ERROR: RefCell<Option<String>> = const { RefCell::new(None) };
}

/// Record the message of a failing native call on this thread
pub fn record(message: impl Into<String>) {
    let message = message.into();
    tracing::trace!(%message, "engine error recorded");
    LAST_ERROR.with(|slot| *slot.borrow_mut() = Some(message));
}

/// Take the last recorded message, leaving the slot empty
#[must_use]
pub fn take() -> Option<String> {
    LAST_ERROR.with(|slot| slot.borrow_mut().take())
}

/// Forget any recorded message
pub fn clear() {
    LAST_ERROR.with(|slot| slot.borrow_mut().take());
}

/// Engine failure built from the recorded message, or `fallback` if the
/// engine did not leave one
#[must_use]
pub fn failure(fallback: &str) -> Error {
    let message = take().unwrap_or_else(|| fallback.to_string());
    JobError::engine(message).into()
}

/// Turn a native "null on failure" return into a `Result`
///
/// # Errors
///
/// Returns the captured engine failure when `value` is `None`.
pub fn check<T>(value: Option<T>, fallback: &str) -> Result<T, Error> {
    value.ok_or_else(|| failure(fallback))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_prefers_recorded_message() {
        record("Band 4 does not exist");
        let err = failure("band lookup failed");
        assert_eq!(err.to_string(), "Band 4 does not exist");
        assert!(take().is_none());
    }

    #[test]
    fn failure_falls_back() {
        clear();
        assert_eq!(failure("read failed").to_string(), "read failed");
    }

    #[test]
    fn slot_is_per_thread() {
        record("main thread failure");
        let other = std::thread::spawn(take).join().unwrap();
        assert!(other.is_none());
        assert_eq!(take().as_deref(), Some("main thread failure"));
    }

    #[test]
    fn check_passes_values_through() {
        assert_eq!(check(Some(3), "unused").unwrap(), 3);
        record("null dataset");
        assert!(check::<u8>(None, "open failed")
            .unwrap_err()
            .to_string()
            .contains("null dataset"));
    }
}
