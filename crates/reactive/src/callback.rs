//! Boundary for caller-supplied callbacks.
//!
//! A panic inside a release action or grouping function is caught here and
//! turned into `Error::CallbackFailure`, so an operator can end its stream
//! with a terminal error instead of unwinding through its own state.

use keyflow_core::{Error, Result};
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Runs `f`, converting a panic into a `CallbackFailure` naming `what`.
pub(crate) fn guarded<R>(what: &str, f: impl FnOnce() -> R) -> Result<R> {
    catch_unwind(AssertUnwindSafe(f))
        .map_err(|payload| Error::callback_failure(format!("{} panicked: {}", what, panic_message(&*payload))))
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guarded_ok() {
        assert_eq!(guarded("adder", || 1 + 1).unwrap(), 2);
    }

    #[test]
    fn test_guarded_panic_str() {
        let err = guarded("release action", || panic!("disk gone")).unwrap_err();
        assert!(err.is_callback_failure());
        assert!(err.to_string().contains("release action panicked: disk gone"));
    }

    #[test]
    fn test_guarded_panic_string() {
        let code = 7;
        let err = guarded("grouping function", || -> u32 { panic!("code {}", code) }).unwrap_err();
        assert!(err.to_string().contains("code 7"));
    }
}
