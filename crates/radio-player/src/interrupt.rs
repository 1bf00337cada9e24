//! Cooperative cancellation shared by the control thread, the network feed and the
//! output callback.
//!
//! The flag is raised by `stop()` before any teardown starts. Blocking reads poll it and
//! fail with an [`Aborted`] I/O error, which callers tell apart from real faults with
//! [`is_aborted`].

use std::fmt;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared cancellation flag.
///
/// Cloning is cheap; every clone observes the same flag.
#[derive(Clone, Debug, Default)]
pub struct InterruptFlag {
    raised: Arc<AtomicBool>,
}

impl InterruptFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request that all blocking I/O tied to this flag abort.
    pub fn raise(&self) {
        self.raised.store(true, Ordering::SeqCst);
    }

    /// Reset the flag at the start of a new play request.
    pub fn clear(&self) {
        self.raised.store(false, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::SeqCst)
    }

    /// Return an "aborted by caller" error when the flag is raised.
    pub fn check(&self) -> io::Result<()> {
        if self.is_raised() {
            Err(aborted_error())
        } else {
            Ok(())
        }
    }
}

/// Marker error carried inside `io::Error` when a read was aborted by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Aborted;

impl fmt::Display for Aborted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("aborted by caller")
    }
}

impl std::error::Error for Aborted {}

/// Build the I/O error returned by reads interrupted through [`InterruptFlag`].
pub fn aborted_error() -> io::Error {
    io::Error::new(io::ErrorKind::Other, Aborted)
}

/// Whether `err` was produced by [`aborted_error`].
pub fn is_aborted(err: &io::Error) -> bool {
    err.get_ref()
        .map(|inner| inner.downcast_ref::<Aborted>().is_some())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_state() {
        let flag = InterruptFlag::new();
        let other = flag.clone();
        assert!(!other.is_raised());
        flag.raise();
        assert!(other.is_raised());
        other.clear();
        assert!(!flag.is_raised());
    }

    #[test]
    fn check_reports_abort_only_when_raised() {
        let flag = InterruptFlag::new();
        assert!(flag.check().is_ok());
        flag.raise();
        let err = flag.check().unwrap_err();
        assert!(is_aborted(&err));
    }

    #[test]
    fn plain_interrupted_is_not_an_abort() {
        let err = io::Error::new(io::ErrorKind::Interrupted, "signal");
        assert!(!is_aborted(&err));
        let err = io::Error::from(io::ErrorKind::TimedOut);
        assert!(!is_aborted(&err));
    }
}
