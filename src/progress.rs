//! Progress tracking and cooperative cancellation.
//!
//! A [`Progress`] handle is shared between the caller and a running archive
//! operation. The operation reports how many units it has completed; the
//! caller may request cancellation at any time. Cancellation never interrupts
//! a chunk in flight, it only prevents the next chunk from starting.
//!
//! # Example
//!
//! ```rust,no_run
//! use rezip::{AccessMode, Archive, ExtractOptions, Progress};
//!
//! let mut archive = Archive::open("data.zip", AccessMode::Read)?;
//! let entry = archive.get("big.bin")?.expect("entry");
//! let progress = Progress::new();
//! let watcher = progress.clone();
//! std::thread::spawn(move || watcher.cancel());
//! let result = archive.extract(&entry, &ExtractOptions::default(), Some(&progress), |_| Ok(()));
//! # let _ = result;
//! # Ok::<(), rezip::Error>(())
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::{Error, Result};

#[derive(Debug, Default)]
struct ProgressState {
    total: AtomicU64,
    completed: AtomicU64,
    cancelled: AtomicBool,
}

/// Shared progress counter and cancellation flag.
///
/// Cloning yields another handle to the same state.
#[derive(Debug, Clone, Default)]
pub struct Progress {
    inner: Arc<ProgressState>,
}

impl Progress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation of the operation using this handle.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
    }

    /// Returns whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Total units of work of the current operation.
    pub fn total(&self) -> u64 {
        self.inner.total.load(Ordering::Relaxed)
    }

    /// Units of work completed so far.
    pub fn completed(&self) -> u64 {
        self.inner.completed.load(Ordering::Relaxed)
    }

    /// Completed fraction in `0.0..=1.0`; `0.0` while the total is unknown.
    pub fn fraction_completed(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            0.0
        } else {
            (self.completed() as f64 / total as f64).min(1.0)
        }
    }

    pub(crate) fn start(&self, total: u64) {
        self.inner.total.store(total, Ordering::Relaxed);
        self.inner.completed.store(0, Ordering::Relaxed);
    }

    pub(crate) fn advance(&self, units: u64) {
        self.inner.completed.fetch_add(units, Ordering::Relaxed);
    }

    /// Fails with [`Error::Cancelled`] once cancellation was requested.
    pub(crate) fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fraction_completed() {
        let progress = Progress::new();
        assert_eq!(progress.fraction_completed(), 0.0);
        progress.start(8);
        progress.advance(4);
        assert_eq!(progress.completed(), 4);
        assert_eq!(progress.fraction_completed(), 0.5);
    }

    #[test]
    fn test_cancel_is_shared_between_clones() {
        let progress = Progress::new();
        let other = progress.clone();
        assert!(progress.check().is_ok());
        other.cancel();
        assert!(progress.is_cancelled());
        assert!(matches!(progress.check(), Err(Error::Cancelled)));
    }

    #[test]
    fn test_start_resets_completed() {
        let progress = Progress::new();
        progress.start(10);
        progress.advance(10);
        progress.start(3);
        assert_eq!(progress.completed(), 0);
        assert_eq!(progress.total(), 3);
    }
}
