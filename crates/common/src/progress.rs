//! Generic progress callback trait and implementations.
//!
//! Progress reporting is a side channel: observers are notified after
//! work completes and can request cancellation, but observation itself
//! never fails the operation being observed.

use std::marker::PhantomData;

/// Generic progress callback trait.
///
/// Type parameter `T` is the progress data type, so different operations
/// can report different progress information through the same pattern.
pub trait ProgressCallback<T>: Send + Sync {
    /// Called with progress updates.
    ///
    /// # Returns
    /// - `true` to continue the operation
    /// - `false` to request cancellation
    fn on_progress(&self, progress: &T) -> bool;
}

/// A no-op progress callback that always continues.
///
/// Used wherever a caller passes no observer, so the reporting code path
/// stays unconditional.
pub struct NoOpProgress;

impl<T> ProgressCallback<T> for NoOpProgress {
    fn on_progress(&self, _progress: &T) -> bool {
        true
    }
}

/// A progress callback that wraps a closure.
pub struct FnProgress<F, T> {
    callback: F,
    _marker: PhantomData<T>,
}

impl<F, T> FnProgress<F, T>
where
    F: Fn(&T) -> bool + Send + Sync,
{
    /// Create a new closure-based progress callback.
    pub fn new(callback: F) -> Self {
        Self {
            callback,
            _marker: PhantomData,
        }
    }
}

impl<F, T> ProgressCallback<T> for FnProgress<F, T>
where
    F: Fn(&T) -> bool + Send + Sync,
    T: Send + Sync,
{
    fn on_progress(&self, progress: &T) -> bool {
        (self.callback)(progress)
    }
}

/// Create a progress callback from a closure.
pub fn progress_fn<F, T>(f: F) -> FnProgress<F, T>
where
    F: Fn(&T) -> bool + Send + Sync,
{
    FnProgress::new(f)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    struct BytesDone {
        bytes: u64,
    }

    #[test]
    fn test_noop_progress_always_continues() {
        let progress: NoOpProgress = NoOpProgress;
        assert!(progress.on_progress(&BytesDone { bytes: 0 }));
        assert!(progress.on_progress(&BytesDone { bytes: u64::MAX }));
    }

    #[test]
    fn test_fn_progress_cancel_threshold() {
        let callback = progress_fn(|p: &BytesDone| p.bytes < 1000);
        assert!(callback.on_progress(&BytesDone { bytes: 999 }));
        assert!(!callback.on_progress(&BytesDone { bytes: 1000 }));
    }

    #[test]
    fn test_fn_progress_observes_every_call() {
        let calls: Arc<AtomicU64> = Arc::new(AtomicU64::new(0));
        let calls_clone: Arc<AtomicU64> = calls.clone();

        let callback = progress_fn(move |_: &BytesDone| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            true
        });

        callback.on_progress(&BytesDone { bytes: 1 });
        callback.on_progress(&BytesDone { bytes: 2 });
        callback.on_progress(&BytesDone { bytes: 3 });

        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
