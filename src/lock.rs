use std::sync::{Mutex, MutexGuard};

/// Device threads and the IPC router share a few slots; a panic on one side must
/// not wedge the event loop, so poisoned locks hand back their inner state.
pub(crate) fn lock_or_recover<'a, T>(lock: &'a Mutex<T>, owner: &str) -> MutexGuard<'a, T> {
    lock.lock().unwrap_or_else(|poisoned| {
        tracing::warn!(owner, "mutex poisoned; continuing with inner state");
        crate::log_debug(&format!("{owner}: mutex poisoned, continuing with inner state"));
        poisoned.into_inner()
    })
}
