//! Mutex access that survives poisoning.
//!
//! A writer that panics while holding one of the dashboard's buffers must not
//! take the HTTP endpoints down with it, so the inner data is recovered instead.

use std::sync::{Mutex, MutexGuard};

/// Acquire `lock`, recovering the guard if a previous holder panicked.
pub fn lock<T>(lock: &Mutex<T>) -> MutexGuard<'_, T> {
    lock.lock().unwrap_or_else(|poisoned| {
        tracing::warn!("Mutex was poisoned, recovering");
        poisoned.into_inner()
    })
}

/// Like [`lock`], but recovers without emitting a tracing event.
///
/// For mutexes that the tracing pipeline itself writes into (the console
/// buffer): logging from here would re-enter the same mutex and deadlock.
/// The poison flag is cleared so later acquisitions take the fast path.
pub fn lock_quiet<T>(lock: &Mutex<T>) -> MutexGuard<'_, T> {
    lock.lock().unwrap_or_else(|poisoned| {
        lock.clear_poison();
        poisoned.into_inner()
    })
}
