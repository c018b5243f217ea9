//! Lock helpers shared across the crate.

use std::sync::{Mutex, MutexGuard};

/// Lock a mutex, recovering the data if a holder panicked. Every guarded
/// value here is replaced whole, so a poisoned guard is still consistent.
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
