//! Small shared helpers

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::warn;

/// Helper to acquire read lock with poison recovery
pub(crate) fn acquire_read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read()
        .unwrap_or_else(|poisoned: PoisonError<RwLockReadGuard<'_, T>>| {
            warn!("RwLock was poisoned on read, recovering inner value");
            poisoned.into_inner()
        })
}

/// Helper to acquire write lock with poison recovery
pub(crate) fn acquire_write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write()
        .unwrap_or_else(|poisoned: PoisonError<RwLockWriteGuard<'_, T>>| {
            warn!("RwLock was poisoned on write, recovering inner value");
            poisoned.into_inner()
        })
}

/// Lock a std mutex, recovering the value if a previous holder panicked
pub(crate) fn lock_or_recover<T>(lock: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    lock.lock().unwrap_or_else(|poisoned| {
        warn!("Mutex was poisoned, recovering inner value");
        poisoned.into_inner()
    })
}
