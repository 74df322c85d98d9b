//! Poison-recovering lock guards.
//!
//! A panic while holding a cache lock must not take the whole cache layer
//! down with it; the guarded state is advisory (counters, cached bytes)
//! and safe to reuse after recovery.

use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::warn;

fn note_recovery(target: &'static str, op: &'static str, kind: &'static str) {
    warn!(
        op,
        target_module = target,
        lock_kind = kind,
        "recovered a poisoned cache lock; state may lag a panicked writer"
    );
}

pub(crate) fn rw_read<'a, T>(
    lock: &'a RwLock<T>,
    target: &'static str,
    op: &'static str,
) -> RwLockReadGuard<'a, T> {
    lock.read().unwrap_or_else(|poisoned| {
        note_recovery(target, op, "rwlock.read");
        poisoned.into_inner()
    })
}

pub(crate) fn rw_write<'a, T>(
    lock: &'a RwLock<T>,
    target: &'static str,
    op: &'static str,
) -> RwLockWriteGuard<'a, T> {
    lock.write().unwrap_or_else(|poisoned| {
        note_recovery(target, op, "rwlock.write");
        poisoned.into_inner()
    })
}

pub(crate) fn mutex_lock<'a, T>(
    lock: &'a Mutex<T>,
    target: &'static str,
    op: &'static str,
) -> MutexGuard<'a, T> {
    lock.lock().unwrap_or_else(|poisoned| {
        note_recovery(target, op, "mutex.lock");
        poisoned.into_inner()
    })
}
