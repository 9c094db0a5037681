// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Outstanding-work tracking for graceful shutdown.
//!
//! A [`ReferenceCounter`] starts at one — the "owner open" reference —
//! and every scheduled asynchronous operation holds an RAII
//! [`ReferenceGuard`] for its lifetime. [`ReferenceCounter::drained`]
//! resolves once the owner reference has been released *and* every guard
//! has been dropped, which is the close protocol's signal that no
//! secondary work is left in flight.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

struct Inner {
    count: AtomicUsize,
    notify: Notify,
}

/// Counts outstanding asynchronous operations plus one for "owner open".
#[derive(Clone)]
pub struct ReferenceCounter {
    inner: Arc<Inner>,
}

impl ReferenceCounter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                count: AtomicUsize::new(1),
                notify: Notify::new(),
            }),
        }
    }

    /// Takes a reference for one in-flight operation. The reference is
    /// released when the guard drops, normally or on panic.
    #[must_use]
    pub fn hold(&self) -> ReferenceGuard {
        self.inner.count.fetch_add(1, Ordering::AcqRel);
        ReferenceGuard { inner: self.inner.clone() }
    }

    /// Releases the owner reference taken at construction. Called exactly
    /// once, from the owner's close path.
    pub(crate) fn release_owner(&self) {
        Inner::release(&self.inner);
    }

    /// Number of outstanding references, including the owner reference
    /// while the owner is open.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.inner.count.load(Ordering::Acquire)
    }

    /// Resolves once the count reaches zero. Safe to await from any
    /// number of tasks, before or after the drain happens.
    pub async fn drained(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.inner.count.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }
}

impl Default for ReferenceCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl Inner {
    fn release(inner: &Arc<Inner>) {
        if inner.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            inner.notify.notify_waiters();
        }
    }
}

/// RAII reference on a [`ReferenceCounter`].
pub struct ReferenceGuard {
    inner: Arc<Inner>,
}

impl Drop for ReferenceGuard {
    fn drop(&mut self) {
        Inner::release(&self.inner);
    }
}
