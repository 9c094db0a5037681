// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Asynchronous adapter around the secondary backend.
//!
//! The secondary is never called from the caller's task: all of its work
//! runs in spawned tasks, each tracked by the adapter's own in-flight
//! counter. The adapter holds one reference on the table's counter from
//! construction until its close has drained the in-flight work, so the
//! table's close protocol cannot complete while secondary operations are
//! still running.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::refcount::{ReferenceCounter, ReferenceGuard};
use crate::storage::Backend;

pub(crate) struct SecondaryClient {
    backend: Arc<dyn Backend>,
    inflight: ReferenceCounter,
    table_hold: Mutex<Option<ReferenceGuard>>,
    closed: AtomicBool,
}

impl SecondaryClient {
    pub(crate) fn new(backend: Arc<dyn Backend>, table_hold: ReferenceGuard) -> Self {
        Self {
            backend,
            inflight: ReferenceCounter::new(),
            table_hold: Mutex::new(Some(table_hold)),
            closed: AtomicBool::new(false),
        }
    }

    /// Handle for a spawned task to call the secondary with.
    pub(crate) fn backend(&self) -> Arc<dyn Backend> {
        self.backend.clone()
    }

    /// Marks one secondary operation as in flight until the guard drops.
    pub(crate) fn track(&self) -> ReferenceGuard {
        self.inflight.hold()
    }

    /// Stops accepting new work, then asynchronously drains the in-flight
    /// operations, closes the backend, and releases the table reference.
    /// Idempotent.
    pub(crate) fn close(self: Arc<Self>) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inflight.release_owner();

        let client = self;
        tokio::spawn(async move {
            client.inflight.drained().await;
            if let Err(error) = client.backend.close().await {
                tracing::warn!(error = %error, "secondary backend close failed");
            }
            // Dropping this releases the table's reference; the table's
            // close completion cannot fire before this point.
            client.table_hold.lock().take();
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryBackend;
    use std::time::Duration;

    #[tokio::test]
    async fn test_close_releases_table_reference_after_drain() {
        let table_refs = ReferenceCounter::new();
        let client = Arc::new(SecondaryClient::new(
            Arc::new(InMemoryBackend::new()),
            table_refs.hold(),
        ));

        let work = client.track();
        client.clone().close();

        // Table reference still held: in-flight work has not drained.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(table_refs.outstanding(), 2);

        drop(work);
        table_refs.release_owner();
        tokio::time::timeout(Duration::from_secs(1), table_refs.drained())
            .await
            .expect("table reference never released");
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let table_refs = ReferenceCounter::new();
        let client = Arc::new(SecondaryClient::new(
            Arc::new(InMemoryBackend::new()),
            table_refs.hold(),
        ));

        client.clone().close();
        client.clone().close();

        table_refs.release_owner();
        tokio::time::timeout(Duration::from_secs(1), table_refs.drained())
            .await
            .expect("table reference never released");
    }
}
