//! The mirroring table dispatcher.
//!
//! A [`MirroringTable`] presents the ordinary table API of a wide-column
//! store and fans every operation out across two backends. The primary is
//! called synchronously and its result — including its exact error — is
//! what the caller sees. The secondary is driven asynchronously through
//! the flow controller and verified against the primary; its failures are
//! reported, never surfaced.
//!
//! # Dispatch paths
//!
//! ```text
//! caller ──► primary backend (synchronous, authoritative)
//!              │ success
//!              ▼
//!          flow controller ──deny──► write-error sink / drop
//!              │ admit
//!              ▼
//!          secondary backend (worker pool)
//!              │
//!              ▼
//!          verification ──► mismatch detector / write-error sink
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use mirror_engine::config::MirroringOptions;
//! use mirror_engine::model::{Get, Put};
//! use mirror_engine::storage::InMemoryBackend;
//! use mirror_engine::table::MirroringTable;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), mirror_engine::error::MirrorError> {
//! let table = MirroringTable::new(
//!     "accounts",
//!     Arc::new(InMemoryBackend::new()),
//!     Arc::new(InMemoryBackend::new()),
//!     &MirroringOptions::default(),
//! );
//!
//! let put = Put::row(b"r1".to_vec()).cell(b"cf".to_vec(), b"c".to_vec(), b"v".to_vec());
//! table.put(put).await?;
//! let result = table.get(&Get::row(b"r1".to_vec())).await?;
//! assert!(!result.is_empty());
//!
//! table.close().await?;
//! # Ok(())
//! # }
//! ```

mod batch;
mod reads;
mod splits;
mod writes;

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::MirroringOptions;
use crate::error::{AccumulatedErrors, MirrorError};
use crate::flow::{FlowController, OutstandingRequestsFlowController};
use crate::model::{Operation, RequestResources, WriteOperationInfo};
use crate::refcount::ReferenceCounter;
use crate::sampler::{PercentageReadSampler, ReadSampler};
use crate::scheduling;
use crate::secondary::SecondaryClient;
use crate::storage::Backend;
use crate::verify::{LoggingMismatchDetector, MismatchDetector};
use crate::write_errors::{LoggingWriteErrorSink, WriteErrorSink};

/// Table view that mirrors every operation to two backends.
///
/// Thread-safe; clone the surrounding `Arc` to share across tasks. All
/// collaborators are released exactly once by [`close`](Self::close).
pub struct MirroringTable {
    name: String,
    primary: Arc<dyn Backend>,
    secondary: Arc<SecondaryClient>,
    detector: Arc<dyn MismatchDetector>,
    flow: Arc<dyn FlowController>,
    write_errors: Arc<dyn WriteErrorSink>,
    sampler: Arc<dyn ReadSampler>,
    refs: ReferenceCounter,
    closed: AtomicBool,
    concurrent_writes: bool,
}

impl MirroringTable {
    /// Creates a table with the default collaborators configured from
    /// `options`: logging mismatch detector and write-error sink, an
    /// outstanding-requests flow controller, and a percentage read
    /// sampler.
    pub fn new(
        name: impl Into<String>,
        primary: Arc<dyn Backend>,
        secondary: Arc<dyn Backend>,
        options: &MirroringOptions,
    ) -> Self {
        Self::with_collaborators(
            name,
            primary,
            secondary,
            Arc::new(LoggingMismatchDetector),
            Arc::new(OutstandingRequestsFlowController::new(
                options.max_outstanding_requests,
                options.max_used_bytes,
            )),
            Arc::new(LoggingWriteErrorSink),
            Arc::new(PercentageReadSampler::new(options.read_verification_rate_percent)),
            options.concurrent_writes,
        )
    }

    /// Creates a table with explicit collaborators.
    #[allow(clippy::too_many_arguments)]
    pub fn with_collaborators(
        name: impl Into<String>,
        primary: Arc<dyn Backend>,
        secondary: Arc<dyn Backend>,
        detector: Arc<dyn MismatchDetector>,
        flow: Arc<dyn FlowController>,
        write_errors: Arc<dyn WriteErrorSink>,
        sampler: Arc<dyn ReadSampler>,
        concurrent_writes: bool,
    ) -> Self {
        let refs = ReferenceCounter::new();
        let secondary = Arc::new(SecondaryClient::new(secondary, refs.hold()));
        Self {
            name: name.into(),
            primary,
            secondary,
            detector,
            flow,
            write_errors,
            sampler,
            refs,
            closed: AtomicBool::new(false),
            concurrent_writes,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Number of asynchronous operations currently tracked, including
    /// the table-open reference while the table is open.
    #[must_use]
    pub fn outstanding_operations(&self) -> usize {
        self.refs.outstanding()
    }

    pub(super) fn ensure_open(&self) -> Result<(), MirrorError> {
        if self.is_closed() {
            return Err(MirrorError::Closed("table"));
        }
        Ok(())
    }

    /// Runs one primary operation with latency and status accounting.
    pub(super) async fn primary_call<T, Fut>(
        &self,
        operation: &'static str,
        fut: Fut,
    ) -> Result<T, MirrorError>
    where
        Fut: Future<Output = Result<T, MirrorError>>,
    {
        let result = {
            let _timer = crate::metrics::LatencyTimer::new("primary", operation);
            fut.await
        };
        crate::metrics::record_operation(
            "primary",
            operation,
            if result.is_ok() { "success" } else { "error" },
        );
        result
    }

    /// Schedules a sampled read on the secondary plus its verification.
    /// An admission denial silently drops the verification.
    pub(super) fn schedule_read_verification<T, Fut, Op, V>(
        &self,
        operation_name: &'static str,
        resources: RequestResources,
        operation: Op,
        continuation: V,
    ) where
        T: Send + 'static,
        Fut: Future<Output = Result<T, MirrorError>> + Send + 'static,
        Op: FnOnce() -> Fut + Send + 'static,
        V: FnOnce(Result<T, MirrorError>) + Send + 'static,
    {
        scheduling::schedule_with_flow_control(
            operation_name,
            self.flow.clone(),
            resources,
            (self.refs.hold(), self.secondary.track()),
            operation,
            continuation,
            |_error| crate::metrics::record_flow_denial("read"),
        );
    }

    /// Schedules a secondary write. Both a failed secondary call and an
    /// admission denial notify the write-error sink with the original
    /// operations from `info`.
    pub(super) fn schedule_write<T, Fut, Op>(
        &self,
        info: WriteOperationInfo,
        operation_name: &'static str,
        operation: Op,
    ) where
        T: Send + 'static,
        Fut: Future<Output = Result<T, MirrorError>> + Send + 'static,
        Op: FnOnce() -> Fut + Send + 'static,
    {
        let WriteOperationInfo { resources, operations, kind } = info;
        let operations: Arc<[Operation]> = operations.into();

        let sink = self.write_errors.clone();
        let failure_operations = operations.clone();
        let verification = move |result: Result<T, MirrorError>| {
            if let Err(error) = result {
                sink.consume(kind, &failure_operations, &error);
            }
        };

        let sink = self.write_errors.clone();
        let on_denied = move |error: MirrorError| {
            crate::metrics::record_flow_denial("write");
            sink.consume(kind, &operations, &error);
        };

        scheduling::schedule_with_flow_control(
            operation_name,
            self.flow.clone(),
            resources,
            (self.refs.hold(), self.secondary.track()),
            operation,
            verification,
            on_denied,
        );
    }

    pub(super) fn secondary(&self) -> &Arc<SecondaryClient> {
        &self.secondary
    }

    pub(super) fn flow_controller(&self) -> &Arc<dyn FlowController> {
        &self.flow
    }

    pub(super) fn mismatch_detector(&self) -> &Arc<dyn MismatchDetector> {
        &self.detector
    }

    pub(super) fn write_error_sink(&self) -> &Arc<dyn WriteErrorSink> {
        &self.write_errors
    }

    pub(super) fn read_sampler(&self) -> &Arc<dyn ReadSampler> {
        &self.sampler
    }

    pub(super) fn refs(&self) -> &ReferenceCounter {
        &self.refs
    }

    pub(super) fn primary_backend(&self) -> &Arc<dyn Backend> {
        &self.primary
    }

    pub(super) fn concurrent_writes(&self) -> bool {
        self.concurrent_writes
    }

    // --- Close protocol ---

    /// Initiates close without awaiting the drain: releases the table's
    /// own reference, closes the primary synchronously, and starts the
    /// secondary adapter's asynchronous close. Idempotent; later callers
    /// get `Ok` and may await [`completion`](Self::completion).
    pub async fn shutdown(&self) -> Result<(), MirrorError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        tracing::info!(table = %self.name, "closing mirroring table");
        self.refs.release_owner();

        let mut errors = AccumulatedErrors::new();
        errors.record(self.primary_call("close", self.primary.close()).await);
        self.secondary.clone().close();
        errors.into_result()
    }

    /// Closes the table and waits until every scheduled secondary
    /// submission has completed or been admission-denied.
    pub async fn close(&self) -> Result<(), MirrorError> {
        let result = self.shutdown().await;
        self.refs.drained().await;
        result
    }

    /// Future that resolves once all in-flight work has drained after a
    /// close. Awaiting it before any close pends forever.
    pub fn completion(&self) -> impl Future<Output = ()> + Send + 'static {
        let refs = self.refs.clone();
        async move { refs.drained().await }
    }

    /// Runs `listener` once the table has fully closed and drained.
    pub fn on_close(&self, listener: impl FnOnce() + Send + 'static) {
        let completion = self.completion();
        tokio::spawn(async move {
            completion.await;
            listener();
        });
    }

    // --- Not-supported surface ---
    //
    // The mirroring client cannot answer these faithfully for two
    // backends at once, so they fail with a recognizable error instead
    // of silently answering for one side.

    pub fn configuration(&self) -> Result<(), MirrorError> {
        Err(MirrorError::NotSupported("configuration"))
    }

    pub fn descriptor(&self) -> Result<(), MirrorError> {
        Err(MirrorError::NotSupported("descriptor"))
    }

    pub fn coprocessor_service(&self, _service: &str) -> Result<(), MirrorError> {
        Err(MirrorError::NotSupported("coprocessor_service"))
    }

    pub fn write_buffer_size(&self) -> Result<usize, MirrorError> {
        Err(MirrorError::NotSupported("write_buffer_size"))
    }

    pub fn set_write_buffer_size(&self, _size: usize) -> Result<(), MirrorError> {
        Err(MirrorError::NotSupported("set_write_buffer_size"))
    }

    pub fn operation_timeout(&self) -> Result<Duration, MirrorError> {
        Err(MirrorError::NotSupported("operation_timeout"))
    }

    pub fn set_operation_timeout(&self, _timeout: Duration) -> Result<(), MirrorError> {
        Err(MirrorError::NotSupported("set_operation_timeout"))
    }

    pub fn rpc_timeout(&self) -> Result<Duration, MirrorError> {
        Err(MirrorError::NotSupported("rpc_timeout"))
    }

    pub fn set_rpc_timeout(&self, _timeout: Duration) -> Result<(), MirrorError> {
        Err(MirrorError::NotSupported("set_rpc_timeout"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryBackend;

    fn test_table() -> MirroringTable {
        MirroringTable::new(
            "t",
            Arc::new(InMemoryBackend::new()),
            Arc::new(InMemoryBackend::new()),
            &MirroringOptions::default(),
        )
    }

    #[tokio::test]
    async fn test_not_supported_surface() {
        let table = test_table();
        assert!(matches!(table.configuration(), Err(MirrorError::NotSupported(_))));
        assert!(matches!(table.descriptor(), Err(MirrorError::NotSupported(_))));
        assert!(matches!(
            table.coprocessor_service("x"),
            Err(MirrorError::NotSupported(_))
        ));
        assert!(matches!(table.write_buffer_size(), Err(MirrorError::NotSupported(_))));
        assert!(matches!(
            table.set_write_buffer_size(1024),
            Err(MirrorError::NotSupported(_))
        ));
        assert!(matches!(table.operation_timeout(), Err(MirrorError::NotSupported(_))));
        assert!(matches!(table.rpc_timeout(), Err(MirrorError::NotSupported(_))));
        table.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let table = test_table();
        table.close().await.unwrap();
        table.close().await.unwrap();
        assert!(table.is_closed());
    }

    #[tokio::test]
    async fn test_operations_rejected_after_close() {
        let table = test_table();
        table.close().await.unwrap();

        let err = table
            .get(&crate::model::Get::row(b"r".to_vec()))
            .await
            .unwrap_err();
        assert!(matches!(err, MirrorError::Closed("table")));
    }

    #[tokio::test]
    async fn test_on_close_listener_fires() {
        let table = test_table();
        let (tx, rx) = tokio::sync::oneshot::channel();
        table.on_close(move || {
            let _ = tx.send(());
        });
        table.close().await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), rx)
            .await
            .expect("listener never fired")
            .unwrap();
    }
}
