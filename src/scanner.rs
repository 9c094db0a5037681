// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Verified streaming scans.
//!
//! A [`MirroringScanner`] delivers rows from the primary scanner and,
//! when the scan was sampled, advances a secondary scanner in lockstep:
//! for every row handed to the caller a verification job is queued and a
//! single worker task consumes the jobs in delivery order, so the two
//! streams stay aligned. If the flow controller denies a job, lockstep is
//! unrecoverable and verification is disabled for the rest of the scan;
//! row delivery to the caller is unaffected.
//!
//! Close is idempotent and releases the scanner's table reference only
//! after every queued verification has drained.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::error::MirrorError;
use crate::flow::FlowController;
use crate::model::{RequestResources, RowResult, Scan};
use crate::refcount::{ReferenceCounter, ReferenceGuard};
use crate::secondary::SecondaryClient;
use crate::storage::RowStream;
use crate::verify::MismatchDetector;

struct VerifyJob {
    index: u64,
    primary: Option<RowResult>,
    resources: RequestResources,
    _guards: (ReferenceGuard, ReferenceGuard),
}

struct VerificationPipeline {
    jobs: parking_lot::Mutex<Option<mpsc::UnboundedSender<VerifyJob>>>,
    disabled: Arc<AtomicBool>,
}

/// Streaming scan over the mirror. Created by
/// [`MirroringTable::get_scanner`](crate::table::MirroringTable::get_scanner).
pub struct MirroringScanner {
    primary: tokio::sync::Mutex<Box<dyn RowStream>>,
    verification: Option<VerificationPipeline>,
    secondary: Arc<SecondaryClient>,
    inflight: ReferenceCounter,
    table_hold: parking_lot::Mutex<Option<ReferenceGuard>>,
    closed: AtomicBool,
    index: AtomicU64,
}

impl MirroringScanner {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        scan: Scan,
        primary_stream: Box<dyn RowStream>,
        secondary: Arc<SecondaryClient>,
        detector: Arc<dyn MismatchDetector>,
        flow: Arc<dyn FlowController>,
        table_hold: ReferenceGuard,
        sampled: bool,
    ) -> Self {
        let inflight = ReferenceCounter::new();
        let verification = sampled.then(|| {
            let (tx, rx) = mpsc::unbounded_channel();
            let disabled = Arc::new(AtomicBool::new(false));
            spawn_verification_worker(
                scan,
                secondary.backend(),
                detector,
                flow,
                disabled.clone(),
                rx,
                inflight.hold(),
            );
            VerificationPipeline { jobs: parking_lot::Mutex::new(Some(tx)), disabled }
        });

        Self {
            primary: tokio::sync::Mutex::new(primary_stream),
            verification,
            secondary,
            inflight,
            table_hold: parking_lot::Mutex::new(Some(table_hold)),
            closed: AtomicBool::new(false),
            index: AtomicU64::new(0),
        }
    }

    /// Next row from the primary, or `None` once the scan is exhausted.
    ///
    /// The end-of-stream transition is verified too: both scanners must
    /// run out at the same position.
    pub async fn next_row(&self) -> Result<Option<RowResult>, MirrorError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(MirrorError::Closed("scanner"));
        }

        let row = {
            let mut primary = self.primary.lock().await;
            primary.next_row().await?
        };
        let index = self.index.fetch_add(1, Ordering::Relaxed);
        if row.is_some() {
            crate::metrics::record_scanner_rows(1);
        }

        if let Some(pipeline) = &self.verification {
            if !pipeline.disabled.load(Ordering::Acquire) {
                let resources = row
                    .as_ref()
                    .map(RequestResources::for_result)
                    .unwrap_or(RequestResources { entries: 1, bytes: 1 });
                let job = VerifyJob {
                    index,
                    primary: row.clone(),
                    resources,
                    _guards: (self.inflight.hold(), self.secondary.track()),
                };
                if let Some(sender) = pipeline.jobs.lock().as_ref() {
                    let _ = sender.send(job);
                }
            }
        }

        Ok(row)
    }

    /// Collects all remaining rows.
    pub async fn collect_rows(&self) -> Result<Vec<RowResult>, MirrorError> {
        let mut rows = Vec::new();
        while let Some(row) = self.next_row().await? {
            rows.push(row);
        }
        Ok(rows)
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Closes the scanner, draining queued verifications before the
    /// table reference is released. Idempotent; repeated calls await the
    /// same drain.
    pub async fn close(&self) -> Result<(), MirrorError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            self.inflight.drained().await;
            return Ok(());
        }

        // No new jobs; the worker finishes what is queued and exits.
        if let Some(pipeline) = &self.verification {
            pipeline.jobs.lock().take();
        }

        let result = {
            let mut primary = self.primary.lock().await;
            primary.close().await
        };

        self.inflight.release_owner();
        self.inflight.drained().await;
        self.table_hold.lock().take();
        result
    }
}

impl Drop for MirroringScanner {
    fn drop(&mut self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            tracing::debug!("scanner dropped without close");
            if let Some(pipeline) = &self.verification {
                pipeline.jobs.lock().take();
            }
            self.inflight.release_owner();
            // Queued jobs still hold adapter references, so table close
            // continues to wait for them through the adapter drain.
            self.table_hold.lock().take();
        }
    }
}

fn spawn_verification_worker(
    scan: Scan,
    backend: Arc<dyn crate::storage::Backend>,
    detector: Arc<dyn MismatchDetector>,
    flow: Arc<dyn FlowController>,
    disabled: Arc<AtomicBool>,
    mut jobs: mpsc::UnboundedReceiver<VerifyJob>,
    worker_guard: ReferenceGuard,
) {
    tokio::spawn(async move {
        let _guard = worker_guard;
        let mut stream: Option<Box<dyn RowStream>> = None;

        while let Some(job) = jobs.recv().await {
            if disabled.load(Ordering::Acquire) {
                continue;
            }

            let reservation = match flow.acquire(&job.resources).await {
                Ok(reservation) => reservation,
                Err(error) => {
                    disabled.store(true, Ordering::Release);
                    crate::metrics::record_flow_denial("read");
                    crate::metrics::record_scanner_verification_disabled();
                    tracing::warn!(
                        index = job.index,
                        error = %error,
                        "scan verification disabled: flow controller denied admission"
                    );
                    continue;
                }
            };

            if stream.is_none() {
                match backend.scan(&scan).await {
                    Ok(opened) => stream = Some(opened),
                    Err(error) => {
                        detector.scanner_next_failure(&scan, job.index, &error);
                        disabled.store(true, Ordering::Release);
                        crate::metrics::record_scanner_verification_disabled();
                        continue;
                    }
                }
            }
            let secondary_stream = match stream.as_mut() {
                Some(opened) => opened,
                None => continue,
            };
            match secondary_stream.next_row().await {
                Ok(secondary) => {
                    detector.scanner_next(&scan, job.index, job.primary.as_ref(), secondary.as_ref());
                }
                Err(error) => {
                    detector.scanner_next_failure(&scan, job.index, &error);
                    disabled.store(true, Ordering::Release);
                    crate::metrics::record_scanner_verification_disabled();
                }
            }
            drop(reservation);
        }

        if let Some(mut stream) = stream {
            if let Err(error) = stream.close().await {
                tracing::debug!(error = %error, "secondary scan close failed");
            }
        }
    });
}
