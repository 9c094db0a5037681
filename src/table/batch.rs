// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Batch dispatch: sequential and concurrent modes.
//!
//! Sequential mode runs the whole batch on the primary, then replays the
//! successful subset on the secondary — including when the primary call
//! itself returned an error, because partial results may still occupy
//! slots. Concurrent mode (opt-in, Put/Delete/MutateRow only) reserves
//! resources for the whole batch up front, launches the secondary, and
//! runs the primary on the caller's task; an admission denial fails the
//! whole batch before either side starts.
//!
//! Results are staged in an internal slot array and copied to the
//! caller's slots afterwards, so asynchronous verification only ever
//! touches owned data.

use crate::error::MirrorError;
use crate::model::{
    slot_is_faulty, BatchSlot, OperationKind, Operation, RequestResources,
};

use super::splits::{
    batch_verification_continuation, rewrite_appends_and_increments, FailedSuccessfulSplit,
    ReadWriteSplit,
};
use super::MirroringTable;

impl MirroringTable {
    /// Executes a heterogeneous batch. The i-th slot of `results` always
    /// corresponds to the i-th operation; a slot holds the element's
    /// typed result or its failure token. The returned error, if any, is
    /// the primary's batch error verbatim.
    #[tracing::instrument(skip(self, operations, results), fields(table = %self.name, count = operations.len()))]
    pub async fn batch(
        &self,
        operations: &[Operation],
        results: &mut [BatchSlot],
    ) -> Result<(), MirrorError> {
        self.ensure_open()?;
        if operations.len() != results.len() {
            return Err(MirrorError::InvalidRequest(format!(
                "result slots ({}) do not match operations ({})",
                results.len(),
                operations.len()
            )));
        }
        crate::metrics::record_batch_size("primary", operations.len());

        // Primary results are staged internally so the caller's array is
        // never aliased by scheduled secondary work.
        let mut internal: Vec<BatchSlot> = vec![None; operations.len()];
        let outcome = if self.concurrent_writes() && can_run_concurrently(operations) {
            self.concurrent_batch(operations, &mut internal).await
        } else {
            self.sequential_batch(operations, &mut internal).await
        };
        results.clone_from_slice(&internal);
        outcome
    }

    /// Like [`batch`](Self::batch), additionally invoking `callback` once
    /// per slot after the primary batch completes, in slot order.
    pub async fn batch_callback<F>(
        &self,
        operations: &[Operation],
        results: &mut [BatchSlot],
        callback: F,
    ) -> Result<(), MirrorError>
    where
        F: Fn(usize, &BatchSlot),
    {
        let outcome = self.batch(operations, results).await;
        if !matches!(outcome, Err(MirrorError::InvalidRequest(_) | MirrorError::Closed(_))) {
            for (index, slot) in results.iter().enumerate() {
                callback(index, slot);
            }
        }
        outcome
    }

    async fn sequential_batch(
        &self,
        operations: &[Operation],
        internal: &mut [BatchSlot],
    ) -> Result<(), MirrorError> {
        let outcome = self
            .primary_call("batch", self.primary_backend().batch(operations, internal))
            .await;

        // Scheduled unconditionally: when the primary call threw, the
        // successful subset of the slot array still propagates.
        self.schedule_secondary_write_batch(operations, internal);
        outcome
    }

    /// Replays the successful subset of a finished primary batch on the
    /// secondary, after splitting and rewriting.
    fn schedule_secondary_write_batch(&self, operations: &[Operation], results: &[BatchSlot]) {
        let sample_reads = self.read_sampler().should_sample_next_read();
        let split = FailedSuccessfulSplit::create(operations, results, sample_reads);
        if split.successful_operations.is_empty() {
            return;
        }

        let rewritten =
            rewrite_appends_and_increments(&split.successful_operations, &split.successful_results);
        let read_write =
            ReadWriteSplit::create(&split.successful_operations, &split.successful_results);
        let resources = RequestResources::for_batch(&rewritten, &read_write.read_results);

        let continuation = batch_verification_continuation(
            self.mismatch_detector().clone(),
            self.write_error_sink().clone(),
            split.successful_operations,
            split.successful_results,
        );

        let backend = self.secondary().backend();
        let operation = move || async move {
            let mut secondary: Vec<BatchSlot> = vec![None; rewritten.len()];
            if let Err(error) = backend.batch(&rewritten, &mut secondary).await {
                for slot in secondary.iter_mut().filter(|slot| slot.is_none()) {
                    *slot = Some(Err(error.clone()));
                }
            }
            Ok(secondary)
        };

        let sink = self.write_error_sink().clone();
        let write_operations = read_write.write_operations;
        let on_denied = move |error: MirrorError| {
            crate::metrics::record_flow_denial("write");
            if !write_operations.is_empty() {
                sink.consume(OperationKind::Batch, &write_operations, &error);
            }
        };

        crate::scheduling::schedule_with_flow_control(
            "batch",
            self.flow_controller().clone(),
            resources,
            (self.refs().hold(), self.secondary().track()),
            operation,
            continuation,
            on_denied,
        );
    }

    /// Concurrent mode: admission for the whole batch is the commit
    /// point. Once admitted the secondary batch is launched, the primary
    /// runs on the caller's task, and verification is scheduled to run
    /// after the secondary completes.
    async fn concurrent_batch(
        &self,
        operations: &[Operation],
        internal: &mut [BatchSlot],
    ) -> Result<(), MirrorError> {
        let resources = RequestResources::for_batch(operations, &[]);
        let reservation = match self.flow_controller().acquire(&resources).await {
            Ok(reservation) => reservation,
            Err(error) => {
                crate::metrics::record_flow_denial("concurrent_batch");
                return Err(error);
            }
        };

        let guards = (self.refs().hold(), self.secondary().track());

        let backend = self.secondary().backend();
        let secondary_operations = operations.to_vec();
        crate::metrics::record_batch_size("secondary", operations.len());
        let secondary_task = tokio::spawn(async move {
            let mut secondary: Vec<BatchSlot> = vec![None; secondary_operations.len()];
            let result = backend.batch(&secondary_operations, &mut secondary).await;
            crate::metrics::record_operation(
                "secondary",
                "batch",
                if result.is_ok() { "success" } else { "error" },
            );
            if let Err(error) = result {
                for slot in secondary.iter_mut().filter(|slot| slot.is_none()) {
                    *slot = Some(Err(error.clone()));
                }
            }
            secondary
        });

        let outcome = self
            .primary_call("batch", self.primary_backend().batch(operations, internal))
            .await;

        // Verification strictly after the secondary completes. Primary
        // failures are the caller's to see; only slots where the
        // secondary failed and the primary succeeded reach the sink.
        let primary_snapshot = internal.to_vec();
        let verified_operations = operations.to_vec();
        let sink = self.write_error_sink().clone();
        tokio::spawn(async move {
            let _guards = guards;
            let _reservation = reservation;
            let secondary = match secondary_task.await {
                Ok(secondary) => secondary,
                Err(join_error) => {
                    tracing::error!(error = %join_error, "secondary batch task failed");
                    vec![None; verified_operations.len()]
                }
            };
            for (index, operation) in verified_operations.iter().enumerate() {
                let secondary_slot = secondary.get(index).cloned().flatten();
                let secondary_failed = !matches!(secondary_slot, Some(Ok(_)));
                let primary_failed =
                    primary_snapshot.get(index).map_or(true, slot_is_faulty);
                if secondary_failed && !primary_failed {
                    let error = match secondary_slot {
                        Some(Err(error)) => error,
                        _ => MirrorError::Backend(
                            "secondary batch did not produce a result".into(),
                        ),
                    };
                    sink.consume(
                        OperationKind::Batch,
                        std::slice::from_ref(operation),
                        &error,
                    );
                }
            }
        });

        outcome
    }
}

/// Concurrent mode only handles idempotent plain mutations; anything
/// else falls back to sequential mode.
fn can_run_concurrently(operations: &[Operation]) -> bool {
    operations.iter().all(|operation| {
        matches!(
            operation,
            Operation::Put(_) | Operation::Delete(_) | Operation::MutateRow(_)
        )
    })
}
