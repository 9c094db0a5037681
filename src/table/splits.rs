// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Batch splitting and rewriting.
//!
//! After the primary batch completes, its slots are partitioned into the
//! successful and failed subsets; only the successful subset is replayed
//! on the secondary. Within that subset every Append and Increment is
//! replaced by a Put built from its primary result, so the replay is
//! idempotent and carries the exact values the primary computed. The
//! original operations are retained for the write-error sink's view.

use std::sync::Arc;

use crate::error::MirrorError;
use crate::model::{
    put_from_result, slot_is_faulty, BatchSlot, OpResult, Operation, OperationKind, RowResult,
};
use crate::verify::MismatchDetector;
use crate::write_errors::WriteErrorSink;

/// Partition of a batch by per-slot primary outcome.
///
/// When `sample_reads` is false, reads are treated as failed for the
/// purpose of secondary scheduling: they are dropped from the secondary
/// batch while their successful write peers are kept.
pub(crate) struct FailedSuccessfulSplit {
    pub successful_operations: Vec<Operation>,
    pub successful_results: Vec<BatchSlot>,
    pub failed_operations: Vec<Operation>,
}

impl FailedSuccessfulSplit {
    pub(crate) fn create(
        operations: &[Operation],
        results: &[BatchSlot],
        sample_reads: bool,
    ) -> Self {
        let mut split = Self {
            successful_operations: Vec::new(),
            successful_results: Vec::new(),
            failed_operations: Vec::new(),
        };
        for (operation, slot) in operations.iter().zip(results.iter()) {
            let dropped_read = operation.is_read() && !sample_reads;
            if slot_is_faulty(slot) || dropped_read {
                split.failed_operations.push(operation.clone());
            } else {
                split.successful_operations.push(operation.clone());
                split.successful_results.push(slot.clone());
            }
        }
        split
    }
}

/// Partition of (already successful) operations into reads and writes.
pub(crate) struct ReadWriteSplit {
    pub read_results: Vec<RowResult>,
    pub write_operations: Vec<Operation>,
}

impl ReadWriteSplit {
    pub(crate) fn create(operations: &[Operation], results: &[BatchSlot]) -> Self {
        let mut split = Self { read_results: Vec::new(), write_operations: Vec::new() };
        for (operation, slot) in operations.iter().zip(results.iter()) {
            if operation.is_read() {
                let result = match slot {
                    Some(Ok(OpResult::Row(row))) => row.clone(),
                    _ => RowResult::empty(),
                };
                split.read_results.push(result);
            } else {
                split.write_operations.push(operation.clone());
            }
        }
        split
    }
}

/// Replaces each Append/Increment by a Put carrying its primary result.
/// `results` are the slots aligned with `operations`.
pub(crate) fn rewrite_appends_and_increments(
    operations: &[Operation],
    results: &[BatchSlot],
) -> Vec<Operation> {
    operations
        .iter()
        .zip(results.iter())
        .map(|(operation, slot)| match (operation, slot) {
            (
                Operation::Append(_) | Operation::Increment(_),
                Some(Ok(OpResult::Row(result))),
            ) => Operation::Put(put_from_result(result)),
            _ => operation.clone(),
        })
        .collect()
}

/// Builds the continuation that inspects the secondary batch once it
/// completes: read slots go to the mismatch detector, failed write slots
/// to the write-error sink with the original operation.
pub(crate) fn batch_verification_continuation(
    detector: Arc<dyn MismatchDetector>,
    sink: Arc<dyn WriteErrorSink>,
    operations: Vec<Operation>,
    primary_results: Vec<BatchSlot>,
) -> impl FnOnce(Result<Vec<BatchSlot>, MirrorError>) + Send + 'static {
    move |secondary| {
        let secondary = secondary.unwrap_or_else(|error| {
            vec![Some(Err(error)); operations.len()]
        });

        for (index, operation) in operations.iter().enumerate() {
            let slot = secondary.get(index).cloned().flatten();
            match slot {
                Some(Ok(result)) => {
                    if let Operation::Get(get) = operation {
                        let primary = match primary_results.get(index) {
                            Some(Some(Ok(OpResult::Row(row)))) => row.clone(),
                            _ => RowResult::empty(),
                        };
                        let secondary_row = match result {
                            OpResult::Row(row) => row,
                            OpResult::Done => RowResult::empty(),
                        };
                        detector.batch_get(index, get, &primary, &secondary_row);
                    }
                }
                Some(Err(error)) => {
                    report_failed_slot(&detector, &sink, index, operation, &error);
                }
                None => {
                    let error =
                        MirrorError::Backend("secondary batch did not produce a result".into());
                    report_failed_slot(&detector, &sink, index, operation, &error);
                }
            }
        }
    }
}

fn report_failed_slot(
    detector: &Arc<dyn MismatchDetector>,
    sink: &Arc<dyn WriteErrorSink>,
    index: usize,
    operation: &Operation,
    error: &MirrorError,
) {
    match operation {
        Operation::Get(get) => detector.batch_get_failure(index, get, error),
        write => sink.consume(OperationKind::Batch, std::slice::from_ref(write), error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Append, Cell, Delete, Get, Increment, Put};
    use crate::verify::test_support::{RecordingMismatchDetector, Verification};
    use crate::write_errors::test_support::RecordingWriteErrorSink;

    fn put_op(row: &[u8]) -> Operation {
        Operation::Put(Put::row(row.to_vec()).cell(b"cf".to_vec(), b"c".to_vec(), b"v".to_vec()))
    }

    fn get_op(row: &[u8]) -> Operation {
        Operation::Get(Get::row(row.to_vec()))
    }

    fn ok_done() -> BatchSlot {
        Some(Ok(OpResult::Done))
    }

    fn ok_row(value: &[u8]) -> BatchSlot {
        Some(Ok(OpResult::Row(row_result(value))))
    }

    fn row_result(value: &[u8]) -> RowResult {
        RowResult::new(vec![Cell {
            row: b"r".to_vec(),
            family: b"cf".to_vec(),
            qualifier: b"c".to_vec(),
            timestamp: 1,
            value: value.to_vec(),
        }])
    }

    fn err_slot() -> BatchSlot {
        Some(Err(MirrorError::Backend("boom".into())))
    }

    #[test]
    fn test_split_keeps_order_and_drops_failures() {
        let operations = vec![put_op(b"a"), put_op(b"b"), put_op(b"c")];
        let results = vec![ok_done(), err_slot(), ok_done()];

        let split = FailedSuccessfulSplit::create(&operations, &results, true);
        assert_eq!(split.successful_operations, vec![put_op(b"a"), put_op(b"c")]);
        assert_eq!(split.failed_operations, vec![put_op(b"b")]);
        assert_eq!(split.successful_results.len(), 2);
    }

    #[test]
    fn test_unfilled_slot_counts_as_failed() {
        let operations = vec![put_op(b"a")];
        let results = vec![None];

        let split = FailedSuccessfulSplit::create(&operations, &results, true);
        assert!(split.successful_operations.is_empty());
        assert_eq!(split.failed_operations.len(), 1);
    }

    #[test]
    fn test_unsampled_reads_dropped_but_writes_kept() {
        let operations = vec![get_op(b"a"), put_op(b"b")];
        let results = vec![ok_row(b"v"), ok_done()];

        let split = FailedSuccessfulSplit::create(&operations, &results, false);
        assert_eq!(split.successful_operations, vec![put_op(b"b")]);
        assert_eq!(split.failed_operations, vec![get_op(b"a")]);
    }

    #[test]
    fn test_read_write_split() {
        let operations = vec![get_op(b"a"), put_op(b"b"), get_op(b"c")];
        let results = vec![ok_row(b"v"), ok_done(), ok_row(b"w")];

        let split = ReadWriteSplit::create(&operations, &results);
        assert_eq!(split.read_results.len(), 2);
        assert_eq!(split.write_operations, vec![put_op(b"b")]);
        assert_eq!(split.read_results[0].value(b"cf", b"c"), Some(b"v".as_slice()));
    }

    #[test]
    fn test_rewrite_replaces_append_and_increment_only() {
        let operations = vec![
            Operation::Append(Append::row(b"r".to_vec()).column(
                b"cf".to_vec(),
                b"c".to_vec(),
                b"x".to_vec(),
            )),
            put_op(b"p"),
            Operation::Increment(Increment::row(b"r".to_vec()).column(
                b"cf".to_vec(),
                b"c".to_vec(),
                1,
            )),
        ];
        let results = vec![ok_row(b"appended"), ok_done(), ok_row(&5i64.to_be_bytes())];

        let rewritten = rewrite_appends_and_increments(&operations, &results);
        match &rewritten[0] {
            Operation::Put(put) => {
                assert_eq!(put.cells[0].value, b"appended");
                assert_eq!(put.cells[0].timestamp, Some(1));
            }
            other => panic!("append not rewritten: {other:?}"),
        }
        assert_eq!(rewritten[1], put_op(b"p"));
        assert!(matches!(&rewritten[2], Operation::Put(_)));
    }

    #[test]
    fn test_verification_continuation_reports_write_failure_with_original_op() {
        let detector = Arc::new(RecordingMismatchDetector::default());
        let sink = Arc::new(RecordingWriteErrorSink::default());
        let original_increment = Operation::Increment(Increment::row(b"r".to_vec()).column(
            b"cf".to_vec(),
            b"c".to_vec(),
            1,
        ));
        let operations = vec![put_op(b"a"), original_increment.clone()];
        let primary = vec![ok_done(), ok_row(&1i64.to_be_bytes())];

        let continuation =
            batch_verification_continuation(detector.clone(), sink.clone(), operations, primary);
        continuation(Ok(vec![ok_done(), err_slot()]));

        let calls = sink.calls.lock();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, OperationKind::Batch);
        // The sink sees the original increment, not the rewritten put.
        assert_eq!(calls[0].1, vec![original_increment]);
        assert!(detector.events.lock().is_empty());
    }

    #[test]
    fn test_verification_continuation_compares_reads() {
        let detector = Arc::new(RecordingMismatchDetector::default());
        let sink = Arc::new(RecordingWriteErrorSink::default());
        let operations = vec![get_op(b"a"), get_op(b"b")];
        let primary = vec![ok_row(b"v"), ok_row(b"v")];

        let continuation =
            batch_verification_continuation(detector.clone(), sink.clone(), operations, primary);
        continuation(Ok(vec![ok_row(b"v"), ok_row(b"different")]));

        let events = detector.events.lock();
        assert_eq!(
            *events,
            vec![
                Verification::BatchGet { index: 0, matches: true },
                Verification::BatchGet { index: 1, matches: false },
            ]
        );
        assert!(sink.calls.lock().is_empty());
    }

    #[test]
    fn test_verification_continuation_handles_whole_batch_error() {
        let detector = Arc::new(RecordingMismatchDetector::default());
        let sink = Arc::new(RecordingWriteErrorSink::default());
        let operations = vec![put_op(b"a"), put_op(b"b")];
        let primary = vec![ok_done(), ok_done()];

        let continuation =
            batch_verification_continuation(detector.clone(), sink.clone(), operations, primary);
        continuation(Err(MirrorError::Connection("secondary unreachable".into())));

        // Every write in the batch is reported lost, one call per op.
        assert_eq!(sink.calls.lock().len(), 2);
    }

    #[test]
    fn test_delete_split_preserves_failed_for_caller() {
        let deletes = vec![
            Operation::Delete(Delete::row(b"a".to_vec())),
            Operation::Delete(Delete::row(b"b".to_vec())),
        ];
        let results = vec![err_slot(), ok_done()];

        let split = FailedSuccessfulSplit::create(&deletes, &results, true);
        assert_eq!(split.failed_operations, vec![deletes[0].clone()]);
    }
}
