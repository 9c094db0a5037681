// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Sink for secondary write failures.
//!
//! When a write succeeded on the primary but could not be applied to the
//! secondary — the backend failed, or the flow controller denied
//! admission — the mirror's only compensation is reporting. The sink
//! receives the *original* operations (never the rewritten Put form), so
//! a consumer can persist them for later replay or reconciliation.

use crate::error::MirrorError;
use crate::model::{Operation, OperationKind};

/// Receives secondary-write failures together with the operations that
/// were lost. Implementations must be thread-safe; the sink is called
/// from worker-pool tasks.
pub trait WriteErrorSink: Send + Sync {
    fn consume(&self, kind: OperationKind, operations: &[Operation], error: &MirrorError);
}

/// Default sink: logs every lost write and bumps the write-error counter.
pub struct LoggingWriteErrorSink;

impl WriteErrorSink for LoggingWriteErrorSink {
    fn consume(&self, kind: OperationKind, operations: &[Operation], error: &MirrorError) {
        for operation in operations {
            tracing::error!(
                kind = %kind,
                row = %String::from_utf8_lossy(operation.row()),
                error = %error,
                "secondary write lost"
            );
        }
        crate::metrics::record_write_error(kind.as_str(), operations.len());
    }
}
