use thiserror::Error;

/// Error type shared by backends and the mirroring dispatcher.
///
/// The dispatcher never invents errors on the primary path: whatever the
/// primary backend returned is handed to the caller verbatim. Variants
/// below the backend ones are produced by the mirroring layer itself.
///
/// The type is `Clone` because a batch stores its failure tokens in
/// per-element result slots and the same error may also be handed to the
/// write-error sink.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MirrorError {
    /// Generic backend failure.
    #[error("backend error: {0}")]
    Backend(String),

    /// Failure establishing or using a backend connection.
    #[error("connection error: {0}")]
    Connection(String),

    /// The calling task was interrupted or cancelled mid-operation.
    /// Backends map their own cancellation signal into this variant so
    /// callers that do not expect interruption still see an actionable
    /// I/O-flavored error.
    #[error("operation interrupted: {0}")]
    Interrupted(String),

    /// The flow controller refused to admit the request.
    ///
    /// Only caller-visible in concurrent batch mode; everywhere else a
    /// denial is a policy outcome routed to the write-error sink (writes)
    /// or silently dropped (sampled reads).
    #[error("flow controller rejected the request: {0}")]
    FlowControlRejected(String),

    /// The table or scanner has been closed; no further operations are
    /// accepted.
    #[error("{0} is closed")]
    Closed(&'static str),

    /// The operation exists on the underlying store API but is not
    /// supported by the mirroring client.
    #[error("{0} is not supported by the mirroring client")]
    NotSupported(&'static str),

    /// Malformed request, e.g. mismatched result-slot length or a row
    /// mutation addressed to a different row.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// One or more failures accumulated while closing the table.
    #[error("close failed: {0}")]
    Close(String),
}

/// Collects errors raised while closing multiple resources and folds them
/// into a single surfaced failure.
#[derive(Debug, Default)]
pub(crate) struct AccumulatedErrors {
    errors: Vec<MirrorError>,
}

impl AccumulatedErrors {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, error: MirrorError) {
        self.errors.push(error);
    }

    pub(crate) fn record<T>(&mut self, result: Result<T, MirrorError>) {
        if let Err(e) = result {
            self.errors.push(e);
        }
    }

    /// Ok when nothing was captured, otherwise a single combined error.
    pub(crate) fn into_result(self) -> Result<(), MirrorError> {
        if self.errors.is_empty() {
            return Ok(());
        }
        let combined = self
            .errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        Err(MirrorError::Close(combined))
    }
}
