// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Result verification between primary and secondary.
//!
//! After a sampled read completes on both backends, a verification
//! continuation compares the two results and reports divergence through
//! a [`MismatchDetector`]. Mismatch reporting is a side effect only —
//! nothing here is ever surfaced to the caller.
//!
//! The `*_continuation` functions build the comparison callbacks handed
//! to the scheduling pipeline: each captures the operation and the
//! primary's (already returned) result, and consumes the secondary's
//! outcome once the deferred completes.

use std::sync::Arc;

use crate::error::MirrorError;
use crate::model::{Get, RowResult, Scan};

/// Receives verification outcomes, one callback per read kind.
///
/// The detector is handed both results (or the secondary's error) and
/// decides what counts as a mismatch and how to report it.
/// Implementations must be thread-safe; callbacks run on worker-pool
/// tasks.
pub trait MismatchDetector: Send + Sync {
    fn exists(&self, get: &Get, primary: bool, secondary: bool);
    fn exists_failure(&self, get: &Get, error: &MirrorError);

    fn exists_all(&self, gets: &[Get], primary: &[bool], secondary: &[bool]);
    fn exists_all_failure(&self, gets: &[Get], error: &MirrorError);

    fn get(&self, get: &Get, primary: &RowResult, secondary: &RowResult);
    fn get_failure(&self, get: &Get, error: &MirrorError);

    fn get_all(&self, gets: &[Get], primary: &[RowResult], secondary: &[RowResult]);
    fn get_all_failure(&self, gets: &[Get], error: &MirrorError);

    /// A read slot of a mirrored batch, identified by its position.
    fn batch_get(&self, index: usize, get: &Get, primary: &RowResult, secondary: &RowResult);
    fn batch_get_failure(&self, index: usize, get: &Get, error: &MirrorError);

    /// One row of a mirrored scan; `None` marks stream exhaustion, which
    /// both backends must reach at the same position.
    fn scanner_next(
        &self,
        scan: &Scan,
        index: u64,
        primary: Option<&RowResult>,
        secondary: Option<&RowResult>,
    );
    fn scanner_next_failure(&self, scan: &Scan, index: u64, error: &MirrorError);
}

fn key_preview(key: &[u8]) -> String {
    const MAX: usize = 32;
    let mut text = String::from_utf8_lossy(key).into_owned();
    if text.len() > MAX {
        let mut cut = MAX;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
        text.push('…');
    }
    text
}

/// Default detector: logs mismatches and secondary failures, and feeds
/// the verification counters.
pub struct LoggingMismatchDetector;

impl LoggingMismatchDetector {
    fn verified(&self, operation: &'static str, row: &[u8], matches: bool) {
        if matches {
            crate::metrics::record_read_verification(operation, "match");
            tracing::debug!(operation, row = %key_preview(row), "verification match");
        } else {
            crate::metrics::record_read_verification(operation, "mismatch");
            crate::metrics::record_mismatch(operation);
            tracing::warn!(
                operation,
                row = %key_preview(row),
                "primary and secondary results differ"
            );
        }
    }

    fn failed(&self, operation: &'static str, row: &[u8], error: &MirrorError) {
        crate::metrics::record_read_verification(operation, "error");
        tracing::warn!(
            operation,
            row = %key_preview(row),
            error = %error,
            "secondary read failed during verification"
        );
    }
}

impl MismatchDetector for LoggingMismatchDetector {
    fn exists(&self, get: &Get, primary: bool, secondary: bool) {
        self.verified("exists", &get.row, primary == secondary);
    }

    fn exists_failure(&self, get: &Get, error: &MirrorError) {
        self.failed("exists", &get.row, error);
    }

    fn exists_all(&self, gets: &[Get], primary: &[bool], secondary: &[bool]) {
        for (index, get) in gets.iter().enumerate() {
            let matches = primary.get(index) == secondary.get(index);
            self.verified("exists_all", &get.row, matches);
        }
    }

    fn exists_all_failure(&self, gets: &[Get], error: &MirrorError) {
        for get in gets {
            self.failed("exists_all", &get.row, error);
        }
    }

    fn get(&self, get: &Get, primary: &RowResult, secondary: &RowResult) {
        self.verified("get", &get.row, primary == secondary);
    }

    fn get_failure(&self, get: &Get, error: &MirrorError) {
        self.failed("get", &get.row, error);
    }

    fn get_all(&self, gets: &[Get], primary: &[RowResult], secondary: &[RowResult]) {
        for (index, get) in gets.iter().enumerate() {
            let matches = primary.get(index) == secondary.get(index);
            self.verified("get_all", &get.row, matches);
        }
    }

    fn get_all_failure(&self, gets: &[Get], error: &MirrorError) {
        for get in gets {
            self.failed("get_all", &get.row, error);
        }
    }

    fn batch_get(&self, _index: usize, get: &Get, primary: &RowResult, secondary: &RowResult) {
        self.verified("batch", &get.row, primary == secondary);
    }

    fn batch_get_failure(&self, _index: usize, get: &Get, error: &MirrorError) {
        self.failed("batch", &get.row, error);
    }

    fn scanner_next(
        &self,
        _scan: &Scan,
        index: u64,
        primary: Option<&RowResult>,
        secondary: Option<&RowResult>,
    ) {
        let row = primary
            .and_then(RowResult::row)
            .or_else(|| secondary.and_then(RowResult::row))
            .unwrap_or_default();
        let matches = primary == secondary;
        if !matches {
            tracing::warn!(index, "scan row diverged");
        }
        self.verified("scanner_next", row, matches);
    }

    fn scanner_next_failure(&self, _scan: &Scan, index: u64, error: &MirrorError) {
        tracing::warn!(index, error = %error, "secondary scan failed during verification");
        crate::metrics::record_read_verification("scanner_next", "error");
    }
}

// Continuation builders: one per read kind, consumed by the scheduling
// pipeline after the secondary deferred completes.

pub(crate) fn exists_continuation(
    detector: Arc<dyn MismatchDetector>,
    get: Get,
    primary: bool,
) -> impl FnOnce(Result<bool, MirrorError>) + Send + 'static {
    move |secondary| match secondary {
        Ok(secondary) => detector.exists(&get, primary, secondary),
        Err(error) => detector.exists_failure(&get, &error),
    }
}

pub(crate) fn exists_all_continuation(
    detector: Arc<dyn MismatchDetector>,
    gets: Vec<Get>,
    primary: Vec<bool>,
) -> impl FnOnce(Result<Vec<bool>, MirrorError>) + Send + 'static {
    move |secondary| match secondary {
        Ok(secondary) => detector.exists_all(&gets, &primary, &secondary),
        Err(error) => detector.exists_all_failure(&gets, &error),
    }
}

pub(crate) fn get_continuation(
    detector: Arc<dyn MismatchDetector>,
    get: Get,
    primary: RowResult,
) -> impl FnOnce(Result<RowResult, MirrorError>) + Send + 'static {
    move |secondary| match secondary {
        Ok(secondary) => detector.get(&get, &primary, &secondary),
        Err(error) => detector.get_failure(&get, &error),
    }
}

pub(crate) fn get_all_continuation(
    detector: Arc<dyn MismatchDetector>,
    gets: Vec<Get>,
    primary: Vec<RowResult>,
) -> impl FnOnce(Result<Vec<RowResult>, MirrorError>) + Send + 'static {
    move |secondary| match secondary {
        Ok(secondary) => detector.get_all(&gets, &primary, &secondary),
        Err(error) => detector.get_all_failure(&gets, &error),
    }
}
