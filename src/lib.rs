//! # Mirror Engine
//!
//! A dual-write mirroring client for wide-column key-value stores.
//!
//! ## Architecture
//!
//! Every operation goes to two independent backends. The primary is
//! authoritative: the caller always receives its result, byte for byte,
//! including its exact error. The secondary is advisory: it is driven
//! asynchronously, bounded by an admission controller, and its results
//! are verified against the primary's to surface divergence.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      MirroringTable                         │
//! │  • point reads, scans, batches, conditional mutations      │
//! │  • primary called synchronously on the caller's task       │
//! └─────────────────────────────────────────────────────────────┘
//!                 │ primary success
//!                 ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      FlowController                         │
//! │  • bounds outstanding secondary work (ops and bytes)       │
//! │  • denial routes writes to the error sink, drops reads     │
//! └─────────────────────────────────────────────────────────────┘
//!                 │ admitted
//!                 ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Secondary (worker pool)                     │
//! │  • Append/Increment replayed as rewritten Puts             │
//! │  • verification compares results pairwise                  │
//! │  • mismatches → MismatchDetector, lost writes → sink       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Used during migrations between two stores, or to continuously
//! validate replica consistency.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use mirror_engine::{MirroringOptions, MirroringTable};
//! use mirror_engine::model::{Get, Put};
//! use mirror_engine::storage::InMemoryBackend;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), mirror_engine::MirrorError> {
//!     let table = MirroringTable::new(
//!         "accounts",
//!         Arc::new(InMemoryBackend::new()),   // primary (authoritative)
//!         Arc::new(InMemoryBackend::new()),   // secondary (verified mirror)
//!         &MirroringOptions::default(),
//!     );
//!
//!     let put = Put::row(b"user:42".to_vec())
//!         .cell(b"cf".to_vec(), b"name".to_vec(), b"jane".to_vec());
//!     table.put(put).await?;
//!
//!     let result = table.get(&Get::row(b"user:42".to_vec())).await?;
//!     assert_eq!(result.value(b"cf", b"name"), Some(b"jane".as_ref()));
//!
//!     // Waits for every scheduled secondary submission to finish.
//!     table.close().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Guarantees
//!
//! - The caller sees exactly what the bare primary would have returned.
//! - The secondary is invoked only after the primary succeeded (except
//!   in opt-in concurrent batch mode, where both run under one admission
//!   but the primary's result still governs the return).
//! - Non-idempotent operations (`Append`, `Increment`) reach the
//!   secondary as `Put`s carrying the primary's computed cells.
//! - Secondary failures are never surfaced to the caller; lost writes go
//!   to the [`WriteErrorSink`], read divergence to the
//!   [`MismatchDetector`].
//! - `close` waits for all in-flight secondary work to drain.
//!
//! ## Modules
//!
//! - [`table`]: the [`MirroringTable`] dispatcher
//! - [`scanner`]: verified streaming scans
//! - [`storage`]: backend traits and the in-memory reference backend
//! - [`flow`]: admission control for secondary work
//! - [`verify`]: mismatch detection
//! - [`write_errors`]: the sink for lost secondary writes
//! - [`sampler`]: read sampling
//! - [`refcount`]: outstanding-work tracking for graceful close
//! - [`config`]: configuration keys, validation, prefix splitting
//! - [`model`]: operations, results, resource estimates

pub mod config;
pub mod error;
pub mod flow;
pub mod metrics;
pub mod model;
pub mod refcount;
pub mod sampler;
pub mod scanner;
pub mod storage;
pub mod table;
pub mod verify;
pub mod write_errors;

mod scheduling;
mod secondary;

pub use config::{MirroringConfig, MirroringOptions};
pub use error::MirrorError;
pub use flow::{
    FlowController, OutstandingRequestsFlowController, RejectingFlowController, Reservation,
    UnboundedFlowController,
};
pub use model::{
    Append, BatchSlot, Cell, CheckAndMutate, Column, CompareOp, Delete, Get, Increment, Mutation,
    OpResult, Operation, OperationKind, Put, RequestResources, RowMutations, RowResult, Scan,
    WriteOperationInfo,
};
pub use refcount::{ReferenceCounter, ReferenceGuard};
pub use sampler::{PercentageReadSampler, ReadSampler};
pub use scanner::MirroringScanner;
pub use storage::{Backend, InMemoryBackend, RowStream};
pub use table::MirroringTable;
pub use verify::{LoggingMismatchDetector, MismatchDetector};
pub use write_errors::{LoggingWriteErrorSink, WriteErrorSink};
