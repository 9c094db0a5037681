// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The secondary scheduling pipeline.
//!
//! Every deferred secondary submission goes through the same four steps,
//! in this order:
//!
//! 1. reserve resources from the flow controller (this is where
//!    backpressure and denial happen — *before* any secondary work);
//! 2. invoke the operation supplier, which performs the secondary call;
//! 3. hand the outcome to the verification continuation;
//! 4. release the reservation and the reference-counter guards.
//!
//! The supplier-of-deferred shape exists to keep admission strictly ahead
//! of execution. Reference guards are taken by the *caller* before the
//! task is spawned, so a concurrent close always observes scheduled work.

use std::future::Future;
use std::sync::Arc;

use crate::error::MirrorError;
use crate::flow::FlowController;
use crate::model::RequestResources;
use crate::refcount::ReferenceGuard;

/// Schedules one secondary operation plus its verification.
///
/// `on_denied` runs instead of the operation when the flow controller
/// refuses admission; the write paths route it to the error sink, the
/// read paths drop the verification.
pub(crate) fn schedule_with_flow_control<T, Fut, Op, Verify, Denied>(
    operation_name: &'static str,
    flow: Arc<dyn FlowController>,
    resources: RequestResources,
    guards: (ReferenceGuard, ReferenceGuard),
    operation: Op,
    verification: Verify,
    on_denied: Denied,
) -> tokio::task::JoinHandle<()>
where
    T: Send + 'static,
    Fut: Future<Output = Result<T, MirrorError>> + Send + 'static,
    Op: FnOnce() -> Fut + Send + 'static,
    Verify: FnOnce(Result<T, MirrorError>) + Send + 'static,
    Denied: FnOnce(MirrorError) + Send + 'static,
{
    crate::metrics::record_secondary_scheduled(operation_name);
    tokio::spawn(async move {
        let _guards = guards;
        match flow.acquire(&resources).await {
            Err(error) => {
                tracing::debug!(
                    operation = operation_name,
                    error = %error,
                    "flow controller denied secondary submission"
                );
                on_denied(error);
            }
            Ok(reservation) => {
                let result = operation().await;
                crate::metrics::record_operation(
                    "secondary",
                    operation_name,
                    if result.is_ok() { "success" } else { "error" },
                );
                verification(result);
                drop(reservation);
            }
        }
    })
}
