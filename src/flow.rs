// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Admission control for secondary work.
//!
//! Every secondary submission first reserves resources from a
//! [`FlowController`] using the [`RequestResources`] estimate of the work
//! it is about to do. The controller may make the requester wait (that is
//! the backpressure) or deny the reservation outright. Denial is a policy
//! outcome, not a failure of the mirror: denied writes are routed to the
//! write-error sink, denied read verifications are dropped.
//!
//! Reservations are RAII: dropping a [`Reservation`] returns its capacity
//! to the controller.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use crate::error::MirrorError;
use crate::model::RequestResources;

/// Grants or denies resource reservations for secondary submissions.
#[async_trait]
pub trait FlowController: Send + Sync {
    /// Waits for capacity and returns a reservation, or denies the
    /// request with [`MirrorError::FlowControlRejected`].
    async fn acquire(&self, resources: &RequestResources) -> Result<Reservation, MirrorError>;
}

/// An admitted reservation. Capacity is returned on drop.
pub struct Reservation {
    _held: Box<dyn Any + Send>,
}

impl std::fmt::Debug for Reservation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reservation").finish()
    }
}

impl Reservation {
    /// Wraps whatever the controller needs released when the guarded
    /// work completes (permits, tokens, nothing).
    #[must_use]
    pub fn holding<T: Send + 'static>(held: T) -> Self {
        Self { _held: Box::new(held) }
    }

    /// A reservation that holds nothing; for unbounded controllers.
    #[must_use]
    pub fn unbounded() -> Self {
        Self::holding(())
    }
}

/// Default controller: bounds outstanding secondary work by operation
/// count and by payload bytes.
///
/// Requests wait until capacity frees up. A request larger than the
/// configured capacity can never be admitted and is denied immediately.
pub struct OutstandingRequestsFlowController {
    entries: Arc<Semaphore>,
    bytes: Arc<Semaphore>,
    max_entries: usize,
    max_bytes: usize,
}

impl OutstandingRequestsFlowController {
    #[must_use]
    pub fn new(max_outstanding_requests: usize, max_used_bytes: usize) -> Self {
        // Semaphore permits are u32 internally; clamp so acquire_many
        // never overflows.
        let max_entries = max_outstanding_requests.min(u32::MAX as usize / 2);
        let max_bytes = max_used_bytes.min(u32::MAX as usize / 2);
        Self {
            entries: Arc::new(Semaphore::new(max_entries)),
            bytes: Arc::new(Semaphore::new(max_bytes)),
            max_entries,
            max_bytes,
        }
    }

    /// Capacity currently available, as (entries, bytes). Mostly useful
    /// in tests and gauges.
    #[must_use]
    pub fn available(&self) -> (usize, usize) {
        (self.entries.available_permits(), self.bytes.available_permits())
    }
}

#[async_trait]
impl FlowController for OutstandingRequestsFlowController {
    async fn acquire(&self, resources: &RequestResources) -> Result<Reservation, MirrorError> {
        if resources.entries > self.max_entries || resources.bytes > self.max_bytes {
            return Err(MirrorError::FlowControlRejected(format!(
                "request ({} entries, {} bytes) exceeds controller capacity \
                 ({} entries, {} bytes)",
                resources.entries, resources.bytes, self.max_entries, self.max_bytes
            )));
        }

        let entry_permits = self
            .entries
            .clone()
            .acquire_many_owned(resources.entries as u32)
            .await
            .map_err(|_| MirrorError::FlowControlRejected("flow controller shut down".into()))?;
        let byte_permits = self
            .bytes
            .clone()
            .acquire_many_owned(resources.bytes as u32)
            .await
            .map_err(|_| MirrorError::FlowControlRejected("flow controller shut down".into()))?;

        Ok(Reservation::holding((entry_permits, byte_permits)))
    }
}

/// Controller that admits everything immediately. Used when mirroring
/// should never be throttled, and in tests.
pub struct UnboundedFlowController;

#[async_trait]
impl FlowController for UnboundedFlowController {
    async fn acquire(&self, _resources: &RequestResources) -> Result<Reservation, MirrorError> {
        Ok(Reservation::unbounded())
    }
}

/// Controller that denies everything. Useful for draining setups and for
/// exercising the error-sink paths in tests.
pub struct RejectingFlowController;

#[async_trait]
impl FlowController for RejectingFlowController {
    async fn acquire(&self, _resources: &RequestResources) -> Result<Reservation, MirrorError> {
        Err(MirrorError::FlowControlRejected("flow controller rejects all requests".into()))
    }
}
