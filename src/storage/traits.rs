use async_trait::async_trait;

use crate::error::MirrorError;
use crate::model::{
    Append, BatchSlot, CheckAndMutate, Delete, Get, Increment, OpResult, Operation, Put,
    RowMutations, RowResult, Scan,
};

/// A streaming scan over one backend.
#[async_trait]
pub trait RowStream: Send {
    /// Next row in range order, or `None` once the scan is exhausted.
    async fn next_row(&mut self) -> Result<Option<RowResult>, MirrorError>;

    /// Releases backend-side scan state. Default is a no-op for backends
    /// without server-side cursors.
    async fn close(&mut self) -> Result<(), MirrorError> {
        Ok(())
    }
}

/// A handle to one wide-column store.
///
/// Both the primary and the secondary side of the mirror implement this
/// trait. Implementations must be thread-safe: the primary handle is
/// called from caller tasks, the secondary from the worker pool.
///
/// The multi-element and batch methods have default implementations that
/// fall back to sequential single-operation calls, so a minimal backend
/// only provides the point operations and `scan`.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Reads a row; absent rows come back as an empty [`RowResult`].
    async fn get(&self, get: &Get) -> Result<RowResult, MirrorError>;

    async fn exists(&self, get: &Get) -> Result<bool, MirrorError> {
        Ok(!self.get(get).await?.is_empty())
    }

    async fn get_all(&self, gets: &[Get]) -> Result<Vec<RowResult>, MirrorError> {
        let mut results = Vec::with_capacity(gets.len());
        for get in gets {
            results.push(self.get(get).await?);
        }
        Ok(results)
    }

    async fn exists_all(&self, gets: &[Get]) -> Result<Vec<bool>, MirrorError> {
        let mut results = Vec::with_capacity(gets.len());
        for get in gets {
            results.push(self.exists(get).await?);
        }
        Ok(results)
    }

    async fn put(&self, put: &Put) -> Result<(), MirrorError>;

    async fn delete(&self, delete: &Delete) -> Result<(), MirrorError>;

    /// Appends values and returns the resulting cells.
    async fn append(&self, append: &Append) -> Result<RowResult, MirrorError>;

    /// Adds counter amounts and returns the resulting cells.
    async fn increment(&self, increment: &Increment) -> Result<RowResult, MirrorError>;

    /// Applies a Put/Delete bundle to one row atomically.
    async fn mutate_row(&self, mutations: &RowMutations) -> Result<(), MirrorError>;

    /// Evaluates the predicate and, when it holds, applies the mutations
    /// atomically. Returns whether the mutations were applied.
    async fn check_and_mutate(&self, check: &CheckAndMutate) -> Result<bool, MirrorError>;

    /// Executes a heterogeneous batch, filling `results` slot by slot.
    ///
    /// Slots are filled even when the call as a whole returns an error;
    /// an unfilled or error-token slot marks that element as failed. The
    /// default implementation dispatches element-wise and reports an
    /// overall error when any element failed.
    async fn batch(
        &self,
        operations: &[Operation],
        results: &mut [BatchSlot],
    ) -> Result<(), MirrorError> {
        debug_assert_eq!(operations.len(), results.len());
        let mut failed = 0usize;
        for (operation, slot) in operations.iter().zip(results.iter_mut()) {
            let result = match operation {
                Operation::Get(get) => self.get(get).await.map(OpResult::Row),
                Operation::Put(put) => self.put(put).await.map(|()| OpResult::Done),
                Operation::Delete(delete) => self.delete(delete).await.map(|()| OpResult::Done),
                Operation::Append(append) => self.append(append).await.map(OpResult::Row),
                Operation::Increment(increment) => {
                    self.increment(increment).await.map(OpResult::Row)
                }
                Operation::MutateRow(mutations) => {
                    self.mutate_row(mutations).await.map(|()| OpResult::Done)
                }
            };
            if result.is_err() {
                failed += 1;
            }
            *slot = Some(result);
        }
        if failed > 0 {
            return Err(MirrorError::Backend(format!(
                "{failed} of {} batch operations failed",
                operations.len()
            )));
        }
        Ok(())
    }

    /// Opens a streaming scan.
    async fn scan(&self, scan: &Scan) -> Result<Box<dyn RowStream>, MirrorError>;

    /// Releases the handle. Default is a no-op.
    async fn close(&self) -> Result<(), MirrorError> {
        Ok(())
    }
}
