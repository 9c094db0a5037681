// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Write dispatch.
//!
//! Plain writes are uniformly implemented as one-element batches, which
//! funnels them through the same splitting/scheduling machinery as user
//! batches. Append and Increment differ: they must return a result, so
//! they run on the primary directly and the result is converted into a
//! semantically-equivalent Put before the secondary replay. Conditional
//! mutations replay on the secondary only when the primary reports that
//! the predicate matched and the mutations were applied.

use crate::error::MirrorError;
use crate::model::{
    put_from_result, Append, BatchSlot, CheckAndMutate, CompareOp, Delete, Increment, Mutation,
    Operation, Put, RowMutations, RowResult, WriteOperationInfo,
};

use super::splits::FailedSuccessfulSplit;
use super::MirroringTable;

impl MirroringTable {
    #[tracing::instrument(skip(self, put), fields(table = %self.name))]
    pub async fn put(&self, put: Put) -> Result<(), MirrorError> {
        self.batch_single_write(Operation::Put(put)).await
    }

    #[tracing::instrument(skip(self, puts), fields(table = %self.name, count = puts.len()))]
    pub async fn put_all(&self, puts: Vec<Put>) -> Result<(), MirrorError> {
        let operations: Vec<Operation> = puts.into_iter().map(Operation::Put).collect();
        let mut results: Vec<BatchSlot> = vec![None; operations.len()];
        self.batch(&operations, &mut results).await
    }

    #[tracing::instrument(skip(self, delete), fields(table = %self.name))]
    pub async fn delete(&self, delete: Delete) -> Result<(), MirrorError> {
        self.batch_single_write(Operation::Delete(delete)).await
    }

    /// Deletes a list of rows. Successfully deleted entries are removed
    /// from `deletes`; entries that failed on the primary remain, so the
    /// caller can retry exactly what was not applied.
    #[tracing::instrument(skip(self, deletes), fields(table = %self.name, count = deletes.len()))]
    pub async fn delete_all(&self, deletes: &mut Vec<Delete>) -> Result<(), MirrorError> {
        let operations: Vec<Operation> =
            deletes.iter().cloned().map(Operation::Delete).collect();
        let mut results: Vec<BatchSlot> = vec![None; operations.len()];
        let outcome = self.batch(&operations, &mut results).await;

        let split = FailedSuccessfulSplit::create(&operations, &results, true);
        deletes.clear();
        deletes.extend(split.failed_operations.into_iter().filter_map(|op| match op {
            Operation::Delete(delete) => Some(delete),
            _ => None,
        }));
        outcome
    }

    #[tracing::instrument(skip(self, mutations), fields(table = %self.name))]
    pub async fn mutate_row(&self, mutations: RowMutations) -> Result<(), MirrorError> {
        self.batch_single_write(Operation::MutateRow(mutations)).await
    }

    /// Appends on the primary, then replays the primary's resulting
    /// cells as a Put on the secondary.
    #[tracing::instrument(skip(self, append), fields(table = %self.name))]
    pub async fn append(&self, append: Append) -> Result<RowResult, MirrorError> {
        self.ensure_open()?;
        let result = self
            .primary_call("append", self.primary_backend().append(&append))
            .await?;

        let put = put_from_result(&result);
        let backend = self.secondary().backend();
        let secondary_put = put.clone();
        self.schedule_write(
            WriteOperationInfo::rewritten(Operation::Append(append), &put),
            "append",
            move || async move { backend.put(&secondary_put).await },
        );
        Ok(result)
    }

    /// Increments on the primary, then replays the primary's resulting
    /// cells as a Put on the secondary.
    #[tracing::instrument(skip(self, increment), fields(table = %self.name))]
    pub async fn increment(&self, increment: Increment) -> Result<RowResult, MirrorError> {
        self.ensure_open()?;
        let result = self
            .primary_call("increment", self.primary_backend().increment(&increment))
            .await?;

        let put = put_from_result(&result);
        let backend = self.secondary().backend();
        let secondary_put = put.clone();
        self.schedule_write(
            WriteOperationInfo::rewritten(Operation::Increment(increment), &put),
            "increment",
            move || async move { backend.put(&secondary_put).await },
        );
        Ok(result)
    }

    /// Single-column increment returning the new counter value.
    pub async fn increment_column_value(
        &self,
        row: Vec<u8>,
        family: Vec<u8>,
        qualifier: Vec<u8>,
        amount: i64,
    ) -> Result<i64, MirrorError> {
        let increment =
            Increment::row(row).column(family.clone(), qualifier.clone(), amount);
        let result = self.increment(increment).await?;
        result.counter_value(&family, &qualifier).ok_or_else(|| {
            MirrorError::Backend("increment result is missing the counter cell".into())
        })
    }

    /// Equality-conditional put.
    pub async fn check_and_put(
        &self,
        row: Vec<u8>,
        family: Vec<u8>,
        qualifier: Vec<u8>,
        value: Option<Vec<u8>>,
        put: Put,
    ) -> Result<bool, MirrorError> {
        self.check_and_put_compare(row, family, qualifier, CompareOp::Equal, value, put)
            .await
    }

    pub async fn check_and_put_compare(
        &self,
        row: Vec<u8>,
        family: Vec<u8>,
        qualifier: Vec<u8>,
        compare: CompareOp,
        value: Option<Vec<u8>>,
        put: Put,
    ) -> Result<bool, MirrorError> {
        let mut mutations = RowMutations::new(row.clone());
        mutations.push(Mutation::Put(put))?;
        self.check_and_mutate(CheckAndMutate { row, family, qualifier, compare, value, mutations })
            .await
    }

    /// Equality-conditional delete.
    pub async fn check_and_delete(
        &self,
        row: Vec<u8>,
        family: Vec<u8>,
        qualifier: Vec<u8>,
        value: Option<Vec<u8>>,
        delete: Delete,
    ) -> Result<bool, MirrorError> {
        self.check_and_delete_compare(row, family, qualifier, CompareOp::Equal, value, delete)
            .await
    }

    pub async fn check_and_delete_compare(
        &self,
        row: Vec<u8>,
        family: Vec<u8>,
        qualifier: Vec<u8>,
        compare: CompareOp,
        value: Option<Vec<u8>>,
        delete: Delete,
    ) -> Result<bool, MirrorError> {
        let mut mutations = RowMutations::new(row.clone());
        mutations.push(Mutation::Delete(delete))?;
        self.check_and_mutate(CheckAndMutate { row, family, qualifier, compare, value, mutations })
            .await
    }

    /// Conditional mutation. The secondary is scheduled only when the
    /// primary reports the predicate matched and the mutations were
    /// applied; the secondary replays the mutations unconditionally.
    #[tracing::instrument(skip(self, check), fields(table = %self.name, applied))]
    pub async fn check_and_mutate(&self, check: CheckAndMutate) -> Result<bool, MirrorError> {
        self.ensure_open()?;
        let applied = self
            .primary_call("check_and_mutate", self.primary_backend().check_and_mutate(&check))
            .await?;
        tracing::Span::current().record("applied", applied);

        if applied {
            let backend = self.secondary().backend();
            let secondary_mutations = check.mutations.clone();
            self.schedule_write(
                WriteOperationInfo::check_and_mutate(check.mutations),
                "check_and_mutate",
                move || async move { backend.mutate_row(&secondary_mutations).await },
            );
        }
        Ok(applied)
    }

    /// Routes a single write through the batch machinery and unwraps the
    /// one slot, so the caller sees the element's own error rather than
    /// the batch wrapper.
    pub(super) async fn batch_single_write(
        &self,
        operation: Operation,
    ) -> Result<(), MirrorError> {
        let mut results: Vec<BatchSlot> = vec![None];
        let outcome = self.batch(std::slice::from_ref(&operation), &mut results).await;
        if outcome.is_ok() {
            return Ok(());
        }
        match results.into_iter().next().flatten() {
            Some(Err(error)) => Err(error),
            _ => outcome,
        }
    }
}
