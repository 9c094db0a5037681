use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::ops::Bound;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::traits::{Backend, RowStream};
use crate::error::MirrorError;
use crate::model::{
    Append, Cell, CheckAndMutate, Column, Delete, Get, Increment, Mutation, Put, RowMutations,
    RowResult, Scan,
};

#[derive(Debug, Clone)]
struct StoredCell {
    timestamp: u64,
    value: Vec<u8>,
}

type Row = BTreeMap<Column, StoredCell>;

/// In-memory wide-column backend.
///
/// Rows live in an ordered map so scans iterate in row-key order. Used as
/// the reference backend in tests and as a drop-in target for local
/// development.
pub struct InMemoryBackend {
    rows: RwLock<BTreeMap<Vec<u8>, Row>>,
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

impl InMemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self { rows: RwLock::new(BTreeMap::new()) }
    }

    /// Number of stored rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }

    /// Drop all rows.
    pub fn clear(&self) {
        self.rows.write().clear();
    }

    fn row_to_result(row_key: &[u8], row: &Row, columns: &[Column]) -> RowResult {
        let cells = row
            .iter()
            .filter(|(column, _)| columns.is_empty() || columns.contains(column))
            .map(|(column, stored)| Cell {
                row: row_key.to_vec(),
                family: column.family.clone(),
                qualifier: column.qualifier.clone(),
                timestamp: stored.timestamp,
                value: stored.value.clone(),
            })
            .collect();
        RowResult::new(cells)
    }

    fn apply_put(rows: &mut BTreeMap<Vec<u8>, Row>, put: &Put) {
        let row = rows.entry(put.row.clone()).or_default();
        for cell in &put.cells {
            let column = Column::new(cell.family.clone(), cell.qualifier.clone());
            row.insert(
                column,
                StoredCell {
                    timestamp: cell.timestamp.unwrap_or_else(now_millis),
                    value: cell.value.clone(),
                },
            );
        }
    }

    fn apply_delete(rows: &mut BTreeMap<Vec<u8>, Row>, delete: &Delete) {
        if delete.columns.is_empty() {
            rows.remove(&delete.row);
            return;
        }
        if let Some(row) = rows.get_mut(&delete.row) {
            for column in &delete.columns {
                row.remove(column);
            }
            if row.is_empty() {
                rows.remove(&delete.row);
            }
        }
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backend for InMemoryBackend {
    async fn get(&self, get: &Get) -> Result<RowResult, MirrorError> {
        let rows = self.rows.read();
        Ok(rows
            .get(&get.row)
            .map(|row| Self::row_to_result(&get.row, row, &get.columns))
            .unwrap_or_default())
    }

    async fn exists(&self, get: &Get) -> Result<bool, MirrorError> {
        let rows = self.rows.read();
        Ok(match rows.get(&get.row) {
            Some(row) if get.columns.is_empty() => !row.is_empty(),
            Some(row) => get.columns.iter().any(|c| row.contains_key(c)),
            None => false,
        })
    }

    async fn put(&self, put: &Put) -> Result<(), MirrorError> {
        Self::apply_put(&mut self.rows.write(), put);
        Ok(())
    }

    async fn delete(&self, delete: &Delete) -> Result<(), MirrorError> {
        Self::apply_delete(&mut self.rows.write(), delete);
        Ok(())
    }

    async fn append(&self, append: &Append) -> Result<RowResult, MirrorError> {
        let mut rows = self.rows.write();
        let row = rows.entry(append.row.clone()).or_default();
        let timestamp = now_millis();
        let mut cells = Vec::with_capacity(append.columns.len());
        for (column, value) in &append.columns {
            let stored = row.entry(column.clone()).or_insert_with(|| StoredCell {
                timestamp,
                value: Vec::new(),
            });
            stored.value.extend_from_slice(value);
            stored.timestamp = timestamp;
            cells.push(Cell {
                row: append.row.clone(),
                family: column.family.clone(),
                qualifier: column.qualifier.clone(),
                timestamp,
                value: stored.value.clone(),
            });
        }
        Ok(RowResult::new(cells))
    }

    async fn increment(&self, increment: &Increment) -> Result<RowResult, MirrorError> {
        let mut rows = self.rows.write();
        let row = rows.entry(increment.row.clone()).or_default();
        let timestamp = now_millis();
        let mut cells = Vec::with_capacity(increment.columns.len());
        for (column, amount) in &increment.columns {
            let current = match row.get(column) {
                Some(stored) => {
                    let bytes: [u8; 8] = stored.value.as_slice().try_into().map_err(|_| {
                        MirrorError::Backend(format!(
                            "cell is not a 64-bit counter ({} bytes)",
                            stored.value.len()
                        ))
                    })?;
                    i64::from_be_bytes(bytes)
                }
                None => 0,
            };
            let next = current.wrapping_add(*amount);
            row.insert(
                column.clone(),
                StoredCell { timestamp, value: next.to_be_bytes().to_vec() },
            );
            cells.push(Cell {
                row: increment.row.clone(),
                family: column.family.clone(),
                qualifier: column.qualifier.clone(),
                timestamp,
                value: next.to_be_bytes().to_vec(),
            });
        }
        Ok(RowResult::new(cells))
    }

    async fn mutate_row(&self, mutations: &RowMutations) -> Result<(), MirrorError> {
        let mut rows = self.rows.write();
        for mutation in &mutations.mutations {
            match mutation {
                Mutation::Put(put) => Self::apply_put(&mut rows, put),
                Mutation::Delete(delete) => Self::apply_delete(&mut rows, delete),
            }
        }
        Ok(())
    }

    async fn check_and_mutate(&self, check: &CheckAndMutate) -> Result<bool, MirrorError> {
        let mut rows = self.rows.write();
        let column = Column::new(check.family.clone(), check.qualifier.clone());
        let stored = rows
            .get(&check.row)
            .and_then(|row| row.get(&column))
            .map(|cell| cell.value.clone());
        let matched = check
            .compare
            .evaluate(stored.as_deref(), check.value.as_deref());
        if matched {
            for mutation in &check.mutations.mutations {
                match mutation {
                    Mutation::Put(put) => Self::apply_put(&mut rows, put),
                    Mutation::Delete(delete) => Self::apply_delete(&mut rows, delete),
                }
            }
        }
        Ok(matched)
    }

    async fn scan(&self, scan: &Scan) -> Result<Box<dyn RowStream>, MirrorError> {
        let rows = self.rows.read();
        let start = match &scan.start_row {
            Some(row) => Bound::Included(row.clone()),
            None => Bound::Unbounded,
        };
        let stop = match &scan.stop_row {
            Some(row) => Bound::Excluded(row.clone()),
            None => Bound::Unbounded,
        };
        let mut results: VecDeque<RowResult> = rows
            .range((start, stop))
            .map(|(key, row)| Self::row_to_result(key, row, &scan.columns))
            .filter(|result| !result.is_empty())
            .collect();
        if let Some(limit) = scan.limit {
            results.truncate(limit);
        }
        Ok(Box::new(MemoryRowStream { results }))
    }
}

struct MemoryRowStream {
    results: VecDeque<RowResult>,
}

#[async_trait]
impl RowStream for MemoryRowStream {
    async fn next_row(&mut self) -> Result<Option<RowResult>, MirrorError> {
        Ok(self.results.pop_front())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BatchSlot, CompareOp, OpResult, Operation};

    fn put(row: &[u8], qualifier: &[u8], value: &[u8]) -> Put {
        Put::row(row.to_vec()).cell(b"cf".to_vec(), qualifier.to_vec(), value.to_vec())
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let store = InMemoryBackend::new();
        store.put(&put(b"r1", b"c", b"v")).await.unwrap();

        let result = store.get(&Get::row(b"r1".to_vec())).await.unwrap();
        assert_eq!(result.value(b"cf", b"c"), Some(b"v".as_slice()));
    }

    #[tokio::test]
    async fn test_get_missing_row_is_empty() {
        let store = InMemoryBackend::new();
        let result = store.get(&Get::row(b"missing".to_vec())).await.unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn test_get_with_column_projection() {
        let store = InMemoryBackend::new();
        store.put(&put(b"r1", b"c1", b"v1")).await.unwrap();
        store.put(&put(b"r1", b"c2", b"v2")).await.unwrap();

        let get = Get::row(b"r1".to_vec()).column(b"cf".to_vec(), b"c2".to_vec());
        let result = store.get(&get).await.unwrap();
        assert_eq!(result.cells().len(), 1);
        assert_eq!(result.value(b"cf", b"c2"), Some(b"v2".as_slice()));
    }

    #[tokio::test]
    async fn test_exists() {
        let store = InMemoryBackend::new();
        store.put(&put(b"r1", b"c", b"v")).await.unwrap();

        assert!(store.exists(&Get::row(b"r1".to_vec())).await.unwrap());
        assert!(!store.exists(&Get::row(b"r2".to_vec())).await.unwrap());

        let wrong_col = Get::row(b"r1".to_vec()).column(b"cf".to_vec(), b"other".to_vec());
        assert!(!store.exists(&wrong_col).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_whole_row() {
        let store = InMemoryBackend::new();
        store.put(&put(b"r1", b"c", b"v")).await.unwrap();
        store.delete(&Delete::row(b"r1".to_vec())).await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_delete_single_column_keeps_row() {
        let store = InMemoryBackend::new();
        store.put(&put(b"r1", b"c1", b"v1")).await.unwrap();
        store.put(&put(b"r1", b"c2", b"v2")).await.unwrap();

        let delete = Delete::row(b"r1".to_vec()).column(b"cf".to_vec(), b"c1".to_vec());
        store.delete(&delete).await.unwrap();

        let result = store.get(&Get::row(b"r1".to_vec())).await.unwrap();
        assert_eq!(result.cells().len(), 1);
        assert_eq!(result.value(b"cf", b"c2"), Some(b"v2".as_slice()));
    }

    #[tokio::test]
    async fn test_append_concatenates() {
        let store = InMemoryBackend::new();
        let append = Append::row(b"r1".to_vec()).column(b"cf".to_vec(), b"c".to_vec(), b"ab".to_vec());
        store.append(&append).await.unwrap();
        let result = store.append(&append).await.unwrap();

        assert_eq!(result.value(b"cf", b"c"), Some(b"abab".as_slice()));
    }

    #[tokio::test]
    async fn test_increment_from_absent_cell() {
        let store = InMemoryBackend::new();
        let increment = Increment::row(b"r1".to_vec()).column(b"cf".to_vec(), b"c".to_vec(), 5);

        let result = store.increment(&increment).await.unwrap();
        assert_eq!(result.counter_value(b"cf", b"c"), Some(5));

        let result = store.increment(&increment).await.unwrap();
        assert_eq!(result.counter_value(b"cf", b"c"), Some(10));
    }

    #[tokio::test]
    async fn test_increment_non_counter_cell_fails() {
        let store = InMemoryBackend::new();
        store.put(&put(b"r1", b"c", b"text")).await.unwrap();

        let increment = Increment::row(b"r1".to_vec()).column(b"cf".to_vec(), b"c".to_vec(), 1);
        let err = store.increment(&increment).await.unwrap_err();
        assert!(matches!(err, MirrorError::Backend(_)));
    }

    #[tokio::test]
    async fn test_mutate_row_applies_all() {
        let store = InMemoryBackend::new();
        store.put(&put(b"r1", b"old", b"v")).await.unwrap();

        let mut mutations = RowMutations::new(b"r1".to_vec());
        mutations.push(Mutation::Put(put(b"r1", b"new", b"v2"))).unwrap();
        mutations
            .push(Mutation::Delete(
                Delete::row(b"r1".to_vec()).column(b"cf".to_vec(), b"old".to_vec()),
            ))
            .unwrap();
        store.mutate_row(&mutations).await.unwrap();

        let result = store.get(&Get::row(b"r1".to_vec())).await.unwrap();
        assert!(result.value(b"cf", b"old").is_none());
        assert_eq!(result.value(b"cf", b"new"), Some(b"v2".as_slice()));
    }

    #[tokio::test]
    async fn test_check_and_mutate_predicate_gates_mutations() {
        let store = InMemoryBackend::new();
        store.put(&put(b"r1", b"c", b"expected")).await.unwrap();

        let mut mutations = RowMutations::new(b"r1".to_vec());
        mutations.push(Mutation::Put(put(b"r1", b"c2", b"applied"))).unwrap();

        let mismatch = CheckAndMutate {
            row: b"r1".to_vec(),
            family: b"cf".to_vec(),
            qualifier: b"c".to_vec(),
            compare: CompareOp::Equal,
            value: Some(b"other".to_vec()),
            mutations: mutations.clone(),
        };
        assert!(!store.check_and_mutate(&mismatch).await.unwrap());
        let result = store.get(&Get::row(b"r1".to_vec())).await.unwrap();
        assert!(result.value(b"cf", b"c2").is_none());

        let matched = CheckAndMutate { value: Some(b"expected".to_vec()), ..mismatch };
        assert!(store.check_and_mutate(&matched).await.unwrap());
        let result = store.get(&Get::row(b"r1".to_vec())).await.unwrap();
        assert_eq!(result.value(b"cf", b"c2"), Some(b"applied".as_slice()));
    }

    #[tokio::test]
    async fn test_check_for_absence() {
        let store = InMemoryBackend::new();

        let mut mutations = RowMutations::new(b"r1".to_vec());
        mutations.push(Mutation::Put(put(b"r1", b"c", b"v"))).unwrap();

        let check = CheckAndMutate {
            row: b"r1".to_vec(),
            family: b"cf".to_vec(),
            qualifier: b"c".to_vec(),
            compare: CompareOp::Equal,
            value: None,
            mutations,
        };
        // Cell absent, predicate "is absent" holds.
        assert!(store.check_and_mutate(&check).await.unwrap());
        // Now the cell exists, so the same check fails.
        assert!(!store.check_and_mutate(&check).await.unwrap());
    }

    #[tokio::test]
    async fn test_scan_ordered_range() {
        let store = InMemoryBackend::new();
        for key in [b"a".as_slice(), b"b", b"c", b"d"] {
            store.put(&put(key, b"c", b"v")).await.unwrap();
        }

        let scan = Scan::range(b"b".to_vec(), b"d".to_vec());
        let mut stream = store.scan(&scan).await.unwrap();

        let first = stream.next_row().await.unwrap().unwrap();
        assert_eq!(first.row(), Some(b"b".as_slice()));
        let second = stream.next_row().await.unwrap().unwrap();
        assert_eq!(second.row(), Some(b"c".as_slice()));
        assert!(stream.next_row().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_scan_limit() {
        let store = InMemoryBackend::new();
        for i in 0..10u8 {
            store.put(&put(&[i], b"c", b"v")).await.unwrap();
        }

        let scan = Scan::new().with_limit(3);
        let mut stream = store.scan(&scan).await.unwrap();
        let mut count = 0;
        while stream.next_row().await.unwrap().is_some() {
            count += 1;
        }
        assert_eq!(count, 3);
    }

    #[tokio::test]
    async fn test_batch_default_impl_mixed_ops() {
        let store = InMemoryBackend::new();
        store.put(&put(b"r1", b"c", b"v1")).await.unwrap();

        let operations = vec![
            Operation::Get(Get::row(b"r1".to_vec())),
            Operation::Put(put(b"r2", b"c", b"v2")),
            Operation::Delete(Delete::row(b"r1".to_vec())),
        ];
        let mut results: Vec<BatchSlot> = vec![None; operations.len()];
        store.batch(&operations, &mut results).await.unwrap();

        assert!(matches!(results[0], Some(Ok(OpResult::Row(_)))));
        assert!(matches!(results[1], Some(Ok(OpResult::Done))));
        assert!(matches!(results[2], Some(Ok(OpResult::Done))));
        assert!(!store.exists(&Get::row(b"r1".to_vec())).await.unwrap());
        assert!(store.exists(&Get::row(b"r2".to_vec())).await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_access() {
        use std::sync::Arc;

        let store = Arc::new(InMemoryBackend::new());
        let mut handles = vec![];

        for batch in 0..10u8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..10u8 {
                    store.put(&put(&[batch, i], b"c", b"v")).await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.len(), 100);
    }
}
