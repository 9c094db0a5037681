//! Property-based tests for the mirroring laws.
//!
//! - *Idempotent rewrite round-trip*: applying the rewritten Put of any
//!   primary result to an empty store reproduces that result.
//! - *Batch order preservation*: the i-th result slot always corresponds
//!   to the i-th input operation.
//! - Configuration parsing never panics on arbitrary input.
//!
//! Run with: `cargo test --test proptest_laws`

use std::collections::HashMap;
use std::sync::Arc;

use proptest::prelude::*;

use mirror_engine::config::MirroringConfig;
use mirror_engine::model::{
    put_from_result, BatchSlot, Cell, Get, OpResult, Operation, Put, RowResult,
};
use mirror_engine::storage::{Backend, InMemoryBackend};
use mirror_engine::table::MirroringTable;
use mirror_engine::MirroringOptions;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime")
}

// =============================================================================
// Strategies
// =============================================================================

fn bytes(max: usize) -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 1..=max)
}

/// A primary result: one row, distinct columns, explicit timestamps.
fn row_result_strategy() -> impl Strategy<Value = RowResult> {
    (
        bytes(16),
        prop::collection::hash_map(
            (bytes(8), bytes(8)),
            (1u64..1_000_000, bytes(32)),
            1..8,
        ),
    )
        .prop_map(|(row, columns)| {
            let mut cells: Vec<Cell> = columns
                .into_iter()
                .map(|((family, qualifier), (timestamp, value))| Cell {
                    row: row.clone(),
                    family,
                    qualifier,
                    timestamp,
                    value,
                })
                .collect();
            cells.sort_by(|a, b| (&a.family, &a.qualifier).cmp(&(&b.family, &b.qualifier)));
            RowResult::new(cells)
        })
}

#[derive(Debug, Clone)]
enum BatchOp {
    Put { value: Vec<u8> },
    GetSeeded,
    GetMissing,
}

fn batch_ops_strategy() -> impl Strategy<Value = Vec<BatchOp>> {
    prop::collection::vec(
        prop_oneof![
            bytes(16).prop_map(|value| BatchOp::Put { value }),
            Just(BatchOp::GetSeeded),
            Just(BatchOp::GetMissing),
        ],
        1..24,
    )
}

// =============================================================================
// Laws
// =============================================================================

proptest! {
    /// Applying the rewritten Put to an empty store yields a store equal
    /// to the primary result it was built from.
    #[test]
    fn rewrite_round_trip(result in row_result_strategy()) {
        let put = put_from_result(&result);
        prop_assert_eq!(put.cells.len(), result.cells().len());

        runtime().block_on(async {
            let store = InMemoryBackend::new();
            store.put(&put).await.unwrap();

            let row = result.row().unwrap().to_vec();
            let replayed = store.get(&Get::row(row)).await.unwrap();

            for cell in result.cells() {
                let stored = replayed
                    .latest_cell(&cell.family, &cell.qualifier)
                    .unwrap_or_else(|| panic!("missing cell {cell:?}"));
                assert_eq!(stored.value, cell.value);
                assert_eq!(stored.timestamp, cell.timestamp);
            }
            assert_eq!(replayed.cells().len(), result.cells().len());
        });
    }

    /// The i-th caller slot corresponds to the i-th input operation.
    #[test]
    fn batch_order_preserved(ops in batch_ops_strategy()) {
        runtime().block_on(async {
            let primary = Arc::new(InMemoryBackend::new());
            let seeded = Put::row(b"seeded".to_vec()).cell(
                b"cf".to_vec(),
                b"c".to_vec(),
                b"seed-value".to_vec(),
            );
            primary.put(&seeded).await.unwrap();

            let table = MirroringTable::new(
                "law",
                primary,
                Arc::new(InMemoryBackend::new()),
                &MirroringOptions::default(),
            );

            let operations: Vec<Operation> = ops
                .iter()
                .enumerate()
                .map(|(index, op)| match op {
                    BatchOp::Put { value } => Operation::Put(
                        Put::row(format!("row-{index}").into_bytes()).cell(
                            b"cf".to_vec(),
                            b"c".to_vec(),
                            value.clone(),
                        ),
                    ),
                    BatchOp::GetSeeded => Operation::Get(Get::row(b"seeded".to_vec())),
                    BatchOp::GetMissing => Operation::Get(Get::row(b"missing".to_vec())),
                })
                .collect();

            let mut results: Vec<BatchSlot> = vec![None; operations.len()];
            table.batch(&operations, &mut results).await.unwrap();

            for (index, op) in ops.iter().enumerate() {
                match (op, &results[index]) {
                    (BatchOp::Put { .. }, Some(Ok(OpResult::Done))) => {}
                    (BatchOp::GetSeeded, Some(Ok(OpResult::Row(row)))) => {
                        assert_eq!(row.value(b"cf", b"c"), Some(b"seed-value".as_slice()));
                    }
                    (BatchOp::GetMissing, Some(Ok(OpResult::Row(row)))) => {
                        assert!(row.is_empty());
                    }
                    (op, slot) => panic!("slot {index} out of order: {op:?} -> {slot:?}"),
                }
            }

            table.close().await.unwrap();
        });
    }

    /// Config parsing returns clean errors, never panics.
    #[test]
    fn config_from_arbitrary_map_never_panics(
        entries in prop::collection::hash_map("[a-z.\\-]{1,40}", ".{0,20}", 0..12),
        with_impls in any::<bool>(),
    ) {
        let mut properties: HashMap<String, String> = entries;
        if with_impls {
            properties.insert(
                mirror_engine::config::PRIMARY_CONNECTION_IMPL_KEY.into(),
                "default".into(),
            );
            properties.insert(
                mirror_engine::config::SECONDARY_CONNECTION_IMPL_KEY.into(),
                "other".into(),
            );
        }
        // Either parses or fails cleanly.
        let _ = MirroringConfig::from_map(&properties);
    }
}
