//! Core data model for the mirroring client.
//!
//! Everything here is plain owned data: row keys, families, qualifiers
//! and values are byte strings, and every request type can be cloned into
//! an asynchronously scheduled secondary operation without aliasing the
//! caller's buffers.
//!
//! # Example
//!
//! ```
//! use mirror_engine::model::{Put, Get, Operation};
//!
//! let put = Put::row(b"r1".to_vec()).cell(b"cf".to_vec(), b"c".to_vec(), b"v".to_vec());
//! let op = Operation::Put(put);
//! assert!(op.is_write());
//! assert_eq!(op.row(), b"r1");
//!
//! let get = Get::row(b"r1".to_vec());
//! assert!(Operation::Get(get).is_read());
//! ```

use crate::error::MirrorError;

/// A single versioned cell of a wide-column row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cell {
    pub row: Vec<u8>,
    pub family: Vec<u8>,
    pub qualifier: Vec<u8>,
    /// Epoch millis.
    pub timestamp: u64,
    pub value: Vec<u8>,
}

impl Cell {
    /// Approximate heap footprint, used for flow-control accounting.
    #[must_use]
    pub fn heap_size(&self) -> usize {
        std::mem::size_of::<Self>()
            + self.row.len()
            + self.family.len()
            + self.qualifier.len()
            + self.value.len()
    }
}

/// The result of a point read or one row of a scan.
///
/// An empty result models "row absent", matching the underlying store's
/// convention of returning an empty row rather than a not-found error.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RowResult {
    cells: Vec<Cell>,
}

impl RowResult {
    #[must_use]
    pub fn new(cells: Vec<Cell>) -> Self {
        Self { cells }
    }

    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    #[must_use]
    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    /// Row key of this result, if any cell is present.
    #[must_use]
    pub fn row(&self) -> Option<&[u8]> {
        self.cells.first().map(|c| c.row.as_slice())
    }

    /// Latest cell for the given column.
    #[must_use]
    pub fn latest_cell(&self, family: &[u8], qualifier: &[u8]) -> Option<&Cell> {
        self.cells
            .iter()
            .filter(|c| c.family == family && c.qualifier == qualifier)
            .max_by_key(|c| c.timestamp)
    }

    /// Latest value for the given column.
    #[must_use]
    pub fn value(&self, family: &[u8], qualifier: &[u8]) -> Option<&[u8]> {
        self.latest_cell(family, qualifier).map(|c| c.value.as_slice())
    }

    /// Interpret the latest value of the given column as a big-endian
    /// 64-bit counter.
    #[must_use]
    pub fn counter_value(&self, family: &[u8], qualifier: &[u8]) -> Option<i64> {
        let value = self.value(family, qualifier)?;
        let bytes: [u8; 8] = value.try_into().ok()?;
        Some(i64::from_be_bytes(bytes))
    }

    #[must_use]
    pub fn heap_size(&self) -> usize {
        std::mem::size_of::<Self>() + self.cells.iter().map(Cell::heap_size).sum::<usize>()
    }
}

/// A (family, qualifier) column address.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Column {
    pub family: Vec<u8>,
    pub qualifier: Vec<u8>,
}

impl Column {
    #[must_use]
    pub fn new(family: Vec<u8>, qualifier: Vec<u8>) -> Self {
        Self { family, qualifier }
    }

    fn heap_size(&self) -> usize {
        std::mem::size_of::<Self>() + self.family.len() + self.qualifier.len()
    }
}

/// Point read request. An empty column list selects the whole row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Get {
    pub row: Vec<u8>,
    pub columns: Vec<Column>,
}

impl Get {
    #[must_use]
    pub fn row(row: Vec<u8>) -> Self {
        Self { row, columns: Vec::new() }
    }

    #[must_use]
    pub fn column(mut self, family: Vec<u8>, qualifier: Vec<u8>) -> Self {
        self.columns.push(Column::new(family, qualifier));
        self
    }

    #[must_use]
    pub fn heap_size(&self) -> usize {
        std::mem::size_of::<Self>()
            + self.row.len()
            + self.columns.iter().map(Column::heap_size).sum::<usize>()
    }
}

/// Range scan request. `start_row` is inclusive, `stop_row` exclusive;
/// either bound may be open. An empty column list selects whole rows.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Scan {
    pub start_row: Option<Vec<u8>>,
    pub stop_row: Option<Vec<u8>>,
    pub columns: Vec<Column>,
    pub limit: Option<usize>,
}

impl Scan {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn range(start_row: Vec<u8>, stop_row: Vec<u8>) -> Self {
        Self {
            start_row: Some(start_row),
            stop_row: Some(stop_row),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn starting_at(start_row: Vec<u8>) -> Self {
        Self { start_row: Some(start_row), ..Self::default() }
    }

    #[must_use]
    pub fn column(mut self, family: Vec<u8>, qualifier: Vec<u8>) -> Self {
        self.columns.push(Column::new(family, qualifier));
        self
    }

    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// One cell of a [`Put`]. A missing timestamp means "now" as decided by
/// the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutCell {
    pub family: Vec<u8>,
    pub qualifier: Vec<u8>,
    pub timestamp: Option<u64>,
    pub value: Vec<u8>,
}

/// Row write request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Put {
    pub row: Vec<u8>,
    pub cells: Vec<PutCell>,
}

impl Put {
    #[must_use]
    pub fn row(row: Vec<u8>) -> Self {
        Self { row, cells: Vec::new() }
    }

    #[must_use]
    pub fn cell(mut self, family: Vec<u8>, qualifier: Vec<u8>, value: Vec<u8>) -> Self {
        self.cells.push(PutCell { family, qualifier, timestamp: None, value });
        self
    }

    #[must_use]
    pub fn cell_at(
        mut self,
        family: Vec<u8>,
        qualifier: Vec<u8>,
        timestamp: u64,
        value: Vec<u8>,
    ) -> Self {
        self.cells.push(PutCell { family, qualifier, timestamp: Some(timestamp), value });
        self
    }

    #[must_use]
    pub fn heap_size(&self) -> usize {
        std::mem::size_of::<Self>()
            + self.row.len()
            + self
                .cells
                .iter()
                .map(|c| {
                    std::mem::size_of::<PutCell>()
                        + c.family.len()
                        + c.qualifier.len()
                        + c.value.len()
                })
                .sum::<usize>()
    }
}

/// Row delete request. An empty column list deletes the whole row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delete {
    pub row: Vec<u8>,
    pub columns: Vec<Column>,
}

impl Delete {
    #[must_use]
    pub fn row(row: Vec<u8>) -> Self {
        Self { row, columns: Vec::new() }
    }

    #[must_use]
    pub fn column(mut self, family: Vec<u8>, qualifier: Vec<u8>) -> Self {
        self.columns.push(Column::new(family, qualifier));
        self
    }

    #[must_use]
    pub fn heap_size(&self) -> usize {
        std::mem::size_of::<Self>()
            + self.row.len()
            + self.columns.iter().map(Column::heap_size).sum::<usize>()
    }
}

/// Append request: concatenates a value to each addressed cell.
/// Non-idempotent; never replayed on the secondary as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Append {
    pub row: Vec<u8>,
    pub columns: Vec<(Column, Vec<u8>)>,
}

impl Append {
    #[must_use]
    pub fn row(row: Vec<u8>) -> Self {
        Self { row, columns: Vec::new() }
    }

    #[must_use]
    pub fn column(mut self, family: Vec<u8>, qualifier: Vec<u8>, value: Vec<u8>) -> Self {
        self.columns.push((Column::new(family, qualifier), value));
        self
    }

    #[must_use]
    pub fn heap_size(&self) -> usize {
        std::mem::size_of::<Self>()
            + self.row.len()
            + self
                .columns
                .iter()
                .map(|(c, v)| c.heap_size() + v.len())
                .sum::<usize>()
    }
}

/// Atomic counter request: adds an amount to each addressed cell,
/// interpreting values as big-endian 64-bit integers. Non-idempotent;
/// never replayed on the secondary as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Increment {
    pub row: Vec<u8>,
    pub columns: Vec<(Column, i64)>,
}

impl Increment {
    #[must_use]
    pub fn row(row: Vec<u8>) -> Self {
        Self { row, columns: Vec::new() }
    }

    #[must_use]
    pub fn column(mut self, family: Vec<u8>, qualifier: Vec<u8>, amount: i64) -> Self {
        self.columns.push((Column::new(family, qualifier), amount));
        self
    }

    #[must_use]
    pub fn heap_size(&self) -> usize {
        std::mem::size_of::<Self>()
            + self.row.len()
            + self.columns.iter().map(|(c, _)| c.heap_size()).sum::<usize>()
    }
}

/// A Put or Delete inside a [`RowMutations`] bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    Put(Put),
    Delete(Delete),
}

impl Mutation {
    #[must_use]
    pub fn row(&self) -> &[u8] {
        match self {
            Mutation::Put(p) => &p.row,
            Mutation::Delete(d) => &d.row,
        }
    }

    fn heap_size(&self) -> usize {
        match self {
            Mutation::Put(p) => p.heap_size(),
            Mutation::Delete(d) => d.heap_size(),
        }
    }
}

/// An atomically applied bundle of Puts and Deletes addressed to a single
/// row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowMutations {
    pub row: Vec<u8>,
    pub mutations: Vec<Mutation>,
}

impl RowMutations {
    #[must_use]
    pub fn new(row: Vec<u8>) -> Self {
        Self { row, mutations: Vec::new() }
    }

    /// Adds a mutation; fails if it addresses a different row.
    pub fn push(&mut self, mutation: Mutation) -> Result<(), MirrorError> {
        if mutation.row() != self.row.as_slice() {
            return Err(MirrorError::InvalidRequest(
                "row mutation addressed to a different row".into(),
            ));
        }
        self.mutations.push(mutation);
        Ok(())
    }

    #[must_use]
    pub fn heap_size(&self) -> usize {
        std::mem::size_of::<Self>()
            + self.row.len()
            + self.mutations.iter().map(Mutation::heap_size).sum::<usize>()
    }
}

/// Comparison operator of a conditional mutation's predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Less,
    LessOrEqual,
    Equal,
    NotEqual,
    GreaterOrEqual,
    Greater,
}

impl CompareOp {
    /// Evaluates `stored <op> expected` with byte-lexicographic ordering.
    ///
    /// A `None` on either side models an absent cell or an
    /// expected-absent predicate; only `Equal` and `NotEqual` can match
    /// against absence.
    #[must_use]
    pub fn evaluate(&self, stored: Option<&[u8]>, expected: Option<&[u8]>) -> bool {
        match (stored, expected) {
            (Some(s), Some(e)) => {
                let ord = s.cmp(e);
                match self {
                    CompareOp::Less => ord.is_lt(),
                    CompareOp::LessOrEqual => ord.is_le(),
                    CompareOp::Equal => ord.is_eq(),
                    CompareOp::NotEqual => ord.is_ne(),
                    CompareOp::GreaterOrEqual => ord.is_ge(),
                    CompareOp::Greater => ord.is_gt(),
                }
            }
            (None, None) => matches!(self, CompareOp::Equal),
            (None, Some(_)) | (Some(_), None) => matches!(self, CompareOp::NotEqual),
        }
    }
}

/// Conditional mutation: a predicate on one cell plus the mutations to
/// apply atomically when it holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckAndMutate {
    pub row: Vec<u8>,
    pub family: Vec<u8>,
    pub qualifier: Vec<u8>,
    pub compare: CompareOp,
    /// `None` checks for cell absence.
    pub value: Option<Vec<u8>>,
    pub mutations: RowMutations,
}

/// A batchable operation.
///
/// Conditional mutations are excluded on purpose: the underlying store's
/// batch API does not accept them either.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Get(Get),
    Put(Put),
    Delete(Delete),
    Append(Append),
    Increment(Increment),
    MutateRow(RowMutations),
}

impl Operation {
    #[must_use]
    pub fn row(&self) -> &[u8] {
        match self {
            Operation::Get(g) => &g.row,
            Operation::Put(p) => &p.row,
            Operation::Delete(d) => &d.row,
            Operation::Append(a) => &a.row,
            Operation::Increment(i) => &i.row,
            Operation::MutateRow(m) => &m.row,
        }
    }

    #[must_use]
    pub fn is_read(&self) -> bool {
        matches!(self, Operation::Get(_))
    }

    #[must_use]
    pub fn is_write(&self) -> bool {
        !self.is_read()
    }

    #[must_use]
    pub fn kind(&self) -> OperationKind {
        match self {
            Operation::Get(_) => OperationKind::Get,
            Operation::Put(_) => OperationKind::Put,
            Operation::Delete(_) => OperationKind::Delete,
            Operation::Append(_) => OperationKind::Append,
            Operation::Increment(_) => OperationKind::Increment,
            Operation::MutateRow(_) => OperationKind::MutateRow,
        }
    }

    #[must_use]
    pub fn heap_size(&self) -> usize {
        match self {
            Operation::Get(g) => g.heap_size(),
            Operation::Put(p) => p.heap_size(),
            Operation::Delete(d) => d.heap_size(),
            Operation::Append(a) => a.heap_size(),
            Operation::Increment(i) => i.heap_size(),
            Operation::MutateRow(m) => m.heap_size(),
        }
    }
}

/// Tag identifying the kind of operation reported to collaborators such
/// as the write-error sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Get,
    Put,
    Delete,
    Append,
    Increment,
    MutateRow,
    CheckAndMutate,
    Batch,
}

impl OperationKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Get => "get",
            OperationKind::Put => "put",
            OperationKind::Delete => "delete",
            OperationKind::Append => "append",
            OperationKind::Increment => "increment",
            OperationKind::MutateRow => "mutate_row",
            OperationKind::CheckAndMutate => "check_and_mutate",
            OperationKind::Batch => "batch",
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed payload of one batch result slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpResult {
    /// Result of a read or a read-modify-write.
    Row(RowResult),
    /// A plain mutation completed.
    Done,
}

impl OpResult {
    #[must_use]
    pub fn as_row(&self) -> Option<&RowResult> {
        match self {
            OpResult::Row(r) => Some(r),
            OpResult::Done => None,
        }
    }
}

/// One per-element result slot of a batch: unfilled, a typed payload, or
/// a failure token.
pub type BatchSlot = Option<Result<OpResult, MirrorError>>;

/// A slot counts as failed when the backend never filled it or filled it
/// with an error token.
#[must_use]
pub fn slot_is_faulty(slot: &BatchSlot) -> bool {
    !matches!(slot, Some(Ok(_)))
}

/// Size estimate handed to the flow controller when reserving resources
/// for one secondary submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RequestResources {
    /// Number of operations or result entries.
    pub entries: usize,
    /// Approximate payload bytes.
    pub bytes: usize,
}

impl RequestResources {
    #[must_use]
    pub fn for_operation(op: &Operation) -> Self {
        Self { entries: 1, bytes: op.heap_size() }
    }

    #[must_use]
    pub fn for_result(result: &RowResult) -> Self {
        Self { entries: 1, bytes: result.heap_size() }
    }

    #[must_use]
    pub fn for_results(results: &[RowResult]) -> Self {
        Self {
            entries: results.len(),
            bytes: results.iter().map(RowResult::heap_size).sum(),
        }
    }

    /// Existence checks carry no payload worth accounting.
    #[must_use]
    pub fn for_bools(count: usize) -> Self {
        Self { entries: count, bytes: count }
    }

    /// Estimate for a batch: the operations to be sent plus the read
    /// results that verification will hold on to.
    #[must_use]
    pub fn for_batch(operations: &[Operation], read_results: &[RowResult]) -> Self {
        Self {
            entries: operations.len(),
            bytes: operations.iter().map(Operation::heap_size).sum::<usize>()
                + read_results.iter().map(RowResult::heap_size).sum::<usize>(),
        }
    }
}

/// Everything the error-sink path needs to know about a scheduled
/// secondary write: its admission estimate, the original operations (not
/// any rewritten form), and the kind tag to report.
#[derive(Debug, Clone)]
pub struct WriteOperationInfo {
    pub resources: RequestResources,
    pub operations: Vec<Operation>,
    pub kind: OperationKind,
}

impl WriteOperationInfo {
    /// Info for a single write operation.
    #[must_use]
    pub fn single(operation: Operation) -> Self {
        Self {
            resources: RequestResources::for_operation(&operation),
            kind: operation.kind(),
            operations: vec![operation],
        }
    }

    /// Info for a non-idempotent operation whose secondary submission is
    /// the rewritten Put: admission is sized for what will actually be
    /// sent, while the sink keeps seeing the original operation.
    #[must_use]
    pub fn rewritten(original: Operation, rewritten: &Put) -> Self {
        Self {
            resources: RequestResources { entries: 1, bytes: rewritten.heap_size() },
            kind: original.kind(),
            operations: vec![original],
        }
    }

    /// Info for the mutations of a conditional write; the sink sees the
    /// row-mutations bundle under its own kind tag.
    #[must_use]
    pub fn check_and_mutate(mutations: RowMutations) -> Self {
        let operation = Operation::MutateRow(mutations);
        Self {
            resources: RequestResources::for_operation(&operation),
            kind: OperationKind::CheckAndMutate,
            operations: vec![operation],
        }
    }
}

/// Rewrites the primary's result of an Append or Increment into an
/// equivalent Put, preserving cell timestamps.
///
/// Replaying the Put on the secondary is idempotent and carries the exact
/// values the primary computed.
#[must_use]
pub fn put_from_result(result: &RowResult) -> Put {
    let row = result.row().map(<[u8]>::to_vec).unwrap_or_default();
    let mut put = Put::row(row);
    for cell in result.cells() {
        put = put.cell_at(
            cell.family.clone(),
            cell.qualifier.clone(),
            cell.timestamp,
            cell.value.clone(),
        );
    }
    put
}
