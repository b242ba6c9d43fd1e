use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

use crate::error::MedallionResult;
use crate::types::cell::Cell;
use crate::types::table_row::{RowSet, TableRow};

/// Values of the business key columns of one row.
///
/// Composite keys keep the configured column order. Used as the lookup key when collapsing
/// history and when matching Bronze rows against Silver rows.
#[derive(Debug, Clone, PartialEq)]
pub struct BusinessKey {
    values: Vec<Cell>,
}

// Cell is only PartialEq because of floats; key columns are compared by bit pattern.
impl Eq for BusinessKey {}

impl BusinessKey {
    pub fn new(values: Vec<Cell>) -> Self {
        Self { values }
    }

    /// Extracts the key from a row using precomputed column positions.
    pub fn from_row(row: &TableRow, key_indices: &[usize]) -> Self {
        Self {
            values: key_indices.iter().map(|i| row.get(*i).clone()).collect(),
        }
    }

    pub fn values(&self) -> &[Cell] {
        &self.values
    }

    /// Total order over keys, column by column.
    ///
    /// Nulls sort first. Cells of different types are ordered by type, floats by
    /// [`f64::total_cmp`].
    pub fn total_cmp(&self, other: &Self) -> Ordering {
        self.values
            .iter()
            .zip(&other.values)
            .map(|(a, b)| cell_cmp(a, b))
            .find(|ordering| ordering.is_ne())
            .unwrap_or_else(|| self.values.len().cmp(&other.values.len()))
    }
}

impl Hash for BusinessKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for value in &self.values {
            cell_hash(value, state);
        }
    }
}

fn cell_hash<H: Hasher>(cell: &Cell, state: &mut H) {
    std::mem::discriminant(cell).hash(state);

    match cell {
        Cell::Null => {}
        Cell::Bool(v) => v.hash(state),
        Cell::String(v) | Cell::Numeric(v) => v.hash(state),
        Cell::I32(v) => v.hash(state),
        Cell::I64(v) => v.hash(state),
        Cell::F64(v) => v.to_bits().hash(state),
        Cell::Date(v) => v.hash(state),
        Cell::Timestamp(v) => v.hash(state),
        Cell::TimestampTz(v) => v.hash(state),
        Cell::Bytes(v) => v.hash(state),
        Cell::Json(v) => v.to_string().hash(state),
    }
}

fn type_rank(cell: &Cell) -> u8 {
    match cell {
        Cell::Null => 0,
        Cell::Bool(_) => 1,
        Cell::I32(_) => 2,
        Cell::I64(_) => 3,
        Cell::F64(_) => 4,
        Cell::Numeric(_) => 5,
        Cell::String(_) => 6,
        Cell::Date(_) => 7,
        Cell::Timestamp(_) => 8,
        Cell::TimestampTz(_) => 9,
        Cell::Bytes(_) => 10,
        Cell::Json(_) => 11,
    }
}

fn cell_cmp(a: &Cell, b: &Cell) -> Ordering {
    match (a, b) {
        (Cell::Bool(a), Cell::Bool(b)) => a.cmp(b),
        (Cell::I32(a), Cell::I32(b)) => a.cmp(b),
        (Cell::I64(a), Cell::I64(b)) => a.cmp(b),
        (Cell::F64(a), Cell::F64(b)) => a.total_cmp(b),
        (Cell::String(a), Cell::String(b)) | (Cell::Numeric(a), Cell::Numeric(b)) => a.cmp(b),
        (Cell::Date(a), Cell::Date(b)) => a.cmp(b),
        (Cell::Timestamp(a), Cell::Timestamp(b)) => a.cmp(b),
        (Cell::TimestampTz(a), Cell::TimestampTz(b)) => a.cmp(b),
        (Cell::Bytes(a), Cell::Bytes(b)) => a.cmp(b),
        (Cell::Json(a), Cell::Json(b)) => a.to_string().cmp(&b.to_string()),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

/// Resolves key columns once and extracts [`BusinessKey`]s from the rows of a set.
#[derive(Debug, Clone)]
pub struct KeyExtractor {
    indices: Vec<usize>,
}

impl KeyExtractor {
    /// Fails with an unknown column error when a key column is absent.
    pub fn new<S: AsRef<str>>(rows: &RowSet, business_keys: &[S]) -> MedallionResult<Self> {
        Ok(Self {
            indices: rows.require_columns(business_keys)?,
        })
    }

    pub fn key(&self, row: &TableRow) -> BusinessKey {
        BusinessKey::from_row(row, &self.indices)
    }
}
