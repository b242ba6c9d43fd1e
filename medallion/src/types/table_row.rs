use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::bail;
use crate::error::{ErrorKind, MedallionResult};
use crate::types::cell::{Cell, ColumnType};
use crate::types::key::{BusinessKey, KeyExtractor};

/// Name and type of a column in a [`RowSet`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    pub typ: ColumnType,
    pub nullable: bool,
}

impl ColumnSchema {
    pub fn new(name: impl Into<String>, typ: ColumnType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            typ,
            nullable,
        }
    }
}

/// Values of one row, ordered like the columns of the owning [`RowSet`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableRow {
    values: Vec<Cell>,
}

impl TableRow {
    pub fn new(values: Vec<Cell>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[Cell] {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut Vec<Cell> {
        &mut self.values
    }

    pub fn into_values(self) -> Vec<Cell> {
        self.values
    }

    /// Returns the value at `index`, treating out-of-range positions as null.
    pub fn get(&self, index: usize) -> &Cell {
        self.values.get(index).unwrap_or(&Cell::Null)
    }
}

/// A batch of rows sharing one column list.
///
/// This is the in-memory dataset passed between the loader, the reconstructor, the hashing
/// engine and the table stores. Row order is ingestion order and is preserved by every
/// operation that does not explicitly reorder.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RowSet {
    columns: Vec<ColumnSchema>,
    rows: Vec<TableRow>,
}

impl RowSet {
    /// Builds a row set, checking that every row has one value per column.
    pub fn new(columns: Vec<ColumnSchema>, rows: Vec<TableRow>) -> MedallionResult<Self> {
        let mut seen = HashSet::with_capacity(columns.len());
        for column in &columns {
            if !seen.insert(column.name.as_str()) {
                bail!(
                    ErrorKind::ColumnAlreadyExists,
                    "Duplicate column in row set",
                    column.name
                );
            }
        }

        if let Some(row) = rows.iter().find(|row| row.values().len() != columns.len()) {
            bail!(
                ErrorKind::InvalidData,
                "Row width does not match the column count",
                format!(
                    "expected {} values, got {}",
                    columns.len(),
                    row.values().len()
                )
            );
        }

        Ok(Self { columns, rows })
    }

    /// An empty row set with the given columns.
    pub fn empty(columns: Vec<ColumnSchema>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Builds a row set from `(column, value)` records, inferring column types.
    ///
    /// Columns appear in first-seen order; values missing from a record are null.
    pub fn from_records<I, K>(records: I) -> Self
    where
        I: IntoIterator<Item = Vec<(K, Cell)>>,
        K: Into<String>,
    {
        let mut columns: Vec<ColumnSchema> = Vec::new();
        let mut positions: HashMap<String, usize> = HashMap::new();
        let mut staged: Vec<Vec<(usize, Cell)>> = Vec::new();

        for record in records {
            let mut row = Vec::with_capacity(record.len());
            for (name, cell) in record {
                let name = name.into();
                let index = match positions.get(&name) {
                    Some(index) => *index,
                    None => {
                        positions.insert(name.clone(), columns.len());
                        columns.push(ColumnSchema::new(name, ColumnType::Null, true));
                        columns.len() - 1
                    }
                };

                columns[index].typ = columns[index].typ.unify(cell.column_type());
                row.push((index, cell));
            }
            staged.push(row);
        }

        let rows = staged
            .into_iter()
            .map(|values| {
                let mut row = vec![Cell::Null; columns.len()];
                for (index, cell) in values {
                    row[index] = cell;
                }
                TableRow::new(row)
            })
            .collect();

        Self { columns, rows }
    }

    pub fn columns(&self) -> &[ColumnSchema] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn rows(&self) -> &[TableRow] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<TableRow> {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Returns the value of `column` in the row at `row_index`.
    pub fn value(&self, row_index: usize, column: &str) -> Option<&Cell> {
        let column_index = self.column_index(column)?;
        self.rows.get(row_index).map(|row| row.get(column_index))
    }

    /// Iterates over the values of one column.
    pub fn column_values<'a>(&'a self, name: &str) -> Option<impl Iterator<Item = &'a Cell>> {
        let index = self.column_index(name)?;
        Some(self.rows.iter().map(move |row| row.get(index)))
    }

    /// Returns the positions of the named columns, failing with [`ErrorKind::UnknownColumn`].
    pub fn require_columns<S: AsRef<str>>(&self, names: &[S]) -> MedallionResult<Vec<usize>> {
        let mut indices = Vec::with_capacity(names.len());
        let mut missing = Vec::new();
        for name in names {
            match self.column_index(name.as_ref()) {
                Some(index) => indices.push(index),
                None => missing.push(name.as_ref().to_string()),
            }
        }

        if !missing.is_empty() {
            bail!(
                ErrorKind::UnknownColumn,
                "Columns not found in dataset",
                missing.join(", ")
            );
        }

        Ok(indices)
    }

    /// Appends a column, one value per row.
    pub fn push_column(&mut self, column: ColumnSchema, values: Vec<Cell>) -> MedallionResult<()> {
        if self.has_column(&column.name) {
            bail!(
                ErrorKind::ColumnAlreadyExists,
                "Column already exists",
                column.name
            );
        }

        if values.len() != self.rows.len() {
            bail!(
                ErrorKind::InvalidData,
                "Column length does not match the row count",
                format!("expected {} values, got {}", self.rows.len(), values.len())
            );
        }

        self.columns.push(column);
        for (row, value) in self.rows.iter_mut().zip(values) {
            row.values_mut().push(value);
        }

        Ok(())
    }

    /// Appends a column whose value is the same for every row.
    pub fn push_constant_column(&mut self, column: ColumnSchema, value: Cell) -> MedallionResult<()> {
        let values = vec![value; self.rows.len()];
        self.push_column(column, values)
    }

    /// Replaces the value of an existing column in every row.
    pub fn set_column<F>(&mut self, name: &str, mut f: F) -> MedallionResult<()>
    where
        F: FnMut(&TableRow) -> Cell,
    {
        let Some(index) = self.column_index(name) else {
            bail!(ErrorKind::UnknownColumn, "Column not found in dataset", name);
        };

        for row in &mut self.rows {
            let value = f(row);
            row.values_mut()[index] = value;
        }

        Ok(())
    }

    /// Keeps rows matching `predicate`.
    pub fn filter<F>(&self, mut predicate: F) -> RowSet
    where
        F: FnMut(&TableRow) -> bool,
    {
        RowSet {
            columns: self.columns.clone(),
            rows: self.rows.iter().filter(|row| predicate(row)).cloned().collect(),
        }
    }

    /// Keeps the rows at the given positions, in the given order.
    pub fn take(&self, positions: &[usize]) -> RowSet {
        RowSet {
            columns: self.columns.clone(),
            rows: positions
                .iter()
                .filter_map(|position| self.rows.get(*position).cloned())
                .collect(),
        }
    }

    /// Returns the rows ordered by the named columns, keeping the order of equal rows.
    pub fn sorted_by_columns<S: AsRef<str>>(&self, names: &[S]) -> MedallionResult<RowSet> {
        let extractor = KeyExtractor::new(self, names)?;
        let keys: Vec<BusinessKey> = self.rows.iter().map(|row| extractor.key(row)).collect();
        let mut positions: Vec<usize> = (0..self.rows.len()).collect();
        positions.sort_by(|a, b| keys[*a].total_cmp(&keys[*b]));

        Ok(self.take(&positions))
    }

    /// Keeps only the named columns, in the given order.
    pub fn select<S: AsRef<str>>(&self, names: &[S]) -> MedallionResult<RowSet> {
        let indices = self.require_columns(names)?;
        let columns = indices.iter().map(|i| self.columns[*i].clone()).collect();
        let rows = self
            .rows
            .iter()
            .map(|row| TableRow::new(indices.iter().map(|i| row.get(*i).clone()).collect()))
            .collect();

        Ok(RowSet { columns, rows })
    }

    /// Drops the named columns. Unknown names are ignored.
    pub fn drop_columns<S: AsRef<str>>(&self, names: &[S]) -> RowSet {
        let keep: Vec<String> = self
            .columns
            .iter()
            .filter(|c| !names.iter().any(|n| n.as_ref() == c.name))
            .map(|c| c.name.clone())
            .collect();

        // Every kept name comes from this set, so selection cannot fail.
        self.select(&keep).unwrap_or_else(|_| self.clone())
    }

    /// Reorders and pads rows to `columns`. Missing columns become null, extra columns are dropped.
    pub fn align_to(&self, columns: &[ColumnSchema]) -> RowSet {
        let sources: Vec<Option<usize>> =
            columns.iter().map(|c| self.column_index(&c.name)).collect();
        let rows = self
            .rows
            .iter()
            .map(|row| {
                TableRow::new(
                    sources
                        .iter()
                        .map(|source| source.map(|i| row.get(i).clone()).unwrap_or(Cell::Null))
                        .collect(),
                )
            })
            .collect();

        RowSet {
            columns: columns.to_vec(),
            rows,
        }
    }

    /// Concatenates row sets over the union of their columns.
    ///
    /// Columns keep first-seen order. Values of columns a set lacks are null.
    pub fn concat(sets: Vec<RowSet>) -> RowSet {
        let mut columns: Vec<ColumnSchema> = Vec::new();
        for set in &sets {
            for column in &set.columns {
                match columns.iter_mut().find(|c| c.name == column.name) {
                    Some(existing) => {
                        existing.typ = existing.typ.unify(column.typ);
                        existing.nullable |= column.nullable;
                    }
                    None => columns.push(column.clone()),
                }
            }
        }

        let mut rows = Vec::with_capacity(sets.iter().map(RowSet::len).sum());
        for set in sets {
            for column in &mut columns {
                if !set.has_column(&column.name) {
                    column.nullable = true;
                }
            }
            rows.extend(set.align_to(&columns).rows);
        }

        RowSet { columns, rows }
    }

    /// Adds a row. The row must match the column count.
    pub fn push_row(&mut self, row: TableRow) -> MedallionResult<()> {
        if row.values().len() != self.columns.len() {
            bail!(
                ErrorKind::InvalidData,
                "Row width does not match the column count",
                format!(
                    "expected {} values, got {}",
                    self.columns.len(),
                    row.values().len()
                )
            );
        }

        self.rows.push(row);
        Ok(())
    }

    /// Converts each row into a name to value map, mostly for assertions and sinks.
    pub fn to_records(&self) -> Vec<HashMap<String, Cell>> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .zip(row.values())
                    .map(|(c, v)| (c.name.clone(), v.clone()))
                    .collect()
            })
            .collect()
    }
}
