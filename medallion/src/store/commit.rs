//! Commit logic shared by the table store implementations.
//!
//! Stores only decide where table state lives; the row-level outcome of a write or merge is
//! computed here so every store behaves the same.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::bail;
use crate::error::{ErrorKind, MedallionResult};
use crate::store::base::{
    MatchCondition, MatchedAction, MergeSpec, OperationMetrics, WriteMode, WriteOptions,
};
use crate::types::{BusinessKey, Cell, ColumnSchema, KeyExtractor, RowSet, TableRow};

/// Latest state of one table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct TableData {
    pub rows: RowSet,
    pub partition_by: Vec<String>,
}

fn column_names(columns: &[ColumnSchema]) -> HashSet<&str> {
    columns.iter().map(|c| c.name.as_str()).collect()
}

/// Computes the table state after a write.
pub(crate) fn apply_write(
    existing: Option<TableData>,
    rows: RowSet,
    options: &WriteOptions,
) -> MedallionResult<(TableData, OperationMetrics)> {
    rows.require_columns(&options.partition_by)?;
    let added = rows.len() as u64;

    let data = match (existing, options.mode) {
        (None, _) => TableData {
            rows,
            partition_by: options.partition_by.clone(),
        },
        (Some(existing), WriteMode::Append) => {
            if column_names(existing.rows.columns()) != column_names(rows.columns()) {
                bail!(
                    ErrorKind::SchemaMismatch,
                    "Schema mismatch: appended columns differ from the table columns",
                    format!(
                        "table has [{}], write has [{}]",
                        existing.rows.column_names().join(", "),
                        rows.column_names().join(", ")
                    )
                );
            }

            TableData {
                rows: RowSet::concat(vec![existing.rows, rows]),
                partition_by: existing.partition_by,
            }
        }
        (Some(existing), WriteMode::Overwrite) => {
            if !options.overwrite_schema {
                if column_names(existing.rows.columns()) != column_names(rows.columns()) {
                    bail!(
                        ErrorKind::SchemaMismatch,
                        "Schema mismatch: overwrite changes the table columns",
                        format!(
                            "table has [{}], write has [{}]",
                            existing.rows.column_names().join(", "),
                            rows.column_names().join(", ")
                        )
                    );
                }

                let rows = rows.align_to(existing.rows.columns());
                TableData {
                    rows,
                    partition_by: existing.partition_by,
                }
            } else {
                TableData {
                    rows,
                    partition_by: options.partition_by.clone(),
                }
            }
        }
    };

    let metrics = OperationMetrics {
        num_output_rows: added,
        num_inserted_rows: added,
        num_table_rows: data.rows.len() as u64,
        ..Default::default()
    };

    Ok((data, metrics))
}

fn condition_holds(
    condition: &MatchCondition,
    target: &RowSet,
    target_row: &TableRow,
    source: &RowSet,
    source_row: &TableRow,
) -> bool {
    let target_value = |name: &str| {
        target
            .column_index(name)
            .map(|i| target_row.get(i))
            .unwrap_or(&Cell::Null)
    };

    match condition {
        MatchCondition::Always => true,
        MatchCondition::ColumnDiffers(name) => {
            let source_value = source
                .column_index(name)
                .map(|i| source_row.get(i))
                .unwrap_or(&Cell::Null);
            source_value != target_value(name)
        }
        MatchCondition::TargetEquals(name, value) => target_value(name) == value,
        MatchCondition::Any(conditions) => conditions
            .iter()
            .any(|c| condition_holds(c, target, target_row, source, source_row)),
    }
}

/// Computes the table state after merging `source` into `target`.
///
/// Source columns missing from the target are added as nullable columns. Each target row may be
/// matched by at most one source row.
pub(crate) fn apply_merge(
    target: RowSet,
    source: &RowSet,
    spec: &MergeSpec,
) -> MedallionResult<(RowSet, OperationMetrics)> {
    if spec.keys.is_empty() {
        bail!(ErrorKind::MergeFailed, "Merge requires at least one key column");
    }

    let mut columns = target.columns().to_vec();
    for column in source.columns() {
        if !columns.iter().any(|c| c.name == column.name) {
            columns.push(ColumnSchema::new(column.name.clone(), column.typ, true));
        }
    }
    let target = target.align_to(&columns);

    if let Some((_, MatchedAction::Assign(values))) = &spec.when_matched {
        let names: Vec<&str> = values.iter().map(|(name, _)| name.as_str()).collect();
        target.require_columns(&names)?;
    }

    let source_keys = KeyExtractor::new(source, &spec.keys)?;
    let target_keys = KeyExtractor::new(&target, &spec.keys)?;

    let mut source_index: HashMap<BusinessKey, usize> = HashMap::with_capacity(source.len());
    for (position, row) in source.rows().iter().enumerate() {
        if source_index.insert(source_keys.key(row), position).is_some() {
            bail!(
                ErrorKind::MergeFailed,
                "Multiple source rows match the same key",
                format!("{:?}", source_keys.key(row).values())
            );
        }
    }

    // Target column -> source column, for full-row updates and inserts.
    let source_positions: Vec<Option<usize>> = columns
        .iter()
        .map(|c| source.column_index(&c.name))
        .collect();

    let mut metrics = OperationMetrics::default();
    let mut matched: HashSet<usize> = HashSet::new();
    let mut merged = RowSet::empty(columns.clone());

    for row in target.rows() {
        let key = target_keys.key(row);
        let Some(&source_position) = source_index.get(&key) else {
            merged.push_row(row.clone())?;
            continue;
        };
        matched.insert(source_position);
        let source_row = &source.rows()[source_position];

        let Some((condition, action)) = &spec.when_matched else {
            metrics.num_unchanged_rows += 1;
            merged.push_row(row.clone())?;
            continue;
        };

        if !condition_holds(condition, &target, row, source, source_row) {
            metrics.num_unchanged_rows += 1;
            merged.push_row(row.clone())?;
            continue;
        }

        let mut values = row.values().to_vec();
        match action {
            MatchedAction::UpdateAll { preserve } => {
                for (index, column) in columns.iter().enumerate() {
                    if preserve.contains(&column.name) {
                        continue;
                    }
                    if let Some(source_index) = source_positions[index] {
                        values[index] = source_row.get(source_index).clone();
                    }
                }
            }
            MatchedAction::Assign(assignments) => {
                for (name, value) in assignments {
                    if let Some(index) = target.column_index(name) {
                        values[index] = value.clone();
                    }
                }
            }
        }

        metrics.num_updated_rows += 1;
        merged.push_row(TableRow::new(values))?;
    }

    if spec.insert_unmatched {
        for (position, row) in source.rows().iter().enumerate() {
            if matched.contains(&position) {
                continue;
            }

            let values = source_positions
                .iter()
                .map(|source_index| {
                    source_index
                        .map(|i| row.get(i).clone())
                        .unwrap_or(Cell::Null)
                })
                .collect();
            merged.push_row(TableRow::new(values))?;
            metrics.num_inserted_rows += 1;
        }
    }

    metrics.num_output_rows = metrics.num_inserted_rows + metrics.num_updated_rows;
    metrics.num_table_rows = merged.len() as u64;

    Ok((merged, metrics))
}

/// Computes the table state after an optimize.
///
/// The rows stay the same. They are clustered by `zorder_by` when columns are given.
pub(crate) fn apply_optimize(
    data: TableData,
    zorder_by: &[String],
) -> MedallionResult<(TableData, OperationMetrics)> {
    let rows = if zorder_by.is_empty() {
        data.rows
    } else {
        data.rows.sorted_by_columns(zorder_by)?
    };

    let metrics = OperationMetrics {
        num_table_rows: rows.len() as u64,
        ..OperationMetrics::default()
    };

    Ok((
        TableData {
            rows,
            partition_by: data.partition_by,
        },
        metrics,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(rows: &[(i64, &str, &str)]) -> RowSet {
        RowSet::from_records(rows.iter().map(|(id, hash, created)| {
            vec![
                ("id", Cell::I64(*id)),
                ("row_hash", Cell::from(*hash)),
                ("created", Cell::from(*created)),
            ]
        }))
    }

    fn upsert() -> MergeSpec {
        MergeSpec::new(["id"])
            .when_matched(
                MatchCondition::ColumnDiffers("row_hash".to_string()),
                MatchedAction::UpdateAll {
                    preserve: vec!["created".to_string()],
                },
            )
            .insert_unmatched()
    }

    #[test]
    fn optimize_clusters_rows_without_changing_them() {
        let data = TableData {
            rows: table(&[(3, "c", "t1"), (1, "a", "t2"), (2, "b", "t1")]),
            partition_by: vec!["created".to_string()],
        };

        let (optimized, metrics) = apply_optimize(data.clone(), &["id".to_string()]).unwrap();

        assert_eq!(optimized.rows, table(&[(1, "a", "t2"), (2, "b", "t1"), (3, "c", "t1")]));
        assert_eq!(optimized.partition_by, data.partition_by);
        assert_eq!(metrics.num_table_rows, 3);
        assert_eq!(metrics.num_output_rows, 0);

        let err = apply_optimize(data, &["region".to_string()]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownColumn);
    }

    #[test]
    fn append_requires_matching_columns() {
        let existing = TableData {
            rows: table(&[(1, "a", "t1")]),
            partition_by: vec![],
        };
        let rows = RowSet::from_records(vec![vec![("id", Cell::I64(2))]]);

        let err = apply_write(Some(existing), rows, &WriteOptions::append()).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::SchemaMismatch);
    }

    #[test]
    fn overwrite_with_schema_replaces_partitioning() {
        let existing = TableData {
            rows: table(&[(1, "a", "t1")]),
            partition_by: vec!["created".to_string()],
        };
        let rows = RowSet::from_records(vec![vec![("id", Cell::I64(2)), ("p", Cell::I32(1))]]);
        let options = WriteOptions::overwrite()
            .with_overwrite_schema(true)
            .with_partition_by(["p"]);

        let (data, metrics) = apply_write(Some(existing), rows, &options).unwrap();

        assert_eq!(data.partition_by, vec!["p"]);
        assert_eq!(data.rows.column_names(), vec!["id", "p"]);
        assert_eq!(metrics.num_output_rows, 1);
    }

    #[test]
    fn unknown_partition_column_is_rejected() {
        let rows = table(&[(1, "a", "t1")]);
        let options = WriteOptions::append().with_partition_by(["missing"]);

        let err = apply_write(None, rows, &options).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::UnknownColumn);
    }

    #[test]
    fn merge_updates_inserts_and_preserves_columns() {
        let target = table(&[(1, "a", "t1"), (2, "b", "t1")]);
        let source = table(&[(1, "a", "t2"), (2, "b2", "t2"), (3, "c", "t2")]);

        let (merged, metrics) = apply_merge(target, &source, &upsert()).unwrap();

        assert_eq!(metrics.num_inserted_rows, 1);
        assert_eq!(metrics.num_updated_rows, 1);
        assert_eq!(metrics.num_unchanged_rows, 1);
        assert_eq!(metrics.num_table_rows, 3);
        assert_eq!(merged.value(1, "row_hash"), Some(&Cell::from("b2")));
        assert_eq!(merged.value(1, "created"), Some(&Cell::from("t1")));
        assert_eq!(merged.value(2, "created"), Some(&Cell::from("t2")));
    }

    #[test]
    fn merge_assigns_fixed_values() {
        let target = table(&[(1, "a", "t1"), (2, "b", "t1")]);
        let source = RowSet::from_records(vec![vec![("id", Cell::I64(2))]]);
        let spec = MergeSpec::new(["id"]).when_matched(
            MatchCondition::Always,
            MatchedAction::Assign(vec![("created".to_string(), Cell::from("gone"))]),
        );

        let (merged, metrics) = apply_merge(target, &source, &spec).unwrap();

        assert_eq!(metrics.num_updated_rows, 1);
        assert_eq!(metrics.num_inserted_rows, 0);
        assert_eq!(merged.value(0, "created"), Some(&Cell::from("t1")));
        assert_eq!(merged.value(1, "created"), Some(&Cell::from("gone")));
        assert_eq!(merged.value(1, "row_hash"), Some(&Cell::from("b")));
    }

    #[test]
    fn merge_adds_new_source_columns() {
        let target = table(&[(1, "a", "t1")]);
        let source = RowSet::from_records(vec![vec![
            ("id", Cell::I64(2)),
            ("row_hash", Cell::from("x")),
            ("extra", Cell::Bool(true)),
        ]]);

        let (merged, _) = apply_merge(target, &source, &upsert()).unwrap();

        assert!(merged.column("extra").unwrap().nullable);
        assert_eq!(merged.value(0, "extra"), Some(&Cell::Null));
        assert_eq!(merged.value(1, "created"), Some(&Cell::Null));
    }

    #[test]
    fn duplicate_source_keys_fail() {
        let target = table(&[(1, "a", "t1")]);
        let source = table(&[(1, "a", "t2"), (1, "b", "t2")]);

        let err = apply_merge(target, &source, &upsert()).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::MergeFailed);
    }
}
