//! Conversion of parquet files into [`RowSet`]s through the parquet record API.

use std::fs::File;
use std::path::Path;

use chrono::DateTime;
use parquet::file::reader::{FileReader, SerializedFileReader};
use parquet::record::Field;

use crate::error::MedallionResult;
use crate::types::{Cell, ColumnSchema, ColumnType, RowSet};

const SECONDS_PER_DAY: i64 = 86_400;

/// Reads every row of a parquet file.
///
/// A file without rows still yields its top-level columns, typed as null.
pub(crate) fn read_parquet_file(path: &Path) -> MedallionResult<RowSet> {
    let file = File::open(path)?;
    let reader = SerializedFileReader::new(file)?;

    let mut records = Vec::new();
    for row in reader.get_row_iter(None)? {
        let row = row?;
        records.push(
            row.get_column_iter()
                .map(|(name, field)| (name.clone(), field_to_cell(field)))
                .collect::<Vec<_>>(),
        );
    }

    if records.is_empty() {
        let columns = reader
            .metadata()
            .file_metadata()
            .schema_descr()
            .root_schema()
            .get_fields()
            .iter()
            .map(|field| ColumnSchema::new(field.name(), ColumnType::Null, true))
            .collect();

        return Ok(RowSet::empty(columns));
    }

    Ok(RowSet::from_records(records))
}

fn field_to_cell(field: &Field) -> Cell {
    match field {
        Field::Null => Cell::Null,
        Field::Bool(value) => Cell::Bool(*value),
        Field::Byte(value) => Cell::I32(i32::from(*value)),
        Field::Short(value) => Cell::I32(i32::from(*value)),
        Field::Int(value) => Cell::I32(*value),
        Field::Long(value) => Cell::I64(*value),
        Field::UByte(value) => Cell::I32(i32::from(*value)),
        Field::UShort(value) => Cell::I32(i32::from(*value)),
        Field::UInt(value) => Cell::I64(i64::from(*value)),
        Field::ULong(value) => i64::try_from(*value)
            .map(Cell::I64)
            .unwrap_or_else(|_| Cell::Numeric(value.to_string())),
        Field::Float(value) => Cell::F64(f64::from(*value)),
        Field::Double(value) => Cell::F64(*value),
        Field::Decimal(_) => Cell::Numeric(field.to_string()),
        Field::Str(value) => Cell::String(value.clone()),
        Field::Bytes(value) => Cell::Bytes(value.data().to_vec()),
        Field::Date(days) => DateTime::from_timestamp(i64::from(*days) * SECONDS_PER_DAY, 0)
            .map(|datetime| Cell::Date(datetime.date_naive()))
            .unwrap_or(Cell::Null),
        Field::TimestampMillis(millis) => DateTime::from_timestamp_millis(*millis)
            .map(|datetime| Cell::Timestamp(datetime.naive_utc()))
            .unwrap_or(Cell::Null),
        Field::TimestampMicros(micros) => DateTime::from_timestamp_micros(*micros)
            .map(|datetime| Cell::Timestamp(datetime.naive_utc()))
            .unwrap_or(Cell::Null),
        Field::Group(_) | Field::ListInternal(_) | Field::MapInternal(_) => {
            Cell::Json(field.to_json_value())
        }
        // Half floats and time-of-day values keep their rendered text.
        other => Cell::String(other.to_string()),
    }
}
