//! Parquet and CSV codecs for [`Table`].
//!
//! Parquet column types are inferred from the JSON values: booleans,
//! integers, floats and numeric arrays (embeddings) keep their types, and
//! everything else is written as UTF-8, objects as compact JSON.

use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, AsArray, BooleanArray, Float64Array, Float64Builder, Int64Array, ListBuilder,
    StringArray,
};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Field, Float64Type, Int64Type, Schema, UInt64Type};
use arrow::record_batch::{RecordBatch, RecordBatchOptions};
use arrow::util::display::{ArrayFormatter, FormatOptions};
use batch_pipeline_core::table::{Row, Table};
use bytes::Bytes;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use serde_json::{Number, Value};

/// Index column pyarrow adds when a pandas frame keeps its index.
pub const PYARROW_INDEX_COLUMN: &str = "__index_level_0__";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Boolean,
    Integer,
    Float,
    FloatList,
    Text,
}

fn column_kind<'a>(values: impl Iterator<Item = &'a Value>) -> ColumnKind {
    let mut kind: Option<ColumnKind> = None;
    for value in values.filter(|value| !value.is_null()) {
        let value_kind = match value {
            Value::Bool(_) => ColumnKind::Boolean,
            Value::Number(number) if number.is_i64() => ColumnKind::Integer,
            Value::Number(_) => ColumnKind::Float,
            Value::Array(items) if items.iter().all(|item| item.is_number() || item.is_null()) => {
                ColumnKind::FloatList
            }
            _ => return ColumnKind::Text,
        };
        kind = Some(match (kind, value_kind) {
            (None, next) => next,
            (Some(current), next) if current == next => current,
            (Some(ColumnKind::Integer), ColumnKind::Float)
            | (Some(ColumnKind::Float), ColumnKind::Integer) => ColumnKind::Float,
            _ => return ColumnKind::Text,
        });
    }
    kind.unwrap_or(ColumnKind::Text)
}

fn build_column(values: &[&Value]) -> (DataType, ArrayRef) {
    match column_kind(values.iter().copied()) {
        ColumnKind::Boolean => (
            DataType::Boolean,
            Arc::new(BooleanArray::from(
                values.iter().map(|value| value.as_bool()).collect::<Vec<_>>(),
            )),
        ),
        ColumnKind::Integer => (
            DataType::Int64,
            Arc::new(Int64Array::from(
                values.iter().map(|value| value.as_i64()).collect::<Vec<_>>(),
            )),
        ),
        ColumnKind::Float => (
            DataType::Float64,
            Arc::new(Float64Array::from(
                values.iter().map(|value| value.as_f64()).collect::<Vec<_>>(),
            )),
        ),
        ColumnKind::FloatList => {
            let mut builder = ListBuilder::new(Float64Builder::new());
            for value in values {
                match value {
                    Value::Array(items) => {
                        for item in items {
                            builder.values().append_option(item.as_f64());
                        }
                        builder.append(true);
                    }
                    _ => builder.append_null(),
                }
            }
            (
                DataType::List(Arc::new(Field::new("item", DataType::Float64, true))),
                Arc::new(builder.finish()),
            )
        }
        ColumnKind::Text => (
            DataType::Utf8,
            Arc::new(StringArray::from(
                values
                    .iter()
                    .map(|value| match value {
                        Value::Null => None,
                        Value::String(text) => Some(text.clone()),
                        other => Some(other.to_string()),
                    })
                    .collect::<Vec<_>>(),
            )),
        ),
    }
}

pub fn write_parquet(table: &Table) -> Result<Vec<u8>, String> {
    let mut fields = Vec::with_capacity(table.columns().len());
    let mut arrays = Vec::with_capacity(table.columns().len());
    for column in table.columns() {
        let values: Vec<&Value> = table
            .rows()
            .iter()
            .map(|row| row.get(column).unwrap_or(&Value::Null))
            .collect();
        let (data_type, array) = build_column(&values);
        fields.push(Field::new(column, data_type, true));
        arrays.push(array);
    }

    let schema = Arc::new(Schema::new(fields));
    let batch = RecordBatch::try_new_with_options(
        schema.clone(),
        arrays,
        &RecordBatchOptions::new().with_row_count(Some(table.len())),
    )
    .map_err(|error| format!("Failed to build parquet record batch: {error}"))?;

    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();
    let mut buffer = Vec::new();
    let mut writer = ArrowWriter::try_new(&mut buffer, schema, Some(props))
        .map_err(|error| format!("Failed to create parquet writer: {error}"))?;
    writer
        .write(&batch)
        .map_err(|error| format!("Failed to write parquet batch: {error}"))?;
    writer
        .close()
        .map_err(|error| format!("Failed to close parquet writer: {error}"))?;
    Ok(buffer)
}

pub fn read_parquet(body: Vec<u8>) -> Result<Table, String> {
    let builder = ParquetRecordBatchReaderBuilder::try_new(Bytes::from(body))
        .map_err(|error| format!("Failed to open parquet data: {error}"))?;
    let columns: Vec<String> = builder
        .schema()
        .fields()
        .iter()
        .map(|field| field.name().clone())
        .collect();
    let reader = builder
        .build()
        .map_err(|error| format!("Failed to read parquet data: {error}"))?;

    let mut table = Table::new(
        columns
            .iter()
            .filter(|column| column.as_str() != PYARROW_INDEX_COLUMN)
            .cloned()
            .collect(),
    );
    for batch in reader {
        let batch = batch.map_err(|error| format!("Failed to read parquet batch: {error}"))?;
        let column_values = batch
            .columns()
            .iter()
            .map(array_values)
            .collect::<Result<Vec<_>, _>>()?;
        for row_index in 0..batch.num_rows() {
            let row: Row = columns
                .iter()
                .zip(&column_values)
                .filter(|(column, _)| column.as_str() != PYARROW_INDEX_COLUMN)
                .map(|(column, values)| (column.clone(), values[row_index].clone()))
                .collect();
            table.push_row(row);
        }
    }
    Ok(table)
}

fn array_values(array: &ArrayRef) -> Result<Vec<Value>, String> {
    let len = array.len();
    let values = match array.data_type() {
        DataType::Utf8 => {
            let strings = array.as_string::<i32>();
            (0..len)
                .map(|index| {
                    non_null(array, index, || Value::String(strings.value(index).to_string()))
                })
                .collect()
        }
        DataType::LargeUtf8 => {
            let strings = array.as_string::<i64>();
            (0..len)
                .map(|index| {
                    non_null(array, index, || Value::String(strings.value(index).to_string()))
                })
                .collect()
        }
        DataType::Boolean => {
            let booleans = array.as_boolean();
            (0..len)
                .map(|index| non_null(array, index, || Value::Bool(booleans.value(index))))
                .collect()
        }
        DataType::Int8 | DataType::Int16 | DataType::Int32 | DataType::Int64 => {
            let widened = cast(array, &DataType::Int64).map_err(|error| error.to_string())?;
            let integers = widened.as_primitive::<Int64Type>();
            (0..len)
                .map(|index| non_null(array, index, || Value::from(integers.value(index))))
                .collect()
        }
        DataType::UInt8 | DataType::UInt16 | DataType::UInt32 | DataType::UInt64 => {
            let widened = cast(array, &DataType::UInt64).map_err(|error| error.to_string())?;
            let integers = widened.as_primitive::<UInt64Type>();
            (0..len)
                .map(|index| non_null(array, index, || Value::from(integers.value(index))))
                .collect()
        }
        DataType::Float16 | DataType::Float32 | DataType::Float64 => {
            let widened = cast(array, &DataType::Float64).map_err(|error| error.to_string())?;
            let floats = widened.as_primitive::<Float64Type>();
            (0..len)
                .map(|index| {
                    non_null(array, index, || {
                        Number::from_f64(floats.value(index))
                            .map(Value::Number)
                            .unwrap_or(Value::Null)
                    })
                })
                .collect()
        }
        DataType::List(_) => {
            let lists = array.as_list::<i32>();
            let mut values = Vec::with_capacity(len);
            for index in 0..len {
                values.push(if array.is_null(index) {
                    Value::Null
                } else {
                    Value::Array(array_values(&lists.value(index))?)
                });
            }
            values
        }
        DataType::LargeList(_) => {
            let lists = array.as_list::<i64>();
            let mut values = Vec::with_capacity(len);
            for index in 0..len {
                values.push(if array.is_null(index) {
                    Value::Null
                } else {
                    Value::Array(array_values(&lists.value(index))?)
                });
            }
            values
        }
        _ => {
            let formatter = ArrayFormatter::try_new(array.as_ref(), &FormatOptions::default())
                .map_err(|error| error.to_string())?;
            (0..len)
                .map(|index| {
                    non_null(array, index, || {
                        Value::String(formatter.value(index).to_string())
                    })
                })
                .collect()
        }
    };
    Ok(values)
}

fn non_null(array: &ArrayRef, index: usize, value: impl FnOnce() -> Value) -> Value {
    if array.is_null(index) {
        Value::Null
    } else {
        value()
    }
}

/// Reads a headed CSV. Values stay strings; empty cells become null and
/// unnamed (index) columns are dropped.
pub fn read_csv(body: &[u8]) -> Result<Table, String> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(body);
    let headers: Vec<String> = reader
        .headers()
        .map_err(|error| format!("Failed to read CSV header: {error}"))?
        .iter()
        .map(|header| header.trim().to_string())
        .collect();

    let mut table = Table::new(
        headers
            .iter()
            .filter(|header| !header.is_empty())
            .cloned()
            .collect(),
    );
    for (line, record) in reader.records().enumerate() {
        let record =
            record.map_err(|error| format!("Failed to read CSV record {}: {error}", line + 1))?;
        let row: Row = headers
            .iter()
            .enumerate()
            .filter(|(_, header)| !header.is_empty())
            .map(|(index, header)| {
                let value = record
                    .get(index)
                    .filter(|cell| !cell.is_empty())
                    .map_or(Value::Null, |cell| Value::String(cell.to_string()));
                (header.clone(), value)
            })
            .collect();
        table.push_row(row);
    }
    Ok(table)
}
