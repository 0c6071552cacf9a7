use std::{collections::HashSet, sync::Arc};

use arrow::array::{ArrayRef, BooleanBuilder, Float64Builder, Int64Builder, StringBuilder};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use error_stack::{Result, ResultExt};
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use serde_json::Value;

use crate::fetch::RawTransactionRecord;

use super::ArchiveError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Boolean,
    Int64,
    Float64,
    Utf8,
}

/// Serialize raw records to a single parquet file.
///
/// Columns are the union of the record keys, in first-seen order. A column
/// is typed only if all its non-null values share a primitive type;
/// anything else is stored as text, with non-string values as JSON.
pub fn raw_records_to_parquet(records: &[RawTransactionRecord]) -> Result<Bytes, ArchiveError> {
    let batch = raw_records_to_batch(records)?;

    let properties = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();

    let mut data = Vec::new();
    let mut writer = ArrowWriter::try_new(&mut data, batch.schema(), Some(properties))
        .change_context(ArchiveError::Serialization)
        .attach_printable("failed to create parquet writer")?;

    writer
        .write(&batch)
        .change_context(ArchiveError::Serialization)
        .attach_printable("failed to write record batch")?;

    writer
        .close()
        .change_context(ArchiveError::Serialization)
        .attach_printable("failed to close parquet file")?;

    Ok(Bytes::from(data))
}

fn raw_records_to_batch(records: &[RawTransactionRecord]) -> Result<RecordBatch, ArchiveError> {
    let mut seen = HashSet::new();
    let mut names = Vec::new();
    for record in records {
        for key in record.as_map().keys() {
            if seen.insert(key.as_str()) {
                names.push(key.as_str());
            }
        }
    }

    let mut fields = Vec::with_capacity(names.len());
    let mut columns = Vec::with_capacity(names.len());

    for name in names {
        let values = records
            .iter()
            .map(|record| record.get(name).filter(|value| !value.is_null()))
            .collect::<Vec<_>>();

        let kind = column_kind(&values);
        let (data_type, column) = build_column(kind, &values);

        fields.push(Field::new(name, data_type, true));
        columns.push(column);
    }

    RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)
        .change_context(ArchiveError::Serialization)
        .attach_printable("failed to build record batch")
}

fn column_kind(values: &[Option<&Value>]) -> ColumnKind {
    let present = values.iter().flatten().collect::<Vec<_>>();
    if present.is_empty() {
        return ColumnKind::Utf8;
    }

    if present.iter().all(|value| value.is_boolean()) {
        ColumnKind::Boolean
    } else if present.iter().all(|value| value.is_i64()) {
        ColumnKind::Int64
    } else if present.iter().all(|value| value.is_number()) {
        ColumnKind::Float64
    } else {
        ColumnKind::Utf8
    }
}

fn build_column(kind: ColumnKind, values: &[Option<&Value>]) -> (DataType, ArrayRef) {
    match kind {
        ColumnKind::Boolean => {
            let mut builder = BooleanBuilder::with_capacity(values.len());
            for value in values {
                builder.append_option(value.and_then(Value::as_bool));
            }
            (DataType::Boolean, Arc::new(builder.finish()) as ArrayRef)
        }
        ColumnKind::Int64 => {
            let mut builder = Int64Builder::with_capacity(values.len());
            for value in values {
                builder.append_option(value.and_then(Value::as_i64));
            }
            (DataType::Int64, Arc::new(builder.finish()) as ArrayRef)
        }
        ColumnKind::Float64 => {
            let mut builder = Float64Builder::with_capacity(values.len());
            for value in values {
                builder.append_option(value.and_then(Value::as_f64));
            }
            (DataType::Float64, Arc::new(builder.finish()) as ArrayRef)
        }
        ColumnKind::Utf8 => {
            let mut builder = StringBuilder::new();
            for value in values {
                match value {
                    None => builder.append_null(),
                    Some(Value::String(s)) => builder.append_value(s),
                    Some(other) => builder.append_value(other.to_string()),
                }
            }
            (DataType::Utf8, Arc::new(builder.finish()) as ArrayRef)
        }
    }
}
