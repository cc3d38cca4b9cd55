//! Format Converter - JSON rows into an Arrow record batch
//!
//! Coercion only widens: a value that would lose information under the
//! declared column type is a `SchemaMismatch`. Rows are converted all or
//! nothing, so a rejected row never leaves a partial entry in any column.

use std::sync::Arc;

use arrow::array::{
    ArrayRef, BooleanBuilder, Float64Builder, Int64Builder, StringBuilder,
    TimestampMillisecondBuilder,
};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};
use arrow::record_batch::RecordBatch;
use chrono::DateTime;
use contracts::{
    Batch, ColumnSpec, ColumnType, ContractError, ConversionErrorPolicy, ErrorOutputType, Record,
    RejectedRecord,
};
use serde_json::{Map, Value};
use tracing::{debug, instrument};

const TIMESTAMP_TZ: &str = "UTC";

// i64::MIN and i64::MAX + 1 are both exact in f64.
const I64_LOWER: f64 = -9_223_372_036_854_775_808.0;
const I64_UPPER: f64 = 9_223_372_036_854_775_808.0;

/// Result of converting one processed batch.
#[derive(Debug)]
pub struct Conversion {
    /// Converted rows, `None` when nothing converted
    pub block: Option<RecordBatch>,
    /// Records routed to `format-conversion-failed`
    pub rejected: Vec<RejectedRecord>,
}

impl Conversion {
    pub fn rows(&self) -> usize {
        self.block.as_ref().map_or(0, RecordBatch::num_rows)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Cell {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

enum ColumnBuilder {
    Boolean(BooleanBuilder),
    Int64(Int64Builder),
    Float64(Float64Builder),
    Utf8(StringBuilder),
    Timestamp(TimestampMillisecondBuilder),
}

impl ColumnBuilder {
    fn new(column_type: ColumnType, capacity: usize) -> Self {
        match column_type {
            ColumnType::Boolean => Self::Boolean(BooleanBuilder::with_capacity(capacity)),
            ColumnType::Int64 => Self::Int64(Int64Builder::with_capacity(capacity)),
            ColumnType::Float64 => Self::Float64(Float64Builder::with_capacity(capacity)),
            ColumnType::String => Self::Utf8(StringBuilder::with_capacity(capacity, capacity * 16)),
            ColumnType::Timestamp => Self::Timestamp(
                TimestampMillisecondBuilder::with_capacity(capacity).with_timezone(TIMESTAMP_TZ),
            ),
        }
    }

    fn append(&mut self, cell: Cell) {
        match (self, cell) {
            (Self::Boolean(b), Cell::Bool(v)) => b.append_value(v),
            (Self::Int64(b), Cell::Int(v)) => b.append_value(v),
            (Self::Float64(b), Cell::Float(v)) => b.append_value(v),
            (Self::Utf8(b), Cell::Text(v)) => b.append_value(v),
            (Self::Timestamp(b), Cell::Int(v)) => b.append_value(v),
            (Self::Boolean(b), _) => b.append_null(),
            (Self::Int64(b), _) => b.append_null(),
            (Self::Float64(b), _) => b.append_null(),
            (Self::Utf8(b), _) => b.append_null(),
            (Self::Timestamp(b), _) => b.append_null(),
        }
    }

    fn finish(&mut self) -> ArrayRef {
        match self {
            Self::Boolean(b) => Arc::new(b.finish()),
            Self::Int64(b) => Arc::new(b.finish()),
            Self::Float64(b) => Arc::new(b.finish()),
            Self::Utf8(b) => Arc::new(b.finish()),
            Self::Timestamp(b) => Arc::new(b.finish()),
        }
    }
}

/// Schema-driven row to columnar converter.
#[derive(Debug, Clone)]
pub struct FormatConverter {
    columns: Vec<ColumnSpec>,
    schema: SchemaRef,
    policy: ConversionErrorPolicy,
}

impl FormatConverter {
    pub fn new(columns: &[ColumnSpec], policy: ConversionErrorPolicy) -> Self {
        let fields: Vec<Field> = columns
            .iter()
            .map(|c| Field::new(c.name.as_str(), arrow_type(c.column_type), c.nullable))
            .collect();
        Self {
            columns: columns.to_vec(),
            schema: Arc::new(Schema::new(fields)),
            policy,
        }
    }

    pub fn schema(&self) -> SchemaRef {
        Arc::clone(&self.schema)
    }

    /// Convert a processed batch.
    ///
    /// Rows that fail coercion come back as rejected records; under
    /// `fail_batch` the first failure rejects every record of the batch.
    ///
    /// # Errors
    /// `Encode` if Arrow refuses the assembled columns.
    #[instrument(name = "convert_batch", skip(self, batch), fields(stream = %batch.stream, records = batch.len()))]
    pub fn convert(&self, batch: &Batch) -> Result<Conversion, ContractError> {
        let mut rows = Vec::with_capacity(batch.len());
        let mut rejected = Vec::new();

        for record in &batch.records {
            match self.coerce_row(&record.payload) {
                Ok(cells) => rows.push(cells),
                Err(e) if self.policy == ConversionErrorPolicy::FailBatch => {
                    let rejected: Vec<RejectedRecord> = batch
                        .records
                        .iter()
                        .map(|r| conversion_reject(r, &e))
                        .collect();
                    debug!(stream = %batch.stream, error = %e, "batch failed conversion");
                    observability::record_conversion_rejects(&batch.stream, rejected.len());
                    return Ok(Conversion {
                        block: None,
                        rejected,
                    });
                }
                Err(e) => rejected.push(conversion_reject(record, &e)),
            }
        }

        if !rejected.is_empty() {
            debug!(stream = %batch.stream, rejected = rejected.len(), "rows failed conversion");
            observability::record_conversion_rejects(&batch.stream, rejected.len());
        }
        if rows.is_empty() {
            return Ok(Conversion {
                block: None,
                rejected,
            });
        }

        let mut builders: Vec<ColumnBuilder> = self
            .columns
            .iter()
            .map(|c| ColumnBuilder::new(c.column_type, rows.len()))
            .collect();
        for cells in rows {
            for (builder, cell) in builders.iter_mut().zip(cells) {
                builder.append(cell);
            }
        }
        let arrays: Vec<ArrayRef> = builders.iter_mut().map(ColumnBuilder::finish).collect();
        let block = RecordBatch::try_new(self.schema(), arrays)
            .map_err(|e| ContractError::encode(format!("record batch assembly failed: {e}")))?;

        Ok(Conversion {
            block: Some(block),
            rejected,
        })
    }

    fn coerce_row(&self, payload: &[u8]) -> Result<Vec<Cell>, ContractError> {
        let value: Value = serde_json::from_slice(payload)
            .map_err(|e| ContractError::schema_mismatch("$", format!("payload is not JSON: {e}")))?;
        let Value::Object(row) = value else {
            return Err(ContractError::schema_mismatch("$", "row is not a JSON object"));
        };
        self.columns.iter().map(|c| coerce_cell(c, &row)).collect()
    }
}

fn arrow_type(column_type: ColumnType) -> DataType {
    match column_type {
        ColumnType::Boolean => DataType::Boolean,
        ColumnType::Int64 => DataType::Int64,
        ColumnType::Float64 => DataType::Float64,
        ColumnType::String => DataType::Utf8,
        ColumnType::Timestamp => DataType::Timestamp(TimeUnit::Millisecond, Some(TIMESTAMP_TZ.into())),
    }
}

fn conversion_reject(record: &Record, error: &ContractError) -> RejectedRecord {
    RejectedRecord::new(
        record.clone(),
        ErrorOutputType::FormatConversionFailed,
        error.code(),
        error.to_string(),
        1,
    )
}

fn coerce_cell(column: &ColumnSpec, row: &Map<String, Value>) -> Result<Cell, ContractError> {
    let mismatch = |message: String| ContractError::schema_mismatch(column.name.as_str(), message);

    let value = match row.get(&column.name) {
        None | Some(Value::Null) if column.nullable => return Ok(Cell::Null),
        None | Some(Value::Null) => return Err(mismatch("missing value for non-nullable column".into())),
        Some(value) => value,
    };

    match (column.column_type, value) {
        (ColumnType::Boolean, Value::Bool(b)) => Ok(Cell::Bool(*b)),
        (ColumnType::Int64, Value::Number(n)) => {
            if let Some(i) = n.as_i64() {
                return Ok(Cell::Int(i));
            }
            if n.is_u64() {
                return Err(mismatch(format!("{n} is outside the int64 range")));
            }
            match n.as_f64() {
                Some(f) if f.fract() == 0.0 && (I64_LOWER..I64_UPPER).contains(&f) => {
                    Ok(Cell::Int(f as i64))
                }
                _ => Err(mismatch(format!("{n} is not an integer"))),
            }
        }
        (ColumnType::Float64, Value::Number(n)) => n
            .as_f64()
            .map(Cell::Float)
            .ok_or_else(|| mismatch(format!("{n} is not representable as float64"))),
        (ColumnType::String, Value::String(s)) => Ok(Cell::Text(s.clone())),
        (ColumnType::String, Value::Number(n)) => Ok(Cell::Text(n.to_string())),
        (ColumnType::String, Value::Bool(b)) => Ok(Cell::Text(b.to_string())),
        (ColumnType::Timestamp, Value::Number(n)) => n
            .as_i64()
            .map(Cell::Int)
            .ok_or_else(|| mismatch(format!("{n} is not integer epoch milliseconds"))),
        (ColumnType::Timestamp, Value::String(s)) => DateTime::parse_from_rfc3339(s)
            .map(|t| Cell::Int(t.timestamp_millis()))
            .map_err(|e| mismatch(format!("'{s}' is not RFC 3339: {e}"))),
        (column_type, other) => Err(mismatch(format!(
            "cannot coerce {} to {column_type:?}",
            json_kind(other)
        ))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Array, BooleanArray, Float64Array, Int64Array, StringArray, TimestampMillisecondArray};
    use chrono::Utc;
    use contracts::{BatchKind, FlushTrigger, SequenceToken};

    fn schema() -> Vec<ColumnSpec> {
        vec![
            ColumnSpec::new("id", ColumnType::Int64, false),
            ColumnSpec::new("ok", ColumnType::Boolean, true),
            ColumnSpec::new("latency", ColumnType::Float64, true),
            ColumnSpec::new("path", ColumnType::String, true),
            ColumnSpec::new("ts", ColumnType::Timestamp, true),
        ]
    }

    fn batch(rows: &[&str]) -> Batch {
        let records = rows
            .iter()
            .enumerate()
            .map(|(i, r)| Record::new(r.to_string(), Utc::now(), SequenceToken(i as u64)))
            .collect();
        Batch::new("s".into(), BatchKind::Processed, Utc::now(), FlushTrigger::Size, records)
    }

    fn converter(policy: ConversionErrorPolicy) -> FormatConverter {
        FormatConverter::new(&schema(), policy)
    }

    #[test]
    fn test_coercion_table() {
        let conv = converter(ConversionErrorPolicy::RejectRecord);
        let out = conv
            .convert(&batch(&[
                r#"{"id": 1, "ok": true, "latency": 3, "path": 200, "ts": 1700000000000}"#,
                r#"{"id": 2.0, "latency": 1.5, "path": false, "ts": "2024-01-01T00:00:00Z", "extra": [1]}"#,
            ]))
            .unwrap();
        assert!(out.rejected.is_empty());
        let block = out.block.unwrap();
        assert_eq!(block.num_rows(), 2);

        let ids = block.column(0).as_any().downcast_ref::<Int64Array>().unwrap();
        assert_eq!(ids.values().to_vec(), vec![1, 2]);
        let ok = block.column(1).as_any().downcast_ref::<BooleanArray>().unwrap();
        assert!(ok.value(0));
        assert!(ok.is_null(1));
        let latency = block.column(2).as_any().downcast_ref::<Float64Array>().unwrap();
        assert_eq!(latency.value(0), 3.0);
        let path = block.column(3).as_any().downcast_ref::<StringArray>().unwrap();
        assert_eq!(path.value(0), "200");
        assert_eq!(path.value(1), "false");
        let ts = block
            .column(4)
            .as_any()
            .downcast_ref::<TimestampMillisecondArray>()
            .unwrap();
        assert_eq!(ts.value(0), 1_700_000_000_000);
        assert_eq!(ts.value(1), 1_704_067_200_000);
    }

    #[test]
    fn test_lossy_values_rejected() {
        let conv = converter(ConversionErrorPolicy::RejectRecord);
        let out = conv
            .convert(&batch(&[
                r#"{"id": 1.5}"#,
                r#"{"id": "7"}"#,
                r#"{"id": 18446744073709551615}"#,
                r#"{"id": 3, "ok": "yes"}"#,
                r#"{"id": 4, "ts": "yesterday"}"#,
                r#"{"id": 5}"#,
            ]))
            .unwrap();
        assert_eq!(out.rows(), 1);
        assert_eq!(out.rejected.len(), 5);
        assert!(out.rejected.iter().all(|r| {
            r.error_type == ErrorOutputType::FormatConversionFailed && r.error_code == "SchemaMismatch"
        }));
    }

    #[test]
    fn test_null_only_for_nullable() {
        let conv = converter(ConversionErrorPolicy::RejectRecord);
        let out = conv
            .convert(&batch(&[r#"{"id": null}"#, r#"{"ok": true}"#, r#"{"id": 9, "ok": null}"#]))
            .unwrap();
        assert_eq!(out.rows(), 1);
        assert_eq!(out.rejected.len(), 2);
    }

    #[test]
    fn test_non_json_and_non_object_rows() {
        let conv = converter(ConversionErrorPolicy::RejectRecord);
        let out = conv.convert(&batch(&["not json", "[1,2,3]"])).unwrap();
        assert!(out.block.is_none());
        assert_eq!(out.rejected.len(), 2);
    }

    #[test]
    fn test_fail_batch_reroutes_everything() {
        let conv = converter(ConversionErrorPolicy::FailBatch);
        let out = conv
            .convert(&batch(&[r#"{"id": 1}"#, r#"{"id": "x"}"#, r#"{"id": 3}"#]))
            .unwrap();
        assert!(out.block.is_none());
        let seqs: Vec<u64> = out.rejected.iter().map(|r| r.record.sequence.value()).collect();
        assert_eq!(seqs, vec![0, 1, 2]);
    }

    #[test]
    fn test_schema_fields_follow_columns() {
        let conv = converter(ConversionErrorPolicy::RejectRecord);
        let schema = conv.schema();
        assert_eq!(schema.fields().len(), 5);
        assert!(!schema.field(0).is_nullable());
        assert_eq!(schema.field(3).data_type(), &DataType::Utf8);
    }
}
