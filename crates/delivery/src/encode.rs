//! Object body encoders
//!
//! - processed/raw rows: newline-delimited payloads
//! - failed records: newline-delimited JSON envelopes
//! - columnar: Parquet (Snappy)

use arrow::record_batch::RecordBatch;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::{BufMut, Bytes, BytesMut};
use contracts::{ContractError, Record, RejectedRecord};
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use serde::Serialize;

/// Envelope written for every failed record.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FailedEnvelope<'a> {
    attempts_made: u32,
    /// Epoch milliseconds
    arrival_timestamp: i64,
    sequence_number: String,
    error_code: &'a str,
    error_message: &'a str,
    error_output_type: &'static str,
    raw_data: String,
}

/// One payload per line. A payload already ending in `\n` is not doubled.
pub fn encode_rows(records: &[Record]) -> Bytes {
    let capacity = records.iter().map(|r| r.size_bytes() + 1).sum();
    let mut body = BytesMut::with_capacity(capacity);
    for record in records {
        body.put_slice(&record.payload);
        if !record.payload.ends_with(b"\n") {
            body.put_u8(b'\n');
        }
    }
    body.freeze()
}

pub fn encode_rejected(records: &[RejectedRecord]) -> Result<Bytes, ContractError> {
    let mut body = Vec::new();
    for rejected in records {
        let envelope = FailedEnvelope {
            attempts_made: rejected.attempts,
            arrival_timestamp: rejected.record.arrival.timestamp_millis(),
            sequence_number: rejected.record.sequence.to_string(),
            error_code: &rejected.error_code,
            error_message: &rejected.message,
            error_output_type: rejected.error_type.as_str(),
            raw_data: STANDARD.encode(&rejected.record.payload),
        };
        serde_json::to_writer(&mut body, &envelope)
            .map_err(|e| ContractError::encode(format!("failed envelope: {e}")))?;
        body.push(b'\n');
    }
    Ok(Bytes::from(body))
}

pub fn encode_parquet(block: &RecordBatch) -> Result<Bytes, ContractError> {
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();
    let mut writer = ArrowWriter::try_new(Vec::new(), block.schema(), Some(props))
        .map_err(|e| ContractError::encode(format!("parquet writer: {e}")))?;
    writer
        .write(block)
        .map_err(|e| ContractError::encode(format!("parquet write: {e}")))?;
    let body = writer
        .into_inner()
        .map_err(|e| ContractError::encode(format!("parquet close: {e}")))?;
    Ok(Bytes::from(body))
}
