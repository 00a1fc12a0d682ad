//! Parquet export of the reconstructed version table.
//!
//! Column names are the contract with downstream reporting and follow the
//! names the history job has always published. The monetary column is written
//! twice, under its internal and its display name.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{
    ArrayRef, BooleanArray, Float64Array, Int64Array, StringArray, TimestampMicrosecondArray,
};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, Utc};
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use parquet::format::KeyValue;
use sha2::{Digest, Sha256};

use crate::error::{PipelineError, Result};
use crate::versions::VersionRow;

pub const COL_ENTITY_ID: &str = "OpportunityId";
pub const COL_VALID_FROM: &str = "CreatedDate";
pub const COL_AMOUNT: &str = "AmountUSD";
pub const COL_CLOSE_DATE: &str = "CloseDate";
pub const COL_STAGE: &str = "StageName";
pub const COL_NEXT_STEP: &str = "NextStep";
pub const COL_SORT_KEY: &str = "Opportunity History Sort Key";
pub const COL_VALID_TO: &str = "ValidToDate";
pub const COL_IS_LAST: &str = "Is Last Update";
pub const COL_IS_WON: &str = "IsWon";
pub const COL_IS_CLOSED: &str = "IsClosed";
pub const COL_ENTITY_CREATED: &str = "Opportunity Created Date";
pub const COL_IS_LOST: &str = "Stage IsLost";
pub const COL_IS_DQ: &str = "Stage IsDQ";
pub const COL_AMOUNT_DISPLAY: &str = "Amount USD";

// ============================================================================
// Schema
// ============================================================================

fn timestamp_type() -> DataType {
    DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into()))
}

pub fn version_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new(COL_ENTITY_ID, DataType::Utf8, false),
        Field::new(COL_VALID_FROM, timestamp_type(), false),
        Field::new(COL_AMOUNT, DataType::Float64, true),
        Field::new(COL_CLOSE_DATE, DataType::Utf8, true),
        Field::new(COL_STAGE, DataType::Utf8, true),
        Field::new(COL_NEXT_STEP, DataType::Utf8, true),
        Field::new(COL_SORT_KEY, DataType::Utf8, false),
        Field::new(COL_VALID_TO, timestamp_type(), true),
        Field::new(COL_IS_LAST, DataType::Int64, false),
        Field::new(COL_IS_WON, DataType::Boolean, true),
        Field::new(COL_IS_CLOSED, DataType::Boolean, true),
        Field::new(COL_ENTITY_CREATED, timestamp_type(), true),
        Field::new(COL_IS_LOST, DataType::Boolean, true),
        Field::new(COL_IS_DQ, DataType::Boolean, true),
        Field::new(COL_AMOUNT_DISPLAY, DataType::Float64, true),
    ]))
}

// ============================================================================
// Encoding
// ============================================================================

fn micros(ts: Option<DateTime<Utc>>) -> Option<i64> {
    ts.map(|t| t.timestamp_micros())
}

fn timestamps(values: Vec<Option<i64>>) -> ArrayRef {
    Arc::new(TimestampMicrosecondArray::from(values).with_timezone("UTC"))
}

fn strings<'a>(values: impl Iterator<Item = Option<&'a str>>) -> ArrayRef {
    Arc::new(StringArray::from(values.collect::<Vec<_>>()))
}

fn flags(values: impl Iterator<Item = Option<bool>>) -> ArrayRef {
    Arc::new(BooleanArray::from(values.collect::<Vec<_>>()))
}

/// Build the single record batch holding every version row.
pub fn to_record_batch(rows: &[VersionRow]) -> Result<RecordBatch> {
    let amounts: ArrayRef = Arc::new(Float64Array::from(
        rows.iter().map(|r| r.amount).collect::<Vec<_>>(),
    ));

    let columns: Vec<ArrayRef> = vec![
        strings(rows.iter().map(|r| Some(r.entity_id.as_str()))),
        timestamps(rows.iter().map(|r| micros(Some(r.valid_from))).collect()),
        Arc::clone(&amounts),
        strings(rows.iter().map(|r| r.close_date.as_deref())),
        strings(rows.iter().map(|r| r.stage.as_deref())),
        strings(rows.iter().map(|r| r.next_step.as_deref())),
        strings(rows.iter().map(|r| Some(r.sort_key.as_str()))),
        timestamps(rows.iter().map(|r| micros(r.valid_to)).collect()),
        Arc::new(Int64Array::from(
            rows.iter().map(|r| r.is_last_update).collect::<Vec<_>>(),
        )),
        flags(rows.iter().map(|r| r.is_won)),
        flags(rows.iter().map(|r| r.is_closed)),
        timestamps(rows.iter().map(|r| micros(r.entity_created)).collect()),
        flags(rows.iter().map(|r| r.is_lost)),
        flags(rows.iter().map(|r| r.is_disqualified)),
        amounts,
    ];

    RecordBatch::try_new(version_schema(), columns)
        .map_err(|e| PipelineError::parquet(format!("record batch build failed: {e}")))
}

// ============================================================================
// Writer Properties
// ============================================================================

fn writer_properties() -> WriterProperties {
    let created_by = KeyValue {
        key: "created_by".to_string(),
        value: Some("opportunity-history".to_string()),
    };
    WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .set_key_value_metadata(Some(vec![created_by]))
        .build()
}

/// Encode rows as a complete Parquet file in memory.
///
/// # Errors
///
/// Returns an error if Arrow or Parquet serialization fails.
pub fn encode_parquet(rows: &[VersionRow]) -> Result<Vec<u8>> {
    let batch = to_record_batch(rows)?;

    let mut buffer = Vec::new();
    let mut writer = ArrowWriter::try_new(&mut buffer, version_schema(), Some(writer_properties()))
        .map_err(|e| PipelineError::parquet(format!("parquet writer init failed: {e}")))?;
    writer
        .write(&batch)
        .map_err(|e| PipelineError::parquet(format!("parquet write failed: {e}")))?;
    writer
        .close()
        .map_err(|e| PipelineError::parquet(format!("parquet close failed: {e}")))?;

    Ok(buffer)
}

/// Hex SHA-256 of the encoded file
pub fn digest(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Write rows to `path`, replacing any previous output only once the new file
/// is complete. Returns the file's SHA-256.
///
/// # Errors
///
/// Returns an error if encoding fails or the file cannot be written.
pub fn write_parquet(rows: &[VersionRow], path: &Path) -> Result<String> {
    let bytes = encode_parquet(rows)?;
    let staging = staging_path(path);

    let io_error = |source| PipelineError::Io {
        path: path.to_path_buf(),
        source,
    };
    fs::write(&staging, &bytes).map_err(io_error)?;
    if let Err(source) = fs::rename(&staging, path) {
        let _ = fs::remove_file(&staging);
        return Err(io_error(source));
    }

    Ok(digest(&bytes))
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".partial");
    path.with_file_name(name)
}

// ============================================================================
// Tests
// ============================================================================
