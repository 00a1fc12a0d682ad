// 📂 Input Loading - five CSV tables into typed records
//
// Column names follow the source CRM export. Extra columns are ignored;
// missing optional columns deserialize as None.

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::fields::TrackedField;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::info;

// ============================================================================
// RAW RECORDS
// ============================================================================

/// One row of the change-event log, before any parsing
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawChangeEvent {
    #[serde(rename = "Id")]
    pub event_id: String,

    #[serde(rename = "OpportunityId")]
    pub entity_id: String,

    #[serde(rename = "Field")]
    pub field: String,

    #[serde(rename = "OldValue", default)]
    pub old_value: Option<String>,

    #[serde(rename = "NewValue", default)]
    pub new_value: Option<String>,

    #[serde(rename = "CreatedDate")]
    pub timestamp: String,

    /// Position in the source file (0-based), filled in by the loader
    #[serde(skip)]
    pub position: usize,
}

/// One row of the current-state snapshot
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawSnapshot {
    #[serde(rename = "Id")]
    pub entity_id: String,

    #[serde(rename = "ARR_Amount__c", default)]
    pub amount: Option<String>,

    #[serde(rename = "StageName", default)]
    pub stage: Option<String>,

    #[serde(rename = "CloseDate", default)]
    pub close_date: Option<String>,

    #[serde(rename = "CreatedDate")]
    pub created: String,

    #[serde(rename = "CurrencyIsoCode", default)]
    pub currency: Option<String>,

    #[serde(rename = "NextStep", default)]
    pub next_step: Option<String>,
}

impl RawSnapshot {
    /// Raw snapshot text for a tracked field
    pub fn raw_value(&self, field: TrackedField) -> Option<&str> {
        match field {
            TrackedField::Amount => self.amount.as_deref(),
            TrackedField::Stage => self.stage.as_deref(),
            TrackedField::CloseDate => self.close_date.as_deref(),
            TrackedField::Created => Some(self.created.as_str()),
            TrackedField::NextStep => self.next_step.as_deref(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawStageLookup {
    #[serde(rename = "StageName")]
    pub stage_name: String,

    #[serde(rename = "Lookup")]
    pub lookup: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawStageMetadata {
    #[serde(rename = "MasterLabel")]
    pub label: String,

    #[serde(rename = "IsWon")]
    pub is_won: String,

    #[serde(rename = "IsClosed")]
    pub is_closed: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawCurrencyRate {
    #[serde(rename = "CurrencyIsoCode")]
    pub code: String,

    #[serde(rename = "Rate")]
    pub rate: String,
}

// ============================================================================
// SNAPSHOT TABLE
// ============================================================================

/// Snapshot rows plus the tracked columns its header actually carried
#[derive(Debug, Clone, Default)]
pub struct SnapshotTable {
    pub rows: Vec<RawSnapshot>,
    pub columns: BTreeSet<TrackedField>,
}

// ============================================================================
// INPUTS
// ============================================================================

/// Everything one run reads, loaded before any stage executes
#[derive(Debug, Clone, Default)]
pub struct Inputs {
    pub stage_lookups: Vec<RawStageLookup>,
    pub stage_metadata: Vec<RawStageMetadata>,
    pub events: Vec<RawChangeEvent>,
    pub snapshot: SnapshotTable,
    pub currency_rates: Vec<RawCurrencyRate>,
}

impl Inputs {
    pub fn load(config: &PipelineConfig) -> Result<Self> {
        let path = config.stage_lookups_path();
        info!(path = %path.display(), "loading stage lookups");
        let stage_lookups = load_stage_lookups(&path)?;

        let path = config.stage_metadata_path();
        info!(path = %path.display(), "loading stage metadata");
        let stage_metadata = load_stage_metadata(&path)?;

        let path = config.field_history_path();
        info!(path = %path.display(), "loading field history");
        let events = load_change_events(&path)?;

        let path = config.snapshot_path();
        info!(path = %path.display(), "loading opportunity snapshot");
        let snapshot = load_snapshot(&path)?;

        let path = config.currency_path();
        info!(path = %path.display(), "loading currency rates");
        let currency_rates = load_currency_rates(&path)?;

        info!(
            stage_lookups = stage_lookups.len(),
            stage_metadata = stage_metadata.len(),
            events = events.len(),
            snapshot_rows = snapshot.rows.len(),
            currency_rates = currency_rates.len(),
            "inputs loaded"
        );

        Ok(Inputs {
            stage_lookups,
            stage_metadata,
            events,
            snapshot,
            currency_rates,
        })
    }
}

// ============================================================================
// LOADERS
// ============================================================================

pub fn load_change_events(path: &Path) -> Result<Vec<RawChangeEvent>> {
    read_change_events(open(path)?, path)
}

pub fn load_snapshot(path: &Path) -> Result<SnapshotTable> {
    read_snapshot(open(path)?, path)
}

pub fn load_stage_lookups(path: &Path) -> Result<Vec<RawStageLookup>> {
    read_records(open(path)?, path, &["StageName", "Lookup"]).map(|(_, rows)| rows)
}

pub fn load_stage_metadata(path: &Path) -> Result<Vec<RawStageMetadata>> {
    read_records(open(path)?, path, &["MasterLabel", "IsWon", "IsClosed"]).map(|(_, rows)| rows)
}

pub fn load_currency_rates(path: &Path) -> Result<Vec<RawCurrencyRate>> {
    read_records(open(path)?, path, &["CurrencyIsoCode", "Rate"]).map(|(_, rows)| rows)
}

pub fn read_change_events<R: Read>(reader: R, path: &Path) -> Result<Vec<RawChangeEvent>> {
    let (_, mut events): (_, Vec<RawChangeEvent>) = read_records(
        reader,
        path,
        &["Id", "OpportunityId", "Field", "CreatedDate"],
    )?;

    for (position, event) in events.iter_mut().enumerate() {
        event.position = position;
    }

    Ok(events)
}

pub fn read_snapshot<R: Read>(reader: R, path: &Path) -> Result<SnapshotTable> {
    let (headers, rows) = read_records(reader, path, &["Id", "CreatedDate"])?;

    let columns = TrackedField::ALL
        .iter()
        .copied()
        .filter(|f| headers.iter().any(|h| h == f.snapshot_column()))
        .collect();

    Ok(SnapshotTable { rows, columns })
}

fn open(path: &Path) -> Result<File> {
    File::open(path).map_err(|source| PipelineError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn read_records<R: Read, T: DeserializeOwned>(
    reader: R,
    path: &Path,
    required: &[&str],
) -> Result<(Vec<String>, Vec<T>)> {
    let csv_error = |source| PipelineError::Csv {
        path: path.to_path_buf(),
        source,
    };

    let mut rdr = csv::Reader::from_reader(reader);
    let headers: Vec<String> = rdr
        .headers()
        .map_err(csv_error)?
        .iter()
        .map(str::to_string)
        .collect();

    if let Some(column) = required.iter().find(|c| !headers.iter().any(|h| h == *c)) {
        return Err(PipelineError::MissingColumn {
            path: path.to_path_buf(),
            column: column.to_string(),
        });
    }

    let mut rows = Vec::new();
    for result in rdr.deserialize() {
        rows.push(result.map_err(csv_error)?);
    }

    Ok((headers, rows))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn path() -> &'static Path {
        Path::new("test.csv")
    }

    #[test]
    fn test_read_change_events_with_empty_values() {
        let csv = "Id,OpportunityId,Field,OldValue,NewValue,CreatedDate\n\
                   H2,E1,StageName,Open,Won,2024-02-01\n\
                   H1,E1,created,,,2024-01-01\n";

        let events = read_change_events(csv.as_bytes(), path()).unwrap();

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_id, "H2");
        assert_eq!(events[0].old_value.as_deref(), Some("Open"));
        assert_eq!(events[0].position, 0);
        assert_eq!(events[1].old_value, None);
        assert_eq!(events[1].new_value, None);
        assert_eq!(events[1].position, 1);
    }

    #[test]
    fn test_read_change_events_missing_required_column() {
        let csv = "Id,Field,OldValue,NewValue,CreatedDate\nH1,StageName,,Open,2024-01-01\n";

        let err = read_change_events(csv.as_bytes(), path()).unwrap_err();

        match err {
            PipelineError::MissingColumn { column, .. } => assert_eq!(column, "OpportunityId"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_read_snapshot_tracks_present_columns() {
        let csv = "Id,StageName,CreatedDate,CurrencyIsoCode,Extra\n\
                   E1,Open,2024-01-01,USD,ignored\n";

        let table = read_snapshot(csv.as_bytes(), path()).unwrap();

        assert_eq!(table.rows.len(), 1);
        assert!(table.columns.contains(&TrackedField::Stage));
        assert!(table.columns.contains(&TrackedField::Created));
        assert!(!table.columns.contains(&TrackedField::Amount));
        assert!(!table.columns.contains(&TrackedField::NextStep));

        let row = &table.rows[0];
        assert_eq!(row.raw_value(TrackedField::Stage), Some("Open"));
        assert_eq!(row.raw_value(TrackedField::Amount), None);
        assert_eq!(row.currency.as_deref(), Some("USD"));
    }

    #[test]
    fn test_read_snapshot_requires_created_date() {
        let csv = "Id,StageName\nE1,Open\n";

        assert!(matches!(
            read_snapshot(csv.as_bytes(), path()),
            Err(PipelineError::MissingColumn { .. })
        ));
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let err = load_currency_rates(Path::new("/nonexistent/currency.csv")).unwrap_err();
        assert!(matches!(err, PipelineError::Io { .. }));
    }
}
