// ⏰ Temporal Model - point events → wide rows → validity intervals
//
// Everything in here operates on ONE entity's stream. Cross-entity ordering
// is the pipeline's concern.
//
// Three times matter:
// 1. Event time: when a field changed (ChangeEvent.timestamp)
// 2. Valid-from: when a reconstructed version became the effective state
// 3. Valid-to: when the next version took over (None = still current)

use crate::events::ChangeEvent;
use crate::fields::{Cell, TrackedField};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

// ============================================================================
// TIMESTAMPS
// ============================================================================

/// Parse a source timestamp into UTC. Naive values are taken as UTC.
///
/// Accepts, in order: RFC 3339, `2024-01-15T10:30:00.000+0000`,
/// `2024-01-15T10:30:00`, `2024-01-15 10:30:00`, `2024-01-15`.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }

    if let Ok(dt) = DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f%z") {
        return Some(dt.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }

    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Fixed-width, lexicographically sortable timestamp followed by the entity id
pub fn sort_key(timestamp: DateTime<Utc>, entity_id: &str) -> String {
    format!("{}{}", timestamp.format("%Y%m%d%H%M%S"), entity_id)
}

// ============================================================================
// WIDE ROW
// ============================================================================

/// One (entity, timestamp) state with a cell per tracked field
#[derive(Debug, Clone, PartialEq)]
pub struct WideRow {
    pub timestamp: DateTime<Utc>,
    pub cells: [Cell; TrackedField::COUNT],
}

impl WideRow {
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        WideRow {
            timestamp,
            cells: Default::default(),
        }
    }

    pub fn cell(&self, field: TrackedField) -> &Cell {
        &self.cells[field.index()]
    }

    pub fn cell_mut(&mut self, field: TrackedField) -> &mut Cell {
        &mut self.cells[field.index()]
    }
}

// ============================================================================
// PIVOT
// ============================================================================

/// Reshape point events into one row per distinct timestamp.
///
/// Events are stably sorted by timestamp first; when a field appears more than
/// once at the same timestamp, the first one in that order wins. Fields not
/// observed at a timestamp stay `Cell::Absent`.
pub fn pivot(events: &[ChangeEvent]) -> Vec<WideRow> {
    let mut ordered: Vec<&ChangeEvent> = events.iter().collect();
    ordered.sort_by_key(|e| e.timestamp);

    let mut rows: Vec<WideRow> = Vec::new();
    for event in ordered {
        let starts_row = rows.last().map_or(true, |r| r.timestamp != event.timestamp);
        if starts_row {
            rows.push(WideRow::new(event.timestamp));
        }

        if let Some(row) = rows.last_mut() {
            let cell = row.cell_mut(event.field);
            if cell.is_absent() {
                *cell = Cell::Recorded(event.new_value.clone());
            }
        }
    }

    rows
}

// ============================================================================
// FORWARD FILL
// ============================================================================

/// Carry each field's last recorded value into later rows where it is absent.
///
/// Rows must already be in timestamp order. Explicit nulls are recorded
/// values and propagate like any other; fields never recorded stay absent.
pub fn forward_fill(rows: &mut [WideRow]) {
    let mut last: [Cell; TrackedField::COUNT] = Default::default();

    for row in rows.iter_mut() {
        for (cell, carried) in row.cells.iter_mut().zip(last.iter_mut()) {
            if cell.is_absent() {
                cell.clone_from(carried);
            } else {
                carried.clone_from(cell);
            }
        }
    }
}

// ============================================================================
// VALIDITY INTERVALS
// ============================================================================

/// Valid-to for each row: the next row's valid-from, None for the last row
pub fn valid_to_sequence(rows: &[WideRow]) -> Vec<Option<DateTime<Utc>>> {
    let mut valid_to: Vec<Option<DateTime<Utc>>> =
        rows.iter().skip(1).map(|r| Some(r.timestamp)).collect();
    if !rows.is_empty() {
        valid_to.push(None);
    }
    valid_to
}

/// Whether `time` falls in the half-open interval [valid_from, valid_to)
pub fn was_valid_at(
    valid_from: DateTime<Utc>,
    valid_to: Option<DateTime<Utc>>,
    time: DateTime<Utc>,
) -> bool {
    valid_from <= time && valid_to.map_or(true, |until| until > time)
}

// ============================================================================
// TESTS
// ============================================================================
