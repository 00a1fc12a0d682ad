// 🔍 Event Normalizer - one surviving event per (field, timestamp)
//
// Operates on a single entity's raw log rows. Duplicates on the dedup key are
// resolved by arrival order: event id (lexicographic), then file position.

use crate::error::EntityError;
use crate::fields::{FieldValue, TrackedField};
use crate::loader::RawChangeEvent;
use crate::temporal::parse_timestamp;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// EVENT ORIGIN
// ============================================================================

/// Where an event came from. Ordering is tie-break priority: lower wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EventOrigin {
    /// Observed in the change-event log
    Recorded,

    /// Snapshot value standing in for a field that never changed
    GapFill,

    /// Initial state inferred from the first recorded transition's old value
    Anchor,
}

impl EventOrigin {
    pub fn is_synthetic(&self) -> bool {
        !matches!(self, EventOrigin::Recorded)
    }
}

// ============================================================================
// CHANGE EVENT
// ============================================================================

/// One mutation of a single field. The entity id is the partition key and is
/// not repeated on every event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub field: TrackedField,
    pub old_value: FieldValue,
    pub new_value: FieldValue,
    pub timestamp: DateTime<Utc>,
    pub origin: EventOrigin,
}

// ============================================================================
// NORMALIZER
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct NormalizedEvents {
    /// Sorted by (timestamp, field), unique on that key
    pub events: Vec<ChangeEvent>,
    pub duplicates_collapsed: usize,
    pub untracked_dropped: usize,
}

/// Parse and dedup one entity's raw log rows.
///
/// Fails the entity on the first unparsable timestamp rather than guessing.
pub fn normalize_events(raw: &[&RawChangeEvent]) -> Result<NormalizedEvents, EntityError> {
    let mut untracked_dropped = 0;
    let mut parsed = Vec::with_capacity(raw.len());

    for row in raw {
        let Some(field) = TrackedField::from_name(&row.field) else {
            untracked_dropped += 1;
            continue;
        };

        let timestamp =
            parse_timestamp(&row.timestamp).ok_or_else(|| EntityError::MalformedTimestamp {
                value: row.timestamp.clone(),
                context: format!("event {}", row.event_id),
            })?;

        parsed.push((field, timestamp, *row));
    }

    // Ascending by arrival within each key, so the last of a run is kept
    parsed.sort_by(|a, b| {
        (a.1, a.0, &a.2.event_id, a.2.position).cmp(&(b.1, b.0, &b.2.event_id, b.2.position))
    });

    let total = parsed.len();
    let mut events: Vec<ChangeEvent> = Vec::with_capacity(total);
    for (field, timestamp, row) in parsed {
        let event = ChangeEvent {
            field,
            old_value: FieldValue::from_raw(row.old_value.clone()),
            new_value: FieldValue::from_raw(row.new_value.clone()),
            timestamp,
            origin: EventOrigin::Recorded,
        };

        match events.last_mut() {
            Some(prev) if prev.field == field && prev.timestamp == timestamp => *prev = event,
            _ => events.push(event),
        }
    }

    Ok(NormalizedEvents {
        duplicates_collapsed: total - events.len(),
        untracked_dropped,
        events,
    })
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn raw(
        id: &str,
        field: &str,
        old: Option<&str>,
        new: Option<&str>,
        at: &str,
    ) -> RawChangeEvent {
        RawChangeEvent {
            event_id: id.to_string(),
            entity_id: "E1".to_string(),
            field: field.to_string(),
            old_value: old.map(str::to_string),
            new_value: new.map(str::to_string),
            timestamp: at.to_string(),
            position: 0,
        }
    }

    #[test]
    fn test_keeps_highest_arrival_per_key() {
        let rows = vec![
            raw("H3", "StageName", Some("Open"), Some("Late"), "2024-02-01"),
            raw("H1", "StageName", Some("Open"), Some("Early"), "2024-02-01"),
            raw("H2", "StageName", Some("Open"), Some("Middle"), "2024-02-01"),
        ];
        let refs: Vec<&RawChangeEvent> = rows.iter().collect();

        let normalized = normalize_events(&refs).unwrap();

        assert_eq!(normalized.events.len(), 1);
        assert_eq!(normalized.duplicates_collapsed, 2);
        assert_eq!(
            normalized.events[0].new_value,
            FieldValue::Value("Late".to_string())
        );
    }

    #[test]
    fn test_file_position_breaks_event_id_ties() {
        let mut first = raw("H1", "NextStep", None, Some("call"), "2024-02-01");
        first.position = 7;
        let mut second = raw("H1", "NextStep", None, Some("email"), "2024-02-01");
        second.position = 3;

        let normalized = normalize_events(&[&first, &second]).unwrap();

        assert_eq!(normalized.events.len(), 1);
        assert_eq!(normalized.events[0].new_value.as_deref(), Some("call"));
    }

    #[test]
    fn test_distinct_keys_survive_in_time_order() {
        let rows = vec![
            raw("H2", "StageName", Some("Open"), Some("Won"), "2024-03-01"),
            raw("H1", "ARR_Amount__c", None, Some("100"), "2024-02-01"),
            raw("H3", "StageName", Some("New"), Some("Open"), "2024-02-01"),
        ];
        let refs: Vec<&RawChangeEvent> = rows.iter().collect();

        let normalized = normalize_events(&refs).unwrap();

        assert_eq!(normalized.events.len(), 3);
        assert_eq!(normalized.duplicates_collapsed, 0);
        assert_eq!(normalized.events[0].field, TrackedField::Amount);
        assert_eq!(normalized.events[1].field, TrackedField::Stage);
        assert_eq!(
            normalized.events[2].timestamp,
            Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
        );
        assert!(normalized.events.iter().all(|e| !e.origin.is_synthetic()));
    }

    #[test]
    fn test_empty_values_become_explicit_null() {
        let row = raw("H1", "created", None, None, "2024-01-01");

        let normalized = normalize_events(&[&row]).unwrap();

        assert_eq!(normalized.events[0].old_value, FieldValue::Null);
        assert_eq!(normalized.events[0].new_value, FieldValue::Null);
    }

    #[test]
    fn test_untracked_fields_dropped() {
        let rows = vec![
            raw("H1", "OwnerId", Some("u1"), Some("u2"), "2024-01-01"),
            raw("H2", "StageName", None, Some("Open"), "2024-01-01"),
        ];
        let refs: Vec<&RawChangeEvent> = rows.iter().collect();

        let normalized = normalize_events(&refs).unwrap();

        assert_eq!(normalized.untracked_dropped, 1);
        assert_eq!(normalized.events.len(), 1);
    }

    #[test]
    fn test_malformed_timestamp_fails_entity() {
        let row = raw("H9", "StageName", None, Some("Open"), "not-a-date");

        let err = normalize_events(&[&row]).unwrap_err();

        assert_eq!(
            err,
            EntityError::MalformedTimestamp {
                value: "not-a-date".to_string(),
                context: "event H9".to_string(),
            }
        );
    }
}
