// 🧩 History Synthesis - fill the gaps the change log never recorded
//
// Stages, per entity:
//   melt      snapshot row → one pseudo-event per tracked column, at creation
//   gap_fill  keep pseudo-events only for fields with no recorded event
//   anchors   initial state from the earliest transition's old value
//   merge     union + dedup on (field, timestamp), recorded events first

use crate::events::{ChangeEvent, EventOrigin};
use crate::fields::{FieldValue, TrackedField, UNSET_SENTINEL};
use crate::loader::RawSnapshot;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};

/// Old value that blocks an anchor for every field except the category field
pub const ANCHOR_SENTINEL: &str = "0";

// ============================================================================
// SNAPSHOT MELTER
// ============================================================================

/// One "value as of now" pseudo-event per tracked column the snapshot carries,
/// dated at the entity's creation time.
pub fn melt(
    snapshot: &RawSnapshot,
    columns: &BTreeSet<TrackedField>,
    created: DateTime<Utc>,
) -> Vec<ChangeEvent> {
    columns
        .iter()
        .map(|&field| ChangeEvent {
            field,
            old_value: FieldValue::Null,
            new_value: FieldValue::from_raw(snapshot.raw_value(field).map(str::to_string)),
            timestamp: created,
            origin: EventOrigin::GapFill,
        })
        .collect()
}

// ============================================================================
// GAP-VALUE SYNTHESIZER
// ============================================================================

/// Melted events for fields that have no recorded event at all
pub fn gap_fill(recorded: &[ChangeEvent], melted: Vec<ChangeEvent>) -> Vec<ChangeEvent> {
    let seen: BTreeSet<TrackedField> = recorded.iter().map(|e| e.field).collect();
    melted
        .into_iter()
        .filter(|e| !seen.contains(&e.field))
        .collect()
}

// ============================================================================
// ANCHORS
// ============================================================================

/// Whether a field's earliest old value should become an initial-state event.
///
/// Kept exactly as the reconstruction has always behaved: the sentinel blocks
/// an anchor unless the field is the category field. The textual unset marker
/// is a null, never an initial state.
pub fn anchor_qualifies(field: TrackedField, old_value: &FieldValue) -> bool {
    match old_value {
        FieldValue::Null => false,
        FieldValue::Value(old) if old == UNSET_SENTINEL => false,
        FieldValue::Value(old) => {
            (field.is_category() && old == ANCHOR_SENTINEL) || old != ANCHOR_SENTINEL
        }
    }
}

/// Anchor events dated at the entity's history start (its earliest event of
/// any field), one per field whose earliest event is a qualifying transition.
pub fn anchors(events: &[ChangeEvent]) -> Vec<ChangeEvent> {
    let Some(history_start) = events.iter().map(|e| e.timestamp).min() else {
        return Vec::new();
    };

    let mut earliest: BTreeMap<TrackedField, &ChangeEvent> = BTreeMap::new();
    for event in events {
        earliest
            .entry(event.field)
            .and_modify(|current| {
                if (event.timestamp, event.origin) < (current.timestamp, current.origin) {
                    *current = event;
                }
            })
            .or_insert(event);
    }

    earliest
        .into_values()
        .filter(|first| anchor_qualifies(first.field, &first.old_value))
        .map(|first| ChangeEvent {
            field: first.field,
            old_value: FieldValue::Null,
            new_value: first.old_value.clone(),
            timestamp: history_start,
            origin: EventOrigin::Anchor,
        })
        .collect()
}

// ============================================================================
// HISTORY MERGER & DEDUPLICATOR
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct MergedHistory {
    /// Sorted by (timestamp, field), unique on that key
    pub events: Vec<ChangeEvent>,
    pub gap_fill_events: usize,
    pub anchor_events: usize,
}

/// Union recorded and synthetic events, then keep one event per
/// (field, timestamp), preferring recorded over gap-fill over anchor.
pub fn merge_history(recorded: Vec<ChangeEvent>, gap_filled: Vec<ChangeEvent>) -> MergedHistory {
    let mut events = gap_filled;
    events.extend(recorded);

    let anchor_events = anchors(&events);
    events.extend(anchor_events);

    events.sort_by_key(|e| (e.timestamp, e.field, e.origin));
    events.dedup_by(|later, earlier| {
        later.timestamp == earlier.timestamp && later.field == earlier.field
    });

    MergedHistory {
        gap_fill_events: events.iter().filter(|e| e.origin == EventOrigin::GapFill).count(),
        anchor_events: events.iter().filter(|e| e.origin == EventOrigin::Anchor).count(),
        events,
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    fn value(s: &str) -> FieldValue {
        FieldValue::Value(s.to_string())
    }

    fn recorded(field: TrackedField, old: FieldValue, new: &str, at: DateTime<Utc>) -> ChangeEvent {
        ChangeEvent {
            field,
            old_value: old,
            new_value: value(new),
            timestamp: at,
            origin: EventOrigin::Recorded,
        }
    }

    fn snapshot() -> RawSnapshot {
        RawSnapshot {
            entity_id: "E1".to_string(),
            amount: Some("900".to_string()),
            stage: Some("Open".to_string()),
            close_date: None,
            created: "2024-01-01".to_string(),
            currency: Some("EUR".to_string()),
            next_step: Some("call".to_string()),
        }
    }

    #[test]
    fn test_melt_one_event_per_present_column() {
        let columns: BTreeSet<TrackedField> = [
            TrackedField::Amount,
            TrackedField::Stage,
            TrackedField::CloseDate,
            TrackedField::Created,
        ]
        .into_iter()
        .collect();

        let melted = melt(&snapshot(), &columns, ts(2024, 1, 1));

        assert_eq!(melted.len(), 4);
        assert!(melted.iter().all(|e| e.timestamp == ts(2024, 1, 1)));
        assert!(melted.iter().all(|e| e.old_value.is_null()));
        assert_eq!(melted[0].new_value, value("900"));
        assert_eq!(melted[2].field, TrackedField::CloseDate);
        assert_eq!(melted[2].new_value, FieldValue::Null);
        assert_eq!(melted[3].new_value, value("2024-01-01"));
    }

    #[test]
    fn test_gap_fill_skips_recorded_fields() {
        let real = vec![recorded(TrackedField::Stage, value("Open"), "Won", ts(2024, 2, 1))];
        let columns: BTreeSet<TrackedField> = TrackedField::ALL.into_iter().collect();
        let melted = melt(&snapshot(), &columns, ts(2024, 1, 1));

        let gaps = gap_fill(&real, melted);

        assert_eq!(gaps.len(), 4);
        assert!(gaps.iter().all(|e| e.field != TrackedField::Stage));
    }

    #[test]
    fn test_anchor_rule_sentinel_handling() {
        assert!(anchor_qualifies(TrackedField::NextStep, &value("call")));
        assert!(anchor_qualifies(TrackedField::Stage, &value("0")));
        assert!(!anchor_qualifies(TrackedField::Amount, &value("0")));
        assert!(!anchor_qualifies(TrackedField::Stage, &FieldValue::Null));
        assert!(anchor_qualifies(TrackedField::Amount, &value("0.0")));
    }

    #[test]
    fn test_unset_marker_never_anchors() {
        assert!(!anchor_qualifies(TrackedField::Stage, &value("None")));
        assert!(!anchor_qualifies(TrackedField::Amount, &value("None")));

        let events = vec![
            recorded(TrackedField::Created, FieldValue::Null, "2024-01-01", ts(2024, 1, 1)),
            recorded(TrackedField::Stage, value("None"), "Open", ts(2024, 2, 1)),
        ];
        assert!(anchors(&events).is_empty());
    }

    #[test]
    fn test_anchor_dated_at_history_start() {
        let events = vec![
            recorded(TrackedField::Created, FieldValue::Null, "2024-01-01", ts(2024, 1, 1)),
            recorded(TrackedField::Stage, value("Open"), "Won", ts(2024, 2, 1)),
            recorded(TrackedField::Stage, value("Won"), "Lost", ts(2024, 3, 1)),
        ];

        let anchored = anchors(&events);

        assert_eq!(anchored.len(), 1);
        assert_eq!(anchored[0].field, TrackedField::Stage);
        assert_eq!(anchored[0].new_value, value("Open"));
        assert_eq!(anchored[0].old_value, FieldValue::Null);
        assert_eq!(anchored[0].timestamp, ts(2024, 1, 1));
        assert_eq!(anchored[0].origin, EventOrigin::Anchor);
    }

    #[test]
    fn test_merge_prefers_recorded_over_anchor() {
        // The earliest stage change lands on the history start itself
        let real = vec![
            recorded(TrackedField::Stage, value("New"), "Open", ts(2024, 1, 1)),
            recorded(TrackedField::Stage, value("Open"), "Won", ts(2024, 2, 1)),
        ];

        let merged = merge_history(real, Vec::new());

        assert_eq!(merged.events.len(), 2);
        assert_eq!(merged.anchor_events, 0);
        assert_eq!(merged.events[0].new_value, value("Open"));
        assert_eq!(merged.events[0].origin, EventOrigin::Recorded);
    }

    #[test]
    fn test_merge_counts_synthetic_events() {
        let real = vec![recorded(TrackedField::Stage, value("Open"), "Won", ts(2024, 2, 1))];
        let columns: BTreeSet<TrackedField> =
            [TrackedField::Stage, TrackedField::Created].into_iter().collect();
        let gaps = gap_fill(&real, melt(&snapshot(), &columns, ts(2024, 1, 1)));

        let merged = merge_history(real, gaps);

        assert_eq!(merged.gap_fill_events, 1);
        assert_eq!(merged.anchor_events, 1);
        assert_eq!(merged.events.len(), 3);
        assert_eq!(merged.events[0].timestamp, ts(2024, 1, 1));
        assert_eq!(merged.events[2].new_value, value("Won"));
    }
}
