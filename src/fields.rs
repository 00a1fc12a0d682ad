// 🏛️ Tracked Fields - the fixed attribute set whose history is rebuilt
//
// Every field exists independently of the stage that touches it: the same
// TrackedField drives melting, pivot columns, forward-fill, and export.

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// TRACKED FIELD
// ============================================================================

/// One reconstructed attribute of an Opportunity.
///
/// The declaration order is the column order of a wide row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TrackedField {
    /// Monetary amount (`ARR_Amount__c`)
    Amount,

    /// Pipeline stage, the category/status field (`StageName`)
    Stage,

    /// Expected close date (`CloseDate`)
    CloseDate,

    /// Creation marker (`created`)
    Created,

    /// Free-text next step (`NextStep`)
    NextStep,
}

impl TrackedField {
    pub const ALL: [TrackedField; 5] = [
        TrackedField::Amount,
        TrackedField::Stage,
        TrackedField::CloseDate,
        TrackedField::Created,
        TrackedField::NextStep,
    ];

    pub const COUNT: usize = Self::ALL.len();

    /// Name used by the change-event log for this field
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackedField::Amount => "ARR_Amount__c",
            TrackedField::Stage => "StageName",
            TrackedField::CloseDate => "CloseDate",
            TrackedField::Created => "created",
            TrackedField::NextStep => "NextStep",
        }
    }

    /// Column holding this field in the snapshot table.
    ///
    /// Only `Created` differs from the event-log name.
    pub fn snapshot_column(&self) -> &'static str {
        match self {
            TrackedField::Created => "CreatedDate",
            other => other.as_str(),
        }
    }

    pub fn from_name(name: &str) -> Option<TrackedField> {
        Self::ALL.iter().copied().find(|f| f.as_str() == name)
    }

    /// Position of this field in a wide row
    pub fn index(&self) -> usize {
        *self as usize
    }

    pub fn is_category(&self) -> bool {
        matches!(self, TrackedField::Stage)
    }
}

impl fmt::Display for TrackedField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// FIELD VALUE
// ============================================================================

/// Textual "unset" marker some exports write instead of an empty cell
pub const UNSET_SENTINEL: &str = "None";

/// A recorded value: either explicitly unset or a concrete string.
///
/// "Never recorded" is not a FieldValue; see [`Cell::Absent`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldValue {
    Null,
    Value(String),
}

impl FieldValue {
    /// Empty CSV cells are explicit nulls
    pub fn from_raw(raw: Option<String>) -> Self {
        match raw {
            Some(s) if !s.is_empty() => FieldValue::Value(s),
            _ => FieldValue::Null,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    pub fn as_deref(&self) -> Option<&str> {
        match self {
            FieldValue::Null => None,
            FieldValue::Value(s) => Some(s.as_str()),
        }
    }
}

// ============================================================================
// CELL
// ============================================================================

/// One field of one wide row.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Cell {
    /// Field not observed at this timestamp
    #[default]
    Absent,
    Recorded(FieldValue),
}

impl Cell {
    pub fn is_absent(&self) -> bool {
        matches!(self, Cell::Absent)
    }

    pub fn value(&self) -> Option<&FieldValue> {
        match self {
            Cell::Absent => None,
            Cell::Recorded(v) => Some(v),
        }
    }

    /// Concrete text, if any. Absent and explicit null both map to None.
    pub fn text(&self) -> Option<&str> {
        self.value().and_then(FieldValue::as_deref)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_names_round_trip() {
        for field in TrackedField::ALL {
            assert_eq!(TrackedField::from_name(field.as_str()), Some(field));
        }
        assert_eq!(TrackedField::from_name("OwnerId"), None);
    }

    #[test]
    fn test_snapshot_column_for_created() {
        assert_eq!(TrackedField::Created.snapshot_column(), "CreatedDate");
        assert_eq!(TrackedField::Stage.snapshot_column(), "StageName");
    }

    #[test]
    fn test_index_matches_declaration_order() {
        for (i, field) in TrackedField::ALL.iter().enumerate() {
            assert_eq!(field.index(), i);
        }
    }

    #[test]
    fn test_empty_raw_value_is_null() {
        assert_eq!(FieldValue::from_raw(None), FieldValue::Null);
        assert_eq!(FieldValue::from_raw(Some(String::new())), FieldValue::Null);
        assert_eq!(
            FieldValue::from_raw(Some("0".to_string())),
            FieldValue::Value("0".to_string())
        );
    }

    #[test]
    fn test_cell_text() {
        assert_eq!(Cell::Absent.text(), None);
        assert_eq!(Cell::Recorded(FieldValue::Null).text(), None);
        assert_eq!(
            Cell::Recorded(FieldValue::Value("Open".to_string())).text(),
            Some("Open")
        );
        assert!(!Cell::Recorded(FieldValue::Null).is_absent());
    }
}
