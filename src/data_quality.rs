// ✅ Data Quality Report - what the reconstruction could not map cleanly
//
// Unmapped reference values never fail a run. They are counted per
// (entity, value) observation and surfaced with a bounded sample so they
// don't silently flow into financial figures.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

// ============================================================================
// SEVERITY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Warning,  // Output values are null where a number/flag was expected
    Info,     // Output is complete but a lookup fell through
}

// ============================================================================
// WARNING KINDS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum WarningKind {
    /// Currency code absent from the rate table (amounts become null)
    UnmappedCurrency,

    /// Stage label absent from the name-translation table (passed through)
    UnmappedStageTranslation,

    /// Translated stage label absent from stage metadata (won/closed null)
    UnmappedStageMetadata,

    /// Entity appears in the event log but not in the snapshot
    MissingSnapshot,
}

impl WarningKind {
    pub fn severity(&self) -> Severity {
        match self {
            WarningKind::UnmappedCurrency => Severity::Warning,
            WarningKind::UnmappedStageTranslation => Severity::Info,
            WarningKind::UnmappedStageMetadata => Severity::Warning,
            WarningKind::MissingSnapshot => Severity::Warning,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            WarningKind::UnmappedCurrency => "currency code missing from rate table",
            WarningKind::UnmappedStageTranslation => "stage label missing from translation table",
            WarningKind::UnmappedStageMetadata => "stage label missing from stage metadata",
            WarningKind::MissingSnapshot => "entity missing from snapshot",
        }
    }
}

/// One observation made while reconstructing a single entity
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Observation {
    pub kind: WarningKind,
    pub value: String,
}

impl Observation {
    pub fn new(kind: WarningKind, value: impl Into<String>) -> Self {
        Observation {
            kind,
            value: value.into(),
        }
    }
}

// ============================================================================
// WARNING GROUP
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarningGroup {
    pub kind: WarningKind,
    pub severity: Severity,
    pub count: usize,
    /// Distinct values, first seen first, bounded by the sample size
    pub sample: Vec<String>,
}

impl WarningGroup {
    fn new(kind: WarningKind) -> Self {
        WarningGroup {
            kind,
            severity: kind.severity(),
            count: 0,
            sample: Vec::new(),
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "{}: {} occurrence(s), sample [{}]",
            self.kind.description(),
            self.count,
            self.sample.join(", ")
        )
    }
}

// ============================================================================
// ENTITY FAILURE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityFailure {
    pub entity_id: String,
    pub message: String,
}

// ============================================================================
// RUN REPORT
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,

    // Inputs
    pub event_rows: usize,
    pub snapshot_rows: usize,

    // Event stream
    pub duplicate_events_collapsed: usize,
    pub untracked_events_dropped: usize,
    pub gap_fill_events: usize,
    pub anchor_events: usize,

    // Entities
    pub entities_processed: usize,
    pub entities_failed: Vec<EntityFailure>,
    pub entities_dropped_zero_amount: usize,

    // Output
    pub output_rows: usize,
    pub output_sha256: Option<String>,

    pub warnings: Vec<WarningGroup>,
}

impl RunReport {
    pub fn new() -> Self {
        RunReport {
            run_id: uuid::Uuid::new_v4().to_string(),
            ..Default::default()
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "{} entities reconstructed, {} failed, {} dropped (zero amount) | {} rows | {} warning group(s)",
            self.entities_processed,
            self.entities_failed.len(),
            self.entities_dropped_zero_amount,
            self.output_rows,
            self.warnings.len()
        )
    }

    pub fn has_failures(&self) -> bool {
        !self.entities_failed.is_empty()
    }

    pub fn warning(&self, kind: WarningKind) -> Option<&WarningGroup> {
        self.warnings.iter().find(|w| w.kind == kind)
    }

    /// Emit one log line per warning group and per failed entity
    pub fn log(&self) {
        for group in &self.warnings {
            warn!(severity = ?group.severity, "{}", group.summary());
        }
        for failure in &self.entities_failed {
            warn!(entity = %failure.entity_id, "entity skipped: {}", failure.message);
        }
    }
}

// ============================================================================
// COLLECTOR
// ============================================================================

/// Folds per-entity observations into bounded warning groups.
///
/// Observations must be fed in entity-id order for the sample to be stable.
pub struct QualityCollector {
    sample_size: usize,
    groups: BTreeMap<WarningKind, WarningGroup>,
}

impl QualityCollector {
    pub fn new(sample_size: usize) -> Self {
        QualityCollector {
            sample_size,
            groups: BTreeMap::new(),
        }
    }

    pub fn record(&mut self, observation: &Observation) {
        let group = self
            .groups
            .entry(observation.kind)
            .or_insert_with(|| WarningGroup::new(observation.kind));

        group.count += 1;
        if group.sample.len() < self.sample_size && !group.sample.contains(&observation.value) {
            group.sample.push(observation.value.clone());
        }
    }

    pub fn finish(self) -> Vec<WarningGroup> {
        self.groups.into_values().collect()
    }
}

// ============================================================================
// TESTS
// ============================================================================
