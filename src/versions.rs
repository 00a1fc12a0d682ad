// 💱 Version Rows - currency normalization, intervals, and derived flags
//
// Turns one entity's forward-filled wide rows into final SCD2 versions:
//   amount / rate, sort key, valid-to, terminal flag, stage flags,
//   then the entity-level zero-amount filter.

use crate::data_quality::{Observation, WarningKind};
use crate::error::EntityError;
use crate::fields::{Cell, TrackedField, UNSET_SENTINEL};
use crate::reference::{CurrencyRates, StageCatalog};
use crate::temporal::{sort_key, valid_to_sequence, was_valid_at, WideRow};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Canonical stage labels behind the derived booleans
pub const STAGE_CLOSED_LOST: &str = "Closed Lost";
pub const STAGE_DISQUALIFIED: &str = "Disqualified";

// ============================================================================
// VERSION ROW
// ============================================================================

/// One reconstructed state of an entity, valid over [valid_from, valid_to)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionRow {
    pub entity_id: String,
    pub valid_from: DateTime<Utc>,

    /// Normalized amount; None when the rate or the amount column is missing
    pub amount: Option<f64>,
    pub close_date: Option<String>,
    /// Translated stage label
    pub stage: Option<String>,
    pub next_step: Option<String>,

    pub sort_key: String,
    pub valid_to: Option<DateTime<Utc>>,
    /// 1 for the current version, 0 otherwise
    pub is_last_update: i64,

    pub is_won: Option<bool>,
    pub is_closed: Option<bool>,
    pub entity_created: Option<DateTime<Utc>>,
    pub is_lost: Option<bool>,
    pub is_disqualified: Option<bool>,
}

impl VersionRow {
    pub fn is_current(&self) -> bool {
        self.valid_to.is_none()
    }

    pub fn was_valid_at(&self, time: DateTime<Utc>) -> bool {
        was_valid_at(self.valid_from, self.valid_to, time)
    }
}

// ============================================================================
// INPUT CONTEXT
// ============================================================================

/// Which derivation-driving columns exist anywhere in this run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunColumns {
    pub amount: bool,
    pub stage: bool,
}

impl RunColumns {
    pub fn from_fields(fields: &BTreeSet<TrackedField>) -> Self {
        RunColumns {
            amount: fields.contains(&TrackedField::Amount),
            stage: fields.contains(&TrackedField::Stage),
        }
    }
}

/// Shared read-only lookups
#[derive(Debug, Clone, Copy)]
pub struct Lookups<'a> {
    pub rates: &'a CurrencyRates,
    pub stages: &'a StageCatalog,
    pub columns: RunColumns,
}

/// Per-entity facts taken from the snapshot
#[derive(Debug, Clone, Copy, Default)]
pub struct EntityFacts<'a> {
    pub has_snapshot: bool,
    pub currency: Option<&'a str>,
    pub created: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct EntityVersions {
    pub rows: Vec<VersionRow>,
    pub observations: BTreeSet<Observation>,
    pub dropped_zero_amount: bool,
}

// ============================================================================
// CURRENCY NORMALIZER
// ============================================================================

/// Amount cell → number in the common unit.
///
/// Absent, null, and the textual sentinel count as zero. The raw value is
/// narrowed to f32 before division, matching the source's fixed precision.
pub fn normalize_amount(cell: &Cell, rate: Option<f64>) -> Result<Option<f64>, EntityError> {
    let amount = match cell.text().map(str::trim) {
        None | Some("") | Some(UNSET_SENTINEL) => 0.0_f32,
        Some(raw) => raw
            .parse::<f32>()
            .map_err(|_| EntityError::MalformedAmount(raw.to_string()))?,
    };

    Ok(rate.map(|r| f64::from(amount) / r))
}

// ============================================================================
// INTERVAL & FLAG COMPUTER
// ============================================================================

/// Build the final versions for one entity.
///
/// `rows` must be forward-filled and in timestamp order.
pub fn build_versions(
    entity_id: &str,
    rows: &[WideRow],
    facts: EntityFacts<'_>,
    lookups: Lookups<'_>,
) -> Result<EntityVersions, EntityError> {
    let mut observations = BTreeSet::new();

    let rate = if lookups.columns.amount && facts.has_snapshot {
        let code = facts.currency.unwrap_or("");
        let rate = lookups.rates.rate(code);
        if rate.is_none() {
            let shown = if code.is_empty() { "(blank)" } else { code };
            observations.insert(Observation::new(WarningKind::UnmappedCurrency, shown));
        }
        rate
    } else {
        None
    };

    let valid_to = valid_to_sequence(rows);
    let mut versions = Vec::with_capacity(rows.len());

    for (row, valid_to) in rows.iter().zip(valid_to) {
        let amount = if lookups.columns.amount {
            normalize_amount(row.cell(TrackedField::Amount), rate)?
        } else {
            None
        };

        let stage = row.cell(TrackedField::Stage).text().map(|raw| {
            let translated = lookups.stages.translate(raw);
            if !translated.mapped && !lookups.stages.knows(raw) {
                observations.insert(Observation::new(WarningKind::UnmappedStageTranslation, raw));
            }
            translated.label.to_string()
        });

        let info = stage.as_deref().and_then(|label| {
            let info = lookups.stages.info(label);
            if info.is_none() {
                observations.insert(Observation::new(WarningKind::UnmappedStageMetadata, label));
            }
            info
        });

        let stage_flag = |label: &str| {
            lookups
                .columns
                .stage
                .then(|| stage.as_deref() == Some(label))
        };

        versions.push(VersionRow {
            entity_id: entity_id.to_string(),
            valid_from: row.timestamp,
            amount,
            close_date: row.cell(TrackedField::CloseDate).text().map(str::to_string),
            next_step: row.cell(TrackedField::NextStep).text().map(str::to_string),
            sort_key: sort_key(row.timestamp, entity_id),
            is_last_update: i64::from(valid_to.is_none()),
            valid_to,
            is_won: info.map(|i| i.is_won),
            is_closed: info.map(|i| i.is_closed),
            entity_created: facts.created,
            is_lost: stage_flag(STAGE_CLOSED_LOST),
            is_disqualified: stage_flag(STAGE_DISQUALIFIED),
            stage,
        });
    }

    versions.sort_by(|a, b| a.sort_key.cmp(&b.sort_key));

    let dropped_zero_amount = lookups.columns.amount
        && !versions.is_empty()
        && versions.iter().all(|v| v.amount == Some(0.0));
    if dropped_zero_amount {
        versions.clear();
    }

    Ok(EntityVersions {
        rows: versions,
        observations,
        dropped_zero_amount,
    })
}

// ============================================================================
// TESTS
// ============================================================================
