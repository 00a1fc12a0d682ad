// 🔄 Reconstruction Pipeline - partition by entity, rebuild in parallel, export
//
// Every stage after loading is scoped to one entity, so inputs are split into
// owned per-entity partitions and reconstructed on a rayon pool. Results are
// concatenated in entity-id order, making the output independent of thread
// count. A failing entity is reported and skipped; a failing run writes nothing.

use crate::config::PipelineConfig;
use crate::data_quality::{EntityFailure, Observation, QualityCollector, RunReport, WarningKind};
use crate::error::{EntityError, PipelineError, Result};
use crate::events::normalize_events;
use crate::export::write_parquet;
use crate::fields::TrackedField;
use crate::loader::{Inputs, RawChangeEvent, RawSnapshot};
use crate::reference::{CurrencyRates, StageCatalog};
use crate::synthesis::{gap_fill, melt, merge_history};
use crate::temporal::{forward_fill, parse_timestamp, pivot};
use crate::versions::{
    build_versions, EntityFacts, EntityVersions, Lookups, RunColumns, VersionRow,
};
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use tracing::{debug, info, warn};

// ============================================================================
// PARTITIONING
// ============================================================================

/// Everything known about one entity before reconstruction
#[derive(Debug, Clone)]
pub struct EntityInput<'a> {
    pub entity_id: &'a str,
    pub snapshot: Option<&'a RawSnapshot>,
    pub events: Vec<&'a RawChangeEvent>,
}

/// Split inputs into per-entity partitions, ordered by entity id.
///
/// A repeated snapshot id is a run-level failure.
pub fn partition(inputs: &Inputs) -> Result<Vec<EntityInput<'_>>> {
    let mut entities: BTreeMap<&str, EntityInput<'_>> = BTreeMap::new();

    for row in &inputs.snapshot.rows {
        let entry = entities
            .entry(row.entity_id.as_str())
            .or_insert_with(|| EntityInput {
                entity_id: row.entity_id.as_str(),
                snapshot: None,
                events: Vec::new(),
            });
        if entry.snapshot.replace(row).is_some() {
            return Err(PipelineError::DuplicateSnapshot(row.entity_id.clone()));
        }
    }

    for event in &inputs.events {
        entities
            .entry(event.entity_id.as_str())
            .or_insert_with(|| EntityInput {
                entity_id: event.entity_id.as_str(),
                snapshot: None,
                events: Vec::new(),
            })
            .events
            .push(event);
    }

    Ok(entities.into_values().collect())
}

/// Tracked fields present anywhere in the run: snapshot columns plus any
/// field named by the event log.
pub fn run_fields(inputs: &Inputs) -> BTreeSet<TrackedField> {
    let mut fields = inputs.snapshot.columns.clone();
    fields.extend(
        inputs
            .events
            .iter()
            .filter_map(|e| TrackedField::from_name(&e.field)),
    );
    fields
}

// ============================================================================
// PER-ENTITY RECONSTRUCTION
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct Reconstruction {
    pub versions: EntityVersions,
    pub duplicates_collapsed: usize,
    pub untracked_dropped: usize,
    pub gap_fill_events: usize,
    pub anchor_events: usize,
}

/// Shared, read-only context for every partition
#[derive(Debug, Clone, Copy)]
pub struct RunContext<'a> {
    pub snapshot_columns: &'a BTreeSet<TrackedField>,
    pub lookups: Lookups<'a>,
}

/// Run stages 1-8 for a single entity
pub fn reconstruct_entity(
    input: &EntityInput<'_>,
    ctx: RunContext<'_>,
) -> std::result::Result<Reconstruction, EntityError> {
    let normalized = normalize_events(&input.events)?;

    let created = input
        .snapshot
        .map(|s| {
            parse_timestamp(&s.created).ok_or_else(|| EntityError::MalformedTimestamp {
                value: s.created.clone(),
                context: "snapshot CreatedDate".to_string(),
            })
        })
        .transpose()?;

    let melted = match (input.snapshot, created) {
        (Some(snapshot), Some(created)) => melt(snapshot, ctx.snapshot_columns, created),
        _ => Vec::new(),
    };
    let gaps = gap_fill(&normalized.events, melted);
    let merged = merge_history(normalized.events, gaps);

    let mut rows = pivot(&merged.events);
    forward_fill(&mut rows);

    let facts = EntityFacts {
        has_snapshot: input.snapshot.is_some(),
        currency: input.snapshot.and_then(|s| s.currency.as_deref()),
        created,
    };
    let mut versions = build_versions(input.entity_id, &rows, facts, ctx.lookups)?;
    if input.snapshot.is_none() {
        versions
            .observations
            .insert(Observation::new(WarningKind::MissingSnapshot, input.entity_id));
    }

    Ok(Reconstruction {
        versions,
        duplicates_collapsed: normalized.duplicates_collapsed,
        untracked_dropped: normalized.untracked_dropped,
        gap_fill_events: merged.gap_fill_events,
        anchor_events: merged.anchor_events,
    })
}

// ============================================================================
// WHOLE RUN
// ============================================================================

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub threads: Option<usize>,
    pub warning_sample_size: usize,
}

impl Default for RunOptions {
    fn default() -> Self {
        RunOptions {
            threads: None,
            warning_sample_size: 5,
        }
    }
}

impl From<&PipelineConfig> for RunOptions {
    fn from(config: &PipelineConfig) -> Self {
        RunOptions {
            threads: config.threads,
            warning_sample_size: config.warning_sample_size,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Reconstructed {
    /// Sorted by (entity id, sort key)
    pub rows: Vec<VersionRow>,
    pub report: RunReport,
}

/// Reconstruct every entity in memory. Nothing is written.
pub fn reconstruct(inputs: &Inputs, options: &RunOptions) -> Result<Reconstructed> {
    let rates = CurrencyRates::from_records(&inputs.currency_rates)?;
    let stages = StageCatalog::from_records(&inputs.stage_lookups, &inputs.stage_metadata)?;
    let fields = run_fields(inputs);
    let ctx = RunContext {
        snapshot_columns: &inputs.snapshot.columns,
        lookups: Lookups {
            rates: &rates,
            stages: &stages,
            columns: RunColumns::from_fields(&fields),
        },
    };

    for field in TrackedField::ALL {
        if !fields.contains(&field) {
            warn!(field = %field, "tracked field absent from snapshot and event log");
        }
    }

    let entities = partition(inputs)?;
    info!(entities = entities.len(), "partitioned inputs by entity");

    let reconstruct_all = || {
        entities
            .par_iter()
            .map(|input| (input.entity_id, reconstruct_entity(input, ctx)))
            .collect::<Vec<_>>()
    };
    let outcomes = match options.threads {
        Some(threads) => rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .map_err(|e| PipelineError::Config(format!("thread pool: {e}")))?
            .install(reconstruct_all),
        None => reconstruct_all(),
    };

    let mut report = RunReport::new();
    report.event_rows = inputs.events.len();
    report.snapshot_rows = inputs.snapshot.rows.len();

    let mut collector = QualityCollector::new(options.warning_sample_size);
    let mut rows = Vec::new();

    for (entity_id, outcome) in outcomes {
        match outcome {
            Ok(done) => {
                report.entities_processed += 1;
                report.duplicate_events_collapsed += done.duplicates_collapsed;
                report.untracked_events_dropped += done.untracked_dropped;
                report.gap_fill_events += done.gap_fill_events;
                report.anchor_events += done.anchor_events;
                if done.versions.dropped_zero_amount {
                    report.entities_dropped_zero_amount += 1;
                }
                for observation in &done.versions.observations {
                    collector.record(observation);
                }
                rows.extend(done.versions.rows);
            }
            Err(e) => report.entities_failed.push(EntityFailure {
                entity_id: entity_id.to_string(),
                message: e.to_string(),
            }),
        }
    }

    report.warnings = collector.finish();
    report.output_rows = rows.len();

    info!(
        events = report.event_rows,
        duplicates = report.duplicate_events_collapsed,
        untracked = report.untracked_events_dropped,
        gap_fill = report.gap_fill_events,
        anchors = report.anchor_events,
        "event stream reconstructed"
    );

    Ok(Reconstructed { rows, report })
}

/// Load, reconstruct, export. Returns the run report.
pub fn run(config: &PipelineConfig) -> Result<RunReport> {
    config.validate()?;
    let inputs = Inputs::load(config)?;

    let Reconstructed { rows, mut report } = reconstruct(&inputs, &RunOptions::from(config))?;
    report.log();

    for row in rows.iter().take(5) {
        debug!(?row, "output preview");
    }

    info!(path = %config.output_path.display(), rows = rows.len(), "exporting parquet");
    let digest = write_parquet(&rows, &config.output_path)?;
    info!(sha256 = %digest, "export complete");
    report.output_sha256 = Some(digest);

    if let Some(path) = &config.report_path {
        let json = serde_json::to_string_pretty(&report)
            .map_err(|e| PipelineError::Config(format!("report serialization: {e}")))?;
        fs::write(path, json).map_err(|source| PipelineError::Io {
            path: path.clone(),
            source,
        })?;
        info!(path = %path.display(), "data-quality report written");
    }

    info!("{}", report.summary());
    Ok(report)
}

// ============================================================================
// TESTS
// ============================================================================
