// Opportunity History - Core Library
// Rebuilds a dense SCD2 version history from a sparse change log and a
// current-state snapshot. Exposes all stages for the CLI and for tests.

pub mod config;         // Pipeline configuration (paths, threads)
pub mod data_quality;   // Run report + unmapped-value warnings
pub mod error;          // Run-level vs entity-level errors
pub mod events;         // Change events + Event Normalizer
pub mod export;         // Parquet output
pub mod fields;         // Tracked fields + value tri-state
pub mod loader;         // CSV inputs
pub mod pipeline;       // Partitioning, parallel reconstruction, run
pub mod reference;      // Currency rates + stage catalog
pub mod synthesis;      // Snapshot melt, gap fill, anchors, merge
pub mod temporal;       // Timestamps, pivot, forward fill, intervals
pub mod versions;       // Currency normalization, flags, entity filter

// Re-export commonly used types
pub use config::PipelineConfig;
pub use data_quality::{
    EntityFailure, Observation, QualityCollector, RunReport, Severity, WarningGroup, WarningKind,
};
pub use error::{EntityError, PipelineError, Result};
pub use events::{normalize_events, ChangeEvent, EventOrigin, NormalizedEvents};
pub use export::{encode_parquet, write_parquet};
pub use fields::{Cell, FieldValue, TrackedField};
pub use loader::{Inputs, RawChangeEvent, RawSnapshot, SnapshotTable};
pub use pipeline::{
    partition, reconstruct, reconstruct_entity, run, EntityInput, Reconstructed, RunOptions,
};
pub use reference::{CurrencyRates, StageCatalog, StageInfo};
pub use synthesis::{anchors, gap_fill, melt, merge_history, MergedHistory};
pub use temporal::{forward_fill, parse_timestamp, pivot, sort_key, WideRow};
pub use versions::{build_versions, normalize_amount, VersionRow};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
