// ⚙️ Pipeline Configuration - where inputs live and where the output goes
//
// Defaults reproduce the fixed file layout of the original batch job, so a
// run with no config file reads everything from the working directory.

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Directory the five input file names are resolved against
    pub input_dir: PathBuf,

    pub stage_lookups_file: String,
    pub stage_metadata_file: String,
    pub field_history_file: String,
    pub snapshot_file: String,
    pub currency_file: String,

    /// Parquet output (not resolved against `input_dir`)
    pub output_path: PathBuf,

    /// Optional JSON data-quality report
    pub report_path: Option<PathBuf>,

    /// Worker threads for per-entity reconstruction (None = rayon default)
    pub threads: Option<usize>,

    /// Max distinct values kept per warning group
    pub warning_sample_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            input_dir: PathBuf::from("."),
            stage_lookups_file: "StageLookups.csv".to_string(),
            stage_metadata_file: "dummy_stages_sobject.csv".to_string(),
            field_history_file: "dummy_field_history.csv".to_string(),
            snapshot_file: "dummy_opportunities.csv".to_string(),
            currency_file: "currency.csv".to_string(),
            output_path: PathBuf::from("OpportunityFieldHistory_PoC.parquet"),
            report_path: None,
            threads: None,
            warning_sample_size: 5,
        }
    }
}

impl PipelineConfig {
    /// Load config from a JSON file; omitted keys keep their defaults
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|source| PipelineError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        })?;

        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let config: PipelineConfig =
            serde_json::from_str(content).map_err(|e| PipelineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Config rooted at a directory, output written alongside the inputs
    pub fn in_dir<P: AsRef<Path>>(dir: P) -> Self {
        let dir = dir.as_ref();
        let defaults = PipelineConfig::default();
        PipelineConfig {
            input_dir: dir.to_path_buf(),
            output_path: dir.join(&defaults.output_path),
            ..defaults
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.threads == Some(0) {
            return Err(PipelineError::Config("threads must be at least 1".to_string()));
        }
        if self.warning_sample_size == 0 {
            return Err(PipelineError::Config(
                "warning_sample_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn stage_lookups_path(&self) -> PathBuf {
        self.input_dir.join(&self.stage_lookups_file)
    }

    pub fn stage_metadata_path(&self) -> PathBuf {
        self.input_dir.join(&self.stage_metadata_file)
    }

    pub fn field_history_path(&self) -> PathBuf {
        self.input_dir.join(&self.field_history_file)
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.input_dir.join(&self.snapshot_file)
    }

    pub fn currency_path(&self) -> PathBuf {
        self.input_dir.join(&self.currency_file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_source_layout() {
        let config = PipelineConfig::default();

        assert_eq!(config.field_history_path(), Path::new("./dummy_field_history.csv"));
        assert_eq!(config.snapshot_path(), Path::new("./dummy_opportunities.csv"));
        assert_eq!(config.output_path, Path::new("OpportunityFieldHistory_PoC.parquet"));
        assert_eq!(config.warning_sample_size, 5);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = PipelineConfig::from_json(
            r#"{ "input_dir": "/data/crm", "report_path": "/tmp/report.json" }"#,
        )
        .unwrap();

        assert_eq!(config.currency_path(), Path::new("/data/crm/currency.csv"));
        assert_eq!(config.report_path, Some(PathBuf::from("/tmp/report.json")));
        assert_eq!(config.threads, None);
    }

    #[test]
    fn test_unknown_key_rejected() {
        let result = PipelineConfig::from_json(r#"{ "input_directory": "/data" }"#);
        assert!(matches!(result, Err(PipelineError::Config(_))));
    }

    #[test]
    fn test_zero_threads_rejected() {
        let result = PipelineConfig::from_json(r#"{ "threads": 0 }"#);
        assert!(matches!(result, Err(PipelineError::Config(_))));
    }

    #[test]
    fn test_in_dir_puts_output_next_to_inputs() {
        let config = PipelineConfig::in_dir("/data/run1");
        assert_eq!(
            config.output_path,
            Path::new("/data/run1/OpportunityFieldHistory_PoC.parquet")
        );
        assert_eq!(config.stage_lookups_path(), Path::new("/data/run1/StageLookups.csv"));
    }
}
