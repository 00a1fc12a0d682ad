// 🏷️ Reference Data - currency rates and the stage catalog
//
// Both tables are built once before reconstruction and only read afterwards,
// so every entity partition borrows them without locking.

use crate::error::{PipelineError, Result};
use crate::loader::{RawCurrencyRate, RawStageLookup, RawStageMetadata};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ============================================================================
// CURRENCY RATES
// ============================================================================

/// Current rate per currency code. A single rate is applied to the full
/// history of every entity quoted in that currency.
#[derive(Debug, Clone, Default)]
pub struct CurrencyRates {
    rates: HashMap<String, f64>,
}

impl CurrencyRates {
    pub fn from_records(records: &[RawCurrencyRate]) -> Result<Self> {
        let mut rates = HashMap::with_capacity(records.len());

        for record in records {
            let rate: f64 = record.rate.trim().parse().map_err(|_| {
                PipelineError::reference(
                    "currency",
                    format!("rate '{}' for {} is not numeric", record.rate, record.code),
                )
            })?;

            if !rate.is_finite() || rate <= 0.0 {
                return Err(PipelineError::reference(
                    "currency",
                    format!("rate {} for {} must be positive", rate, record.code),
                ));
            }

            if rates.insert(record.code.clone(), rate).is_some() {
                return Err(PipelineError::reference(
                    "currency",
                    format!("duplicate currency code {}", record.code),
                ));
            }
        }

        Ok(CurrencyRates { rates })
    }

    pub fn rate(&self, code: &str) -> Option<f64> {
        self.rates.get(code).copied()
    }
}

// ============================================================================
// STAGE CATALOG
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageInfo {
    pub is_won: bool,
    pub is_closed: bool,
}

/// Result of translating a raw stage label
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Translation<'a> {
    pub label: &'a str,
    /// false when the raw label was passed through unchanged
    pub mapped: bool,
}

/// Raw → canonical stage names plus won/closed flags per canonical name
#[derive(Debug, Clone, Default)]
pub struct StageCatalog {
    translations: HashMap<String, String>,
    metadata: HashMap<String, StageInfo>,
}

impl StageCatalog {
    pub fn from_records(lookups: &[RawStageLookup], metadata: &[RawStageMetadata]) -> Result<Self> {
        // Later rows override earlier ones, like a dict built from the table
        let translations = lookups
            .iter()
            .map(|l| (l.stage_name.clone(), l.lookup.clone()))
            .collect();

        let mut infos = HashMap::with_capacity(metadata.len());
        for row in metadata {
            let info = StageInfo {
                is_won: parse_flag(&row.is_won, &row.label, "IsWon")?,
                is_closed: parse_flag(&row.is_closed, &row.label, "IsClosed")?,
            };
            if infos.insert(row.label.clone(), info).is_some() {
                return Err(PipelineError::reference(
                    "stage metadata",
                    format!("duplicate stage label {}", row.label),
                ));
            }
        }

        Ok(StageCatalog {
            translations,
            metadata: infos,
        })
    }

    pub fn translate<'a>(&'a self, raw: &'a str) -> Translation<'a> {
        match self.translations.get(raw) {
            Some(label) => Translation {
                label: label.as_str(),
                mapped: true,
            },
            None => Translation {
                label: raw,
                mapped: false,
            },
        }
    }

    pub fn info(&self, label: &str) -> Option<StageInfo> {
        self.metadata.get(label).copied()
    }

    /// Whether the label is already canonical (a metadata label)
    pub fn knows(&self, label: &str) -> bool {
        self.metadata.contains_key(label)
    }
}

fn parse_flag(raw: &str, label: &str, column: &str) -> Result<bool> {
    match raw.trim().to_lowercase().as_str() {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        _ => Err(PipelineError::reference(
            "stage metadata",
            format!("{} '{}' for stage {} is not a boolean", column, raw, label),
        )),
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn rate(code: &str, rate: &str) -> RawCurrencyRate {
        RawCurrencyRate {
            code: code.to_string(),
            rate: rate.to_string(),
        }
    }

    fn lookup(raw: &str, canonical: &str) -> RawStageLookup {
        RawStageLookup {
            stage_name: raw.to_string(),
            lookup: canonical.to_string(),
        }
    }

    fn meta(label: &str, won: &str, closed: &str) -> RawStageMetadata {
        RawStageMetadata {
            label: label.to_string(),
            is_won: won.to_string(),
            is_closed: closed.to_string(),
        }
    }

    #[test]
    fn test_currency_rates_lookup() {
        let rates =
            CurrencyRates::from_records(&[rate("USD", "1.0"), rate("EUR", "0.90")]).unwrap();

        assert_eq!(rates.rate("USD"), Some(1.0));
        assert_eq!(rates.rate("EUR"), Some(0.90));
        assert_eq!(rates.rate("GBP"), None);
    }

    #[test]
    fn test_currency_rate_must_be_positive_number() {
        assert!(CurrencyRates::from_records(&[rate("USD", "abc")]).is_err());
        assert!(CurrencyRates::from_records(&[rate("USD", "0")]).is_err());
        assert!(CurrencyRates::from_records(&[rate("USD", "1"), rate("USD", "1")]).is_err());
    }

    #[test]
    fn test_stage_translation_passthrough() {
        let catalog = StageCatalog::from_records(
            &[lookup("Closed - Lost", "Closed Lost"), lookup("Closed - Lost", "Lost")],
            &[],
        )
        .unwrap();

        let translated = catalog.translate("Closed - Lost");
        assert_eq!(translated.label, "Lost");
        assert!(translated.mapped);

        let untouched = catalog.translate("Prospecting");
        assert_eq!(untouched.label, "Prospecting");
        assert!(!untouched.mapped);
    }

    #[test]
    fn test_stage_metadata_flags() {
        let catalog = StageCatalog::from_records(
            &[],
            &[meta("Closed Won", "true", "TRUE"), meta("Prospecting", "0", "False")],
        )
        .unwrap();

        assert_eq!(
            catalog.info("Closed Won"),
            Some(StageInfo {
                is_won: true,
                is_closed: true
            })
        );
        assert_eq!(
            catalog.info("Prospecting"),
            Some(StageInfo {
                is_won: false,
                is_closed: false
            })
        );
        assert_eq!(catalog.info("Negotiation"), None);
        assert!(catalog.knows("Prospecting"));
        assert!(!catalog.knows("Negotiation"));
    }

    #[test]
    fn test_stage_metadata_rejects_bad_flag() {
        let result = StageCatalog::from_records(&[], &[meta("Closed Won", "yes", "true")]);
        assert!(matches!(result, Err(PipelineError::Reference { .. })));
    }
}
