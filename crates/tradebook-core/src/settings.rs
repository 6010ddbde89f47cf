//! # Ledger Settings
//!
//! Values read once when a document or credit note is created: the default
//! tax rate and the reference-number prefixes. Changing them never rewrites
//! existing records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::ValidationError;
use crate::types::{DocumentKind, TaxRate};
use crate::validation::{validate_tax_rate_bps, ValidationResult};

// =============================================================================
// Defaults
// =============================================================================

fn default_tax_rate_bps() -> u32 {
    0
}

fn default_sale_prefix() -> String {
    "SAL".to_string()
}

fn default_purchase_prefix() -> String {
    "PUR".to_string()
}

fn default_credit_note_prefix() -> String {
    "CN".to_string()
}

fn default_currency_symbol() -> String {
    "$".to_string()
}

// =============================================================================
// LedgerSettings
// =============================================================================

/// Creation-time settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct LedgerSettings {
    /// Tax rate stamped on new documents (basis points).
    #[serde(default = "default_tax_rate_bps")]
    pub default_tax_rate_bps: u32,

    #[serde(default = "default_sale_prefix")]
    pub sale_prefix: String,

    #[serde(default = "default_purchase_prefix")]
    pub purchase_prefix: String,

    #[serde(default = "default_credit_note_prefix")]
    pub credit_note_prefix: String,

    /// Only used by presentation helpers.
    #[serde(default = "default_currency_symbol")]
    pub currency_symbol: String,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        LedgerSettings {
            default_tax_rate_bps: default_tax_rate_bps(),
            sale_prefix: default_sale_prefix(),
            purchase_prefix: default_purchase_prefix(),
            credit_note_prefix: default_credit_note_prefix(),
            currency_symbol: default_currency_symbol(),
        }
    }
}

impl LedgerSettings {
    pub fn tax_rate(&self) -> TaxRate {
        TaxRate::from_bps(self.default_tax_rate_bps)
    }

    pub fn document_prefix(&self, kind: DocumentKind) -> &str {
        match kind {
            DocumentKind::Sale => &self.sale_prefix,
            DocumentKind::Purchase => &self.purchase_prefix,
        }
    }

    /// Checks the tax rate and that every prefix is usable in a reference.
    pub fn validate(&self) -> ValidationResult<()> {
        validate_tax_rate_bps(self.default_tax_rate_bps)?;

        for (field, prefix) in [
            ("sale_prefix", &self.sale_prefix),
            ("purchase_prefix", &self.purchase_prefix),
            ("credit_note_prefix", &self.credit_note_prefix),
        ] {
            if prefix.is_empty() {
                return Err(ValidationError::Required {
                    field: field.to_string(),
                });
            }
            if prefix.len() > 10 || !prefix.chars().all(|c| c.is_ascii_alphanumeric()) {
                return Err(ValidationError::InvalidFormat {
                    field: field.to_string(),
                    reason: "must be 1-10 ASCII letters or digits".to_string(),
                });
            }
        }

        Ok(())
    }
}

// =============================================================================
// Reference Numbers
// =============================================================================

/// Formats a reference number: `{prefix}-{YYYYMMDD}-{NNNN}`.
///
/// `sequence` is the 1-based position of the record among records with the
/// same prefix on the same day.
///
/// ```rust
/// use chrono::{TimeZone, Utc};
/// use tradebook_core::settings::reference_number;
///
/// let date = Utc.with_ymd_and_hms(2026, 1, 31, 10, 0, 0).unwrap();
/// assert_eq!(reference_number("SAL", date, 7), "SAL-20260131-0007");
/// ```
pub fn reference_number(prefix: &str, date: DateTime<Utc>, sequence: u32) -> String {
    format!("{}-{}-{:04}", prefix, date.format("%Y%m%d"), sequence)
}

/// The `{prefix}-{YYYYMMDD}-` stem shared by every reference of that day.
pub fn reference_stem(prefix: &str, date: DateTime<Utc>) -> String {
    format!("{}-{}-", prefix, date.format("%Y%m%d"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_defaults_from_empty_toml_equivalent() {
        let settings: LedgerSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings, LedgerSettings::default());
        assert_eq!(settings.document_prefix(DocumentKind::Purchase), "PUR");
    }

    #[test]
    fn test_reference_number_format() {
        let date = Utc.with_ymd_and_hms(2026, 3, 4, 23, 59, 0).unwrap();
        assert_eq!(reference_number("CN", date, 12), "CN-20260304-0012");
        assert_eq!(reference_stem("CN", date), "CN-20260304-");
    }

    #[test]
    fn test_validate_rejects_bad_prefix() {
        let settings = LedgerSettings {
            sale_prefix: "S-1".to_string(),
            ..LedgerSettings::default()
        };
        assert!(settings.validate().is_err());

        let settings = LedgerSettings {
            default_tax_rate_bps: 20_000,
            ..LedgerSettings::default()
        };
        assert!(settings.validate().is_err());
        assert!(LedgerSettings::default().validate().is_ok());
    }
}
