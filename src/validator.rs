//! Semantic checks of a classification against the listing it came from.
//!
//! Each rule has the shape "the input implies X, so the output must not claim
//! not-X, unless the input explicitly negates X". Rules are pure; a failure is
//! terminal for the item.

use crate::classifier::ProductClassification;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::{fs, path::Path};
use thiserror::Error;
use tracing::info;
use unicode_normalization::{UnicodeNormalization, char::is_combining_mark};

static HEATING_INTENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"frio[\s/-]*calor|calefaccion|heat\s*pump|heating|f/c")
        .expect("heating intent pattern")
});

static HEATING_NEGATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(no\s+tiene|sin)\s+(calefaccion|bomba\s+de\s+calor|heat\s*pump)|no\s+tiene\s+calor")
        .expect("heating negation pattern")
});

const COOLING_ONLY_SUFFIX: &str = "-SF";
const EXCERPT_CHARS: usize = 20;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error(
        "heating_mode: title implies heating ('{excerpt}...') but sku {sku} is cooling-only"
    )]
    HeatingModeContradiction { excerpt: String, sku: String },
    #[error("vendor_brand: vendor '{vendor}' implies brand {expected} but classification says {found}")]
    VendorBrandContradiction {
        vendor: String,
        expected: String,
        found: String,
    },
}

impl ValidationError {
    pub fn rule(&self) -> &'static str {
        match self {
            ValidationError::HeatingModeContradiction { .. } => "heating_mode",
            ValidationError::VendorBrandContradiction { .. } => "vendor_brand",
        }
    }
}

#[derive(Debug, Error)]
pub enum RuleTableError {
    #[error("cannot read vendor rules {path}: {message}")]
    Read { path: String, message: String },
    #[error("invalid vendor rules {path}: {message}")]
    Parse { path: String, message: String },
}

/// Everything a rule may look at.
pub struct ValidationInput<'a> {
    pub provider_name: &'a str,
    pub raw_title: &'a str,
    /// Lower-cased, diacritics removed.
    pub normalized_title: String,
    pub result: &'a ProductClassification,
}

pub trait ValidationRule: Send + Sync {
    fn check(&self, input: &ValidationInput<'_>) -> Result<(), ValidationError>;
}

/// Lower-case and strip combining marks so "Frío/Calor" matches "frio/calor".
pub fn normalize_text(text: &str) -> String {
    text.nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase()
}

pub struct HeatingModeRule;

impl ValidationRule for HeatingModeRule {
    fn check(&self, input: &ValidationInput<'_>) -> Result<(), ValidationError> {
        let cooling_only = input
            .result
            .sku
            .trim()
            .to_uppercase()
            .ends_with(COOLING_ONLY_SUFFIX);
        if !cooling_only || !HEATING_INTENT.is_match(&input.normalized_title) {
            return Ok(());
        }
        if HEATING_NEGATION.is_match(&input.normalized_title) {
            return Ok(());
        }
        Err(ValidationError::HeatingModeContradiction {
            excerpt: input.raw_title.chars().take(EXCERPT_CHARS).collect(),
            sku: input.result.sku.clone(),
        })
    }
}

/// One vendor whose name pins the manufacturer.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct VendorBrandEntry {
    /// Case-insensitive substring of the vendor name.
    pub vendor_contains: String,
    pub expected_brand: String,
    /// Brand codes that contradict the vendor. Empty means any brand other
    /// than `expected_brand`.
    #[serde(default)]
    pub incompatible_brands: Vec<String>,
}

impl VendorBrandEntry {
    fn contradicts(&self, brand: &str) -> bool {
        if brand.eq_ignore_ascii_case(&self.expected_brand) {
            return false;
        }
        self.incompatible_brands.is_empty()
            || self
                .incompatible_brands
                .iter()
                .any(|other| other.eq_ignore_ascii_case(brand))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VendorBrandRule {
    entries: Vec<VendorBrandEntry>,
}

impl Default for VendorBrandRule {
    fn default() -> Self {
        Self {
            entries: vec![VendorBrandEntry {
                vendor_contains: "mirage".into(),
                expected_brand: "MIRA".into(),
                incompatible_brands: vec!["GENE".into()],
            }],
        }
    }
}

impl VendorBrandRule {
    pub fn new(entries: Vec<VendorBrandEntry>) -> Self {
        Self { entries }
    }

    pub fn from_yaml(raw: &str, origin: &str) -> Result<Self, RuleTableError> {
        let entries: Vec<VendorBrandEntry> =
            serde_yaml::from_str(raw).map_err(|err| RuleTableError::Parse {
                path: origin.to_string(),
                message: err.to_string(),
            })?;
        Ok(Self::new(entries))
    }

    pub fn from_file(path: &Path) -> Result<Self, RuleTableError> {
        let raw = fs::read_to_string(path).map_err(|err| RuleTableError::Read {
            path: path.display().to_string(),
            message: err.to_string(),
        })?;
        Self::from_yaml(&raw, &path.display().to_string())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

impl ValidationRule for VendorBrandRule {
    fn check(&self, input: &ValidationInput<'_>) -> Result<(), ValidationError> {
        let vendor = normalize_text(input.provider_name);
        let brand = input.result.brand_code.trim();
        for entry in &self.entries {
            if vendor.contains(&normalize_text(&entry.vendor_contains)) && entry.contradicts(brand)
            {
                return Err(ValidationError::VendorBrandContradiction {
                    vendor: input.provider_name.to_string(),
                    expected: entry.expected_brand.clone(),
                    found: brand.to_string(),
                });
            }
        }
        Ok(())
    }
}

pub struct OutputValidator {
    rules: Vec<Box<dyn ValidationRule>>,
}

impl Default for OutputValidator {
    fn default() -> Self {
        Self::new(VendorBrandRule::default())
    }
}

impl OutputValidator {
    pub fn new(vendor_rule: VendorBrandRule) -> Self {
        Self {
            rules: vec![Box::new(HeatingModeRule), Box::new(vendor_rule)],
        }
    }

    /// Built-in vendor table unless `VENDOR_RULES_PATH` points at a YAML list.
    pub fn from_env() -> Result<Self, RuleTableError> {
        let Some(path) = std::env::var("VENDOR_RULES_PATH")
            .ok()
            .filter(|v| !v.trim().is_empty())
        else {
            return Ok(Self::default());
        };
        let table = VendorBrandRule::from_file(Path::new(path.trim()))?;
        info!(
            target = "normalizer.validator",
            path = %path,
            entries = table.len(),
            "loaded vendor brand rules"
        );
        Ok(Self::new(table))
    }

    pub fn validate(
        &self,
        provider_name: &str,
        raw_title: &str,
        result: &ProductClassification,
    ) -> Result<(), ValidationError> {
        let input = ValidationInput {
            provider_name,
            raw_title,
            normalized_title: normalize_text(raw_title),
            result,
        };
        self.rules.iter().try_for_each(|rule| rule.check(&input))
    }
}
