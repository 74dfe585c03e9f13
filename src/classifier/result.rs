//! Typed view over the classifier's JSON answer.
//!
//! The service is untrusted: every field is checked here so downstream code
//! never sees a half-populated classification.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct ParseError(String);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProductClassification {
    pub canonical_name: String,
    pub sku: String,
    pub brand_code: String,
    pub category_code: String,
    pub specs: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClassificationResult {
    /// The listing is not a catalog product (accessory page, service, junk row).
    NotAProduct,
    Product(ProductClassification),
}

impl ClassificationResult {
    pub fn is_valid_product(&self) -> bool {
        matches!(self, ClassificationResult::Product(_))
    }

    /// Parses a completion body, tolerating code-fence wrapping.
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        let cleaned = strip_code_fences(text);
        let raw: RawClassification = serde_json::from_str(&cleaned)
            .map_err(|err| ParseError(format!("invalid json: {err}")))?;

        let valid = raw
            .is_valid_hvac
            .ok_or_else(|| ParseError("missing field `is_valid_hvac`".into()))?;
        if !valid {
            return Ok(ClassificationResult::NotAProduct);
        }

        Ok(ClassificationResult::Product(ProductClassification {
            canonical_name: required(raw.standardized_name, "standardized_name")?,
            sku: required(raw.sku_qrclima, "sku_qrclima")?.to_uppercase(),
            brand_code: required(raw.brand_code, "brand_code")?.to_uppercase(),
            category_code: required(raw.category_code, "category_code")?,
            specs: flatten_specs(raw.specs.unwrap_or_default())?,
        }))
    }
}

#[derive(Debug, Deserialize)]
struct RawClassification {
    #[serde(default, alias = "is_valid_product")]
    is_valid_hvac: Option<bool>,
    #[serde(default, alias = "canonical_name")]
    standardized_name: Option<String>,
    #[serde(default, alias = "sku")]
    sku_qrclima: Option<String>,
    #[serde(default)]
    brand_code: Option<String>,
    #[serde(default)]
    category_code: Option<String>,
    #[serde(default)]
    specs: Option<Map<String, Value>>,
}

fn required(value: Option<String>, field: &str) -> Result<String, ParseError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ParseError(format!("missing field `{field}`")))
}

/// Specs are stored as flat strings; nested values are rejected.
fn flatten_specs(specs: Map<String, Value>) -> Result<BTreeMap<String, String>, ParseError> {
    let mut flat = BTreeMap::new();
    for (key, value) in specs {
        let text = match value {
            Value::Null => continue,
            Value::String(s) => s.trim().to_string(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Array(_) | Value::Object(_) => {
                return Err(ParseError(format!("spec `{key}` is not a scalar")));
            }
        };
        if !text.is_empty() {
            flat.insert(key, text);
        }
    }
    Ok(flat)
}

/// Removes markdown code fences (with or without a language tag) around the
/// payload. Text without fences is only trimmed.
pub fn strip_code_fences(input: &str) -> String {
    let trimmed = input.trim();
    let Some(start) = trimmed.find("```") else {
        return trimmed.to_string();
    };
    let after = trimmed[start + 3..].trim_start_matches(|c: char| c.is_ascii_alphanumeric());
    let body = match after.find("```") {
        Some(end) => &after[..end],
        None => after,
    };
    body.trim().to_string()
}
