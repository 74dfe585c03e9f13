use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use serde_with::skip_serializing_none;
use std::{collections::BTreeMap, fmt};

/// Metadata key holding the message of the last failed pipeline pass.
pub const LAST_ERROR_KEY: &str = "last_error";

/// Opaque row identifier. The store may hand out integers or strings
/// (bigint or uuid primary keys), so both are accepted verbatim.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RowId {
    Int(i64),
    Text(String),
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowId::Int(value) => write!(f, "{value}"),
            RowId::Text(value) => f.write_str(value),
        }
    }
}

impl From<i64> for RowId {
    fn from(value: i64) -> Self {
        RowId::Int(value)
    }
}

impl From<&str> for RowId {
    fn from(value: &str) -> Self {
        RowId::Text(value.to_string())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ListingStatus {
    #[default]
    Pending,
    Processed,
    Error,
}

impl ListingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListingStatus::Pending => "pending",
            ListingStatus::Processed => "processed",
            ListingStatus::Error => "error",
        }
    }
}

/// One scraped observation, owned by the scraper. The pipeline only ever
/// updates `status`, `normalized_product_id` and `metadata`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawListing {
    pub id: RowId,
    pub provider_name: String,
    #[serde(rename = "sku_provider", default)]
    pub provider_sku: Option<String>,
    pub raw_title: String,
    #[serde(default)]
    pub status: ListingStatus,
    #[serde(default)]
    pub normalized_product_id: Option<RowId>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

impl RawListing {
    /// Vendor SKU usable as a mapping key. Blank codes count as absent.
    pub fn provider_sku(&self) -> Option<&str> {
        self.provider_sku
            .as_deref()
            .map(str::trim)
            .filter(|sku| !sku.is_empty())
    }

    /// Metadata to persist on success: the previous error is nulled out,
    /// everything else is preserved.
    pub fn cleared_metadata(&self) -> Option<Value> {
        match &self.metadata {
            Some(Value::Object(map)) => {
                let mut map = map.clone();
                map.insert(LAST_ERROR_KEY.to_string(), Value::Null);
                Some(Value::Object(map))
            }
            Some(Value::Null) | None => None,
            Some(other) => Some(other.clone()),
        }
    }

    pub fn failed_metadata(&self, message: &str) -> Value {
        let mut map = match &self.metadata {
            Some(Value::Object(map)) => map.clone(),
            _ => Map::new(),
        };
        map.insert(LAST_ERROR_KEY.to_string(), Value::String(message.to_string()));
        Value::Object(map)
    }
}

/// Terminal write applied to a listing at the end of its pass.
#[derive(Debug, Clone, PartialEq)]
pub enum ListingUpdate {
    Processed {
        product_id: Option<RowId>,
        metadata: Option<Value>,
    },
    /// Leaves `normalized_product_id` untouched.
    Failed { metadata: Value },
}

impl ListingUpdate {
    pub fn status(&self) -> ListingStatus {
        match self {
            ListingUpdate::Processed { .. } => ListingStatus::Processed,
            ListingUpdate::Failed { .. } => ListingStatus::Error,
        }
    }

    /// Column patch as sent to the store.
    pub fn to_patch(&self) -> Value {
        match self {
            ListingUpdate::Processed {
                product_id,
                metadata,
            } => json!({
                "status": ListingStatus::Processed,
                "normalized_product_id": product_id,
                "metadata": metadata,
            }),
            ListingUpdate::Failed { metadata } => json!({
                "status": ListingStatus::Error,
                "metadata": metadata,
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalProduct {
    #[serde(rename = "sku_qrclima")]
    pub sku: String,
    pub display_name: String,
    pub brand: String,
    pub category: String,
    #[serde(rename = "specs_json", default)]
    pub specs: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderMapping {
    pub provider_name: String,
    pub provider_sku: String,
    #[serde(rename = "provider_raw_title")]
    pub raw_title_seen: String,
    pub normalized_product_id: RowId,
}

/// How an item reached its terminal state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    CacheHit,
    Classified,
    NotAProduct,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ItemOutcome {
    pub id: RowId,
    pub status: ListingStatus,
    pub product_id: Option<RowId>,
    pub resolution: Option<Resolution>,
    pub error: Option<String>,
    pub elapsed_ms: u128,
}

impl ItemOutcome {
    pub fn processed(
        id: RowId,
        product_id: Option<RowId>,
        resolution: Resolution,
        elapsed_ms: u128,
    ) -> Self {
        Self {
            id,
            status: ListingStatus::Processed,
            product_id,
            resolution: Some(resolution),
            error: None,
            elapsed_ms,
        }
    }

    pub fn failed(id: RowId, error: impl Into<String>, elapsed_ms: u128) -> Self {
        Self {
            id,
            status: ListingStatus::Error,
            product_id: None,
            resolution: None,
            error: Some(error.into()),
            elapsed_ms,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub processed_count: usize,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u128,
    pub details: Vec<ItemOutcome>,
}

impl BatchReport {
    pub fn count(&self, status: ListingStatus) -> usize {
        self.details
            .iter()
            .filter(|item| item.status == status)
            .count()
    }
}

/// Result of one pipeline invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RunReport {
    Idle { idle: bool, message: String },
    Completed(BatchReport),
}

impl RunReport {
    pub fn idle() -> Self {
        RunReport::Idle {
            idle: true,
            message: "queue empty (idle)".to_string(),
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, RunReport::Idle { .. })
    }
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}
