use crate::http::build_client;
use crate::models::{CanonicalProduct, ListingUpdate, ProviderMapping, RawListing, RowId};
use crate::store::{CatalogStore, StoreError};
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::Deserialize;

const LISTING_COLUMNS: &str = "id,provider_name,sku_provider,raw_title,status,metadata";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableNames {
    pub listings: String,
    pub products: String,
    pub mappings: String,
}

impl Default for TableNames {
    fn default() -> Self {
        Self {
            listings: "log_scraper_prices".into(),
            products: "products".into(),
            mappings: "providers_map".into(),
        }
    }
}

impl TableNames {
    fn from_env() -> Self {
        let defaults = Self::default();
        let pick = |key: &str, fallback: String| {
            std::env::var(key)
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or(fallback)
        };
        Self {
            listings: pick("LISTINGS_TABLE", defaults.listings),
            products: pick("PRODUCTS_TABLE", defaults.products),
            mappings: pick("MAPPINGS_TABLE", defaults.mappings),
        }
    }
}

/// PostgREST-backed store. Upserts go through `on_conflict` with
/// `resolution=merge-duplicates`, so concurrent writers of the same key
/// converge on one row.
#[derive(Debug, Clone)]
pub struct SupabaseStore {
    base_url: String,
    service_key: String,
    tables: TableNames,
    http: Client,
}

#[derive(Debug, Deserialize)]
struct IdRow {
    id: RowId,
}

#[derive(Debug, Deserialize)]
struct MappingRow {
    normalized_product_id: Option<RowId>,
}

impl SupabaseStore {
    pub fn from_env() -> Option<Self> {
        let base_url = std::env::var("SUPABASE_URL").ok()?;
        let service_key = std::env::var("SUPABASE_SERVICE_ROLE_KEY")
            .or_else(|_| std::env::var("SUPABASE_SERVICE_KEY"))
            .or_else(|_| std::env::var("SUPABASE_KEY"))
            .ok()?;
        Some(Self::new(&base_url, service_key, TableNames::from_env()))
    }

    pub fn new(base_url: &str, service_key: String, tables: TableNames) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            service_key,
            tables,
            http: build_client(),
        }
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn pending_url(&self, limit: usize) -> String {
        format!(
            "{}?select={LISTING_COLUMNS}&status=eq.pending&limit={limit}",
            self.table_url(&self.tables.listings)
        )
    }

    fn mapping_url(&self, provider_name: &str, provider_sku: &str) -> String {
        format!(
            "{}?select=normalized_product_id&provider_name=eq.{}&provider_sku=eq.{}&limit=1",
            self.table_url(&self.tables.mappings),
            filter_value(provider_name),
            filter_value(provider_sku)
        )
    }

    fn listing_url(&self, id: &RowId) -> String {
        format!(
            "{}?id=eq.{}",
            self.table_url(&self.tables.listings),
            filter_value(&id.to_string())
        )
    }

    fn request(&self, method: Method, url: String) -> RequestBuilder {
        self.http
            .request(method, url)
            .header("apikey", &self.service_key)
            .header("Authorization", format!("Bearer {}", self.service_key))
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, StoreError> {
        let response = request
            .send()
            .await
            .map_err(|err| StoreError::Request(err.to_string()))?;
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(StoreError::Request(format!(
            "HTTP {status}: {}",
            body.chars().take(300).collect::<String>()
        )))
    }
}

#[async_trait]
impl CatalogStore for SupabaseStore {
    async fn pending_listings(&self, limit: usize) -> Result<Vec<RawListing>, StoreError> {
        let response = self
            .send(self.request(Method::GET, self.pending_url(limit)))
            .await?;
        response
            .json()
            .await
            .map_err(|err| StoreError::Deserialize(err.to_string()))
    }

    async fn find_mapping(
        &self,
        provider_name: &str,
        provider_sku: &str,
    ) -> Result<Option<RowId>, StoreError> {
        let url = self.mapping_url(provider_name, provider_sku);
        let response = self.send(self.request(Method::GET, url)).await?;
        let mut rows: Vec<MappingRow> = response
            .json()
            .await
            .map_err(|err| StoreError::Deserialize(err.to_string()))?;
        Ok(rows.pop().and_then(|row| row.normalized_product_id))
    }

    async fn upsert_product(&self, product: &CanonicalProduct) -> Result<RowId, StoreError> {
        let url = format!(
            "{}?on_conflict=sku_qrclima&select=id",
            self.table_url(&self.tables.products)
        );
        let request = self
            .request(Method::POST, url)
            .header("Prefer", "resolution=merge-duplicates,return=representation")
            .json(&[product]);
        let mut rows: Vec<IdRow> = self
            .send(request)
            .await?
            .json()
            .await
            .map_err(|err| StoreError::Deserialize(err.to_string()))?;
        rows.pop()
            .map(|row| row.id)
            .ok_or_else(|| StoreError::Deserialize("upsert returned no row".into()))
    }

    async fn upsert_mapping(&self, mapping: &ProviderMapping) -> Result<(), StoreError> {
        let url = format!(
            "{}?on_conflict=provider_name,provider_sku",
            self.table_url(&self.tables.mappings)
        );
        let request = self
            .request(Method::POST, url)
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&[mapping]);
        self.send(request).await?;
        Ok(())
    }

    async fn update_listing(&self, id: &RowId, update: &ListingUpdate) -> Result<(), StoreError> {
        let request = self
            .request(Method::PATCH, self.listing_url(id))
            .header("Prefer", "return=minimal")
            .json(&update.to_patch());
        self.send(request).await?;
        Ok(())
    }
}

/// Quotes a PostgREST filter operand so commas, dots and parentheses in vendor
/// data cannot change the filter's meaning.
fn filter_value(raw: &str) -> String {
    let quoted = format!("\"{}\"", raw.replace('\\', "\\\\").replace('"', "\\\""));
    urlencoding::encode(&quoted).into_owned()
}
