pub mod memory;
pub mod supabase;

use crate::models::{CanonicalProduct, ListingUpdate, ProviderMapping, RawListing, RowId};
use async_trait::async_trait;
use thiserror::Error;

pub use memory::MemoryStore;
pub use supabase::SupabaseStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("invalid response: {0}")]
    Deserialize(String),
}

/// The three pipeline tables. Conflict resolution on unique keys is the
/// store's job; callers never lock.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Up to `limit` listings with `status = pending`.
    async fn pending_listings(&self, limit: usize) -> Result<Vec<RawListing>, StoreError>;

    async fn find_mapping(
        &self,
        provider_name: &str,
        provider_sku: &str,
    ) -> Result<Option<RowId>, StoreError>;

    /// Insert or overwrite by `sku`, returning the row id.
    async fn upsert_product(&self, product: &CanonicalProduct) -> Result<RowId, StoreError>;

    /// Insert or overwrite by (`provider_name`, `provider_sku`).
    async fn upsert_mapping(&self, mapping: &ProviderMapping) -> Result<(), StoreError>;

    async fn update_listing(&self, id: &RowId, update: &ListingUpdate) -> Result<(), StoreError>;
}
