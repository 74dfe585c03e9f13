use crate::models::{
    CanonicalProduct, ListingStatus, ListingUpdate, ProviderMapping, RawListing, RowId,
};
use crate::store::{CatalogStore, StoreError};
use async_trait::async_trait;
use std::{collections::HashMap, path::Path, sync::Arc};
use tokio::sync::Mutex;

/// In-process store with the same unique-key semantics as the database.
/// Used for local runs without Supabase and as the test backend.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

#[derive(Default)]
struct MemoryState {
    listings: Vec<RawListing>,
    products: Vec<(RowId, CanonicalProduct)>,
    mappings: HashMap<(String, String), ProviderMapping>,
    next_product_id: i64,
}

impl MemoryStore {
    pub fn with_listings(listings: Vec<RawListing>) -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState {
                listings,
                ..MemoryState::default()
            })),
        }
    }

    /// Seeds listings from a JSON array shaped like the listings table.
    pub fn from_seed_file(path: &Path) -> Result<Self, StoreError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|err| StoreError::Request(format!("{}: {err}", path.display())))?;
        let listings: Vec<RawListing> = serde_json::from_str(&raw)
            .map_err(|err| StoreError::Deserialize(format!("{}: {err}", path.display())))?;
        Ok(Self::with_listings(listings))
    }
}

#[async_trait]
impl CatalogStore for MemoryStore {
    async fn pending_listings(&self, limit: usize) -> Result<Vec<RawListing>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .listings
            .iter()
            .filter(|listing| listing.status == ListingStatus::Pending)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn find_mapping(
        &self,
        provider_name: &str,
        provider_sku: &str,
    ) -> Result<Option<RowId>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .mappings
            .get(&(provider_name.to_string(), provider_sku.to_string()))
            .map(|mapping| mapping.normalized_product_id.clone()))
    }

    async fn upsert_product(&self, product: &CanonicalProduct) -> Result<RowId, StoreError> {
        let mut state = self.state.lock().await;
        if let Some((id, existing)) = state
            .products
            .iter_mut()
            .find(|(_, existing)| existing.sku == product.sku)
        {
            *existing = product.clone();
            return Ok(id.clone());
        }
        state.next_product_id += 1;
        let id = RowId::Int(state.next_product_id);
        state.products.push((id.clone(), product.clone()));
        Ok(id)
    }

    async fn upsert_mapping(&self, mapping: &ProviderMapping) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.mappings.insert(
            (mapping.provider_name.clone(), mapping.provider_sku.clone()),
            mapping.clone(),
        );
        Ok(())
    }

    async fn update_listing(&self, id: &RowId, update: &ListingUpdate) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let listing = state
            .listings
            .iter_mut()
            .find(|listing| &listing.id == id)
            .ok_or_else(|| StoreError::Request(format!("listing {id} not found")))?;
        listing.status = update.status();
        match update {
            ListingUpdate::Processed {
                product_id,
                metadata,
            } => {
                listing.normalized_product_id = product_id.clone();
                listing.metadata = metadata.clone();
            }
            ListingUpdate::Failed { metadata } => {
                listing.metadata = Some(metadata.clone());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
impl MemoryStore {
    pub async fn listing(&self, id: &RowId) -> Option<RawListing> {
        let state = self.state.lock().await;
        state.listings.iter().find(|l| &l.id == id).cloned()
    }

    pub async fn products(&self) -> Vec<(RowId, CanonicalProduct)> {
        self.state.lock().await.products.clone()
    }

    pub async fn mappings(&self) -> Vec<ProviderMapping> {
        self.state.lock().await.mappings.values().cloned().collect()
    }

    pub async fn insert_mapping(&self, mapping: ProviderMapping) {
        let _ = self.upsert_mapping(&mapping).await;
    }
}
