use crate::models::RowId;
use crate::store::{CatalogStore, StoreError};
use std::sync::Arc;
use tracing::debug;

/// Read-through view of the provider mapping table. A hit means the
/// listing was classified before and the classifier can be skipped.
#[derive(Clone)]
pub struct MappingCache {
    store: Arc<dyn CatalogStore>,
}

impl MappingCache {
    pub fn new(store: Arc<dyn CatalogStore>) -> Self {
        Self { store }
    }

    /// Without a vendor SKU there is no key, so nothing is queried.
    pub async fn lookup(
        &self,
        provider_name: &str,
        provider_sku: Option<&str>,
    ) -> Result<Option<RowId>, StoreError> {
        let Some(sku) = provider_sku else {
            return Ok(None);
        };
        let hit = self.store.find_mapping(provider_name, sku).await?;
        debug!(
            target = "normalizer.catalog",
            provider = provider_name,
            sku,
            hit = hit.is_some(),
            "mapping lookup"
        );
        Ok(hit)
    }
}
