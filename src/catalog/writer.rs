use crate::classifier::ProductClassification;
use crate::models::{CanonicalProduct, ProviderMapping, RawListing, RowId};
use crate::store::{CatalogStore, StoreError};
use std::sync::Arc;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MappingWrite {
    Written,
    /// Listing had no vendor SKU.
    Skipped,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteReceipt {
    pub product_id: RowId,
    pub mapping: MappingWrite,
}

/// Writes the canonical product, then the vendor mapping. Both are upserts
/// on their unique keys, so replaying a listing converges on the same rows.
#[derive(Clone)]
pub struct CatalogWriter {
    store: Arc<dyn CatalogStore>,
}

impl CatalogWriter {
    pub fn new(store: Arc<dyn CatalogStore>) -> Self {
        Self { store }
    }

    /// A failed product write fails the call. A failed mapping write does
    /// not: the product row stays and the next pass simply misses the cache.
    pub async fn upsert(
        &self,
        listing: &RawListing,
        classification: &ProductClassification,
    ) -> Result<WriteReceipt, StoreError> {
        let product = CanonicalProduct {
            sku: classification.sku.clone(),
            display_name: classification.canonical_name.clone(),
            brand: classification.brand_code.clone(),
            category: classification.category_code.clone(),
            specs: classification.specs.clone(),
        };
        let product_id = self.store.upsert_product(&product).await?;

        let Some(provider_sku) = listing.provider_sku() else {
            return Ok(WriteReceipt {
                product_id,
                mapping: MappingWrite::Skipped,
            });
        };
        let mapping = ProviderMapping {
            provider_name: listing.provider_name.clone(),
            provider_sku: provider_sku.to_string(),
            raw_title_seen: listing.raw_title.clone(),
            normalized_product_id: product_id.clone(),
        };
        let mapping = match self.store.upsert_mapping(&mapping).await {
            Ok(()) => MappingWrite::Written,
            Err(err) => {
                warn!(
                    target = "normalizer.catalog",
                    listing = %listing.id,
                    sku = %product.sku,
                    error = %err,
                    "mapping upsert failed; product kept"
                );
                MappingWrite::Failed(err.to_string())
            }
        };
        Ok(WriteReceipt {
            product_id,
            mapping,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FlakyStore, classification, listing};

    #[tokio::test]
    async fn replay_converges_on_one_product_and_mapping() {
        let store = FlakyStore::default();
        let writer = CatalogWriter::new(Arc::new(store.clone()));
        let row = listing(1, "Mirage Store", Some("MIR-12"), "Minisplit Mirage 1T");
        let result = classification("EQP-MIN-MIRA-LIFE-1T110-SF", "MIRA");

        let first = writer.upsert(&row, &result).await.unwrap();
        let second = writer.upsert(&row, &result).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.mapping, MappingWrite::Written);
        assert_eq!(store.inner.products().await.len(), 1);
        let mappings = store.inner.mappings().await;
        assert_eq!(mappings.len(), 1);
        assert_eq!(mappings[0].normalized_product_id, first.product_id);
        assert_eq!(mappings[0].raw_title_seen, "Minisplit Mirage 1T");
    }

    #[tokio::test]
    async fn missing_sku_skips_mapping() {
        let store = FlakyStore::default();
        let writer = CatalogWriter::new(Arc::new(store.clone()));
        let receipt = writer
            .upsert(
                &listing(1, "Mirage Store", None, "Kit de instalacion"),
                &classification("INS-KIT-MIRA-1412-3M", "MIRA"),
            )
            .await
            .unwrap();
        assert_eq!(receipt.mapping, MappingWrite::Skipped);
        assert!(store.inner.mappings().await.is_empty());
        assert_eq!(store.mapping_writes(), 0);
    }

    #[tokio::test]
    async fn mapping_failure_keeps_product() {
        let store = FlakyStore::default().failing_mappings();
        let writer = CatalogWriter::new(Arc::new(store.clone()));
        let receipt = writer
            .upsert(
                &listing(1, "Mirage Store", Some("MIR-12"), "Minisplit"),
                &classification("EQP-MIN-MIRA-LIFE-1T110-SF", "MIRA"),
            )
            .await
            .unwrap();
        assert!(matches!(receipt.mapping, MappingWrite::Failed(_)));
        assert_eq!(store.inner.products().await.len(), 1);
    }

    #[tokio::test]
    async fn product_failure_is_an_error() {
        let store = FlakyStore::default().failing_products();
        let writer = CatalogWriter::new(Arc::new(store.clone()));
        let err = writer
            .upsert(
                &listing(1, "Mirage Store", Some("MIR-12"), "Minisplit"),
                &classification("EQP-MIN-MIRA-LIFE-1T110-SF", "MIRA"),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("products unavailable"));
        assert_eq!(store.mapping_writes(), 0);
    }
}
