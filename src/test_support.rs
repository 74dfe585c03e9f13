//! Fakes shared by the unit tests.

use crate::classifier::{
    Classifier, ClassifierError, ClassificationResult, ProductClassification,
};
use crate::models::{
    CanonicalProduct, ListingStatus, ListingUpdate, ProviderMapping, RawListing, RowId,
};
use crate::store::{CatalogStore, MemoryStore, StoreError};
use async_trait::async_trait;
use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

pub fn listing(id: i64, provider: &str, sku: Option<&str>, title: &str) -> RawListing {
    RawListing {
        id: RowId::Int(id),
        provider_name: provider.into(),
        provider_sku: sku.map(str::to_string),
        raw_title: title.into(),
        status: ListingStatus::Pending,
        normalized_product_id: None,
        metadata: None,
    }
}

pub fn classification(sku: &str, brand: &str) -> ProductClassification {
    ProductClassification {
        canonical_name: format!("Producto {sku}"),
        sku: sku.into(),
        brand_code: brand.into(),
        category_code: "EQP-MIN".into(),
        specs: BTreeMap::from([("capacity".to_string(), "1T".to_string())]),
    }
}

#[derive(Debug, Clone)]
pub enum Reply {
    Product(ProductClassification),
    NotAProduct,
    Unavailable(String),
}

/// Classifier answering by raw title. Unscripted titles come back malformed.
#[derive(Clone, Default)]
pub struct ScriptedClassifier {
    replies: Arc<HashMap<String, Reply>>,
    delay: Option<Duration>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl ScriptedClassifier {
    pub fn on(mut self, title: &str, reply: Reply) -> Self {
        Arc::make_mut(&mut self.replies).insert(title.to_string(), reply);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Classifier for ScriptedClassifier {
    async fn classify(
        &self,
        _provider_name: &str,
        raw_title: &str,
    ) -> Result<ClassificationResult, ClassifierError> {
        self.calls.lock().unwrap().push(raw_title.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match self.replies.get(raw_title) {
            Some(Reply::Product(product)) => Ok(ClassificationResult::Product(product.clone())),
            Some(Reply::NotAProduct) => Ok(ClassificationResult::NotAProduct),
            Some(Reply::Unavailable(cause)) => Err(ClassifierError::Unavailable {
                attempts: 4,
                cause: cause.clone(),
            }),
            None => Err(ClassifierError::Malformed(format!("unscripted title {raw_title}"))),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Faults {
    select: bool,
    lookup: bool,
    products: bool,
    mappings: bool,
    processed_updates: bool,
}

/// Memory store with switchable failures and write counters.
#[derive(Clone, Default)]
pub struct FlakyStore {
    pub inner: MemoryStore,
    faults: Arc<Faults>,
    product_writes: Arc<AtomicUsize>,
    mapping_writes: Arc<AtomicUsize>,
}

impl FlakyStore {
    pub fn with_listings(listings: Vec<RawListing>) -> Self {
        Self {
            inner: MemoryStore::with_listings(listings),
            ..Self::default()
        }
    }

    fn fault(mut self, apply: impl FnOnce(&mut Faults)) -> Self {
        apply(Arc::make_mut(&mut self.faults));
        self
    }

    pub fn failing_select(self) -> Self {
        self.fault(|f| f.select = true)
    }

    pub fn failing_lookups(self) -> Self {
        self.fault(|f| f.lookup = true)
    }

    pub fn failing_products(self) -> Self {
        self.fault(|f| f.products = true)
    }

    pub fn failing_mappings(self) -> Self {
        self.fault(|f| f.mappings = true)
    }

    pub fn failing_processed_updates(self) -> Self {
        self.fault(|f| f.processed_updates = true)
    }

    pub fn product_writes(&self) -> usize {
        self.product_writes.load(Ordering::SeqCst)
    }

    pub fn mapping_writes(&self) -> usize {
        self.mapping_writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CatalogStore for FlakyStore {
    async fn pending_listings(&self, limit: usize) -> Result<Vec<RawListing>, StoreError> {
        if self.faults.select {
            return Err(StoreError::Request("connection refused".into()));
        }
        self.inner.pending_listings(limit).await
    }

    async fn find_mapping(
        &self,
        provider_name: &str,
        provider_sku: &str,
    ) -> Result<Option<RowId>, StoreError> {
        if self.faults.lookup {
            return Err(StoreError::Request("mappings unavailable".into()));
        }
        self.inner.find_mapping(provider_name, provider_sku).await
    }

    async fn upsert_product(&self, product: &CanonicalProduct) -> Result<RowId, StoreError> {
        self.product_writes.fetch_add(1, Ordering::SeqCst);
        if self.faults.products {
            return Err(StoreError::Request("products unavailable".into()));
        }
        self.inner.upsert_product(product).await
    }

    async fn upsert_mapping(&self, mapping: &ProviderMapping) -> Result<(), StoreError> {
        self.mapping_writes.fetch_add(1, Ordering::SeqCst);
        if self.faults.mappings {
            return Err(StoreError::Request("mappings unavailable".into()));
        }
        self.inner.upsert_mapping(mapping).await
    }

    async fn update_listing(&self, id: &RowId, update: &ListingUpdate) -> Result<(), StoreError> {
        if self.faults.processed_updates && matches!(update, ListingUpdate::Processed { .. }) {
            return Err(StoreError::Request("status write rejected".into()));
        }
        self.inner.update_listing(id, update).await
    }
}
