use crate::catalog::{CatalogWriter, MappingCache};
use crate::classifier::{
    ClassificationResult, Classifier, ClassifierError, ResilientInvoker,
};
use crate::models::{
    BatchReport, ItemOutcome, ListingStatus, ListingUpdate, RawListing, Resolution, RowId,
    RunReport,
};
use crate::store::{CatalogStore, MemoryStore, StoreError, SupabaseStore};
use crate::validator::{OutputValidator, ValidationError};
use chrono::Utc;
use futures::future::join_all;
use std::{env, path::Path, sync::Arc, time::Instant};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// One pass over the pending queue: select a batch, resolve every listing
/// concurrently, record a terminal status on each.
#[derive(Clone)]
pub struct Pipeline {
    pub config: Arc<PipelineConfig>,
    store: Arc<dyn CatalogStore>,
    classifier: Arc<dyn Classifier>,
    validator: Arc<OutputValidator>,
    cache: MappingCache,
    writer: CatalogWriter,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        store: Arc<dyn CatalogStore>,
        classifier: Arc<dyn Classifier>,
        validator: OutputValidator,
    ) -> Self {
        Self {
            config: Arc::new(config),
            cache: MappingCache::new(store.clone()),
            writer: CatalogWriter::new(store.clone()),
            store,
            classifier,
            validator: Arc::new(validator),
        }
    }

    pub fn from_env() -> Result<Self, PipelineError> {
        let store: Arc<dyn CatalogStore> = match SupabaseStore::from_env() {
            Some(store) => {
                info!(target = "normalizer.store", "using supabase store");
                Arc::new(store)
            }
            None => {
                let store = match env::var("LOCAL_LISTINGS_PATH") {
                    Ok(path) if !path.trim().is_empty() => {
                        MemoryStore::from_seed_file(Path::new(path.trim()))
                            .map_err(|err| PipelineError::invalid_input("config", err.to_string()))?
                    }
                    _ => MemoryStore::default(),
                };
                warn!(
                    target = "normalizer.store",
                    "SUPABASE_URL not set; using in-memory store"
                );
                Arc::new(store)
            }
        };
        let validator = OutputValidator::from_env()
            .map_err(|err| PipelineError::invalid_input("config", err.to_string()))?;
        Ok(Self::new(
            PipelineConfig::from_env(),
            store,
            Arc::new(ResilientInvoker::from_env()),
            validator,
        ))
    }

    /// Fails only when the batch cannot be selected; in that case no listing
    /// was touched. Item failures are recorded per item and reported.
    pub async fn run(&self) -> Result<RunReport, PipelineError> {
        let started_at = Utc::now();
        let started = Instant::now();
        let batch = self
            .store
            .pending_listings(self.config.batch_size)
            .await
            .map_err(|err| PipelineError::internal("select_batch", err.to_string()))?;

        if batch.is_empty() {
            info!(target = "normalizer.pipeline", "no pending listings");
            return Ok(RunReport::idle());
        }
        info!(
            target = "normalizer.pipeline",
            batch = batch.len(),
            "processing batch"
        );

        let (listings, tasks): (Vec<_>, Vec<_>) = batch
            .into_iter()
            .map(|listing| {
                let pipeline = self.clone();
                let task_listing = listing.clone();
                let task = tokio::spawn(async move { pipeline.process_item(task_listing).await });
                (listing, task)
            })
            .unzip();

        let mut details = Vec::with_capacity(listings.len());
        for (listing, joined) in listings.iter().zip(join_all(tasks).await) {
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(err) => {
                    error!(
                        target = "normalizer.pipeline",
                        listing_id = %listing.id,
                        error = %err,
                        "item worker aborted"
                    );
                    let message = format!("worker aborted: {err}");
                    self.record_failure(listing, &message).await;
                    ItemOutcome::failed(listing.id.clone(), message, 0)
                }
            };
            crate::metrics::item_outcome(outcome.status.as_str());
            details.push(outcome);
        }

        let report = BatchReport {
            processed_count: details.len(),
            started_at,
            elapsed_ms: started.elapsed().as_millis(),
            details,
        };
        crate::metrics::run_elapsed(report.elapsed_ms);
        info!(
            target = "normalizer.pipeline",
            processed = report.count(ListingStatus::Processed),
            failed = report.count(ListingStatus::Error),
            elapsed_ms = report.elapsed_ms as u64,
            "batch complete"
        );
        Ok(RunReport::Completed(report))
    }

    async fn process_item(&self, listing: RawListing) -> ItemOutcome {
        let started = Instant::now();
        let resolved = match self.resolve(&listing).await {
            Ok((product_id, resolution)) => {
                let update = ListingUpdate::Processed {
                    product_id: product_id.clone(),
                    metadata: listing.cleared_metadata(),
                };
                self.store
                    .update_listing(&listing.id, &update)
                    .await
                    .map(|()| (product_id, resolution))
                    .map_err(ItemError::from)
            }
            Err(err) => Err(err),
        };
        let elapsed_ms = started.elapsed().as_millis();

        match resolved {
            Ok((product_id, resolution)) => {
                info!(
                    target = "normalizer.pipeline",
                    listing_id = %listing.id,
                    provider = %listing.provider_name,
                    resolution = ?resolution,
                    product_id = ?product_id,
                    "listing processed"
                );
                ItemOutcome::processed(listing.id, product_id, resolution, elapsed_ms)
            }
            Err(err) => {
                let message = err.to_string();
                warn!(
                    target = "normalizer.pipeline",
                    listing_id = %listing.id,
                    provider = %listing.provider_name,
                    error = %message,
                    "listing failed"
                );
                self.record_failure(&listing, &message).await;
                ItemOutcome::failed(listing.id, message, elapsed_ms)
            }
        }
    }

    /// lookup -> classify -> validate -> write. `None` means "not a product".
    async fn resolve(
        &self,
        listing: &RawListing,
    ) -> Result<(Option<RowId>, Resolution), ItemError> {
        if let Some(product_id) = self
            .cache
            .lookup(&listing.provider_name, listing.provider_sku())
            .await?
        {
            return Ok((Some(product_id), Resolution::CacheHit));
        }

        let classification = match self
            .classifier
            .classify(&listing.provider_name, &listing.raw_title)
            .await?
        {
            ClassificationResult::NotAProduct => return Ok((None, Resolution::NotAProduct)),
            ClassificationResult::Product(classification) => classification,
        };

        self.validator
            .validate(&listing.provider_name, &listing.raw_title, &classification)?;
        let receipt = self.writer.upsert(listing, &classification).await?;
        debug!(
            target = "normalizer.pipeline",
            listing_id = %listing.id,
            sku = %classification.sku,
            mapping = ?receipt.mapping,
            "catalog written"
        );
        Ok((Some(receipt.product_id), Resolution::Classified))
    }

    async fn record_failure(&self, listing: &RawListing, message: &str) {
        let update = ListingUpdate::Failed {
            metadata: listing.failed_metadata(message),
        };
        if let Err(err) = self.store.update_listing(&listing.id, &update).await {
            error!(
                target = "normalizer.pipeline",
                listing_id = %listing.id,
                error = %err,
                "could not record listing failure"
            );
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub batch_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self { batch_size: 5 }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        let batch_size = env::var("BATCH_SIZE")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|v| *v >= 1)
            .unwrap_or(Self::default().batch_size);
        Self { batch_size }
    }
}

/// Why a single listing ended in `error`. The display string is what gets
/// stored under `metadata.last_error`.
#[derive(Debug, Error)]
pub enum ItemError {
    #[error("{}: {}", .0.kind(), .0)]
    Classification(#[from] ClassifierError),
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
}

#[derive(Debug, Error)]
#[error("stage `{stage}` failed: {message}")]
pub struct PipelineError {
    stage: &'static str,
    message: String,
    kind: PipelineErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineErrorKind {
    InvalidInput,
    Internal,
}

impl PipelineError {
    pub fn invalid_input(stage: &'static str, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            kind: PipelineErrorKind::InvalidInput,
        }
    }

    pub fn internal(stage: &'static str, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            kind: PipelineErrorKind::Internal,
        }
    }

    pub fn stage(&self) -> &'static str {
        self.stage
    }

    pub fn kind(&self) -> PipelineErrorKind {
        self.kind
    }

    pub fn detail(&self) -> &str {
        &self.message
    }
}
