//! crates/nutriscan_core/src/resolver.rs
//!
//! The product-resolution pipeline. Turns one scan into a stored, eventually
//! AI-annotated product record while doing the minimum external work.
//!
//! Every operation here converts port failures into tagged outcomes; nothing is
//! returned as an `Err` to the caller.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::{
    is_visual_code, AiAnalysisResult, ImagePayload, ProductDraft, ProductInfo, ProductRecord,
    RawProductData,
    ScanEvent, ScanSource, VISUAL_SCAN_PREFIX,
};
use crate::keyed_lock::KeyedLocks;
use crate::ports::{
    ImageStorageService, NutritionLookupService, PortError, ProductAnalysisService, ProductStore,
};

//=========================================================================================
// Settings and Outcomes
//=========================================================================================

/// Explicit configuration for the resolver.
#[derive(Debug, Clone)]
pub struct ResolverSettings {
    /// Read-side cap applied when listing history.
    pub history_limit: usize,
    /// Name given to products the pipeline cannot name yet.
    pub placeholder_name: String,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            history_limit: 50,
            placeholder_name: "Unidentified product".to_string(),
        }
    }
}

/// Where a barcode resolution got its answer from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionSource {
    Database,
    DatabaseNoAi,
    NewScanOffOnly,
    NotFoundOff,
    Error,
}

impl ResolutionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionSource::Database => "database",
            ResolutionSource::DatabaseNoAi => "database_no_ai",
            ResolutionSource::NewScanOffOnly => "new_scan_off_only",
            ResolutionSource::NotFoundOff => "not_found_off",
            ResolutionSource::Error => "error",
        }
    }
}

/// The tagged result of resolving a barcode scan.
#[derive(Debug, Clone)]
pub enum BarcodeResolution {
    /// A stored record that already carries its AI verdict.
    Database {
        record: ProductRecord,
        analysis: AiAnalysisResult,
    },
    /// A stored record still waiting for its AI verdict.
    DatabaseNoAi { record: ProductRecord },
    /// Freshly looked up and stored; the AI verdict is deferred.
    NewScan {
        record: ProductRecord,
        raw: RawProductData,
    },
    /// The nutrition database has no usable entry. A photo scan is the fallback.
    NotFound,
    Error { message: String },
}

impl BarcodeResolution {
    pub fn source(&self) -> ResolutionSource {
        match self {
            BarcodeResolution::Database { .. } => ResolutionSource::Database,
            BarcodeResolution::DatabaseNoAi { .. } => ResolutionSource::DatabaseNoAi,
            BarcodeResolution::NewScan { .. } => ResolutionSource::NewScanOffOnly,
            BarcodeResolution::NotFound => ResolutionSource::NotFoundOff,
            BarcodeResolution::Error { .. } => ResolutionSource::Error,
        }
    }

    pub fn record(&self) -> Option<&ProductRecord> {
        match self {
            BarcodeResolution::Database { record, .. }
            | BarcodeResolution::DatabaseNoAi { record }
            | BarcodeResolution::NewScan { record, .. } => Some(record),
            BarcodeResolution::NotFound | BarcodeResolution::Error { .. } => None,
        }
    }

    pub fn analysis(&self) -> Option<&AiAnalysisResult> {
        match self {
            BarcodeResolution::Database { analysis, .. } => Some(analysis),
            _ => None,
        }
    }

    /// True when the caller should follow up with an AI annotation.
    pub fn needs_analysis(&self) -> bool {
        matches!(
            self,
            BarcodeResolution::DatabaseNoAi { .. } | BarcodeResolution::NewScan { .. }
        )
    }

    fn error(message: impl Into<String>) -> Self {
        BarcodeResolution::Error {
            message: message.into(),
        }
    }
}

/// Result of `ProductResolver::resolve_scan`.
#[derive(Debug, Clone)]
pub enum ScanOutcome {
    Barcode(BarcodeResolution),
    Visual(Option<ProductRecord>),
}

//=========================================================================================
// The Resolver
//=========================================================================================

pub struct ProductResolver {
    store: Arc<dyn ProductStore>,
    lookup: Arc<dyn NutritionLookupService>,
    analyzer: Arc<dyn ProductAnalysisService>,
    images: Arc<dyn ImageStorageService>,
    settings: ResolverSettings,
    analysis_locks: KeyedLocks<Uuid>,
}

impl ProductResolver {
    pub fn new(
        store: Arc<dyn ProductStore>,
        lookup: Arc<dyn NutritionLookupService>,
        analyzer: Arc<dyn ProductAnalysisService>,
        images: Arc<dyn ImageStorageService>,
        settings: ResolverSettings,
    ) -> Self {
        Self {
            store,
            lookup,
            analyzer,
            images,
            settings,
            analysis_locks: KeyedLocks::new(),
        }
    }

    pub fn settings(&self) -> &ResolverSettings {
        &self.settings
    }

    pub fn store(&self) -> &Arc<dyn ProductStore> {
        &self.store
    }

    pub fn images(&self) -> &Arc<dyn ImageStorageService> {
        &self.images
    }

    /// Routes a scan event to the barcode or the visual pipeline.
    pub async fn resolve_scan(&self, event: ScanEvent) -> ScanOutcome {
        match event.source {
            ScanSource::Barcode => {
                ScanOutcome::Barcode(self.resolve_barcode_scan(event.user_id, &event.code).await)
            }
            ScanSource::Photo { image, name_hint } => {
                let record = if is_visual_code(&event.code) {
                    self.reanalyze_visual_scan(event.user_id, &event.code, &image, name_hint.as_deref())
                        .await
                } else {
                    self.resolve_visual_scan(event.user_id, &image, name_hint.as_deref())
                        .await
                };
                ScanOutcome::Visual(record)
            }
        }
    }

    /// Resolves a barcode into a stored record. Never waits on the AI service.
    pub async fn resolve_barcode_scan(&self, user_id: Uuid, code: &str) -> BarcodeResolution {
        let code = code.trim();
        let visual = is_visual_code(code);

        // 1. Existing record?
        match self.store.find_product_by_barcode(user_id, code, visual).await {
            Ok(Some(record)) => {
                self.refresh_history(user_id, record.id).await;
                return match record.analysis.clone() {
                    Some(analysis) => {
                        info!(%user_id, barcode = %code, product_id = %record.id, "resolved from store with analysis");
                        BarcodeResolution::Database { record, analysis }
                    }
                    None => {
                        info!(%user_id, barcode = %code, product_id = %record.id, "resolved from store, analysis pending");
                        BarcodeResolution::DatabaseNoAi { record }
                    }
                };
            }
            Ok(None) => debug!(%user_id, barcode = %code, "no stored record"),
            Err(e) => {
                warn!(%user_id, barcode = %code, error = %e, "product lookup in store failed");
                return BarcodeResolution::error(format!("Failed to read stored product: {}", e));
            }
        }

        // 2. External lookup. Synthetic codes never leave the process.
        let mut raw = if visual {
            RawProductData::placeholder(code, &self.settings.placeholder_name)
        } else {
            match self.lookup.lookup(code).await {
                Ok(Some(raw)) if raw.usable_name().is_some() => raw,
                Ok(_) => {
                    info!(%user_id, barcode = %code, "barcode not found in nutrition database");
                    return BarcodeResolution::NotFound;
                }
                Err(PortError::NotFound(_)) => {
                    info!(%user_id, barcode = %code, "barcode not found in nutrition database");
                    return BarcodeResolution::NotFound;
                }
                Err(e) => {
                    warn!(%user_id, barcode = %code, error = %e, "nutrition lookup failed");
                    return BarcodeResolution::error(format!("Nutrition lookup failed: {}", e));
                }
            }
        };

        // 3. Persist raw fields only; AI fields of an earlier upsert survive.
        // The record stays keyed by the scanned code even when the database
        // answers with a normalized one.
        if raw.code != code {
            debug!(%user_id, barcode = %code, reported = %raw.code, "nutrition database normalized the barcode");
            raw.code = code.to_string();
        }
        let draft = ProductDraft::from_raw(user_id, raw.clone());
        let record = match self.store.upsert_product(&draft).await {
            Ok(record) => record,
            Err(e) => {
                warn!(%user_id, barcode = %code, error = %e, "failed to store scanned product");
                return BarcodeResolution::error(format!("Failed to save product: {}", e));
            }
        };
        self.refresh_history(user_id, record.id).await;

        info!(%user_id, barcode = %code, product_id = %record.id, "stored new scan, analysis deferred");
        BarcodeResolution::NewScan { record, raw }
    }

    /// Returns the stored verdict, or computes and stores it if the record has none.
    ///
    /// When `raw` is `None` the record's own fields are used as the AI input.
    /// Calls for the same product id are serialized, so at most one AI request is
    /// made per record within this process.
    pub async fn fetch_or_generate_ai_analysis(
        &self,
        product_id: Uuid,
        user_id: Uuid,
        raw: Option<&RawProductData>,
    ) -> Option<AiAnalysisResult> {
        let _guard = self.analysis_locks.lock(product_id).await;

        let record = match self.store.get_product(product_id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                warn!(%product_id, "analysis requested for unknown product");
                return None;
            }
            Err(e) => {
                warn!(%product_id, error = %e, "failed to load product for analysis");
                return None;
            }
        };
        if record.user_id != user_id {
            warn!(%product_id, %user_id, "analysis requested for a product owned by another user");
            return None;
        }

        if let Some(analysis) = record.analysis.clone() {
            debug!(%product_id, "returning stored analysis");
            return Some(analysis);
        }

        let info = match raw {
            Some(raw) => ProductInfo::Raw(raw.clone()),
            None => ProductInfo::Stored(record),
        };
        if info.display_name().is_none() {
            info!(%product_id, "skipping analysis, product has no name");
            return None;
        }
        let raw = info.into_raw();

        let analysis = match self.analyzer.analyze_product(&raw).await {
            Ok(analysis) => analysis,
            Err(e) => {
                warn!(%product_id, error = %e, "AI analysis failed");
                return None;
            }
        };

        if let Err(e) = self.store.update_analysis(product_id, &analysis).await {
            warn!(%product_id, error = %e, "failed to store analysis, returning it unsaved");
        } else {
            info!(%product_id, health_score = analysis.health_score, "stored new analysis");
        }
        Some(analysis)
    }

    /// Identifies a product from a photo and stores it under a fresh synthetic barcode.
    pub async fn resolve_visual_scan(
        &self,
        user_id: Uuid,
        image: &ImagePayload,
        name_hint: Option<&str>,
    ) -> Option<ProductRecord> {
        let code = synthetic_barcode();
        self.visual_scan(user_id, code, image, name_hint).await
    }

    /// Re-runs the vision analysis for an existing synthetic barcode, overwriting
    /// the stored verdict.
    pub async fn reanalyze_visual_scan(
        &self,
        user_id: Uuid,
        code: &str,
        image: &ImagePayload,
        name_hint: Option<&str>,
    ) -> Option<ProductRecord> {
        if !is_visual_code(code) {
            warn!(%user_id, barcode = %code, "re-analysis is only allowed for visual scans");
            return None;
        }
        self.visual_scan(user_id, code.to_string(), image, name_hint)
            .await
    }

    async fn visual_scan(
        &self,
        user_id: Uuid,
        code: String,
        image: &ImagePayload,
        name_hint: Option<&str>,
    ) -> Option<ProductRecord> {
        let name_hint = name_hint.map(str::trim).filter(|hint| !hint.is_empty());

        let analysis = match self.analyzer.analyze_image(image, name_hint).await {
            Ok(analysis) => analysis,
            Err(e) => {
                warn!(%user_id, barcode = %code, error = %e, "vision analysis failed");
                return None;
            }
        };

        let path = format!("products/{}/{}.{}", user_id, code, image.extension());
        let image_url = match self.images.upload_image(&path, image).await {
            Ok(url) => url,
            Err(e) => {
                warn!(%user_id, barcode = %code, error = %e, "image upload failed, discarding visual scan");
                return None;
            }
        };

        let product_name = analysis
            .product_name_from_vision
            .clone()
            .filter(|name| !name.trim().is_empty())
            .or_else(|| name_hint.map(str::to_string))
            .unwrap_or_else(|| self.settings.placeholder_name.clone());

        let raw = RawProductData {
            code: code.clone(),
            product_name: Some(product_name),
            brand: analysis.brand_from_vision.clone(),
            image_url: Some(image_url),
            ..Default::default()
        };
        let draft = ProductDraft {
            user_id,
            raw,
            image_storage_key: Some(path.clone()),
            analysis: Some(analysis),
            is_visually_analyzed: true,
        };

        let record = match self.store.upsert_product(&draft).await {
            Ok(record) => record,
            Err(e) => {
                warn!(%user_id, barcode = %code, error = %e, "failed to store visual scan");
                if let Err(e) = self.images.delete_image(&path).await {
                    warn!(%path, error = %e, "failed to remove orphaned image");
                }
                return None;
            }
        };
        self.refresh_history(user_id, record.id).await;

        info!(%user_id, barcode = %code, product_id = %record.id, "stored visual scan");
        Some(record)
    }

    async fn refresh_history(&self, user_id: Uuid, product_id: Uuid) {
        if let Err(e) = self.store.touch_history(user_id, product_id).await {
            warn!(%user_id, %product_id, error = %e, "failed to update scan history");
        }
    }
}

/// Mints a barcode for a photo scan: prefix, millisecond timestamp and a random suffix.
pub fn synthetic_barcode() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "{}{}-{}",
        VISUAL_SCAN_PREFIX,
        Utc::now().timestamp_millis(),
        &suffix[..8]
    )
}
