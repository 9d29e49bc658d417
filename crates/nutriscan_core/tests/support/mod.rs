//! In-memory port implementations shared by the core's behaviour tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use nutriscan_core::domain::{
    AiAnalysisResult, AnalysisPoint, FavoriteEntry, FavoriteItem, HistoryEntry, HistoryItem,
    ImagePayload, Nutriments, ProductDraft, ProductRecord, RawProductData,
};
use nutriscan_core::ports::{
    ImageStorageService, NutritionLookupService, PortError, PortResult, ProductAnalysisService,
    ProductStore,
};
use nutriscan_core::resolver::{ProductResolver, ResolverSettings};
use uuid::Uuid;

//=========================================================================================
// Store
//=========================================================================================

#[derive(Default)]
struct StoreData {
    products: Vec<ProductRecord>,
    history: Vec<HistoryEntry>,
    favorites: Vec<FavoriteEntry>,
}

#[derive(Default)]
pub struct InMemoryStore {
    data: Mutex<StoreData>,
    pub fail_find: AtomicBool,
    pub fail_upsert: AtomicBool,
    pub fail_update_analysis: AtomicBool,
    pub upserts: AtomicUsize,
}

impl InMemoryStore {
    pub fn products(&self) -> Vec<ProductRecord> {
        self.data.lock().unwrap().products.clone()
    }

    pub fn history(&self) -> Vec<HistoryEntry> {
        self.data.lock().unwrap().history.clone()
    }

    pub fn favorites(&self) -> Vec<FavoriteEntry> {
        self.data.lock().unwrap().favorites.clone()
    }

    /// Overrides a history timestamp so ordering tests do not depend on the clock.
    pub fn set_scanned_at(&self, product_id: Uuid, at: DateTime<Utc>) {
        let mut data = self.data.lock().unwrap();
        if let Some(entry) = data.history.iter_mut().find(|h| h.product_id == product_id) {
            entry.scanned_at = at;
        }
    }

    pub fn set_favorited_at(&self, product_id: Uuid, at: DateTime<Utc>) {
        let mut data = self.data.lock().unwrap();
        if let Some(entry) = data.favorites.iter_mut().find(|f| f.product_id == product_id) {
            entry.created_at = at;
        }
    }
}

fn unexpected(what: &str) -> PortError {
    PortError::Unexpected(format!("{} failed (simulated)", what))
}

#[async_trait]
impl ProductStore for InMemoryStore {
    async fn find_product_by_barcode(
        &self,
        user_id: Uuid,
        barcode: &str,
        include_visual: bool,
    ) -> PortResult<Option<ProductRecord>> {
        if self.fail_find.load(Ordering::SeqCst) {
            return Err(unexpected("find"));
        }
        let data = self.data.lock().unwrap();
        Ok(data
            .products
            .iter()
            .find(|p| {
                p.user_id == user_id
                    && p.barcode == barcode
                    && (include_visual || !p.is_visually_analyzed)
            })
            .cloned())
    }

    async fn get_product(&self, product_id: Uuid) -> PortResult<Option<ProductRecord>> {
        let data = self.data.lock().unwrap();
        Ok(data.products.iter().find(|p| p.id == product_id).cloned())
    }

    async fn upsert_product(&self, draft: &ProductDraft) -> PortResult<ProductRecord> {
        if self.fail_upsert.load(Ordering::SeqCst) {
            return Err(unexpected("upsert"));
        }
        self.upserts.fetch_add(1, Ordering::SeqCst);
        let now = Utc::now();
        let raw = &draft.raw;
        let mut data = self.data.lock().unwrap();

        let position = data
            .products
            .iter()
            .position(|p| p.user_id == draft.user_id && p.barcode == raw.code);
        let record = match position {
            Some(index) => {
                let existing = &mut data.products[index];
                existing.product_name = raw.product_name.clone();
                existing.brand = raw.brand.clone();
                if raw.image_url.is_some() {
                    existing.image_url = raw.image_url.clone();
                }
                existing.ingredients = raw.ingredients.clone();
                existing.nutrition_grade = raw.nutrition_grade.clone();
                existing.ecoscore_grade = raw.ecoscore_grade.clone();
                existing.origins = raw.origins.clone();
                existing.packaging = raw.packaging.clone();
                existing.categories = raw.categories.clone();
                existing.labels = raw.labels.clone();
                existing.nutriments = raw.nutriments.clone();
                if draft.image_storage_key.is_some() {
                    existing.image_storage_key = draft.image_storage_key.clone();
                }
                if draft.analysis.is_some() {
                    existing.analysis = draft.analysis.clone();
                }
                existing.is_visually_analyzed |= draft.is_visually_analyzed;
                existing.updated_at = now;
                existing.clone()
            }
            None => {
                let record = ProductRecord {
                    id: Uuid::new_v4(),
                    user_id: draft.user_id,
                    barcode: raw.code.clone(),
                    product_name: raw.product_name.clone(),
                    brand: raw.brand.clone(),
                    image_url: raw.image_url.clone(),
                    image_storage_key: draft.image_storage_key.clone(),
                    ingredients: raw.ingredients.clone(),
                    nutrition_grade: raw.nutrition_grade.clone(),
                    ecoscore_grade: raw.ecoscore_grade.clone(),
                    origins: raw.origins.clone(),
                    packaging: raw.packaging.clone(),
                    categories: raw.categories.clone(),
                    labels: raw.labels.clone(),
                    nutriments: raw.nutriments.clone(),
                    analysis: draft.analysis.clone(),
                    is_visually_analyzed: draft.is_visually_analyzed,
                    created_at: now,
                    updated_at: now,
                };
                data.products.push(record.clone());
                record
            }
        };
        Ok(record)
    }

    async fn update_analysis(
        &self,
        product_id: Uuid,
        analysis: &AiAnalysisResult,
    ) -> PortResult<ProductRecord> {
        if self.fail_update_analysis.load(Ordering::SeqCst) {
            return Err(unexpected("update_analysis"));
        }
        let mut data = self.data.lock().unwrap();
        let record = data
            .products
            .iter_mut()
            .find(|p| p.id == product_id)
            .ok_or_else(|| PortError::NotFound(product_id.to_string()))?;
        record.analysis = Some(analysis.clone());
        record.updated_at = Utc::now();
        Ok(record.clone())
    }

    async fn delete_product(&self, user_id: Uuid, product_id: Uuid) -> PortResult<()> {
        let mut data = self.data.lock().unwrap();
        data.products
            .retain(|p| !(p.id == product_id && p.user_id == user_id));
        data.history.retain(|h| h.product_id != product_id);
        data.favorites.retain(|f| f.product_id != product_id);
        Ok(())
    }

    async fn list_products(&self, user_id: Uuid) -> PortResult<Vec<ProductRecord>> {
        let data = self.data.lock().unwrap();
        Ok(data
            .products
            .iter()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn touch_history(&self, user_id: Uuid, product_id: Uuid) -> PortResult<()> {
        let mut data = self.data.lock().unwrap();
        let now = Utc::now();
        match data
            .history
            .iter_mut()
            .find(|h| h.user_id == user_id && h.product_id == product_id)
        {
            Some(entry) => entry.scanned_at = now,
            None => data.history.push(HistoryEntry {
                user_id,
                product_id,
                scanned_at: now,
            }),
        }
        Ok(())
    }

    async fn list_history(&self, user_id: Uuid, limit: usize) -> PortResult<Vec<HistoryItem>> {
        let data = self.data.lock().unwrap();
        let mut entries: Vec<HistoryEntry> = data
            .history
            .iter()
            .filter(|h| h.user_id == user_id)
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.scanned_at.cmp(&a.scanned_at));
        Ok(entries
            .into_iter()
            .take(limit)
            .filter_map(|entry| {
                let product = data.products.iter().find(|p| p.id == entry.product_id)?.clone();
                Some(HistoryItem { entry, product })
            })
            .collect())
    }

    async fn remove_history(&self, user_id: Uuid, product_id: Uuid) -> PortResult<()> {
        let mut data = self.data.lock().unwrap();
        data.history
            .retain(|h| !(h.user_id == user_id && h.product_id == product_id));
        Ok(())
    }

    async fn last_scan_at(&self, user_id: Uuid) -> PortResult<Option<DateTime<Utc>>> {
        let data = self.data.lock().unwrap();
        Ok(data
            .history
            .iter()
            .filter(|h| h.user_id == user_id)
            .map(|h| h.scanned_at)
            .max())
    }

    async fn add_favorite(&self, user_id: Uuid, product_id: Uuid) -> PortResult<()> {
        let mut data = self.data.lock().unwrap();
        if data
            .favorites
            .iter()
            .any(|f| f.user_id == user_id && f.product_id == product_id)
        {
            return Err(PortError::Conflict("favorite exists".into()));
        }
        data.favorites.push(FavoriteEntry {
            user_id,
            product_id,
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn remove_favorite(&self, user_id: Uuid, product_id: Uuid) -> PortResult<()> {
        let mut data = self.data.lock().unwrap();
        let before = data.favorites.len();
        data.favorites
            .retain(|f| !(f.user_id == user_id && f.product_id == product_id));
        if data.favorites.len() == before {
            return Err(PortError::NotFound("favorite".into()));
        }
        Ok(())
    }

    async fn is_favorite(&self, user_id: Uuid, product_id: Uuid) -> PortResult<bool> {
        let data = self.data.lock().unwrap();
        Ok(data
            .favorites
            .iter()
            .any(|f| f.user_id == user_id && f.product_id == product_id))
    }

    async fn list_favorites(&self, user_id: Uuid) -> PortResult<Vec<FavoriteItem>> {
        let data = self.data.lock().unwrap();
        Ok(data
            .favorites
            .iter()
            .filter(|f| f.user_id == user_id)
            .filter_map(|entry| {
                let product = data.products.iter().find(|p| p.id == entry.product_id)?.clone();
                Some(FavoriteItem {
                    entry: entry.clone(),
                    product,
                })
            })
            .collect())
    }
}

//=========================================================================================
// Nutrition Lookup
//=========================================================================================

pub enum LookupReply {
    Found(RawProductData),
    /// Answers with the barcode in its 13-digit EAN form, as the real database
    /// does for UPC-A input.
    Normalized(RawProductData),
    NotFound,
    Fail,
}

pub struct StubLookup {
    reply: Mutex<LookupReply>,
    pub calls: AtomicUsize,
}

impl StubLookup {
    pub fn new(reply: LookupReply) -> Self {
        Self {
            reply: Mutex::new(reply),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NutritionLookupService for StubLookup {
    async fn lookup(&self, barcode: &str) -> PortResult<Option<RawProductData>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &*self.reply.lock().unwrap() {
            LookupReply::Found(raw) => Ok(Some(RawProductData {
                code: barcode.to_string(),
                ..raw.clone()
            })),
            LookupReply::Normalized(raw) => Ok(Some(RawProductData {
                code: format!("0{}", barcode),
                ..raw.clone()
            })),
            LookupReply::NotFound => Ok(None),
            LookupReply::Fail => Err(unexpected("lookup")),
        }
    }
}

//=========================================================================================
// AI Analysis
//=========================================================================================

pub struct StubAnalyzer {
    pub text_calls: AtomicUsize,
    pub image_calls: AtomicUsize,
    pub fail: AtomicBool,
    /// Text analyses running right now, and the most seen at once.
    running: AtomicUsize,
    peak_running: AtomicUsize,
    health_score: u8,
    vision_name: Option<String>,
    delay: Duration,
}

impl StubAnalyzer {
    pub fn scoring(health_score: u8) -> Self {
        Self {
            text_calls: AtomicUsize::new(0),
            image_calls: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
            running: AtomicUsize::new(0),
            peak_running: AtomicUsize::new(0),
            health_score,
            vision_name: Some("Crackers Integrali".into()),
            delay: Duration::ZERO,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn without_vision_name(mut self) -> Self {
        self.vision_name = None;
        self
    }

    pub fn failing() -> Self {
        let analyzer = Self::scoring(0);
        analyzer.fail.store(true, Ordering::SeqCst);
        analyzer
    }

    pub fn text_calls(&self) -> usize {
        self.text_calls.load(Ordering::SeqCst)
    }

    pub fn image_calls(&self) -> usize {
        self.image_calls.load(Ordering::SeqCst)
    }

    pub fn peak_running(&self) -> usize {
        self.peak_running.load(Ordering::SeqCst)
    }
}

pub fn analysis_with_score(health_score: u8) -> AiAnalysisResult {
    AiAnalysisResult {
        health_score,
        health_analysis: "Balanced pasta, mostly carbohydrates.".into(),
        health_pros: vec![AnalysisPoint::new("Low fat", "Only 1.5g of fat per 100g")],
        health_cons: vec![AnalysisPoint::new("Refined flour", "Low in fiber")],
        health_recommendations: vec!["Pair with vegetables".into()],
        sustainability_score: 64,
        sustainability_analysis: "Cardboard packaging, Italian durum wheat.".into(),
        sustainability_pros: vec![AnalysisPoint::new("Recyclable", "Cardboard box")],
        sustainability_cons: vec![],
        sustainability_recommendations: vec!["Recycle the box".into()],
        product_name_from_vision: None,
        brand_from_vision: None,
    }
}

#[async_trait]
impl ProductAnalysisService for StubAnalyzer {
    async fn analyze_product(&self, _product: &RawProductData) -> PortResult<AiAnalysisResult> {
        self.text_calls.fetch_add(1, Ordering::SeqCst);
        let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_running.fetch_max(running, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.running.fetch_sub(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(unexpected("analyze_product"));
        }
        Ok(analysis_with_score(self.health_score))
    }

    async fn analyze_image(
        &self,
        _image: &ImagePayload,
        _name_hint: Option<&str>,
    ) -> PortResult<AiAnalysisResult> {
        self.image_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(unexpected("analyze_image"));
        }
        Ok(AiAnalysisResult {
            product_name_from_vision: self.vision_name.clone(),
            brand_from_vision: Some("Mulino Bianco".into()),
            ..analysis_with_score(self.health_score)
        })
    }
}

//=========================================================================================
// Image Storage
//=========================================================================================

#[derive(Default)]
pub struct StubImages {
    pub fail_upload: AtomicBool,
    pub uploaded: Mutex<Vec<String>>,
    pub deleted: Mutex<Vec<String>>,
}

impl StubImages {
    pub fn failing() -> Self {
        let images = Self::default();
        images.fail_upload.store(true, Ordering::SeqCst);
        images
    }

    pub fn uploaded(&self) -> Vec<String> {
        self.uploaded.lock().unwrap().clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait]
impl ImageStorageService for StubImages {
    async fn upload_image(&self, path: &str, _image: &ImagePayload) -> PortResult<String> {
        if self.fail_upload.load(Ordering::SeqCst) {
            return Err(unexpected("upload"));
        }
        self.uploaded.lock().unwrap().push(path.to_string());
        Ok(format!("https://images.test/{}", path))
    }

    async fn delete_image(&self, path: &str) -> PortResult<()> {
        self.deleted.lock().unwrap().push(path.to_string());
        Ok(())
    }
}

//=========================================================================================
// Fixtures
//=========================================================================================

pub fn pasta() -> RawProductData {
    RawProductData {
        code: "8001505005707".into(),
        product_name: Some("Pasta X".into()),
        brand: Some("Barilla".into()),
        image_url: Some("https://images.openfoodfacts.org/pasta.jpg".into()),
        ingredients: Some("Durum wheat semolina, water".into()),
        nutrition_grade: Some("a".into()),
        ecoscore_grade: Some("b".into()),
        packaging: Some("Cardboard".into()),
        nutriments: Nutriments {
            energy_kcal_100g: Some(359.0),
            fat_100g: Some(1.5),
            carbohydrates_100g: Some(71.0),
            proteins_100g: Some(13.0),
            salt_100g: Some(0.01),
            ..Default::default()
        },
        ..Default::default()
    }
}

pub fn photo() -> ImagePayload {
    ImagePayload::new(vec![0xFF, 0xD8, 0xFF, 0xE0], "image/jpeg")
}

pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub lookup: Arc<StubLookup>,
    pub analyzer: Arc<StubAnalyzer>,
    pub images: Arc<StubImages>,
    pub resolver: Arc<ProductResolver>,
}

impl Harness {
    pub fn new(lookup: StubLookup, analyzer: StubAnalyzer, images: StubImages) -> Self {
        Self::with_settings(lookup, analyzer, images, ResolverSettings::default())
    }

    pub fn with_settings(
        lookup: StubLookup,
        analyzer: StubAnalyzer,
        images: StubImages,
        settings: ResolverSettings,
    ) -> Self {
        let store = Arc::new(InMemoryStore::default());
        let lookup = Arc::new(lookup);
        let analyzer = Arc::new(analyzer);
        let images = Arc::new(images);
        let resolver = Arc::new(ProductResolver::new(
            store.clone(),
            lookup.clone(),
            analyzer.clone(),
            images.clone(),
            settings,
        ));
        Self {
            store,
            lookup,
            analyzer,
            images,
            resolver,
        }
    }

    /// A harness whose lookup finds `pasta()` and whose AI scores 72.
    pub fn standard() -> Self {
        Self::new(
            StubLookup::new(LookupReply::Found(pasta())),
            StubAnalyzer::scoring(72),
            StubImages::default(),
        )
    }
}
