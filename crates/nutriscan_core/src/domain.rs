//! crates/nutriscan_core/src/domain.rs
//!
//! Defines the pure, core data structures for the application.
//! These structs are independent of any database or serialization format.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Prefix carried by every synthetic barcode minted for a photo-based scan.
pub const VISUAL_SCAN_PREFIX: &str = "visual-";

/// Returns true when `code` was minted by a visual scan rather than read from packaging.
pub fn is_visual_code(code: &str) -> bool {
    code.starts_with(VISUAL_SCAN_PREFIX)
}

//=========================================================================================
// Scan Input
//=========================================================================================

/// An image captured by the client, passed through to the vision model and blob storage.
#[derive(Debug, Clone)]
pub struct ImagePayload {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

impl ImagePayload {
    pub fn new(bytes: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            bytes,
            mime_type: mime_type.into(),
        }
    }

    /// File extension used when the image is written to storage.
    pub fn extension(&self) -> &'static str {
        match self.mime_type.as_str() {
            "image/jpeg" | "image/jpg" => "jpg",
            "image/png" => "png",
            "image/webp" => "webp",
            "image/heic" => "heic",
            _ => "bin",
        }
    }
}

#[derive(Debug, Clone)]
pub enum ScanSource {
    Barcode,
    Photo {
        image: ImagePayload,
        name_hint: Option<String>,
    },
}

/// A single scan action coming from the client. Consumed once, never persisted.
#[derive(Debug, Clone)]
pub struct ScanEvent {
    pub code: String,
    pub user_id: Uuid,
    pub source: ScanSource,
}

//=========================================================================================
// External Product Data
//=========================================================================================

/// Nutrient values per 100g. Absent values stay `None` rather than defaulting to zero.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Nutriments {
    pub energy_kcal_100g: Option<f64>,
    pub fat_100g: Option<f64>,
    pub saturated_fat_100g: Option<f64>,
    pub carbohydrates_100g: Option<f64>,
    pub sugars_100g: Option<f64>,
    pub fiber_100g: Option<f64>,
    pub proteins_100g: Option<f64>,
    pub salt_100g: Option<f64>,
}

/// Normalized view of a product as reported by the nutrition database or the vision model.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawProductData {
    pub code: String,
    pub product_name: Option<String>,
    pub brand: Option<String>,
    pub image_url: Option<String>,
    pub ingredients: Option<String>,
    pub nutrition_grade: Option<String>,
    pub ecoscore_grade: Option<String>,
    pub origins: Option<String>,
    pub packaging: Option<String>,
    pub categories: Option<String>,
    pub labels: Option<String>,
    pub nutriments: Nutriments,
}

impl RawProductData {
    /// Stand-in data for a synthetic code that has no stored record yet.
    pub fn placeholder(code: &str, name: &str) -> Self {
        Self {
            code: code.to_string(),
            product_name: Some(name.to_string()),
            ..Default::default()
        }
    }

    /// The product name, if it carries any non-whitespace text.
    pub fn usable_name(&self) -> Option<&str> {
        self.product_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }
}

//=========================================================================================
// AI Verdict
//=========================================================================================

/// A single pro or con with a short headline and an explanation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisPoint {
    pub title: String,
    pub detail: String,
}

impl AnalysisPoint {
    pub fn new(title: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            detail: detail.into(),
        }
    }
}

/// The health and sustainability assessment produced once per product.
#[derive(Debug, Clone, PartialEq)]
pub struct AiAnalysisResult {
    pub health_score: u8,
    pub health_analysis: String,
    pub health_pros: Vec<AnalysisPoint>,
    pub health_cons: Vec<AnalysisPoint>,
    pub health_recommendations: Vec<String>,
    pub sustainability_score: u8,
    pub sustainability_analysis: String,
    pub sustainability_pros: Vec<AnalysisPoint>,
    pub sustainability_cons: Vec<AnalysisPoint>,
    pub sustainability_recommendations: Vec<String>,
    /// Only set when the verdict was derived from a photo.
    pub product_name_from_vision: Option<String>,
    pub brand_from_vision: Option<String>,
}

//=========================================================================================
// Stored Entities
//=========================================================================================

/// The durable record for one product scanned by one user.
///
/// Unique on `(user_id, barcode)`. `analysis` stays `None` until the AI verdict
/// has been computed and stored.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub barcode: String,
    pub product_name: Option<String>,
    pub brand: Option<String>,
    pub image_url: Option<String>,
    pub image_storage_key: Option<String>,
    pub ingredients: Option<String>,
    pub nutrition_grade: Option<String>,
    pub ecoscore_grade: Option<String>,
    pub origins: Option<String>,
    pub packaging: Option<String>,
    pub categories: Option<String>,
    pub labels: Option<String>,
    pub nutriments: Nutriments,
    pub analysis: Option<AiAnalysisResult>,
    pub is_visually_analyzed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProductRecord {
    /// Maps the stored record back into the external-data shape the AI client consumes.
    pub fn raw_data(&self) -> RawProductData {
        RawProductData {
            code: self.barcode.clone(),
            product_name: self.product_name.clone(),
            brand: self.brand.clone(),
            image_url: self.image_url.clone(),
            ingredients: self.ingredients.clone(),
            nutrition_grade: self.nutrition_grade.clone(),
            ecoscore_grade: self.ecoscore_grade.clone(),
            origins: self.origins.clone(),
            packaging: self.packaging.clone(),
            categories: self.categories.clone(),
            labels: self.labels.clone(),
            nutriments: self.nutriments.clone(),
        }
    }
}

/// Input to the store's upsert on `(user_id, barcode)`.
///
/// When `analysis` is `None` the stored AI fields are left untouched; when it is
/// `Some` they are overwritten.
#[derive(Debug, Clone)]
pub struct ProductDraft {
    pub user_id: Uuid,
    pub raw: RawProductData,
    pub image_storage_key: Option<String>,
    pub analysis: Option<AiAnalysisResult>,
    pub is_visually_analyzed: bool,
}

impl ProductDraft {
    pub fn from_raw(user_id: Uuid, raw: RawProductData) -> Self {
        Self {
            user_id,
            raw,
            image_storage_key: None,
            analysis: None,
            is_visually_analyzed: false,
        }
    }

    pub fn barcode(&self) -> &str {
        &self.raw.code
    }
}

/// Either the external view of a product or its stored record.
#[derive(Debug, Clone)]
pub enum ProductInfo {
    Raw(RawProductData),
    Stored(ProductRecord),
}

impl ProductInfo {
    pub fn display_name(&self) -> Option<&str> {
        match self {
            ProductInfo::Raw(raw) => raw.usable_name(),
            ProductInfo::Stored(record) => record
                .product_name
                .as_deref()
                .map(str::trim)
                .filter(|name| !name.is_empty()),
        }
    }

    pub fn analysis(&self) -> Option<&AiAnalysisResult> {
        match self {
            ProductInfo::Raw(_) => None,
            ProductInfo::Stored(record) => record.analysis.as_ref(),
        }
    }

    /// Normalizes either variant into the external-data shape.
    pub fn into_raw(self) -> RawProductData {
        match self {
            ProductInfo::Raw(raw) => raw,
            ProductInfo::Stored(record) => record.raw_data(),
        }
    }
}

/// Relates a user to a product they scanned, with the last scan time.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub user_id: Uuid,
    pub product_id: Uuid,
    pub scanned_at: DateTime<Utc>,
}

/// Marks a product as a user's favorite.
#[derive(Debug, Clone, PartialEq)]
pub struct FavoriteEntry {
    pub user_id: Uuid,
    pub product_id: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct HistoryItem {
    pub entry: HistoryEntry,
    pub product: ProductRecord,
}

#[derive(Debug, Clone)]
pub struct FavoriteItem {
    pub entry: FavoriteEntry,
    pub product: ProductRecord,
}

/// Aggregate figures shown on a user's profile.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanStats {
    pub total_scanned: usize,
    pub top_nutrition_grade: Option<String>,
    pub most_scanned_brand: Option<String>,
    pub last_scan_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn visual_codes_are_recognized_by_prefix() {
        assert!(is_visual_code("visual-1700000000000-ab12cd34"));
        assert!(!is_visual_code("8001505005707"));
    }

    #[test]
    fn usable_name_ignores_blank_names() {
        let mut raw = RawProductData::placeholder("123", "   ");
        assert_eq!(raw.usable_name(), None);
        raw.product_name = Some(" Pasta X ".into());
        assert_eq!(raw.usable_name(), Some("Pasta X"));
    }

    #[test]
    fn product_info_normalizes_both_views() {
        let raw = RawProductData::placeholder("123", "Pasta X");
        let info = ProductInfo::Raw(raw.clone());
        assert_eq!(info.display_name(), Some("Pasta X"));
        assert!(info.analysis().is_none());
        assert_eq!(info.into_raw(), raw);

        let now = Utc::now();
        let stored = ProductInfo::Stored(ProductRecord {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            barcode: "123".into(),
            product_name: Some("  ".into()),
            brand: None,
            image_url: None,
            image_storage_key: None,
            ingredients: None,
            nutrition_grade: Some("b".into()),
            ecoscore_grade: None,
            origins: None,
            packaging: None,
            categories: None,
            labels: None,
            nutriments: Nutriments::default(),
            analysis: None,
            is_visually_analyzed: false,
            created_at: now,
            updated_at: now,
        });
        assert_eq!(stored.display_name(), None);
        let back = stored.into_raw();
        assert_eq!(back.code, "123");
        assert_eq!(back.nutrition_grade.as_deref(), Some("b"));
    }

    #[test]
    fn image_extension_follows_mime_type() {
        assert_eq!(ImagePayload::new(vec![], "image/jpeg").extension(), "jpg");
        assert_eq!(ImagePayload::new(vec![], "image/png").extension(), "png");
        assert_eq!(ImagePayload::new(vec![], "application/pdf").extension(), "bin");
    }
}
