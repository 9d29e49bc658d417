//! services/api/src/web/dto.rs
//!
//! Request and response payloads for the REST API. Domain types stay free of
//! serialization concerns; everything crossing the wire is mapped here.

use chrono::{DateTime, Utc};
use nutriscan_core::annotation::AnnotationStatus;
use nutriscan_core::domain::{
    AiAnalysisResult, AnalysisPoint, FavoriteItem, HistoryItem, Nutriments, ProductRecord,
    ScanStats,
};
use nutriscan_core::resolver::BarcodeResolution;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

//=========================================================================================
// Requests
//=========================================================================================

#[derive(Debug, Deserialize, ToSchema)]
pub struct ScanBarcodeRequest {
    /// The barcode read from the packaging, or a synthetic `visual-` code.
    pub code: String,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct HistoryQuery {
    /// Maximum number of entries; capped by the server's history limit.
    pub limit: Option<usize>,
}

//=========================================================================================
// Product Payloads
//=========================================================================================

#[derive(Debug, Serialize, ToSchema)]
pub struct PointResponse {
    pub title: String,
    pub detail: String,
}

impl From<AnalysisPoint> for PointResponse {
    fn from(p: AnalysisPoint) -> Self {
        Self {
            title: p.title,
            detail: p.detail,
        }
    }
}

fn points(points: Vec<AnalysisPoint>) -> Vec<PointResponse> {
    points.into_iter().map(PointResponse::from).collect()
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AnalysisResponse {
    pub health_score: u8,
    pub health_analysis: String,
    pub health_pros: Vec<PointResponse>,
    pub health_cons: Vec<PointResponse>,
    pub health_recommendations: Vec<String>,
    pub sustainability_score: u8,
    pub sustainability_analysis: String,
    pub sustainability_pros: Vec<PointResponse>,
    pub sustainability_cons: Vec<PointResponse>,
    pub sustainability_recommendations: Vec<String>,
}

impl From<AiAnalysisResult> for AnalysisResponse {
    fn from(a: AiAnalysisResult) -> Self {
        Self {
            health_score: a.health_score,
            health_analysis: a.health_analysis,
            health_pros: points(a.health_pros),
            health_cons: points(a.health_cons),
            health_recommendations: a.health_recommendations,
            sustainability_score: a.sustainability_score,
            sustainability_analysis: a.sustainability_analysis,
            sustainability_pros: points(a.sustainability_pros),
            sustainability_cons: points(a.sustainability_cons),
            sustainability_recommendations: a.sustainability_recommendations,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct NutrimentsResponse {
    pub energy_kcal_100g: Option<f64>,
    pub fat_100g: Option<f64>,
    pub saturated_fat_100g: Option<f64>,
    pub carbohydrates_100g: Option<f64>,
    pub sugars_100g: Option<f64>,
    pub fiber_100g: Option<f64>,
    pub proteins_100g: Option<f64>,
    pub salt_100g: Option<f64>,
}

impl From<Nutriments> for NutrimentsResponse {
    fn from(n: Nutriments) -> Self {
        Self {
            energy_kcal_100g: n.energy_kcal_100g,
            fat_100g: n.fat_100g,
            saturated_fat_100g: n.saturated_fat_100g,
            carbohydrates_100g: n.carbohydrates_100g,
            sugars_100g: n.sugars_100g,
            fiber_100g: n.fiber_100g,
            proteins_100g: n.proteins_100g,
            salt_100g: n.salt_100g,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ProductResponse {
    pub id: Uuid,
    pub barcode: String,
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
    pub nutriments: NutrimentsResponse,
    pub analysis: Option<AnalysisResponse>,
    pub is_visually_analyzed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<ProductRecord> for ProductResponse {
    fn from(r: ProductRecord) -> Self {
        Self {
            id: r.id,
            barcode: r.barcode,
            product_name: r.product_name,
            brand: r.brand,
            image_url: r.image_url,
            ingredients: r.ingredients,
            nutrition_grade: r.nutrition_grade,
            ecoscore_grade: r.ecoscore_grade,
            origins: r.origins,
            packaging: r.packaging,
            categories: r.categories,
            labels: r.labels,
            nutriments: r.nutriments.into(),
            analysis: r.analysis.map(AnalysisResponse::from),
            is_visually_analyzed: r.is_visually_analyzed,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

//=========================================================================================
// Scan Payloads
//=========================================================================================

/// The tagged outcome of a barcode scan.
#[derive(Debug, Serialize, ToSchema)]
pub struct ResolutionResponse {
    /// One of `database`, `database_no_ai`, `new_scan_off_only`, `not_found_off`, `error`.
    pub source: String,
    pub product: Option<ProductResponse>,
    pub analysis: Option<AnalysisResponse>,
    /// True when the verdict is being computed in the background.
    pub analysis_pending: bool,
    pub message: Option<String>,
}

impl ResolutionResponse {
    pub fn new(resolution: BarcodeResolution, analysis_pending: bool) -> Self {
        let source = resolution.source().as_str().to_string();
        match resolution {
            BarcodeResolution::Database { record, analysis } => Self {
                source,
                product: Some(record.into()),
                analysis: Some(analysis.into()),
                analysis_pending: false,
                message: None,
            },
            BarcodeResolution::DatabaseNoAi { record } | BarcodeResolution::NewScan { record, .. } => {
                Self {
                    source,
                    product: Some(record.into()),
                    analysis: None,
                    analysis_pending,
                    message: None,
                }
            }
            BarcodeResolution::NotFound => Self {
                source,
                product: None,
                analysis: None,
                analysis_pending: false,
                message: Some(
                    "Product not found in the nutrition database. Try a photo scan instead.".to_string(),
                ),
            },
            BarcodeResolution::Error { message } => Self {
                source,
                product: None,
                analysis: None,
                analysis_pending: false,
                message: Some(message),
            },
        }
    }
}

//=========================================================================================
// Collection Payloads
//=========================================================================================

#[derive(Debug, Serialize, ToSchema)]
pub struct HistoryItemResponse {
    pub scanned_at: DateTime<Utc>,
    pub product: ProductResponse,
}

impl From<HistoryItem> for HistoryItemResponse {
    fn from(item: HistoryItem) -> Self {
        Self {
            scanned_at: item.entry.scanned_at,
            product: item.product.into(),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct FavoriteItemResponse {
    pub favorited_at: DateTime<Utc>,
    pub product: ProductResponse,
}

impl From<FavoriteItem> for FavoriteItemResponse {
    fn from(item: FavoriteItem) -> Self {
        Self {
            favorited_at: item.entry.created_at,
            product: item.product.into(),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct FavoriteStatusResponse {
    pub product_id: Uuid,
    pub is_favorite: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct StatsResponse {
    pub total_scanned: usize,
    pub top_nutrition_grade: Option<String>,
    pub most_scanned_brand: Option<String>,
    pub last_scan_at: Option<DateTime<Utc>>,
}

impl From<ScanStats> for StatsResponse {
    fn from(s: ScanStats) -> Self {
        Self {
            total_scanned: s.total_scanned,
            top_nutrition_grade: s.top_nutrition_grade,
            most_scanned_brand: s.most_scanned_brand,
            last_scan_at: s.last_scan_at,
        }
    }
}

/// Progress of a product's AI verdict.
#[derive(Debug, Serialize, ToSchema)]
pub struct AnnotationStatusResponse {
    pub product_id: Uuid,
    /// One of `completed`, `pending`, `unavailable`, `not_requested`.
    pub status: String,
    pub analysis: Option<AnalysisResponse>,
}

impl AnnotationStatusResponse {
    pub fn from_status(product_id: Uuid, status: Option<AnnotationStatus>) -> Self {
        let (status, analysis) = match status {
            Some(AnnotationStatus::Completed(analysis)) => ("completed", Some(analysis.into())),
            Some(AnnotationStatus::Pending) => ("pending", None),
            Some(AnnotationStatus::Unavailable) => ("unavailable", None),
            None => ("not_requested", None),
        };
        Self {
            product_id,
            status: status.to_string(),
            analysis,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> ProductRecord {
        ProductRecord {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            barcode: "8001505005707".into(),
            product_name: Some("Pasta X".into()),
            brand: Some("Barilla".into()),
            image_url: None,
            image_storage_key: Some("products/u/x.jpg".into()),
            ingredients: None,
            nutrition_grade: Some("a".into()),
            ecoscore_grade: None,
            origins: None,
            packaging: None,
            categories: None,
            labels: None,
            nutriments: Nutriments::default(),
            analysis: None,
            is_visually_analyzed: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn resolution_carries_its_wire_tag() {
        let pending = ResolutionResponse::new(BarcodeResolution::DatabaseNoAi { record: record() }, true);
        assert_eq!(pending.source, "database_no_ai");
        assert!(pending.analysis_pending);
        assert!(pending.product.is_some());

        let missing = ResolutionResponse::new(BarcodeResolution::NotFound, true);
        assert_eq!(missing.source, "not_found_off");
        assert!(!missing.analysis_pending);
        assert!(missing.message.is_some());
    }

    #[test]
    fn product_payload_hides_storage_key() {
        let json = serde_json::to_value(ProductResponse::from(record())).expect("serialize");
        assert_eq!(json["barcode"], "8001505005707");
        assert!(json.get("image_storage_key").is_none());
        assert!(json.get("user_id").is_none());
        assert!(json["analysis"].is_null());
    }

    #[test]
    fn annotation_status_names() {
        let id = Uuid::new_v4();
        assert_eq!(AnnotationStatusResponse::from_status(id, None).status, "not_requested");
        assert_eq!(
            AnnotationStatusResponse::from_status(id, Some(AnnotationStatus::Pending)).status,
            "pending"
        );
    }
}
