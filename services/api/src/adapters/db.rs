//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the `ProductStore` port from the `core` crate. It handles all interactions
//! with the PostgreSQL database using `sqlx`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use nutriscan_core::domain::{
    AiAnalysisResult, AnalysisPoint, FavoriteEntry, FavoriteItem, HistoryEntry, HistoryItem,
    Nutriments, ProductDraft, ProductRecord,
};
use nutriscan_core::ports::{PortError, PortResult, ProductStore};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `ProductStore` port.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Cheap round-trip used by the health endpoint.
    pub async fn ping(&self) -> PortResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        Ok(())
    }
}

/// Maps a `sqlx` error onto the port's error vocabulary.
fn map_db_error(e: sqlx::Error, what: &str) -> PortError {
    match e {
        sqlx::Error::RowNotFound => PortError::NotFound(format!("{} not found", what)),
        sqlx::Error::Database(db) => match db.code().as_deref() {
            Some("23505") => PortError::Conflict(format!("{} already exists", what)),
            Some("23503") => PortError::NotFound(format!("{} refers to a missing product", what)),
            _ => PortError::Unexpected(db.to_string()),
        },
        other => PortError::Unexpected(other.to_string()),
    }
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(Serialize, Deserialize, Default)]
struct NutrimentsJson {
    energy_kcal_100g: Option<f64>,
    fat_100g: Option<f64>,
    saturated_fat_100g: Option<f64>,
    carbohydrates_100g: Option<f64>,
    sugars_100g: Option<f64>,
    fiber_100g: Option<f64>,
    proteins_100g: Option<f64>,
    salt_100g: Option<f64>,
}

impl From<&Nutriments> for NutrimentsJson {
    fn from(n: &Nutriments) -> Self {
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

impl NutrimentsJson {
    fn to_domain(self) -> Nutriments {
        Nutriments {
            energy_kcal_100g: self.energy_kcal_100g,
            fat_100g: self.fat_100g,
            saturated_fat_100g: self.saturated_fat_100g,
            carbohydrates_100g: self.carbohydrates_100g,
            sugars_100g: self.sugars_100g,
            fiber_100g: self.fiber_100g,
            proteins_100g: self.proteins_100g,
            salt_100g: self.salt_100g,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct PointJson {
    title: String,
    detail: String,
}

fn points_to_json(points: &[AnalysisPoint]) -> Json<Vec<PointJson>> {
    Json(
        points
            .iter()
            .map(|p| PointJson {
                title: p.title.clone(),
                detail: p.detail.clone(),
            })
            .collect(),
    )
}

fn points_from_json(points: Option<Json<Vec<PointJson>>>) -> Vec<AnalysisPoint> {
    points
        .map(|Json(points)| {
            points
                .into_iter()
                .map(|p| AnalysisPoint::new(p.title, p.detail))
                .collect()
        })
        .unwrap_or_default()
}

/// The AI columns of a product row in their bindable form.
struct AnalysisColumns {
    health_score: i16,
    health_analysis: String,
    health_pros: Json<Vec<PointJson>>,
    health_cons: Json<Vec<PointJson>>,
    health_recommendations: Json<Vec<String>>,
    sustainability_score: i16,
    sustainability_analysis: String,
    sustainability_pros: Json<Vec<PointJson>>,
    sustainability_cons: Json<Vec<PointJson>>,
    sustainability_recommendations: Json<Vec<String>>,
}

impl From<&AiAnalysisResult> for AnalysisColumns {
    fn from(a: &AiAnalysisResult) -> Self {
        Self {
            health_score: i16::from(a.health_score),
            health_analysis: a.health_analysis.clone(),
            health_pros: points_to_json(&a.health_pros),
            health_cons: points_to_json(&a.health_cons),
            health_recommendations: Json(a.health_recommendations.clone()),
            sustainability_score: i16::from(a.sustainability_score),
            sustainability_analysis: a.sustainability_analysis.clone(),
            sustainability_pros: points_to_json(&a.sustainability_pros),
            sustainability_cons: points_to_json(&a.sustainability_cons),
            sustainability_recommendations: Json(a.sustainability_recommendations.clone()),
        }
    }
}

#[derive(FromRow)]
struct ProductRow {
    id: Uuid,
    user_id: Uuid,
    barcode: String,
    product_name: Option<String>,
    brand: Option<String>,
    image_url: Option<String>,
    image_storage_key: Option<String>,
    ingredients: Option<String>,
    nutrition_grade: Option<String>,
    ecoscore_grade: Option<String>,
    origins: Option<String>,
    packaging: Option<String>,
    categories: Option<String>,
    labels: Option<String>,
    nutriments: Json<NutrimentsJson>,
    health_score: Option<i16>,
    health_analysis: Option<String>,
    health_pros: Option<Json<Vec<PointJson>>>,
    health_cons: Option<Json<Vec<PointJson>>>,
    health_recommendations: Option<Json<Vec<String>>>,
    sustainability_score: Option<i16>,
    sustainability_analysis: Option<String>,
    sustainability_pros: Option<Json<Vec<PointJson>>>,
    sustainability_cons: Option<Json<Vec<PointJson>>>,
    sustainability_recommendations: Option<Json<Vec<String>>>,
    is_visually_analyzed: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ProductRow {
    fn to_domain(self) -> ProductRecord {
        // A verdict exists only once both scores have been written.
        let analysis = match (self.health_score, self.sustainability_score) {
            (Some(health), Some(sustainability)) => Some(AiAnalysisResult {
                health_score: score_from_db(health),
                health_analysis: self.health_analysis.unwrap_or_default(),
                health_pros: points_from_json(self.health_pros),
                health_cons: points_from_json(self.health_cons),
                health_recommendations: self
                    .health_recommendations
                    .map(|Json(r)| r)
                    .unwrap_or_default(),
                sustainability_score: score_from_db(sustainability),
                sustainability_analysis: self.sustainability_analysis.unwrap_or_default(),
                sustainability_pros: points_from_json(self.sustainability_pros),
                sustainability_cons: points_from_json(self.sustainability_cons),
                sustainability_recommendations: self
                    .sustainability_recommendations
                    .map(|Json(r)| r)
                    .unwrap_or_default(),
                product_name_from_vision: None,
                brand_from_vision: None,
            }),
            _ => None,
        };

        ProductRecord {
            id: self.id,
            user_id: self.user_id,
            barcode: self.barcode,
            product_name: self.product_name,
            brand: self.brand,
            image_url: self.image_url,
            image_storage_key: self.image_storage_key,
            ingredients: self.ingredients,
            nutrition_grade: self.nutrition_grade,
            ecoscore_grade: self.ecoscore_grade,
            origins: self.origins,
            packaging: self.packaging,
            categories: self.categories,
            labels: self.labels,
            nutriments: self.nutriments.0.to_domain(),
            analysis,
            is_visually_analyzed: self.is_visually_analyzed,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Scores are stored on the 0..=100 scale the column allows.
fn score_from_db(score: i16) -> u8 {
    score.clamp(0, 100) as u8
}

#[derive(FromRow)]
struct HistoryRow {
    scanned_at: DateTime<Utc>,
    #[sqlx(flatten)]
    product: ProductRow,
}

impl HistoryRow {
    fn to_domain(self) -> HistoryItem {
        let product = self.product.to_domain();
        HistoryItem {
            entry: HistoryEntry {
                user_id: product.user_id,
                product_id: product.id,
                scanned_at: self.scanned_at,
            },
            product,
        }
    }
}

#[derive(FromRow)]
struct FavoriteRow {
    favorited_at: DateTime<Utc>,
    #[sqlx(flatten)]
    product: ProductRow,
}

impl FavoriteRow {
    fn to_domain(self) -> FavoriteItem {
        let product = self.product.to_domain();
        FavoriteItem {
            entry: FavoriteEntry {
                user_id: product.user_id,
                product_id: product.id,
                created_at: self.favorited_at,
            },
            product,
        }
    }
}

//=========================================================================================
// SQL
//=========================================================================================

/// Upsert on `(user_id, barcode)`. Raw columns are always refreshed; the AI
/// columns are replaced only when the incoming row carries a verdict.
const UPSERT_PRODUCT: &str = r#"
INSERT INTO products (
    id, user_id, barcode, product_name, brand, image_url, image_storage_key,
    ingredients, nutrition_grade, ecoscore_grade, origins, packaging, categories,
    labels, nutriments,
    health_score, health_analysis, health_pros, health_cons, health_recommendations,
    sustainability_score, sustainability_analysis, sustainability_pros,
    sustainability_cons, sustainability_recommendations,
    is_visually_analyzed
)
VALUES (
    $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15,
    $16, $17, $18, $19, $20, $21, $22, $23, $24, $25, $26
)
ON CONFLICT (user_id, barcode) DO UPDATE SET
    product_name = EXCLUDED.product_name,
    brand = EXCLUDED.brand,
    image_url = COALESCE(EXCLUDED.image_url, products.image_url),
    image_storage_key = COALESCE(EXCLUDED.image_storage_key, products.image_storage_key),
    ingredients = EXCLUDED.ingredients,
    nutrition_grade = EXCLUDED.nutrition_grade,
    ecoscore_grade = EXCLUDED.ecoscore_grade,
    origins = EXCLUDED.origins,
    packaging = EXCLUDED.packaging,
    categories = EXCLUDED.categories,
    labels = EXCLUDED.labels,
    nutriments = EXCLUDED.nutriments,
    health_score = CASE WHEN EXCLUDED.health_score IS NULL THEN products.health_score ELSE EXCLUDED.health_score END,
    health_analysis = CASE WHEN EXCLUDED.health_score IS NULL THEN products.health_analysis ELSE EXCLUDED.health_analysis END,
    health_pros = CASE WHEN EXCLUDED.health_score IS NULL THEN products.health_pros ELSE EXCLUDED.health_pros END,
    health_cons = CASE WHEN EXCLUDED.health_score IS NULL THEN products.health_cons ELSE EXCLUDED.health_cons END,
    health_recommendations = CASE WHEN EXCLUDED.health_score IS NULL THEN products.health_recommendations ELSE EXCLUDED.health_recommendations END,
    sustainability_score = CASE WHEN EXCLUDED.health_score IS NULL THEN products.sustainability_score ELSE EXCLUDED.sustainability_score END,
    sustainability_analysis = CASE WHEN EXCLUDED.health_score IS NULL THEN products.sustainability_analysis ELSE EXCLUDED.sustainability_analysis END,
    sustainability_pros = CASE WHEN EXCLUDED.health_score IS NULL THEN products.sustainability_pros ELSE EXCLUDED.sustainability_pros END,
    sustainability_cons = CASE WHEN EXCLUDED.health_score IS NULL THEN products.sustainability_cons ELSE EXCLUDED.sustainability_cons END,
    sustainability_recommendations = CASE WHEN EXCLUDED.health_score IS NULL THEN products.sustainability_recommendations ELSE EXCLUDED.sustainability_recommendations END,
    is_visually_analyzed = products.is_visually_analyzed OR EXCLUDED.is_visually_analyzed,
    updated_at = now()
RETURNING *
"#;

const UPDATE_ANALYSIS: &str = r#"
UPDATE products SET
    health_score = $2,
    health_analysis = $3,
    health_pros = $4,
    health_cons = $5,
    health_recommendations = $6,
    sustainability_score = $7,
    sustainability_analysis = $8,
    sustainability_pros = $9,
    sustainability_cons = $10,
    sustainability_recommendations = $11,
    updated_at = now()
WHERE id = $1
RETURNING *
"#;

//=========================================================================================
// `ProductStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl ProductStore for DbAdapter {
    async fn find_product_by_barcode(
        &self,
        user_id: Uuid,
        barcode: &str,
        include_visual: bool,
    ) -> PortResult<Option<ProductRecord>> {
        let row = sqlx::query_as::<_, ProductRow>(
            "SELECT * FROM products WHERE user_id = $1 AND barcode = $2 AND ($3 OR NOT is_visually_analyzed)",
        )
        .bind(user_id)
        .bind(barcode)
        .bind(include_visual)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_db_error(e, "Product"))?;
        Ok(row.map(ProductRow::to_domain))
    }

    async fn get_product(&self, product_id: Uuid) -> PortResult<Option<ProductRecord>> {
        let row = sqlx::query_as::<_, ProductRow>("SELECT * FROM products WHERE id = $1")
            .bind(product_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_db_error(e, "Product"))?;
        Ok(row.map(ProductRow::to_domain))
    }

    async fn upsert_product(&self, draft: &ProductDraft) -> PortResult<ProductRecord> {
        let raw = &draft.raw;
        let ai = draft.analysis.as_ref().map(AnalysisColumns::from);

        let row = sqlx::query_as::<_, ProductRow>(UPSERT_PRODUCT)
            .bind(Uuid::new_v4())
            .bind(draft.user_id)
            .bind(draft.barcode())
            .bind(&raw.product_name)
            .bind(&raw.brand)
            .bind(&raw.image_url)
            .bind(&draft.image_storage_key)
            .bind(&raw.ingredients)
            .bind(&raw.nutrition_grade)
            .bind(&raw.ecoscore_grade)
            .bind(&raw.origins)
            .bind(&raw.packaging)
            .bind(&raw.categories)
            .bind(&raw.labels)
            .bind(Json(NutrimentsJson::from(&raw.nutriments)))
            .bind(ai.as_ref().map(|a| a.health_score))
            .bind(ai.as_ref().map(|a| a.health_analysis.as_str()))
            .bind(ai.as_ref().map(|a| &a.health_pros))
            .bind(ai.as_ref().map(|a| &a.health_cons))
            .bind(ai.as_ref().map(|a| &a.health_recommendations))
            .bind(ai.as_ref().map(|a| a.sustainability_score))
            .bind(ai.as_ref().map(|a| a.sustainability_analysis.as_str()))
            .bind(ai.as_ref().map(|a| &a.sustainability_pros))
            .bind(ai.as_ref().map(|a| &a.sustainability_cons))
            .bind(ai.as_ref().map(|a| &a.sustainability_recommendations))
            .bind(draft.is_visually_analyzed)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_db_error(e, "Product"))?;
        Ok(row.to_domain())
    }

    async fn update_analysis(
        &self,
        product_id: Uuid,
        analysis: &AiAnalysisResult,
    ) -> PortResult<ProductRecord> {
        let ai = AnalysisColumns::from(analysis);
        let row = sqlx::query_as::<_, ProductRow>(UPDATE_ANALYSIS)
            .bind(product_id)
            .bind(ai.health_score)
            .bind(&ai.health_analysis)
            .bind(&ai.health_pros)
            .bind(&ai.health_cons)
            .bind(&ai.health_recommendations)
            .bind(ai.sustainability_score)
            .bind(&ai.sustainability_analysis)
            .bind(&ai.sustainability_pros)
            .bind(&ai.sustainability_cons)
            .bind(&ai.sustainability_recommendations)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_db_error(e, &format!("Product {}", product_id)))?;
        Ok(row.to_domain())
    }

    async fn delete_product(&self, user_id: Uuid, product_id: Uuid) -> PortResult<()> {
        let result = sqlx::query("DELETE FROM products WHERE id = $1 AND user_id = $2")
            .bind(product_id)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(|e| map_db_error(e, "Product"))?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("Product {} not found", product_id)));
        }
        Ok(())
    }

    async fn list_products(&self, user_id: Uuid) -> PortResult<Vec<ProductRecord>> {
        let rows = sqlx::query_as::<_, ProductRow>(
            "SELECT * FROM products WHERE user_id = $1 ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_db_error(e, "Product"))?;
        Ok(rows.into_iter().map(ProductRow::to_domain).collect())
    }

    async fn touch_history(&self, user_id: Uuid, product_id: Uuid) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO scan_history (user_id, product_id, scanned_at) VALUES ($1, $2, now()) \
             ON CONFLICT (user_id, product_id) DO UPDATE SET scanned_at = now()",
        )
        .bind(user_id)
        .bind(product_id)
        .execute(&self.pool)
        .await
        .map_err(|e| map_db_error(e, "History entry"))?;
        Ok(())
    }

    async fn list_history(&self, user_id: Uuid, limit: usize) -> PortResult<Vec<HistoryItem>> {
        let rows = sqlx::query_as::<_, HistoryRow>(
            "SELECT h.scanned_at, p.* FROM scan_history h \
             JOIN products p ON p.id = h.product_id \
             WHERE h.user_id = $1 ORDER BY h.scanned_at DESC LIMIT $2",
        )
        .bind(user_id)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_db_error(e, "History entry"))?;
        Ok(rows.into_iter().map(HistoryRow::to_domain).collect())
    }

    async fn remove_history(&self, user_id: Uuid, product_id: Uuid) -> PortResult<()> {
        let result = sqlx::query("DELETE FROM scan_history WHERE user_id = $1 AND product_id = $2")
            .bind(user_id)
            .bind(product_id)
            .execute(&self.pool)
            .await
            .map_err(|e| map_db_error(e, "History entry"))?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!(
                "History entry for product {} not found",
                product_id
            )));
        }
        Ok(())
    }

    async fn last_scan_at(&self, user_id: Uuid) -> PortResult<Option<DateTime<Utc>>> {
        let (last,): (Option<DateTime<Utc>>,) =
            sqlx::query_as("SELECT MAX(scanned_at) FROM scan_history WHERE user_id = $1")
                .bind(user_id)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| map_db_error(e, "History entry"))?;
        Ok(last)
    }

    async fn add_favorite(&self, user_id: Uuid, product_id: Uuid) -> PortResult<()> {
        sqlx::query("INSERT INTO favorites (user_id, product_id) VALUES ($1, $2)")
            .bind(user_id)
            .bind(product_id)
            .execute(&self.pool)
            .await
            .map_err(|e| map_db_error(e, "Favorite"))?;
        Ok(())
    }

    async fn remove_favorite(&self, user_id: Uuid, product_id: Uuid) -> PortResult<()> {
        let result = sqlx::query("DELETE FROM favorites WHERE user_id = $1 AND product_id = $2")
            .bind(user_id)
            .bind(product_id)
            .execute(&self.pool)
            .await
            .map_err(|e| map_db_error(e, "Favorite"))?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!(
                "Favorite for product {} not found",
                product_id
            )));
        }
        Ok(())
    }

    async fn is_favorite(&self, user_id: Uuid, product_id: Uuid) -> PortResult<bool> {
        let (exists,): (bool,) = sqlx::query_as(
            "SELECT EXISTS (SELECT 1 FROM favorites WHERE user_id = $1 AND product_id = $2)",
        )
        .bind(user_id)
        .bind(product_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_db_error(e, "Favorite"))?;
        Ok(exists)
    }

    async fn list_favorites(&self, user_id: Uuid) -> PortResult<Vec<FavoriteItem>> {
        let rows = sqlx::query_as::<_, FavoriteRow>(
            "SELECT f.created_at AS favorited_at, p.* FROM favorites f \
             JOIN products p ON p.id = f.product_id \
             WHERE f.user_id = $1 ORDER BY f.created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_db_error(e, "Favorite"))?;
        Ok(rows.into_iter().map(FavoriteRow::to_domain).collect())
    }
}
