//! crates/nutriscan_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of the nutrition database, the AI service and the data store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{
    AiAnalysisResult, FavoriteItem, HistoryItem, ImagePayload, ProductDraft, ProductRecord,
    RawProductData,
};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, network).
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Conflicting item: {0}")]
    Conflict(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
    #[error("Unauthorized")]
    Unauthorized,
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

#[async_trait]
pub trait NutritionLookupService: Send + Sync {
    /// Looks a barcode up in the public nutrition database. `Ok(None)` means "not found".
    async fn lookup(&self, barcode: &str) -> PortResult<Option<RawProductData>>;
}

#[async_trait]
pub trait ProductAnalysisService: Send + Sync {
    /// Produces a health/sustainability verdict from structured product fields.
    async fn analyze_product(&self, product: &RawProductData) -> PortResult<AiAnalysisResult>;

    /// Produces a verdict from a product photo, including the identified name and brand.
    async fn analyze_image(
        &self,
        image: &ImagePayload,
        name_hint: Option<&str>,
    ) -> PortResult<AiAnalysisResult>;
}

#[async_trait]
pub trait ImageStorageService: Send + Sync {
    /// Stores an image under `path` and returns the URL it can be displayed from.
    async fn upload_image(&self, path: &str, image: &ImagePayload) -> PortResult<String>;

    async fn delete_image(&self, path: &str) -> PortResult<()>;
}

#[async_trait]
pub trait ProductStore: Send + Sync {
    // --- Product Records ---

    /// Finds the record for `(user_id, barcode)`. Visual records are skipped unless
    /// `include_visual` is set.
    async fn find_product_by_barcode(
        &self,
        user_id: Uuid,
        barcode: &str,
        include_visual: bool,
    ) -> PortResult<Option<ProductRecord>>;

    async fn get_product(&self, product_id: Uuid) -> PortResult<Option<ProductRecord>>;

    /// Inserts or updates the record keyed by `(draft.user_id, draft.barcode())`.
    async fn upsert_product(&self, draft: &ProductDraft) -> PortResult<ProductRecord>;

    /// Writes all AI fields of an existing record and bumps its `updated_at`.
    async fn update_analysis(
        &self,
        product_id: Uuid,
        analysis: &AiAnalysisResult,
    ) -> PortResult<ProductRecord>;

    /// Deletes a record along with its history and favorite entries.
    async fn delete_product(&self, user_id: Uuid, product_id: Uuid) -> PortResult<()>;

    async fn list_products(&self, user_id: Uuid) -> PortResult<Vec<ProductRecord>>;

    // --- History ---

    /// Upserts the history entry for `(user_id, product_id)` with the current time.
    async fn touch_history(&self, user_id: Uuid, product_id: Uuid) -> PortResult<()>;

    /// Most recent first, at most `limit` entries.
    async fn list_history(&self, user_id: Uuid, limit: usize) -> PortResult<Vec<HistoryItem>>;

    async fn remove_history(&self, user_id: Uuid, product_id: Uuid) -> PortResult<()>;

    async fn last_scan_at(&self, user_id: Uuid) -> PortResult<Option<DateTime<Utc>>>;

    // --- Favorites ---

    /// May return `PortError::Conflict` if the pair already exists.
    async fn add_favorite(&self, user_id: Uuid, product_id: Uuid) -> PortResult<()>;

    async fn remove_favorite(&self, user_id: Uuid, product_id: Uuid) -> PortResult<()>;

    async fn is_favorite(&self, user_id: Uuid, product_id: Uuid) -> PortResult<bool>;

    /// Most recently favorited first.
    async fn list_favorites(&self, user_id: Uuid) -> PortResult<Vec<FavoriteItem>>;
}
