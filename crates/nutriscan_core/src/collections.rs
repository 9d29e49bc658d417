//! crates/nutriscan_core/src/collections.rs
//!
//! Key-based accessors over a user's history, favorites and stored products.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::{FavoriteItem, HistoryItem, ProductRecord, ScanStats};
use crate::ports::{ImageStorageService, PortError, PortResult, ProductStore};
use crate::resolver::ProductResolver;

/// Values the nutrition database and older clients use in place of "unknown".
const PLACEHOLDER_VALUES: &[&str] = &["n/a", "unknown", "nome non disponibile", "marca non disponibile"];

pub struct UserCollections {
    store: Arc<dyn ProductStore>,
    images: Arc<dyn ImageStorageService>,
    history_limit: usize,
}

impl UserCollections {
    pub fn new(
        store: Arc<dyn ProductStore>,
        images: Arc<dyn ImageStorageService>,
        history_limit: usize,
    ) -> Self {
        Self {
            store,
            images,
            history_limit,
        }
    }

    /// Collections over the same store and image storage as `resolver`, capped
    /// by its configured history limit.
    pub fn for_resolver(resolver: &ProductResolver) -> Self {
        Self::new(
            resolver.store().clone(),
            resolver.images().clone(),
            resolver.settings().history_limit,
        )
    }

    // --- Favorites ---

    /// Idempotent: adding an existing favorite succeeds.
    pub async fn add_favorite(&self, user_id: Uuid, product_id: Uuid) -> PortResult<()> {
        self.get_product(user_id, product_id).await?;
        match self.store.add_favorite(user_id, product_id).await {
            Ok(()) => Ok(()),
            Err(PortError::Conflict(_)) => {
                debug!(%user_id, %product_id, "favorite already present");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Idempotent: removing a missing favorite succeeds.
    pub async fn remove_favorite(&self, user_id: Uuid, product_id: Uuid) -> PortResult<()> {
        match self.store.remove_favorite(user_id, product_id).await {
            Ok(()) | Err(PortError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub async fn is_favorite(&self, user_id: Uuid, product_id: Uuid) -> PortResult<bool> {
        self.store.is_favorite(user_id, product_id).await
    }

    pub async fn list_favorites(&self, user_id: Uuid) -> PortResult<Vec<FavoriteItem>> {
        let mut items = self.store.list_favorites(user_id).await?;
        items.sort_by(|a, b| b.entry.created_at.cmp(&a.entry.created_at));
        Ok(items)
    }

    // --- History ---

    /// Most recent first. `limit` is capped at the configured history limit.
    pub async fn list_history(
        &self,
        user_id: Uuid,
        limit: Option<usize>,
    ) -> PortResult<Vec<HistoryItem>> {
        let limit = limit
            .unwrap_or(self.history_limit)
            .clamp(1, self.history_limit.max(1));
        let mut items = self.store.list_history(user_id, limit).await?;
        items.sort_by(|a, b| b.entry.scanned_at.cmp(&a.entry.scanned_at));
        items.truncate(limit);
        Ok(items)
    }

    pub async fn remove_from_history(&self, user_id: Uuid, product_id: Uuid) -> PortResult<()> {
        match self.store.remove_history(user_id, product_id).await {
            Ok(()) | Err(PortError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    // --- Products ---

    /// Fetches a record, hiding records owned by other users as not found.
    pub async fn get_product(&self, user_id: Uuid, product_id: Uuid) -> PortResult<ProductRecord> {
        match self.store.get_product(product_id).await? {
            Some(record) if record.user_id == user_id => Ok(record),
            _ => Err(PortError::NotFound(format!("Product {} not found", product_id))),
        }
    }

    /// Deletes a record and, best-effort, the image stored for it.
    pub async fn delete_product(&self, user_id: Uuid, product_id: Uuid) -> PortResult<()> {
        let record = self.get_product(user_id, product_id).await?;
        self.store.delete_product(user_id, product_id).await?;
        if let Some(key) = record.image_storage_key.as_deref() {
            if let Err(e) = self.images.delete_image(key).await {
                warn!(%product_id, key, error = %e, "failed to delete stored product image");
            }
        }
        Ok(())
    }

    pub async fn scan_stats(&self, user_id: Uuid) -> PortResult<ScanStats> {
        let products = self.store.list_products(user_id).await?;
        let last_scan_at = self.store.last_scan_at(user_id).await?;
        let mut stats = compute_stats(&products);
        stats.last_scan_at = last_scan_at;
        Ok(stats)
    }
}

/// Aggregates counts over a user's products. `last_scan_at` is left unset.
pub fn compute_stats(products: &[ProductRecord]) -> ScanStats {
    let grade = most_frequent(
        products
            .iter()
            .filter_map(|p| p.nutrition_grade.as_deref())
            .map(str::to_uppercase),
    );
    let brand = most_frequent(
        products
            .iter()
            .filter_map(|p| p.brand.as_deref())
            .map(|b| b.trim().to_string()),
    );

    ScanStats {
        total_scanned: products.len(),
        top_nutrition_grade: grade,
        most_scanned_brand: brand,
        last_scan_at: None,
    }
}

/// Most frequent meaningful value; ties go to the alphabetically first one.
fn most_frequent(values: impl Iterator<Item = String>) -> Option<String> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for value in values {
        if value.is_empty() || PLACEHOLDER_VALUES.contains(&value.to_lowercase().as_str()) {
            continue;
        }
        *counts.entry(value).or_default() += 1;
    }
    counts
        .into_iter()
        .max_by(|(a_value, a_count), (b_value, b_count)| {
            a_count.cmp(b_count).then_with(|| b_value.cmp(a_value))
        })
        .map(|(value, _)| value)
}
