//! services/api/src/web/state.rs
//!
//! Defines the application's shared state.

use crate::adapters::DbAdapter;
use nutriscan_core::annotation::AnnotationQueue;
use nutriscan_core::collections::UserCollections;
use nutriscan_core::resolver::ProductResolver;
use std::sync::Arc;

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub resolver: Arc<ProductResolver>,
    pub collections: Arc<UserCollections>,
    pub annotations: AnnotationQueue,
    /// Kept for the health check; product access goes through the resolver and collections.
    pub db: Arc<DbAdapter>,
}
