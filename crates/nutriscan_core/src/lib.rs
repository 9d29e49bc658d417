pub mod annotation;
pub mod collections;
pub mod domain;
pub mod keyed_lock;
pub mod ports;
pub mod resolver;

pub use annotation::{AnnotationEvent, AnnotationJob, AnnotationQueue, AnnotationStatus, EnqueueError};
pub use collections::UserCollections;
pub use domain::{
    AiAnalysisResult, AnalysisPoint, FavoriteEntry, FavoriteItem, HistoryEntry, HistoryItem,
    ImagePayload, Nutriments, ProductDraft, ProductInfo, ProductRecord, RawProductData, ScanEvent,
    ScanSource, ScanStats,
};
pub use ports::{
    ImageStorageService, NutritionLookupService, PortError, PortResult, ProductAnalysisService,
    ProductStore,
};
pub use resolver::{BarcodeResolution, ProductResolver, ResolutionSource, ResolverSettings, ScanOutcome};
