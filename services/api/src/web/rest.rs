//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the REST API endpoints and the master
//! definition for the OpenAPI specification.

use crate::web::dto::{
    AnalysisResponse, AnnotationStatusResponse, FavoriteItemResponse, FavoriteStatusResponse,
    HealthResponse, HistoryItemResponse, HistoryQuery, NutrimentsResponse, PointResponse,
    ProductResponse, ResolutionResponse, ScanBarcodeRequest, StatsResponse,
};
use crate::web::state::AppState;
use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    Extension,
};
use nutriscan_core::annotation::{AnnotationJob, AnnotationStatus};
use nutriscan_core::domain::{ImagePayload, ScanEvent, ScanSource};
use nutriscan_core::ports::PortError;
use nutriscan_core::resolver::{BarcodeResolution, ResolutionSource, ScanOutcome};
use std::sync::Arc;
use tracing::{error, info, warn};
use utoipa::OpenApi;
use uuid::Uuid;

type HandlerError = (StatusCode, String);

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        scan_barcode_handler,
        scan_photo_handler,
        get_product_handler,
        delete_product_handler,
        request_analysis_handler,
        analysis_status_handler,
        list_history_handler,
        remove_history_handler,
        list_favorites_handler,
        favorite_status_handler,
        add_favorite_handler,
        remove_favorite_handler,
        stats_handler,
        health_handler,
    ),
    components(
        schemas(
            ScanBarcodeRequest,
            ResolutionResponse,
            ProductResponse,
            NutrimentsResponse,
            AnalysisResponse,
            PointResponse,
            HistoryItemResponse,
            FavoriteItemResponse,
            FavoriteStatusResponse,
            AnnotationStatusResponse,
            StatsResponse,
            HealthResponse,
        )
    ),
    tags(
        (name = "NutriScan API", description = "Product scanning, AI verdicts, history and favorites.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// Error Mapping
//=========================================================================================

/// Maps a port failure onto an HTTP status. Unexpected failures are logged and hidden.
pub fn port_error(e: PortError) -> HandlerError {
    match e {
        PortError::NotFound(what) => (StatusCode::NOT_FOUND, format!("Not found: {}", what)),
        PortError::Conflict(what) => (StatusCode::CONFLICT, what),
        PortError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized".to_string()),
        PortError::Unexpected(msg) => {
            error!("Request failed: {}", msg);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            )
        }
    }
}

/// HTTP status returned for each barcode resolution outcome.
pub fn resolution_status(source: ResolutionSource) -> StatusCode {
    match source {
        ResolutionSource::Database | ResolutionSource::DatabaseNoAi => StatusCode::OK,
        ResolutionSource::NewScanOffOnly => StatusCode::CREATED,
        ResolutionSource::NotFoundOff => StatusCode::NOT_FOUND,
        ResolutionSource::Error => StatusCode::BAD_GATEWAY,
    }
}

//=========================================================================================
// Scan Handlers
//=========================================================================================

/// Resolve a scanned barcode.
///
/// Returns immediately with whatever is stored or found in the nutrition database.
/// When the product still lacks an AI verdict one is queued in the background;
/// poll `GET /products/{id}/analysis` for it.
#[utoipa::path(
    post,
    path = "/scans/barcode",
    request_body = ScanBarcodeRequest,
    responses(
        (status = 200, description = "Product already stored", body = ResolutionResponse),
        (status = 201, description = "Product looked up and stored", body = ResolutionResponse),
        (status = 400, description = "Empty barcode"),
        (status = 401, description = "Missing or invalid user id"),
        (status = 404, description = "Unknown to the nutrition database", body = ResolutionResponse),
        (status = 502, description = "Upstream or storage failure", body = ResolutionResponse)
    ),
    params(
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    )
)]
pub async fn scan_barcode_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Json(request): Json<ScanBarcodeRequest>,
) -> Result<impl IntoResponse, HandlerError> {
    let code = request.code.trim();
    if code.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Barcode must not be empty".to_string()));
    }

    let resolution = app_state.resolver.resolve_barcode_scan(user_id, code).await;
    let status = resolution_status(resolution.source());

    let mut analysis_pending = false;
    if resolution.needs_analysis() {
        if let Some(record) = resolution.record() {
            let raw = match &resolution {
                BarcodeResolution::NewScan { raw, .. } => Some(raw.clone()),
                _ => None,
            };
            let job = AnnotationJob {
                product_id: record.id,
                user_id,
                raw,
            };
            match app_state.annotations.enqueue(job).await {
                Ok(()) => analysis_pending = true,
                Err(e) => warn!(product_id = %record.id, error = %e, "could not queue annotation"),
            }
        }
    }

    Ok((status, Json(ResolutionResponse::new(resolution, analysis_pending))))
}

/// Identify a product from a photo of its packaging.
///
/// Multipart fields: `image` (required), `name_hint` (optional) and `code`
/// (optional; a previously issued `visual-` code re-runs the analysis in place).
#[utoipa::path(
    post,
    path = "/scans/photo",
    request_body(content_type = "multipart/form-data", description = "The product photo and optional hints."),
    responses(
        (status = 201, description = "Product identified and stored", body = ProductResponse),
        (status = 400, description = "Missing or invalid image"),
        (status = 401, description = "Missing or invalid user id"),
        (status = 422, description = "The photo could not be analyzed or stored")
    ),
    params(
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    )
)]
pub async fn scan_photo_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, HandlerError> {
    let mut image: Option<ImagePayload> = None;
    let mut name_hint: Option<String> = None;
    let mut code: Option<String> = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            format!("Failed to read multipart data: {}", e),
        )
    })? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "image" => {
                let mime_type = field.content_type().unwrap_or("image/jpeg").to_string();
                if !mime_type.starts_with("image/") {
                    return Err((
                        StatusCode::BAD_REQUEST,
                        format!("Unsupported content type: {}", mime_type),
                    ));
                }
                let data = field.bytes().await.map_err(|e| {
                    (
                        StatusCode::BAD_REQUEST,
                        format!("Failed to read image bytes: {}", e),
                    )
                })?;
                image = Some(ImagePayload::new(data.to_vec(), mime_type));
            }
            "name_hint" | "code" => {
                let text = field.text().await.map_err(|e| {
                    (
                        StatusCode::BAD_REQUEST,
                        format!("Failed to read field {}: {}", name, e),
                    )
                })?;
                let text = text.trim().to_string();
                if !text.is_empty() {
                    if name == "code" {
                        code = Some(text);
                    } else {
                        name_hint = Some(text);
                    }
                }
            }
            _ => {}
        }
    }

    let image = image
        .filter(|img| !img.bytes.is_empty())
        .ok_or_else(|| (StatusCode::BAD_REQUEST, "Multipart form must include an image".to_string()))?;

    // Without a `visual-` code the resolver mints a fresh one.
    let event = ScanEvent {
        code: code.unwrap_or_default(),
        user_id,
        source: ScanSource::Photo { image, name_hint },
    };

    match app_state.resolver.resolve_scan(event).await {
        ScanOutcome::Visual(Some(record)) => {
            info!(%user_id, product_id = %record.id, "photo scan stored");
            Ok((StatusCode::CREATED, Json(ProductResponse::from(record))))
        }
        ScanOutcome::Visual(None) | ScanOutcome::Barcode(_) => Err((
            StatusCode::UNPROCESSABLE_ENTITY,
            "The product could not be identified from this photo".to_string(),
        )),
    }
}

//=========================================================================================
// Product Handlers
//=========================================================================================

/// Fetch one of the caller's products.
#[utoipa::path(
    get,
    path = "/products/{id}",
    responses(
        (status = 200, description = "The product", body = ProductResponse),
        (status = 404, description = "No such product for this user")
    ),
    params(
        ("id" = Uuid, Path, description = "Product id."),
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    )
)]
pub async fn get_product_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(product_id): Path<Uuid>,
) -> Result<impl IntoResponse, HandlerError> {
    let record = app_state
        .collections
        .get_product(user_id, product_id)
        .await
        .map_err(port_error)?;
    Ok(Json(ProductResponse::from(record)))
}

/// Delete one of the caller's products, its history, favorite and stored image.
#[utoipa::path(
    delete,
    path = "/products/{id}",
    responses(
        (status = 204, description = "Deleted"),
        (status = 404, description = "No such product for this user")
    ),
    params(
        ("id" = Uuid, Path, description = "Product id."),
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    )
)]
pub async fn delete_product_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(product_id): Path<Uuid>,
) -> Result<impl IntoResponse, HandlerError> {
    app_state
        .collections
        .delete_product(user_id, product_id)
        .await
        .map_err(port_error)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Return the product's AI verdict, generating it now if it is missing.
#[utoipa::path(
    post,
    path = "/products/{id}/analysis",
    responses(
        (status = 200, description = "The verdict", body = AnalysisResponse),
        (status = 404, description = "No such product for this user"),
        (status = 503, description = "The AI service could not produce a verdict")
    ),
    params(
        ("id" = Uuid, Path, description = "Product id."),
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    )
)]
pub async fn request_analysis_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(product_id): Path<Uuid>,
) -> Result<impl IntoResponse, HandlerError> {
    let record = app_state
        .collections
        .get_product(user_id, product_id)
        .await
        .map_err(port_error)?;
    if let Some(analysis) = record.analysis {
        return Ok(Json(AnalysisResponse::from(analysis)));
    }

    app_state
        .resolver
        .fetch_or_generate_ai_analysis(product_id, user_id, None)
        .await
        .map(|analysis| Json(AnalysisResponse::from(analysis)))
        .ok_or_else(|| {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "Analysis is not available right now".to_string(),
            )
        })
}

/// Report the progress of a product's AI verdict without triggering one.
#[utoipa::path(
    get,
    path = "/products/{id}/analysis",
    responses(
        (status = 200, description = "Verdict progress", body = AnnotationStatusResponse),
        (status = 404, description = "No such product for this user")
    ),
    params(
        ("id" = Uuid, Path, description = "Product id."),
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    )
)]
pub async fn analysis_status_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(product_id): Path<Uuid>,
) -> Result<impl IntoResponse, HandlerError> {
    let record = app_state
        .collections
        .get_product(user_id, product_id)
        .await
        .map_err(port_error)?;

    let status = match record.analysis {
        Some(analysis) => Some(AnnotationStatus::Completed(analysis)),
        None => app_state.annotations.status(product_id).await,
    };
    Ok(Json(AnnotationStatusResponse::from_status(product_id, status)))
}

//=========================================================================================
// History Handlers
//=========================================================================================

/// List the caller's scan history, most recent first.
#[utoipa::path(
    get,
    path = "/history",
    responses(
        (status = 200, description = "Scan history", body = [HistoryItemResponse])
    ),
    params(
        HistoryQuery,
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    )
)]
pub async fn list_history_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Query(query): Query<HistoryQuery>,
) -> Result<impl IntoResponse, HandlerError> {
    let items = app_state
        .collections
        .list_history(user_id, query.limit)
        .await
        .map_err(port_error)?;
    let body: Vec<HistoryItemResponse> = items.into_iter().map(Into::into).collect();
    Ok(Json(body))
}

/// Remove a product from the caller's history. The product itself is kept.
#[utoipa::path(
    delete,
    path = "/history/{product_id}",
    responses(
        (status = 204, description = "Removed")
    ),
    params(
        ("product_id" = Uuid, Path, description = "Product id."),
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    )
)]
pub async fn remove_history_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(product_id): Path<Uuid>,
) -> Result<impl IntoResponse, HandlerError> {
    app_state
        .collections
        .remove_from_history(user_id, product_id)
        .await
        .map_err(port_error)?;
    Ok(StatusCode::NO_CONTENT)
}

//=========================================================================================
// Favorite Handlers
//=========================================================================================

/// List the caller's favorites, most recently added first.
#[utoipa::path(
    get,
    path = "/favorites",
    responses(
        (status = 200, description = "Favorites", body = [FavoriteItemResponse])
    ),
    params(
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    )
)]
pub async fn list_favorites_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
) -> Result<impl IntoResponse, HandlerError> {
    let items = app_state
        .collections
        .list_favorites(user_id)
        .await
        .map_err(port_error)?;
    let body: Vec<FavoriteItemResponse> = items.into_iter().map(Into::into).collect();
    Ok(Json(body))
}

#[utoipa::path(
    get,
    path = "/favorites/{product_id}",
    responses(
        (status = 200, description = "Whether the product is a favorite", body = FavoriteStatusResponse)
    ),
    params(
        ("product_id" = Uuid, Path, description = "Product id."),
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    )
)]
pub async fn favorite_status_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(product_id): Path<Uuid>,
) -> Result<impl IntoResponse, HandlerError> {
    let is_favorite = app_state
        .collections
        .is_favorite(user_id, product_id)
        .await
        .map_err(port_error)?;
    Ok(Json(FavoriteStatusResponse {
        product_id,
        is_favorite,
    }))
}

/// Mark a product as favorite. Repeating the call is a no-op.
#[utoipa::path(
    put,
    path = "/favorites/{product_id}",
    responses(
        (status = 200, description = "Favorited", body = FavoriteStatusResponse),
        (status = 404, description = "No such product for this user")
    ),
    params(
        ("product_id" = Uuid, Path, description = "Product id."),
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    )
)]
pub async fn add_favorite_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(product_id): Path<Uuid>,
) -> Result<impl IntoResponse, HandlerError> {
    app_state
        .collections
        .add_favorite(user_id, product_id)
        .await
        .map_err(port_error)?;
    Ok(Json(FavoriteStatusResponse {
        product_id,
        is_favorite: true,
    }))
}

/// Unmark a favorite. Removing a product that is not a favorite is a no-op.
#[utoipa::path(
    delete,
    path = "/favorites/{product_id}",
    responses(
        (status = 204, description = "Removed")
    ),
    params(
        ("product_id" = Uuid, Path, description = "Product id."),
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    )
)]
pub async fn remove_favorite_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(product_id): Path<Uuid>,
) -> Result<impl IntoResponse, HandlerError> {
    app_state
        .collections
        .remove_favorite(user_id, product_id)
        .await
        .map_err(port_error)?;
    Ok(StatusCode::NO_CONTENT)
}

//=========================================================================================
// Stats and Health
//=========================================================================================

/// Aggregate figures over the caller's stored products.
#[utoipa::path(
    get,
    path = "/stats",
    responses(
        (status = 200, description = "Scan statistics", body = StatsResponse)
    ),
    params(
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    )
)]
pub async fn stats_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
) -> Result<impl IntoResponse, HandlerError> {
    let stats = app_state
        .collections
        .scan_stats(user_id)
        .await
        .map_err(port_error)?;
    Ok(Json(StatsResponse::from(stats)))
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service and database are reachable", body = HealthResponse),
        (status = 503, description = "Database is unreachable", body = HealthResponse)
    )
)]
pub async fn health_handler(State(app_state): State<Arc<AppState>>) -> impl IntoResponse {
    match app_state.db.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "ok".to_string(),
            }),
        ),
        Err(e) => {
            error!("Health check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "database unavailable".to_string(),
                }),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_errors_map_to_http_statuses() {
        assert_eq!(port_error(PortError::NotFound("x".into())).0, StatusCode::NOT_FOUND);
        assert_eq!(port_error(PortError::Conflict("x".into())).0, StatusCode::CONFLICT);
        assert_eq!(port_error(PortError::Unauthorized).0, StatusCode::UNAUTHORIZED);

        let (status, body) = port_error(PortError::Unexpected("connection reset".into()));
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!body.contains("connection reset"));
    }

    #[test]
    fn resolution_outcomes_map_to_http_statuses() {
        assert_eq!(resolution_status(ResolutionSource::Database), StatusCode::OK);
        assert_eq!(resolution_status(ResolutionSource::DatabaseNoAi), StatusCode::OK);
        assert_eq!(resolution_status(ResolutionSource::NewScanOffOnly), StatusCode::CREATED);
        assert_eq!(resolution_status(ResolutionSource::NotFoundOff), StatusCode::NOT_FOUND);
        assert_eq!(resolution_status(ResolutionSource::Error), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn openapi_document_lists_every_route() {
        let doc = ApiDoc::openapi();
        for path in [
            "/scans/barcode",
            "/scans/photo",
            "/products/{id}",
            "/products/{id}/analysis",
            "/history",
            "/history/{product_id}",
            "/favorites",
            "/favorites/{product_id}",
            "/stats",
            "/health",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {}", path);
        }
    }
}
