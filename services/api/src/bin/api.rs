//! services/api/src/bin/api.rs

use api_lib::{
    adapters::{DbAdapter, OpenAiAnalysisAdapter, OpenFoodFactsAdapter, S3ImageStore},
    config::{Config, LogFormat},
    error::ApiError,
    web::{api_router, rest::ApiDoc, state::AppState},
};
use async_openai::{config::OpenAIConfig, Client};
use axum::{extract::DefaultBodyLimit, Router};
use axum::http::{header::{ACCEPT, CONTENT_TYPE}, HeaderName, Method};
use nutriscan_core::{
    annotation::AnnotationQueue,
    collections::UserCollections,
    resolver::{ProductResolver, ResolverSettings},
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::new(config.log_level.to_string());
    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Config::from_env()?;
    init_tracing(&config);
    info!("Configuration loaded. Starting server...");

    // --- 2. Connect to Database & Run Migrations ---
    info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;
    let db_adapter = Arc::new(DbAdapter::new(db_pool));
    info!("Running database migrations...");
    db_adapter.run_migrations().await?;
    info!("Database migrations complete.");

    // --- 3. Initialize Service Adapters ---
    let mut openai_config = OpenAIConfig::new().with_api_key(&config.ai.api_key);
    if let Some(api_base) = &config.ai.api_base {
        openai_config = openai_config.with_api_base(api_base);
    }
    let openai_client = Client::with_config(openai_config);
    let analyzer = Arc::new(OpenAiAnalysisAdapter::new(
        openai_client,
        config.ai.analysis_model.clone(),
        config.ai.vision_model.clone(),
    ));
    let lookup = Arc::new(OpenFoodFactsAdapter::new(
        &config.off_base_url,
        &config.off_user_agent,
    )?);
    let images = Arc::new(S3ImageStore::new(&config.storage).await);
    info!(bucket = %config.storage.bucket, "Service adapters ready.");

    // --- 4. Build the Pipeline & Background Worker ---
    let settings = ResolverSettings {
        history_limit: config.history_limit,
        ..ResolverSettings::default()
    };
    let resolver = Arc::new(ProductResolver::new(
        db_adapter.clone(),
        lookup,
        analyzer,
        images,
        settings,
    ));
    let collections = Arc::new(UserCollections::for_resolver(&resolver));

    let shutdown = CancellationToken::new();
    let (annotations, worker) = AnnotationQueue::spawn(
        resolver.clone(),
        config.annotation_queue_capacity,
        shutdown.clone(),
    );

    // --- 5. Build the Shared AppState ---
    let app_state = Arc::new(AppState {
        resolver,
        collections,
        annotations,
        db: db_adapter,
    });

    // --- 6. Create the Web Router ---
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE, ACCEPT, HeaderName::from_static("x-user-id")]);

    let app = Router::new()
        .merge(api_router(app_state))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(DefaultBodyLimit::max(config.max_upload_bytes))
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    // --- 7. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;
    let signal_token = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutdown signal received.");
            signal_token.cancel();
        })
        .await?;

    // --- 8. Drain the Annotation Worker ---
    shutdown.cancel();
    info!("Waiting for in-flight annotations...");
    worker.await?;
    info!("Server stopped.");
    Ok(())
}
