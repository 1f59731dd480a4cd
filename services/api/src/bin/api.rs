//! services/api/src/bin/api.rs

use api_lib::{
    adapters::{Argon2Hasher, OnnxClassifier, PgRecordStore, RetryPolicy, StoreSettings},
    config::Config,
    error::ApiError,
    web::{
        attach_session, download_report_handler, generate_report_handler, history_handler,
        login_handler, logout_handler, open_form_handler, rest::ApiDoc, session_handler,
        signup_handler,
        state::{spawn_session_sweeper, AppState, SessionRegistry},
        submit_handler, upload_handler,
    },
};
use axum::{
    extract::DefaultBodyLimit,
    http::{
        header::{ACCEPT, CONTENT_TYPE},
        HeaderValue, Method,
    },
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use mri_core::Services;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

/// Largest accepted request body; MRI scans are uploaded whole.
const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    // --- 2. Load the Classifier ---
    // A missing model makes every upload fail, so refuse to start instead.
    let classifier = match OnnxClassifier::load(
        &config.model_path,
        config.model_layout,
        config.model_input_size,
        config.model_normalization,
    ) {
        Ok(classifier) => Arc::new(classifier),
        Err(e) => {
            error!("Failed to load classifier: {}", e);
            return Err(e.into());
        }
    };

    // --- 3. Connect to Database & Run Migrations ---
    info!("Connecting to database...");
    let store = Arc::new(
        PgRecordStore::connect(StoreSettings {
            url: config.database_url.clone(),
            max_connections: config.db_max_connections,
            retry: RetryPolicy {
                max_attempts: config.db_connect_attempts,
                delay: config.db_retry_delay,
                attempt_timeout: config.db_connect_timeout,
            },
        })
        .await?,
    );
    info!("Running database migrations...");
    store.run_migrations().await?;
    info!("Database migrations complete.");

    // --- 4. Build the Shared AppState ---
    let app_state = Arc::new(AppState {
        services: Services {
            store,
            classifier,
            hasher: Arc::new(Argon2Hasher::new()),
        },
        config: config.clone(),
        sessions: SessionRegistry::new(),
    });

    let origin = config.cors_origin.parse::<HeaderValue>().map_err(|e| {
        ApiError::Internal(format!("Invalid CORS origin '{}': {}", config.cors_origin, e))
    })?;
    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE, ACCEPT]);

    // --- 5. Create the Web Router ---
    let api_router = Router::new()
        .route("/auth/signup", post(signup_handler))
        .route("/auth/login", post(login_handler))
        .route("/auth/logout", post(logout_handler))
        .route("/session", get(session_handler))
        .route("/scans/upload", post(upload_handler))
        .route("/scans/form", post(open_form_handler))
        .route("/scans/submit", post(submit_handler))
        .route(
            "/scans/report",
            post(generate_report_handler).get(download_report_handler),
        )
        .route("/scans/history", get(history_handler))
        .layer(axum_middleware::from_fn_with_state(
            app_state.clone(),
            attach_session,
        ))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(cors)
        .with_state(app_state.clone());

    // Merge the API router with the Swagger UI router for a complete application.
    let app = Router::new()
        .merge(api_router)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    // --- 6. Start the Server ---
    let shutdown = CancellationToken::new();
    let sweeper = spawn_session_sweeper(app_state, shutdown.clone());
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Shutdown signal received"),
                Err(e) => error!("Failed to listen for shutdown signal: {}", e),
            }
            shutdown.cancel();
        }
    });

    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    if let Err(e) = sweeper.await {
        error!("Session sweeper failed: {}", e);
    }
    info!("Server stopped");
    Ok(())
}
