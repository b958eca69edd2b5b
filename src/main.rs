//! Dispatch Sync Backend
//!
//! Keeps per-user views of jobs, notifications and invoices live against an
//! embedded SQLite backend and its change-feed, and serves them over REST.

mod api;
mod auth;
mod config;
mod db;
mod errors;
mod models;
mod notify;
mod remote;
mod session;
mod sync;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use config::Config;
use db::SqliteStore;
use notify::TracingNotifier;
use remote::Notifier;
use session::SessionRegistry;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<SqliteStore>,
    pub sessions: Arc<SessionRegistry>,
    pub notifier: Arc<dyn Notifier>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(store: SqliteStore, notifier: Arc<dyn Notifier>, config: Config) -> Self {
        let store = Arc::new(store);
        let sessions = Arc::new(SessionRegistry::new(
            store.clone(),
            store.clone(),
            notifier.clone(),
        ));
        Self {
            store,
            sessions,
            notifier,
            config: Arc::new(config),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::from_env();

    // Initialize logging
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Dispatch Sync Backend");
    tracing::info!("Database path: {:?}", config.db_path);
    tracing::info!("Bind address: {}", config.bind_addr);
    tracing::info!("Change feed capacity: {}", config.feed_capacity);

    // Warn if PSK is not configured
    if config.api_psk.is_none() {
        tracing::warn!("No API PSK configured (DISPATCH_API_PSK). Authentication is disabled!");
    }

    // Initialize database
    let pool = db::init_database(&config.db_path).await?;
    let store = SqliteStore::new(pool, config.feed_capacity);

    let state = AppState::new(store, Arc::new(TracingNotifier), config.clone());
    let sessions = state.sessions.clone();

    // Build router
    let app = create_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sessions.stop_all().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", err);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

/// Create the application router with all routes.
pub fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Clone PSK for the auth layer
    let psk = state.config.api_psk.clone();

    // API routes
    let api_routes = Router::new()
        // Sessions
        .route("/sessions", post(api::sign_in).delete(api::sign_out))
        .route("/refresh", post(api::refresh))
        // Jobs
        .route("/jobs", get(api::list_jobs).post(api::create_job))
        .route("/jobs/selection", put(api::select_jobs))
        .route("/jobs/{id}/accept", post(api::accept_job))
        .route("/jobs/{id}/start", post(api::start_job))
        .route("/jobs/{id}/complete", post(api::complete_job))
        .route("/jobs/{id}/cancel", post(api::cancel_job))
        // Notifications
        .route("/notifications", get(api::list_notifications))
        .route("/notifications/selection", put(api::select_notifications))
        .route("/notifications/read-all", post(api::mark_all_notifications_read))
        .route("/notifications/{id}/read", post(api::mark_notification_read))
        // Invoices
        .route("/invoices", get(api::list_invoices))
        .route("/invoices/selection", put(api::select_invoices))
        .route("/invoices/{id}/paid", post(api::mark_invoice_paid))
        // Profiles
        .route("/profile", get(api::get_profile).put(api::update_profile))
        .route("/profiles", post(api::create_profile))
        // Apply PSK auth middleware
        .layer(middleware::from_fn(move |req, next| {
            auth::psk_auth_layer(psk.clone(), req, next)
        }));

    // Health check (no auth required)
    let health_routes = Router::new().route("/health", get(health_check));

    Router::new()
        .nest("/api", api_routes)
        .merge(health_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> &'static str {
    "OK"
}
