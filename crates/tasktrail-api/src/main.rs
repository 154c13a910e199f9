//! tasktrail API server entry point.

use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tasktrail_api::config::AppConfig;
use tasktrail_api::error::AppError;
use tasktrail_api::routes;
use tasktrail_api::state::AppState;
use tasktrail_core::event::TracingEventDispatcher;
use tasktrail_core::retry::RetryPolicy;
use tasktrail_core::unit_of_work::UnitOfWorkFactory;
use tasktrail_event_store::redis_permission_cache::RedisPermissionCache;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Initialize tracing subscriber.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let config = AppConfig::from_env()?;
    tracing::info!(service = %config.service_name, "Starting tasktrail API server");

    // Create database connection pool and bring the schema up to date.
    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await?;
    sqlx::migrate!("../../migrations").run(&pool).await?;

    let cache = RedisPermissionCache::connect(&config.redis_url)
        .await
        .map_err(|e| AppError::Cache(e.to_string()))?;

    // Build application state.
    let uow_factory = UnitOfWorkFactory::new(
        RetryPolicy::default(),
        Arc::new(TracingEventDispatcher),
        config.request_timeout,
    );
    let app_state = AppState::with_postgres(
        &pool,
        Arc::new(cache),
        &config.service_name,
        config.acl_cache_capacity,
        uow_factory,
    );

    // TODO: Replace CorsLayer::permissive() with restricted origins for production.
    let app = routes::router()
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(app_state);

    // Start server.
    let addr = config.socket_addr()?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app).await?;

    Ok(())
}
