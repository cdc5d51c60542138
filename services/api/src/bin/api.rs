//! services/api/src/bin/api.rs

use api_lib::{
    adapters::{DbAdapter, JwtTokenAdapter},
    config::Config,
    error::ApiError,
    web::{cors_layer, router, AppState, ChannelBroker},
};
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
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
    let token_adapter = Arc::new(JwtTokenAdapter::new(
        config.jwt_secret.as_bytes(),
        config.access_token_ttl,
        config.refresh_token_ttl,
    ));
    let broker = Arc::new(ChannelBroker::new());

    // --- 4. Build the Shared AppState ---
    let app_state = Arc::new(AppState {
        db: db_adapter,
        tokens: token_adapter,
        broker,
        config: config.clone(),
    });

    // --- 5. Create the Web Router ---
    let app = router(app_state).layer(cors_layer(&config)?);

    // --- 6. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!(
        "Attendance days follow UTC{}; completion threshold {}",
        config.attendance_offset, config.completion_threshold
    );
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
