// Main entry point for the CRM sync server

use anyhow::{Context, Result};
use crm_sync::{
    domains::crm::CrmSync,
    kernel::ServerDeps,
    server::{build_app, AxumAppState},
    Config,
};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,crm_sync=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting CRM sync server");

    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;
    tracing::info!(
        crm_configured = config.crm.credentials().is_some(),
        admin_enabled = config.admin_api_token.is_some(),
        events_enabled = config.events_api_token.is_some(),
        "Configuration loaded"
    );

    // Connect to database
    tracing::info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    tracing::info!("Database connected");

    // Run migrations
    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;
    tracing::info!("Migrations complete");

    // Build application
    let deps = ServerDeps::from_pool(pool.clone(), config.crm.clone())
        .context("Failed to build CRM client")?;
    let state = AxumAppState {
        db_pool: pool,
        sync: CrmSync::new(deps),
    };
    if config.events_api_token.is_none() {
        tracing::warn!("EVENTS_API_TOKEN not set; lifecycle event intake is disabled");
    }
    let app = build_app(
        state,
        config.admin_api_token.clone(),
        config.events_api_token.clone(),
    );

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("Starting server on {}", addr);
    tracing::info!("Health check: http://localhost:{}/health", config.port);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app.into_make_service())
        .await
        .context("Server error")?;

    Ok(())
}
