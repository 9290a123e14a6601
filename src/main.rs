use dotenvy::dotenv;
use std::net::SocketAddr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod access;
mod commands;
mod config;
mod db;
mod error;
mod metrics;
mod middleware;
mod routes;
mod state;

#[cfg(test)]
mod business_logic_tests;
#[cfg(test)]
mod integration_tests;

use config::AppConfig;
use error::HarvestResult;
use state::AppState;

#[tokio::main]
async fn main() {
    dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = run().await {
        tracing::error!("Harvest monitor stopped: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> HarvestResult<()> {
    tracing::info!("Starting harvest monitor backend...");
    let config = AppConfig::from_env()?;

    let pool = db::init_pool(&config.database_url).await?;
    db::init_database(&pool, &config).await?;
    tracing::info!("Database ready");

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let app = routes::build_app(AppState::new(pool, config));

    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
