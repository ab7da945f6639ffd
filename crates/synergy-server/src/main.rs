mod config;

use std::sync::Arc;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use synergy_api::routes;
use synergy_api::state::AppStateInner;
use synergy_gateway::Engine;
use synergy_gateway::identity::Identity;
use synergy_gateway::retention::run_retention_loop;

use crate::config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "synergypark=debug,synergy_gateway=debug,synergy_api=debug,tower_http=debug".into()
            }),
        )
        .init();

    let config = ServerConfig::from_env()?;

    // Init database
    let db = synergy_db::Database::open(&config.db_path)?;
    info!("Database ready at {}", config.db_path.display());

    let identity = Identity::new(config.jwt_secret.clone(), config.token_ttl_hours);
    let engine = Engine::new(Arc::new(db), identity);

    tokio::spawn(run_retention_loop(engine.clone(), config.retention_interval_secs));

    let app = routes::router(AppStateInner::new(engine))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = config.addr()?;
    info!("SynergyPark messaging listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
