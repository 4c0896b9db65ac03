mod config;

use std::sync::Arc;

use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;

use quartier_api::files::{PUBLIC_PREFIX, Uploads};
use quartier_api::iris::{IrisIndex, IrisService};
use quartier_api::{AppState, AppStateInner, cleanup};
use quartier_db::Database;
use quartier_gateway::Dispatcher;

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "quartier=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;
    let addr = config.addr()?;

    // Init database
    let db = Arc::new(Database::open(&config.db_path)?);

    let index = match &config.iris_geojson {
        Some(path) => Some(IrisIndex::load(path)?),
        None => {
            info!("No IRIS polygon file configured, using geocoder properties");
            None
        }
    };
    tokio::fs::create_dir_all(&config.upload_dir).await?;

    // Shared state
    let state: AppState = Arc::new(AppStateInner {
        db: db.clone(),
        dispatcher: Dispatcher::new(),
        jwt_secret: config.jwt_secret.clone(),
        uploads: Uploads::new(config.upload_dir.clone()),
        iris: IrisService::new(&config.address_api, &config.geo_api, index),
        admin_email: config.admin_email.clone(),
    });

    cleanup::spawn_all(db, state.dispatcher.clone());

    let app = quartier_api::router(state)
        .nest_service(PUBLIC_PREFIX.trim_end_matches('/'), ServeDir::new(&config.upload_dir))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    info!("Quartier server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Quartier server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
