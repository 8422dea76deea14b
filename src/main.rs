use axum::{extract::State, http::StatusCode, response::Json, routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use consent_gate::config::AppConfig;
use consent_gate::storage::{SqliteStore, Storage};
use consent_gate::ConsentEngine;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "consent_gate=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting consent gate");

    let config = AppConfig::load()?;
    info!(
        "Configuration loaded (ledger backend: {})",
        config.ledger.backend.as_str()
    );

    // Connecting applies the schema.
    let store = SqliteStore::new(&config.database_url).await?;
    info!("Database connected and migrated");
    let storage: Arc<dyn Storage> = Arc::new(store);

    let engine = ConsentEngine::from_config(&config, storage)?;
    let workers = engine.start_workers().await?;

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/status", get(status_endpoint))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .into_inner(),
        )
        .with_state(engine);

    let addr: SocketAddr = format!("{}:{}", config.server_host, config.server_port).parse()?;
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let served = axum::serve(listener, app).await;
    workers.shutdown();
    served?;

    Ok(())
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "consent-gate",
        "timestamp": chrono::Utc::now()
    }))
}

async fn status_endpoint(
    State(engine): State<ConsentEngine>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    match engine.status().await {
        Ok(status) => Ok(Json(serde_json::json!({
            "status": if status.degraded_proofs == 0 { "healthy" } else { "degraded" },
            "service": "consent-gate",
            "timestamp": chrono::Utc::now(),
            "ledger": {
                "backend": status.backend_id,
                "synchronous": status.synchronous_backend,
                "proofs": status.total_proofs,
                "degraded_proofs": status.degraded_proofs,
            }
        }))),
        Err(e) => {
            error!("Failed to collect status: {}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}
