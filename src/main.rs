use axum::routing::get;
use axum::{Json, Router};
use dotenvy::dotenv;
use log::info;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use leadserver::config::AppConfig;
use leadserver::crm::client::CrmClient;
use leadserver::shared::state::AppState;
use leadserver::shared::utils::create_pool;
use leadserver::{contacts, drive, maintenance, messages, webhooks};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::init();

    let config = AppConfig::from_env()?;
    let pool = create_pool(&config.database_url)?;
    {
        use diesel::connection::SimpleConnection;
        let mut conn = pool.get()?;
        conn.batch_execute(leadserver::shared::store::create_tables_migration())?;
    }
    let drive_client = drive::init_drive(&config.drive).await;
    let crm = CrmClient::new(&config.crm.base_url, &config.crm.api_version);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let bucket_name = config.drive.bucket.clone();
    let state = Arc::new(AppState {
        conn: pool,
        drive: Some(drive_client),
        bucket_name,
        crm,
        config,
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .merge(contacts::configure())
        .merge(messages::configure())
        .merge(webhooks::configure())
        .merge(maintenance::configure())
        .route("/health", get(health))
        .layer(cors)
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("leadserver listening on {}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
