use std::env;

use anyhow::{Context, Result};
use compass_api::build_app;
use compass_observability::init_tracing;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("compass_api");

    let bind = env::var("COMPASS_BIND").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

    let app = build_app().await?;

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind {}", bind))?;
    tracing::info!(bind = %bind, "compass governance api started");

    axum::serve(listener, app).await?;
    Ok(())
}
