use std::env;

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;

use recall_backend::core::logging;
use recall_backend::server::router;
use recall_backend::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let state = AppState::initialize().await?;
    logging::init(&state.paths);

    match state.provider.health_check().await {
        Ok(true) => tracing::info!("model provider '{}' reachable", state.provider.name()),
        _ => tracing::warn!(
            "model provider '{}' is not reachable; search and generation will fail until it is",
            state.provider.name()
        ),
    }

    let port = env::var("PORT")
        .ok()
        .and_then(|val| val.parse::<u16>().ok())
        .unwrap_or(8017);
    let bind_addr = format!("127.0.0.1:{}", port);

    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", bind_addr))?;
    let addr = listener.local_addr()?;
    tracing::info!("Listening on {}", addr);

    let app: Router = router::router(state);
    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
