use std::{net::SocketAddr, sync::Arc};

use agro_service_rs::{config::Config, logging, router, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    if let Err(err) = logging::init() {
        eprintln!("Logging disabled: {err}");
    }

    let config = Config::from_env()?;
    tokio::fs::create_dir_all(&config.upload_dir).await?;

    if config.classifier_credentials.is_empty() {
        tracing::warn!("no PLANT_ID_API_KEYS configured; disease detection requests will fail");
    }
    if config.scorer.is_none() {
        tracing::warn!("no SCORER_COMMAND configured; crop recommendations are disabled");
    }

    let addr: SocketAddr = format!("{}:{}", config.bind_addr, config.port).parse()?;
    let state = Arc::new(AppState::new(config)?);
    let app = router(state);

    tracing::info!("Listening on http://{addr}");
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
