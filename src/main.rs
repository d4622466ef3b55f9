use std::sync::Arc;

use streamcall::{
    build_app, config::Config, logging, record_store::InMemoryRecordStore,
    services::build_dispatcher, AppState,
};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init_logging();

    let config = Config::from_env()?;

    let store = Arc::new(InMemoryRecordStore::new());
    let dispatcher = build_dispatcher(config.channel_capacity, config.greet, store)?;
    let bind_socket = config.bind_socket()?;
    let state = AppState::new(dispatcher, config.default_timeout);
    let app = build_app(state);
    let listener = tokio::net::TcpListener::bind(bind_socket).await?;

    info!(
        bind_addr = %config.bind_addr,
        bind_port = config.bind_port,
        channel_capacity = ?config.channel_capacity,
        default_timeout_ms = config.default_timeout.map(|timeout| timeout.as_millis() as u64),
        "server starting"
    );

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received; draining in-flight calls");
}
