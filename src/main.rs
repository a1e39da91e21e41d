use ideaboard::api;
use ideaboard::board::{CloseReason, RoomRegistry};
use ideaboard::config::{Config, LogFormat};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let config = Config::from_env();
    init_tracing(
        config
            .as_ref()
            .map(|c| c.logging.format)
            .unwrap_or(LogFormat::Pretty),
    );

    let config = match config {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Failed to load configuration");
            std::process::exit(1);
        }
    };

    let registry = RoomRegistry::new();
    let routes = api::board_routes(registry.clone());

    let shutdown_registry = registry.clone();
    let shutdown = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
        tracing::info!("Shutdown signal received, closing rooms");
        shutdown_registry.close_all(CloseReason::ServerShutdown).await;
    };

    let (addr, server) =
        match warp::serve(routes).try_bind_with_graceful_shutdown(config.bind_address(), shutdown) {
            Ok(bound) => bound,
            Err(e) => {
                tracing::error!(error = %e, "Failed to bind server address");
                std::process::exit(1);
            }
        };

    tracing::info!(%addr, "Idea board server listening");
    server.await;
    tracing::info!("Server stopped");
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}
