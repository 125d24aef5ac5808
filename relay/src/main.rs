use std::process::ExitCode;
use std::sync::Arc;

use axum::Router;
use clap::Parser;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use screenmcp_relay::config::Config;
use screenmcp_relay::{discovery, transport, AppState};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("screenmcp_relay=info")),
        )
        .init();

    let config = match Config::try_parse() {
        Ok(config) => config,
        Err(e) => {
            e.print().ok();
            // clap exits 0 itself for --help/--version; anything else here
            // is a genuine usage error.
            return if e.exit_code() == 0 { ExitCode::SUCCESS } else { ExitCode::from(1) };
        }
    };
    let listen = config.listen;
    let ws_url = config.ws_url.clone();
    let state = AppState::new(config);

    let app = Router::new()
        .merge(transport::router(Arc::clone(&state)))
        .merge(discovery::router(Arc::clone(&state)))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let listener = match tokio::net::TcpListener::bind(listen).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(%listen, error = %e, "failed to bind listener");
            return ExitCode::from(2);
        }
    };

    info!("ScreenMCP relay listening on {listen}");
    info!("  devices/controllers connect to: {ws_url}");
    info!("  discovery:                      POST http://{listen}/discover");
    info!("  events (SSE):                   GET  http://{listen}/events");
    info!("  health check:                   GET  http://{listen}/health");

    let result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "server exited with an error");
            ExitCode::from(2)
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received, draining connections");
}
