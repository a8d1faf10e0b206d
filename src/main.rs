// src/main.rs

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use sqlx::sqlite::SqlitePoolOptions;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use vigil_gateway::config::CONFIG;
use vigil_gateway::state::AppState;
use vigil_gateway::{admin, chat, metrics, worker};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_new(&CONFIG.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    if CONFIG.log_format == "json" {
        tracing_subscriber::fmt().json().with_env_filter(env_filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    metrics::init_metrics();

    info!("connecting to {}", CONFIG.database_url);
    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .connect(&CONFIG.database_url)
        .await?;
    sqlx::migrate!("./migrations").run(&pool).await?;

    let state = Arc::new(AppState::new(pool).await?);
    let shutdown = CancellationToken::new();

    state.worker.clone().spawn_supervised(shutdown.clone());
    worker::spawn_queue_monitor(state.queue.clone(), shutdown.clone());
    state.session_manager.clone().spawn_sweeper(
        std::time::Duration::from_secs(CONFIG.session.sweep_interval_sec),
        std::time::Duration::from_secs(CONFIG.session.idle_timeout_sec),
        shutdown.clone(),
    );

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/chat/ws", get(chat::ws_chat_handler))
        .merge(admin::router())
        .route("/metrics", get(metrics::metrics_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(CONFIG.bind_address()).await?;
    info!("listening on {}", CONFIG.bind_address());

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
    shutdown.cancel();
}
