mod app;
mod config;
mod hub;

use app::AppState;
use config::SchedulerConfig;
use flowgrid_workflow::{FsContainerStore, Scheduler};
use hub::SessionHub;
use std::sync::{Arc, Mutex};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = SchedulerConfig::from_env().expect("failed to load configuration");
    tracing::info!(var_dir = %config.var_dir, "loaded configuration");

    let containers = Arc::new(FsContainerStore::new(&config.var_dir));
    let hub = Arc::new(SessionHub::new());
    let scheduler = Arc::new(Mutex::new(Scheduler::new(containers, hub.clone())));
    let state = AppState { scheduler, hub };

    let app = app::router(state, config.max_payload_length);
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind to address");

    tracing::info!("listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install ctrl-c handler");
    tracing::info!("shutting down");
}
