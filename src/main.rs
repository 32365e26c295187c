use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use tracing::level_filters::LevelFilter;
use traffic_monitor::api;
use traffic_monitor::classifier::Classifier;
use traffic_monitor::config::{self, MapTokenStatus};
use traffic_monitor::scheduler::spawn_monitor;
use traffic_monitor::source::http::HttpTrafficSource;
use traffic_monitor::state::AppState;
use traffic_monitor::watcher::ViewportWatcher;

fn init_tracing(level: &str) {
    let filter = level.parse::<LevelFilter>().unwrap_or(LevelFilter::INFO);
    let subscriber = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(filter)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = config::load_default()?;
    init_tracing(&config.logging.level);
    tracing::info!(
        config_path = config::DEFAULT_CONFIG_PATH,
        app = %config.app.name,
        "traffic-monitor starting"
    );

    match config.map_token_status() {
        MapTokenStatus::Configured => {}
        MapTokenStatus::Missing => tracing::warn!("Map access token not configured in [map]"),
        MapTokenStatus::Placeholder => {
            tracing::warn!("Map access token is still the placeholder value")
        }
    }

    let backend_url = config.backend_url();
    let source = Arc::new(HttpTrafficSource::new(&backend_url, config.request_timeout())?);
    tracing::info!(endpoint = source.endpoint(), "Traffic backend configured");

    let state = Arc::new(RwLock::new(AppState::new()));
    let (monitor, monitor_task) = spawn_monitor(
        source,
        Classifier::new(config.traffic_threshold()),
        config.debounce(),
        Arc::clone(&state),
    );
    let watcher = ViewportWatcher::new(monitor.clone(), Arc::clone(&state));

    let app = api::router(Arc::clone(&state), watcher);
    let port = config.server_port();
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(
        %addr,
        center = ?config.map_center(),
        zoom = config.map_zoom(),
        "API server listening"
    );
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    monitor.stop();
    monitor_task.await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
