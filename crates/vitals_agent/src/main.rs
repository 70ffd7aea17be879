use std::net::SocketAddr;
use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::signal;
use tracing::info;
use vitals_agent::{AgentComponents, AgentState, DEFAULT_MAX_BODY_SIZE, router};
use vitals_client::config::Config;
use vitals_client::observability::describe_metrics;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    // Configure logging from env var `VITALS_LOG_LEVEL` (or fallback to `RUST_LOG`, default `info`).
    let log_env = std::env::var("VITALS_LOG_LEVEL")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "info".to_string());
    let env_filter = tracing_subscriber::EnvFilter::try_new(log_env.clone())
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .compact()
        .with_ansi(false)
        .with_target(false)
        .with_env_filter(env_filter)
        .init();
    tracing::info!(%log_env, "vitals_agent: log filter");

    let handle = PrometheusBuilder::new().install_recorder()?;
    describe_metrics();

    let config = Config::from_env()?;
    if !config.wearable_enabled() {
        info!("VITALS_FITBIT_CLIENT_ID not set; wearable vitals will be sent as null");
    }

    let components = AgentComponents::from_config(&config, None);
    components.device.request_permissions().await;
    let (state, events) = AgentState::new(components, Some(handle))?;
    let state = Arc::new(state);

    let scheduler = state.scheduler.clone();
    let scheduler_task = tokio::spawn(async move { scheduler.run(events).await });

    let max_body_size = std::env::var("MAX_HTTP_BODY_SIZE")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(DEFAULT_MAX_BODY_SIZE);
    let app = router(state.clone(), max_body_size);

    let addr: SocketAddr = std::env::var("ADDRESS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 3000)));
    info!(
        %addr,
        max_body_bytes = max_body_size,
        sync_url = %config.sync_url,
        sync_interval_secs = config.sync_interval.as_secs(),
        "starting HTTP server"
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            if let Err(e) = signal::ctrl_c().await {
                tracing::error!("failed to listen for ctrl+c: {e}");
            }
        })
        .await?;

    scheduler_task.abort();
    info!("vitals_agent: shut down");
    Ok(())
}
