use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use transport_mqtt::MqttTransport;
use viewer_api::Notifier;
use viewer_engine::{TopicViewer, TracingNotifier};

use crate::config::{ServeArgs, ServerConfig};
use crate::error::ServerError;

pub async fn run(args: ServeArgs) -> Result<(), ServerError> {
    tracing::info!("topic-viewer-server starting");

    // --- Load config ---
    let mut config = ServerConfig::load(&args.config)?;
    config.apply_args(&args);
    let endpoint = config.broker.endpoint()?;
    tracing::info!(
        config = %args.config,
        broker = %endpoint,
        filter = ?config.viewer.filter,
        capacity = config.viewer.capacity,
        "config loaded"
    );

    // --- Viewer ---
    let transport = MqttTransport::new(endpoint);
    let notifier: Arc<dyn Notifier> = Arc::new(TracingNotifier);
    let viewer = Arc::new(TopicViewer::start(
        config.viewer,
        config.connection,
        Box::new(transport),
        notifier,
    )?);

    // --- API server (HTTP + WS) ---
    let token = CancellationToken::new();
    let api_viewer = viewer.clone();
    let api_port = config.api_port;
    let ws_buffer = config.ws_buffer;
    let api_token = token.clone();
    let api_handle = tokio::spawn(async move {
        if let Err(e) = topic_api_server::run(api_port, api_viewer, ws_buffer, api_token).await {
            tracing::error!(error = %e, "api server error");
        }
    });

    tracing::info!("server ready");

    // --- Ожидание Ctrl+C ---
    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down...");

    token.cancel();
    viewer.shutdown().await;

    // API сервер дожидается открытых соединений; WS держит их бесконечно.
    if tokio::time::timeout(Duration::from_secs(5), api_handle).await.is_err() {
        tracing::warn!("api server did not stop in time");
    }

    tracing::info!("shutdown complete");
    Ok(())
}
