mod http;
mod ws;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, put};
use tokio_util::sync::CancellationToken;

use viewer_engine::TopicViewer;

#[derive(Clone)]
pub(crate) struct AppState {
    viewer: Arc<TopicViewer>,
    /// Очередь исходящих событий на одно WS соединение.
    ws_buffer: usize,
}

/// Маршруты HTTP + WebSocket API поверх работающего viewer'а.
pub fn router(viewer: Arc<TopicViewer>, ws_buffer: usize) -> Router {
    let state = AppState {
        viewer,
        ws_buffer: ws_buffer.max(1),
    };

    Router::new()
        .route("/api/topics", get(http::handle_list_topics))
        .route("/api/topics/{key}", get(http::handle_get_messages))
        .route("/api/search", get(http::handle_search))
        .route("/api/alert-filter", put(http::handle_set_alert_filter))
        .route("/api/capacity", put(http::handle_set_capacity))
        .route("/api/filter", put(http::handle_set_filter))
        .route("/api/status", get(http::handle_status))
        .route("/ws", get(ws::handle_ws))
        .with_state(state)
}

/// Topic viewer HTTP + WebSocket API сервер.
pub async fn run(
    port: u16,
    viewer: Arc<TopicViewer>,
    ws_buffer: usize,
    shutdown: CancellationToken,
) -> Result<(), String> {
    let app = router(viewer, ws_buffer);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .map_err(|e| format!("bind api :{port}: {e}"))?;
    tracing::info!(port, "topic viewer API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .map_err(|e| format!("axum serve: {e}"))?;

    Ok(())
}

#[cfg(test)]
pub(crate) mod testing {
    use std::future::Future;
    use std::pin::Pin;

    use tokio::sync::mpsc;
    use viewer_api::{
        BrokerTransport, InboundMessage, Notifier, Payload, TransportEvent, ViewerError, now_ms,
    };
    use viewer_engine::{ConnectionConfig, TracingNotifier, ViewerConfig};

    use super::*;

    /// Транспорт, который всегда подключается и отдаёт опубликованное тестом.
    pub struct LoopbackTransport {
        rx: mpsc::UnboundedReceiver<TransportEvent>,
    }

    impl BrokerTransport for LoopbackTransport {
        fn connect<'a>(
            &'a mut self,
            _client_id: &'a str,
        ) -> Pin<Box<dyn Future<Output = Result<(), ViewerError>> + Send + 'a>> {
            Box::pin(async { Ok(()) })
        }

        fn subscribe<'a>(
            &'a mut self,
            _filter: &'a str,
        ) -> Pin<Box<dyn Future<Output = Result<(), ViewerError>> + Send + 'a>> {
            Box::pin(async { Ok(()) })
        }

        fn next_event(&mut self) -> Pin<Box<dyn Future<Output = TransportEvent> + Send + '_>> {
            Box::pin(async move {
                match self.rx.recv().await {
                    Some(event) => event,
                    None => std::future::pending().await,
                }
            })
        }

        fn disconnect(&mut self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
            Box::pin(async {})
        }
    }

    pub struct Harness {
        pub state: AppState,
        tx: mpsc::UnboundedSender<TransportEvent>,
    }

    impl Harness {
        pub fn new() -> Self {
            let (tx, rx) = mpsc::unbounded_channel();
            let notifier: Arc<dyn Notifier> = Arc::new(TracingNotifier);
            let viewer = TopicViewer::start(
                ViewerConfig {
                    filter: Some("plant/#".into()),
                    ..Default::default()
                },
                ConnectionConfig::default(),
                Box::new(LoopbackTransport { rx }),
                notifier,
            )
            .unwrap();
            Self {
                state: AppState {
                    viewer: Arc::new(viewer),
                    ws_buffer: 16,
                },
                tx,
            }
        }

        /// Опубликовать и дождаться, пока сообщение попадёт в store.
        pub async fn publish(&self, topic: &str, payload: &str) {
            let key = viewer_api::topic_key(topic).to_string();
            let before = self.state.viewer.query().message_count(&key).await.unwrap_or(0);
            self.tx
                .send(TransportEvent::Message(InboundMessage {
                    topic: topic.to_string(),
                    payload: Payload::from(payload),
                    ts_ms: now_ms(),
                }))
                .unwrap();
            for _ in 0..500 {
                if self.state.viewer.query().message_count(&key).await.unwrap_or(0) > before {
                    return;
                }
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
            panic!("message on {topic} was not ingested");
        }
    }
}
