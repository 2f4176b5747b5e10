use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use viewer_api::{InboundMessage, Notifier, StoredMessage, ViewEvent, topic_key};

use crate::SharedStore;
use crate::filter::SubscriptionFilter;

/// Что произошло с входящим сообщением.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Глубже, чем допускает `#`-фильтр: не сохранено, не посчитано.
    Dropped,
    Ingested {
        key: String,
        /// Ключ появился впервые.
        created: bool,
        /// Сработал alert filter.
        alerted: bool,
    },
}

/// Единственная точка входа входящих сообщений в TopicStore.
pub struct Dispatcher {
    store: SharedStore,
    events: broadcast::Sender<ViewEvent>,
    notifier: Arc<dyn Notifier>,
    alert_filter: watch::Receiver<Option<String>>,
    subscription: watch::Receiver<Option<SubscriptionFilter>>,
    depth_filter: bool,
    notifications_granted: bool,
}

impl Dispatcher {
    pub fn new(
        store: SharedStore,
        events: broadcast::Sender<ViewEvent>,
        notifier: Arc<dyn Notifier>,
        alert_filter: watch::Receiver<Option<String>>,
        subscription: watch::Receiver<Option<SubscriptionFilter>>,
    ) -> Self {
        Self {
            store,
            events,
            notifier,
            alert_filter,
            subscription,
            depth_filter: true,
            notifications_granted: true,
        }
    }

    pub fn with_depth_filter(mut self, enabled: bool) -> Self {
        self.depth_filter = enabled;
        self
    }

    pub fn with_notifications(mut self, granted: bool) -> Self {
        self.notifications_granted = granted;
        self
    }

    fn admits(&self, full_topic: &str) -> bool {
        if !self.depth_filter {
            return true;
        }
        match &*self.subscription.borrow() {
            Some(filter) => filter.admits(full_topic),
            None => true,
        }
    }

    /// Принять одно сообщение: depth filter → ingest → событие → alert.
    pub async fn on_message_arrived(&self, message: InboundMessage) -> DispatchOutcome {
        if !self.admits(&message.topic) {
            tracing::trace!(topic = %message.topic, "deeper than subscription filter, dropped");
            return DispatchOutcome::Dropped;
        }

        let key = topic_key(&message.topic).to_string();
        let alert_term = self.alert_filter.borrow().clone();
        let alert = alert_term
            .filter(|term| message.topic.contains(term.as_str()) || message.payload.contains(term))
            .map(|_| {
                (
                    format!("New message on topic: {}", message.topic),
                    message.payload.to_text_lossy().into_owned(),
                )
            });
        let full_topic = message.topic.clone();

        let outcome = {
            let mut store = self.store.write().await;
            store.ingest(
                &key,
                StoredMessage {
                    ts_ms: message.ts_ms,
                    topic: message.topic,
                    payload: message.payload,
                },
            )
        };

        let event = if outcome.created {
            ViewEvent::TopicAdded { topic: key.clone() }
        } else {
            ViewEvent::TopicUpdated {
                topic: key.clone(),
                message_count: outcome.summary.message_count,
            }
        };
        // Нет подписчиков — не ошибка.
        let _ = self.events.send(event);

        let alerted = alert.is_some();
        if let Some((title, body)) = alert {
            self.notifier.notify(self.notifications_granted, &title, &body);
            let _ = self.events.send(ViewEvent::Alert {
                topic: full_topic,
                title,
                body,
            });
        }

        DispatchOutcome::Ingested {
            key,
            created: outcome.created,
            alerted,
        }
    }

    /// Обрабатывать сообщения из канала до его закрытия или отмены.
    pub fn spawn(
        self,
        mut rx: mpsc::Receiver<InboundMessage>,
        token: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    message = rx.recv() => match message {
                        Some(message) => {
                            self.on_message_arrived(message).await;
                        }
                        None => break,
                    },
                    _ = token.cancelled() => break,
                }
            }
            tracing::info!("dispatcher stopped");
        })
    }
}
