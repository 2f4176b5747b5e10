pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod filter;
pub mod notify;
pub mod query;
pub mod staleness;

#[cfg(test)]
mod mock;

use std::sync::{Arc, Mutex};

use tokio::sync::{RwLock, broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use topic_store::TopicStore;
use viewer_api::{BrokerTransport, ConnectionState, Notifier, ViewEvent};

pub use config::{ConnectionConfig, ViewerConfig, capacity_from};
pub use connection::{ConnectionHandle, ConnectionManager};
pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use error::EngineError;
pub use filter::SubscriptionFilter;
pub use notify::TracingNotifier;
pub use query::QueryFacade;
pub use staleness::StalenessMonitor;

/// TopicStore под единственным lock'ом: пишет Dispatcher (и
/// StalenessMonitor — только флаги), остальные читают.
pub type SharedStore = Arc<RwLock<TopicStore>>;

// ═══════════════════════════════════════════════════════════════
//  TopicViewer
// ═══════════════════════════════════════════════════════════════

/// Собранный viewer: одно соединение, один TopicStore и фоновые задачи
/// (connection, dispatcher, staleness monitor).
///
/// Все зависимости передаются при создании. Остановка через
/// `shutdown()`; drop без shutdown тоже отменяет задачи.
pub struct TopicViewer {
    store: SharedStore,
    query: QueryFacade,
    connection: ConnectionHandle,
    events: broadcast::Sender<ViewEvent>,
    subscription: watch::Sender<Option<SubscriptionFilter>>,
    reset_on_capacity_change: bool,
    token: CancellationToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl TopicViewer {
    /// Проверить конфиг, создать компоненты и запустить фоновые задачи.
    /// Должен вызываться внутри tokio runtime.
    pub fn start(
        config: ViewerConfig,
        connection: ConnectionConfig,
        transport: Box<dyn BrokerTransport>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        connection.validate()?;
        let capacity = capacity_from(config.capacity)?;
        let initial_filter = config
            .filter
            .as_deref()
            .map(SubscriptionFilter::parse)
            .transpose()?;

        let store: SharedStore = Arc::new(RwLock::new(TopicStore::new(capacity)));
        let (events, _) = broadcast::channel(config.event_buffer);
        let (alert_tx, _) = watch::channel(None);
        let query = QueryFacade::new(store.clone(), alert_tx);
        if let Some(term) = &config.alert_filter {
            query.set_active_filter(term);
        }
        let (subscription, subscription_rx) = watch::channel(initial_filter.clone());
        let token = CancellationToken::new();

        let (message_tx, message_rx) = mpsc::channel(connection.message_buffer);
        let (mut manager, handle) = ConnectionManager::new(transport, connection);
        manager.on_message(message_tx);

        let dispatcher = Dispatcher::new(
            store.clone(),
            events.clone(),
            notifier,
            query.watch_active_filter(),
            subscription_rx,
        )
        .with_depth_filter(config.depth_filter)
        .with_notifications(config.notifications);

        let monitor = StalenessMonitor::new(
            store.clone(),
            events.clone(),
            config.sweep_interval(),
            config.stale_threshold_ms,
        );

        if let Some(filter) = &initial_filter {
            handle.subscribe(filter.pattern())?;
        }

        let handles = vec![
            dispatcher.spawn(message_rx, token.clone()),
            monitor.spawn(token.clone()),
            connection::spawn_state_events(handle.watch_state(), events.clone(), token.clone()),
            manager.spawn(token.clone()),
        ];

        tracing::info!(
            capacity = capacity.get(),
            filter = ?config.filter,
            sweep_interval_ms = config.sweep_interval_ms,
            stale_threshold_ms = config.stale_threshold_ms,
            "topic viewer started"
        );

        Ok(Self {
            store,
            query,
            connection: handle,
            events,
            subscription,
            reset_on_capacity_change: config.reset_on_capacity_change,
            token,
            handles: Mutex::new(handles),
        })
    }

    pub fn query(&self) -> &QueryFacade {
        &self.query
    }

    /// Подписка на события перерисовки.
    pub fn events(&self) -> broadcast::Receiver<ViewEvent> {
        self.events.subscribe()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn subscription_filter(&self) -> Option<String> {
        self.subscription
            .borrow()
            .as_ref()
            .map(|f| f.pattern().to_string())
    }

    pub async fn capacity(&self) -> usize {
        self.store.read().await.capacity().get()
    }

    /// Сменить subscription filter: глубина пересчитывается сразу,
    /// подписка уходит брокеру (или в очередь).
    pub fn set_filter(&self, pattern: &str) -> Result<(), EngineError> {
        let filter = SubscriptionFilter::parse(pattern)?;
        tracing::info!(%filter, depth = ?filter.depth(), "subscription filter changed");
        self.subscription.send_replace(Some(filter));
        self.connection.subscribe(pattern)
    }

    /// Сменить размер буфера. По умолчанию очищает всё и переподписывается.
    pub async fn set_capacity(&self, capacity: usize) -> Result<(), EngineError> {
        let capacity = capacity_from(capacity)?;
        self.store.write().await.reconfigure_capacity(capacity);
        if self.reset_on_capacity_change {
            self.reset().await?;
        }
        Ok(())
    }

    /// Очистить все буферы и заново подписаться на активный filter.
    pub async fn reset(&self) -> Result<(), EngineError> {
        self.store.write().await.reset();
        let _ = self.events.send(ViewEvent::Reset);
        if let Some(pattern) = self.subscription_filter() {
            self.connection.subscribe(&pattern)?;
        }
        Ok(())
    }

    /// Остановить все фоновые задачи и дождаться их завершения.
    pub async fn shutdown(&self) {
        self.token.cancel();
        let handles = match self.handles.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "viewer task failed");
            }
        }
        tracing::info!("topic viewer stopped");
    }
}

impl Drop for TopicViewer {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
