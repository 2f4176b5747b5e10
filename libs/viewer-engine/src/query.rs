use std::sync::Arc;

use tokio::sync::watch;

use viewer_api::{StoredMessage, TopicSummary};

use crate::SharedStore;

/// Read-only доступ presentation layer'а к TopicStore плюс alert filter.
#[derive(Clone)]
pub struct QueryFacade {
    store: SharedStore,
    alert_filter: Arc<watch::Sender<Option<String>>>,
}

impl QueryFacade {
    pub fn new(store: SharedStore, alert_filter: watch::Sender<Option<String>>) -> Self {
        Self {
            store,
            alert_filter: Arc::new(alert_filter),
        }
    }

    /// Receiver для Dispatcher'а.
    pub fn watch_active_filter(&self) -> watch::Receiver<Option<String>> {
        self.alert_filter.subscribe()
    }

    pub async fn list_topics(&self) -> Vec<String> {
        self.store.read().await.list_topics()
    }

    pub async fn summaries(&self) -> Vec<TopicSummary> {
        self.store.read().await.summaries()
    }

    pub async fn get_messages(&self, key: &str) -> Vec<StoredMessage> {
        self.store.read().await.get_messages(key)
    }

    pub async fn message_count(&self, key: &str) -> Option<u64> {
        self.store.read().await.message_count(key)
    }

    pub async fn topic_count(&self) -> usize {
        self.store.read().await.topic_count()
    }

    /// Первый ключ в порядке `list_topics()`, содержащий `term`.
    /// Пустой term или отсутствие совпадений → None.
    pub async fn search(&self, term: &str) -> Option<String> {
        let term = term.trim();
        if term.is_empty() {
            return None;
        }
        let found = self
            .list_topics()
            .await
            .into_iter()
            .find(|key| key.contains(term));
        match &found {
            Some(key) => tracing::debug!(%term, topic = %key, "search matched"),
            None => tracing::debug!(%term, "search found no topic"),
        }
        found
    }

    /// Установить alert filter для всех последующих сообщений.
    /// Пустая строка снимает фильтр.
    pub fn set_active_filter(&self, term: &str) {
        let term = term.trim();
        let value = (!term.is_empty()).then(|| term.to_string());
        tracing::info!(filter = ?value, "alert filter changed");
        self.alert_filter.send_replace(value);
    }

    pub fn active_filter(&self) -> Option<String> {
        self.alert_filter.borrow().clone()
    }
}
