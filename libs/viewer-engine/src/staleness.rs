use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use topic_store::StalenessChange;
use viewer_api::{ViewEvent, now_ms};

use crate::SharedStore;

/// Периодически помечает topic'и без свежих сообщений как stale.
pub struct StalenessMonitor {
    store: SharedStore,
    events: broadcast::Sender<ViewEvent>,
    interval: Duration,
    threshold_ms: i64,
}

impl StalenessMonitor {
    pub fn new(
        store: SharedStore,
        events: broadcast::Sender<ViewEvent>,
        interval: Duration,
        threshold_ms: u64,
    ) -> Self {
        Self {
            store,
            events,
            interval,
            threshold_ms: i64::try_from(threshold_ms).unwrap_or(i64::MAX),
        }
    }

    /// Один проход: пересчитать флаги на момент `now_ms` и сообщить
    /// об изменившихся.
    pub async fn sweep(&self, now_ms: i64) -> Vec<StalenessChange> {
        let changes = self.store.write().await.sweep(now_ms, self.threshold_ms);
        for change in &changes {
            tracing::debug!(topic = %change.key, stale = change.stale, "staleness changed");
            let _ = self.events.send(ViewEvent::StalenessChanged {
                topic: change.key.clone(),
                stale: change.stale,
            });
        }
        changes
    }

    /// Запустить периодический sweep. Первый тик через `interval`.
    pub fn spawn(self, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.sweep(now_ms()).await;
                    }
                    _ = token.cancelled() => break,
                }
            }
            tracing::info!("staleness monitor stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroUsize;
    use std::sync::Arc;

    use tokio::sync::RwLock;
    use topic_store::TopicStore;
    use viewer_api::{Payload, StoredMessage};

    use super::*;

    fn store() -> SharedStore {
        Arc::new(RwLock::new(TopicStore::new(NonZeroUsize::new(10).unwrap())))
    }

    async fn put(store: &SharedStore, key: &str, ts_ms: i64) {
        store.write().await.ingest(
            key,
            StoredMessage { ts_ms, topic: key.to_string(), payload: Payload::from("v") },
        );
    }

    #[tokio::test]
    async fn topic_goes_stale_and_recovers() {
        let store = store();
        let (tx, mut rx) = broadcast::channel(16);
        let monitor = StalenessMonitor::new(store.clone(), tx, Duration::from_secs(60), 180_000);

        put(&store, "x", 0).await;
        assert!(monitor.sweep(100_000).await.is_empty());

        let changes = monitor.sweep(180_001).await;
        assert_eq!(changes, vec![StalenessChange { key: "x".into(), stale: true }]);
        assert_eq!(
            rx.recv().await.unwrap(),
            ViewEvent::StalenessChanged { topic: "x".into(), stale: true }
        );

        put(&store, "x", 200_000).await;
        let changes = monitor.sweep(210_000).await;
        assert_eq!(changes, vec![StalenessChange { key: "x".into(), stale: false }]);
        assert_eq!(store.read().await.is_stale("x"), Some(false));
    }

    #[tokio::test]
    async fn fresh_topic_is_never_marked() {
        let store = store();
        let (tx, _rx) = broadcast::channel(16);
        let monitor = StalenessMonitor::new(store.clone(), tx, Duration::from_secs(60), 180_000);

        put(&store, "fresh", 1_000_000).await;
        put(&store, "old", 0).await;
        let changes = monitor.sweep(1_000_000 + 180_000).await;
        assert_eq!(changes, vec![StalenessChange { key: "old".into(), stale: true }]);
        assert_eq!(store.read().await.is_stale("fresh"), Some(false));
    }

    #[tokio::test]
    async fn periodic_task_sweeps_and_stops_on_cancel() {
        let store = store();
        let (tx, mut rx) = broadcast::channel(16);
        let monitor = StalenessMonitor::new(store.clone(), tx, Duration::from_millis(20), 0);
        put(&store, "x", now_ms() - 10_000).await;

        let token = CancellationToken::new();
        let task = monitor.spawn(token.clone());

        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("sweep did not run")
            .unwrap();
        assert_eq!(event, ViewEvent::StalenessChanged { topic: "x".into(), stale: true });

        token.cancel();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("monitor did not stop")
            .unwrap();
    }
}
