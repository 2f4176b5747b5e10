use std::collections::VecDeque;

use rand::Rng;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use viewer_api::{BrokerTransport, ConnectionState, InboundMessage, TransportEvent, ViewEvent};

use crate::config::ConnectionConfig;
use crate::error::EngineError;

// ═══════════════════════════════════════════════════════════════
//  ConnectionHandle — управление из остальных частей viewer'а
// ═══════════════════════════════════════════════════════════════

enum Command {
    Subscribe(String),
}

/// Клонируемая ручка к работающему ConnectionManager'у.
#[derive(Clone)]
pub struct ConnectionHandle {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
}

impl ConnectionHandle {
    /// Подписаться на filter: сразу, если соединение есть, иначе через очередь.
    pub fn subscribe(&self, filter: &str) -> Result<(), EngineError> {
        self.commands
            .send(Command::Subscribe(filter.to_string()))
            .map_err(|_| EngineError::ConnectionClosed)
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }
}

// ═══════════════════════════════════════════════════════════════
//  ConnectionManager
// ═══════════════════════════════════════════════════════════════

/// Владелец единственного соединения с брокером.
///
/// Машина состояний `Disconnected → Connecting → Connected`; при потере
/// соединения возвращается в `Disconnected` и через `retry_delay` снова
/// подключается. Подписки, пришедшие без соединения, ждут в очереди и
/// отправляются в порядке FIFO сразу после подключения.
pub struct ConnectionManager {
    transport: Box<dyn BrokerTransport>,
    config: ConnectionConfig,
    state_tx: watch::Sender<ConnectionState>,
    pending: VecDeque<String>,
    active_filter: Option<String>,
    message_tx: Option<mpsc::Sender<InboundMessage>>,
    commands: mpsc::UnboundedReceiver<Command>,
    commands_open: bool,
    /// Неудачных попыток подряд.
    failures: u32,
}

impl ConnectionManager {
    pub fn new(
        transport: Box<dyn BrokerTransport>,
        config: ConnectionConfig,
    ) -> (Self, ConnectionHandle) {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let manager = Self {
            transport,
            config,
            state_tx,
            pending: VecDeque::new(),
            active_filter: None,
            message_tx: None,
            commands: cmd_rx,
            commands_open: true,
            failures: 0,
        };
        let handle = ConnectionHandle {
            commands: cmd_tx,
            state: state_rx,
        };
        (manager, handle)
    }

    /// Зарегистрировать единственного получателя входящих сообщений.
    pub fn on_message(&mut self, tx: mpsc::Sender<InboundMessage>) {
        self.message_tx = Some(tx);
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Filter'ы, ожидающие соединения.
    pub fn pending(&self) -> impl Iterator<Item = &str> {
        self.pending.iter().map(String::as_str)
    }

    pub fn active_filter(&self) -> Option<&str> {
        self.active_filter.as_deref()
    }

    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
    }

    /// Подключиться к брокеру с новым случайным client id.
    ///
    /// Повторный вызов при активном соединении ничего не делает. После
    /// успеха отправляет все отложенные подписки.
    pub async fn connect(&mut self) -> Result<(), EngineError> {
        if self.state() == ConnectionState::Connected {
            return Ok(());
        }
        self.set_state(ConnectionState::Connecting);

        let client_id = generate_client_id(&self.config.client_id_prefix);
        tracing::info!(%client_id, "connecting to broker");

        match self.transport.connect(&client_id).await {
            Ok(()) => {
                self.failures = 0;
                self.set_state(ConnectionState::Connected);
                tracing::info!(%client_id, "broker connection established");
                self.drain_pending().await;
                Ok(())
            }
            Err(e) => {
                self.failures += 1;
                self.set_state(ConnectionState::Disconnected);
                Err(e.into())
            }
        }
    }

    /// Подписаться на filter (QoS 1). Без соединения — в очередь.
    /// Очередь не дедуплицирует: повторная подписка у брокера идемпотентна.
    pub async fn subscribe(&mut self, filter: &str) {
        self.active_filter = Some(filter.to_string());

        if self.state() != ConnectionState::Connected {
            tracing::debug!(%filter, "not connected, subscription queued");
            self.pending.push_back(filter.to_string());
            return;
        }

        match self.transport.subscribe(filter).await {
            Ok(()) => tracing::info!(%filter, "subscribed"),
            Err(e) => {
                tracing::warn!(%filter, error = %e, "subscribe failed, queued for reconnect");
                self.pending.push_back(filter.to_string());
            }
        }
    }

    async fn drain_pending(&mut self) {
        while let Some(filter) = self.pending.pop_front() {
            if let Err(e) = self.transport.subscribe(&filter).await {
                tracing::warn!(%filter, error = %e, "queued subscribe failed");
                self.pending.push_front(filter);
                break;
            }
            tracing::info!(%filter, "subscribed (queued)");
        }
    }

    /// Соединение потеряно: активный filter нужно выдать заново.
    fn connection_lost(&mut self, reason: &str) {
        self.set_state(ConnectionState::Disconnected);
        tracing::warn!(%reason, "broker connection lost");
        if let Some(filter) = &self.active_filter {
            if !self.pending.contains(filter) {
                self.pending.push_back(filter.clone());
            }
        }
    }

    async fn handle_command(&mut self, cmd: Option<Command>) {
        match cmd {
            Some(Command::Subscribe(filter)) => self.subscribe(&filter).await,
            None => self.commands_open = false,
        }
    }

    async fn forward(&mut self, message: InboundMessage) {
        if let Some(tx) = &self.message_tx {
            if tx.send(message).await.is_err() {
                tracing::warn!("message receiver closed, dropping message");
            }
        }
    }

    /// Пауза перед повторным подключением. Команды продолжают приниматься
    /// (и попадают в очередь). false — получен сигнал остановки.
    async fn wait_retry(&mut self, token: &CancellationToken) -> bool {
        let delay = self.config.retry_delay();
        tracing::info!(delay_ms = delay.as_millis() as u64, "reconnecting after delay");
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return true,
                _ = token.cancelled() => return false,
                cmd = self.commands.recv(), if self.commands_open => {
                    self.handle_command(cmd).await;
                }
            }
        }
    }

    fn retries_exhausted(&self) -> bool {
        match self.config.max_retries {
            Some(max) => self.failures > max,
            None => false,
        }
    }

    /// Главный цикл: подключение, приём сообщений, переподключение.
    /// Завершается по `token`, после исчерпания `max_retries` или если
    /// брокер отверг клиента (`ErrorKind::Config`).
    pub async fn run(mut self, token: CancellationToken) {
        loop {
            let connected = tokio::select! {
                result = self.connect() => result,
                _ = token.cancelled() => break,
            };

            if let Err(e) = connected {
                if e.is_permanent() {
                    tracing::error!(error = %e, "broker rejected the client, not retrying");
                    break;
                }
                tracing::warn!(error = %e, attempt = self.failures, "broker connect failed");
                if self.retries_exhausted() {
                    tracing::error!(attempts = self.failures, "giving up on broker connection");
                    break;
                }
                if !self.wait_retry(&token).await {
                    break;
                }
                continue;
            }

            let reason = loop {
                tokio::select! {
                    biased;

                    _ = token.cancelled() => {
                        self.transport.disconnect().await;
                        self.set_state(ConnectionState::Disconnected);
                        tracing::info!("broker connection closed");
                        return;
                    }

                    cmd = self.commands.recv(), if self.commands_open => {
                        self.handle_command(cmd).await;
                    }

                    event = self.transport.next_event() => match event {
                        TransportEvent::Message(message) => self.forward(message).await,
                        TransportEvent::Disconnected(reason) => break reason,
                    },
                }
            };

            self.connection_lost(&reason);
            if !self.wait_retry(&token).await {
                break;
            }
        }

        self.set_state(ConnectionState::Disconnected);
        tracing::info!("connection manager stopped");
    }

    pub fn spawn(self, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(token))
    }
}

/// Транслировать смену состояния соединения в `ViewEvent::Connection`.
pub(crate) fn spawn_state_events(
    mut state: watch::Receiver<ConnectionState>,
    events: broadcast::Sender<ViewEvent>,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                changed = state.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let state = *state.borrow_and_update();
                    let _ = events.send(ViewEvent::Connection { state });
                }
                _ = token.cancelled() => break,
            }
        }
    })
}

/// Случайный client id: `prefix` + 8 hex. Только против коллизий.
pub fn generate_client_id(prefix: &str) -> String {
    let suffix: u32 = rand::rng().random();
    format!("{prefix}{suffix:08x}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{ScriptedTransport, wait_until};

    fn config() -> ConnectionConfig {
        ConnectionConfig {
            retry_delay_ms: 5_000,
            ..Default::default()
        }
    }

    #[test]
    fn client_id_has_prefix_and_hex_suffix() {
        let id = generate_client_id("web_");
        assert!(id.starts_with("web_"));
        assert_eq!(id.len(), 12);
        assert!(id[4..].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn connect_is_idempotent() {
        let (transport, script) = ScriptedTransport::new();
        let (mut manager, handle) = ConnectionManager::new(Box::new(transport), config());

        manager.connect().await.unwrap();
        manager.connect().await.unwrap();

        assert_eq!(script.connects(), 1);
        assert_eq!(manager.state(), ConnectionState::Connected);
        assert_eq!(handle.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn queued_subscriptions_drain_in_order() {
        let (transport, script) = ScriptedTransport::new();
        let (mut manager, _handle) = ConnectionManager::new(Box::new(transport), config());

        manager.subscribe("plant/#").await;
        manager.subscribe("site/+/status").await;
        assert_eq!(manager.pending().collect::<Vec<_>>(), vec!["plant/#", "site/+/status"]);
        assert!(script.subscriptions().is_empty());

        manager.connect().await.unwrap();
        assert_eq!(script.subscriptions(), vec!["plant/#", "site/+/status"]);
        assert_eq!(manager.pending().count(), 0);
        assert_eq!(manager.active_filter(), Some("site/+/status"));
    }

    #[tokio::test]
    async fn subscribe_while_connected_is_immediate() {
        let (transport, script) = ScriptedTransport::new();
        let (mut manager, _handle) = ConnectionManager::new(Box::new(transport), config());

        manager.connect().await.unwrap();
        manager.subscribe("plant/#").await;
        assert_eq!(script.subscriptions(), vec!["plant/#"]);
        assert_eq!(manager.pending().count(), 0);
    }

    #[tokio::test]
    async fn failed_connect_leaves_disconnected() {
        let (transport, script) = ScriptedTransport::new();
        script.fail_connects(1);
        let (mut manager, _handle) = ConnectionManager::new(Box::new(transport), config());

        assert!(manager.connect().await.is_err());
        assert_eq!(manager.state(), ConnectionState::Disconnected);

        manager.connect().await.unwrap();
        assert_eq!(manager.state(), ConnectionState::Connected);
        assert_eq!(script.connects(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn run_retries_after_failure_with_fresh_client_id() {
        let (transport, script) = ScriptedTransport::new();
        script.fail_connects(2);
        let (manager, handle) = ConnectionManager::new(Box::new(transport), config());
        let token = CancellationToken::new();
        let task = manager.spawn(token.clone());

        handle.subscribe("plant/#").unwrap();

        let mut state = handle.watch_state();
        state.wait_for(|s| *s == ConnectionState::Connected).await.unwrap();
        assert_eq!(script.connects(), 3);
        {
            let log = script.log.lock().unwrap();
            assert_ne!(log.connects[0], log.connects[1]);
        }
        wait_until(|| script.subscriptions() == vec!["plant/#"]).await;

        token.cancel();
        task.await.unwrap();
        assert_eq!(handle.state(), ConnectionState::Disconnected);
        assert_eq!(script.log.lock().unwrap().disconnects, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn active_filter_is_resubscribed_after_connection_loss() {
        let (transport, script) = ScriptedTransport::new();
        let (manager, handle) = ConnectionManager::new(Box::new(transport), config());
        let token = CancellationToken::new();
        let task = manager.spawn(token.clone());

        handle.subscribe("plant/#").unwrap();
        wait_until(|| script.subscriptions().len() == 1).await;

        script.drop_connection();
        wait_until(|| script.subscriptions().len() == 2).await;

        assert_eq!(script.subscriptions(), vec!["plant/#", "plant/#"]);
        assert_eq!(script.connects(), 2);
        assert_eq!(handle.state(), ConnectionState::Connected);

        token.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn messages_are_forwarded_in_arrival_order() {
        let (transport, script) = ScriptedTransport::new();
        let (mut manager, _handle) = ConnectionManager::new(Box::new(transport), config());
        let (tx, mut rx) = mpsc::channel(16);
        manager.on_message(tx);
        let token = CancellationToken::new();
        let task = manager.spawn(token.clone());

        script.publish("a/x", "1");
        script.publish("a/y", "2");
        script.publish("a/x", "1");

        let mut topics = Vec::new();
        for _ in 0..3 {
            topics.push(rx.recv().await.unwrap().topic);
        }
        assert_eq!(topics, vec!["a/x", "a/y", "a/x"]);

        token.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn failed_subscribe_is_retried_after_reconnect() {
        let (transport, script) = ScriptedTransport::new();
        let (mut manager, _handle) = ConnectionManager::new(Box::new(transport), config());

        manager.connect().await.unwrap();
        script.fail_subscribes(1);
        manager.subscribe("plant/#").await;
        assert_eq!(manager.pending().collect::<Vec<_>>(), vec!["plant/#"]);
        assert!(script.subscriptions().is_empty());

        manager.connection_lost("keep alive timeout");
        assert_eq!(manager.pending().count(), 1);

        manager.connect().await.unwrap();
        assert_eq!(script.subscriptions(), vec!["plant/#"]);
        assert_eq!(manager.pending().count(), 0);
    }

    #[tokio::test]
    async fn repeated_subscribe_before_connect_keeps_one_active_filter() {
        let (transport, script) = ScriptedTransport::new();
        let (mut manager, _handle) = ConnectionManager::new(Box::new(transport), config());

        manager.subscribe("plant/#").await;
        manager.subscribe("plant/#").await;
        assert_eq!(manager.pending().count(), 2);
        assert_eq!(manager.active_filter(), Some("plant/#"));

        manager.connect().await.unwrap();
        assert_eq!(script.subscriptions(), vec!["plant/#", "plant/#"]);
        assert_eq!(manager.pending().count(), 0);
        assert_eq!(manager.active_filter(), Some("plant/#"));
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_client_is_not_retried() {
        let (transport, script) = ScriptedTransport::new();
        script.reject_connect();
        let (manager, handle) = ConnectionManager::new(Box::new(transport), config());

        manager.run(CancellationToken::new()).await;

        assert_eq!(script.connects(), 1);
        assert_eq!(handle.state(), ConnectionState::Disconnected);
        assert!(handle.subscribe("plant/#").is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_retries() {
        let (transport, script) = ScriptedTransport::new();
        script.fail_connects(10);
        let cfg = ConnectionConfig {
            max_retries: Some(2),
            ..config()
        };
        let (manager, handle) = ConnectionManager::new(Box::new(transport), cfg);

        manager.run(CancellationToken::new()).await;

        assert_eq!(script.connects(), 3);
        assert_eq!(handle.state(), ConnectionState::Disconnected);
        assert!(handle.subscribe("plant/#").is_err());
    }
}
