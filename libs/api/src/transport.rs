use std::future::Future;
use std::pin::Pin;

use serde::Deserialize;

use crate::{InboundMessage, ViewerError};

// ════════════════════════════════════════════════════════════════
//  Broker Transport
// ════════════════════════════════════════════════════════════════

/// Протокол до брокера: MQTT поверх TCP или поверх WebSocket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrokerProtocol {
    #[default]
    Tcp,
    Ws,
}

/// Параметры подключения к брокеру.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerEndpoint {
    pub host: String,
    pub port: u16,
    pub tls: bool,
    pub protocol: BrokerProtocol,
    /// Путь WebSocket endpoint'а, только для `BrokerProtocol::Ws`.
    pub ws_path: String,
    pub keep_alive_secs: u64,
    /// Предел размера входящего и исходящего пакета, байт.
    pub max_packet_size: usize,
}

impl BrokerEndpoint {
    pub fn scheme(&self) -> &'static str {
        match (self.protocol, self.tls) {
            (BrokerProtocol::Tcp, false) => "mqtt",
            (BrokerProtocol::Tcp, true) => "mqtts",
            (BrokerProtocol::Ws, false) => "ws",
            (BrokerProtocol::Ws, true) => "wss",
        }
    }
}

impl std::fmt::Display for BrokerEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}://{}:{}", self.scheme(), self.host, self.port)?;
        if self.protocol == BrokerProtocol::Ws {
            f.write_str(&self.ws_path)?;
        }
        Ok(())
    }
}

/// Событие транспорта после успешного connect.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Входящая публикация (QoS 1 — возможны повторы).
    Message(InboundMessage),
    /// Соединение потеряно. Транспорт требует нового connect().
    Disconnected(String),
}

/// Одно соединение с pub/sub брокером.
///
/// ConnectionManager владеет транспортом и управляет его жизненным
/// циклом: connect → subscribe* → next_event* → (Disconnected) → connect.
/// Каждый connect() получает новый client id.
pub trait BrokerTransport: Send {
    /// Установить соединение. Ok только после подтверждения брокером.
    fn connect<'a>(
        &'a mut self,
        client_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), ViewerError>> + Send + 'a>>;

    /// Подписаться на filter с QoS "at least once".
    fn subscribe<'a>(
        &'a mut self,
        filter: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), ViewerError>> + Send + 'a>>;

    /// Следующее событие соединения. Должен быть cancel-safe:
    /// ConnectionManager опрашивает его внутри `select!`.
    fn next_event(&mut self) -> Pin<Box<dyn Future<Output = TransportEvent> + Send + '_>>;

    /// Закрыть соединение (при остановке viewer'а).
    fn disconnect(&mut self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

// ════════════════════════════════════════════════════════════════
//  Notifier
// ════════════════════════════════════════════════════════════════

/// Показ пользовательского уведомления о совпадении с alert filter.
///
/// Разрешение на уведомления приходит снаружи (`granted`);
/// реализация сама его не запрашивает.
pub trait Notifier: Send + Sync {
    fn notify(&self, granted: bool, title: &str, body: &str);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_follows_protocol_and_tls() {
        let mut ep = BrokerEndpoint {
            host: "broker.local".into(),
            port: 8884,
            tls: true,
            protocol: BrokerProtocol::Ws,
            ws_path: "/mqtt".into(),
            keep_alive_secs: 30,
            max_packet_size: 1024,
        };
        assert_eq!(ep.to_string(), "wss://broker.local:8884/mqtt");

        ep.protocol = BrokerProtocol::Tcp;
        ep.tls = false;
        assert_eq!(ep.to_string(), "mqtt://broker.local:8884");
    }
}
