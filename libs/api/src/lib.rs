use std::borrow::Cow;

use base64::Engine;
use serde::{Deserialize, Serialize};

pub mod error;
pub mod transport;
pub mod util;

pub use error::{ErrorKind, ViewerError};
pub use transport::{BrokerEndpoint, BrokerProtocol, BrokerTransport, Notifier, TransportEvent};
pub use util::{now_ms, segment_count, topic_key};

// ════════════════════════════════════════════════════════════════
//  Payload
// ════════════════════════════════════════════════════════════════

/// Формат payload, определённый при приёме.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadFormat {
    /// UTF-8 текст, который парсится как JSON.
    Json,
    /// UTF-8 текст, не являющийся JSON.
    Text,
    /// Не UTF-8 — хранится как есть.
    Binary,
}

impl std::fmt::Display for PayloadFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PayloadFormat::Json => write!(f, "json"),
            PayloadFormat::Text => write!(f, "text"),
            PayloadFormat::Binary => write!(f, "binary"),
        }
    }
}

/// Сырые байты сообщения с определённым форматом.
///
/// Разбор никогда не падает: всё, что не JSON, остаётся текстом,
/// всё, что не UTF-8, остаётся байтами.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Payload {
    bytes: Vec<u8>,
    format: PayloadFormat,
}

impl Payload {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        let format = match std::str::from_utf8(&bytes) {
            Ok(text) if serde_json::from_str::<serde::de::IgnoredAny>(text).is_ok() => {
                PayloadFormat::Json
            }
            Ok(_) => PayloadFormat::Text,
            Err(_) => PayloadFormat::Binary,
        };
        Self { bytes, format }
    }

    pub fn format(&self) -> PayloadFormat {
        self.format
    }

    /// Текст для отображения и поиска (binary → с заменой невалидных байт).
    pub fn to_text_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.bytes)
    }

    /// Распарсить как JSON. None для text/binary.
    pub fn as_json(&self) -> Option<serde_json::Value> {
        match self.format {
            PayloadFormat::Json => serde_json::from_slice(&self.bytes).ok(),
            _ => None,
        }
    }

    pub fn contains(&self, term: &str) -> bool {
        self.to_text_lossy().contains(term)
    }
}

impl From<&str> for Payload {
    fn from(s: &str) -> Self {
        Self::from_bytes(s.as_bytes().to_vec())
    }
}

impl From<String> for Payload {
    fn from(s: String) -> Self {
        Self::from_bytes(s.into_bytes())
    }
}

impl Serialize for Payload {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let mut s = serializer.serialize_struct("Payload", 2)?;
        s.serialize_field("format", &self.format)?;
        match self.format {
            PayloadFormat::Json => {
                // Inline JSON для читаемости
                let value = self.as_json().unwrap_or(serde_json::Value::Null);
                s.serialize_field("data", &value)?;
            }
            PayloadFormat::Text => {
                s.serialize_field("data", &self.to_text_lossy())?;
            }
            PayloadFormat::Binary => {
                let encoded = base64::engine::general_purpose::STANDARD.encode(&self.bytes);
                s.serialize_field("data", &encoded)?;
            }
        }
        s.end()
    }
}

// ════════════════════════════════════════════════════════════════
//  Messages
// ════════════════════════════════════════════════════════════════

/// Сообщение, полученное от брокера.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundMessage {
    /// Полный путь topic'а, на который пришла публикация.
    pub topic: String,
    pub payload: Payload,
    /// Время приёма (Unix ms).
    pub ts_ms: i64,
}

/// Сообщение в буфере topic'а.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StoredMessage {
    pub ts_ms: i64,
    /// Полный путь topic'а (ключ агрегации теряет эту информацию).
    pub topic: String,
    pub payload: Payload,
}

// ════════════════════════════════════════════════════════════════
//  View model
// ════════════════════════════════════════════════════════════════

/// Состояние соединения с брокером.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => f.write_str("disconnected"),
            ConnectionState::Connecting => f.write_str("connecting"),
            ConnectionState::Connected => f.write_str("connected"),
        }
    }
}

/// Сводка по одному topic'у для списка в presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopicSummary {
    pub key: String,
    /// `"{key} ({message_count})"` — по нему сортируется список.
    pub label: String,
    pub message_count: u64,
    /// Сколько сообщений сейчас в буфере.
    pub buffered: usize,
    pub last_seen_ms: i64,
    pub stale: bool,
}

/// Отображаемая метка topic'а: ключ плюс счётчик.
pub fn display_label(key: &str, message_count: u64) -> String {
    format!("{key} ({message_count})")
}

/// Уведомление presentation layer'у о том, что нужно перерисовать.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ViewEvent {
    /// Новый ключ — набор topic'ов изменился.
    TopicAdded { topic: String },
    /// Новое сообщение в уже известный topic.
    TopicUpdated { topic: String, message_count: u64 },
    StalenessChanged { topic: String, stale: bool },
    /// Все буферы очищены.
    Reset,
    Connection { state: ConnectionState },
    /// Сообщение совпало с alert filter.
    Alert { topic: String, title: String, body: String },
}
