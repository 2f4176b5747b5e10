use std::num::NonZeroUsize;
use std::time::Duration;

use serde::Deserialize;

use crate::error::EngineError;

// ═══════════════════════════════════════════════════════════════
//  ConnectionConfig
// ═══════════════════════════════════════════════════════════════

/// Политика соединения с брокером.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionConfig {
    /// Префикс случайного client id (`web_` + 8 hex).
    #[serde(default = "default_client_id_prefix")]
    pub client_id_prefix: String,
    /// Фиксированная пауза перед повторным подключением.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Сколько неудачных попыток подряд допускается. None — без ограничения.
    #[serde(default)]
    pub max_retries: Option<u32>,
    /// Размер канала входящих сообщений (connection → dispatcher).
    #[serde(default = "default_message_buffer")]
    pub message_buffer: usize,
}

fn default_client_id_prefix() -> String {
    "web_".to_string()
}
fn default_retry_delay_ms() -> u64 {
    5_000
}
fn default_message_buffer() -> usize {
    1024
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            client_id_prefix: default_client_id_prefix(),
            retry_delay_ms: default_retry_delay_ms(),
            max_retries: None,
            message_buffer: default_message_buffer(),
        }
    }
}

impl ConnectionConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.retry_delay_ms == 0 {
            return Err(EngineError::Config("retry_delay_ms must be > 0".into()));
        }
        if self.message_buffer == 0 {
            return Err(EngineError::Config("message_buffer must be > 0".into()));
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════
//  ViewerConfig
// ═══════════════════════════════════════════════════════════════

/// Настройки viewer'а. Все варианты поведения (размер буфера, окно
/// staleness, уведомления, depth filter) задаются здесь.
#[derive(Debug, Clone, Deserialize)]
pub struct ViewerConfig {
    /// Subscription filter, на который подписываемся при старте.
    #[serde(default)]
    pub filter: Option<String>,
    /// Максимум сообщений в буфере одного topic'а.
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
    /// Topic без сообщений дольше этого окна помечается stale.
    #[serde(default = "default_stale_threshold_ms")]
    pub stale_threshold_ms: u64,
    /// Разрешены ли пользовательские уведомления.
    #[serde(default = "default_true")]
    pub notifications: bool,
    /// Отбрасывать сообщения глубже `#`-фильтра.
    #[serde(default = "default_true")]
    pub depth_filter: bool,
    /// Очищать все буферы и переподписываться при смене capacity.
    #[serde(default = "default_true")]
    pub reset_on_capacity_change: bool,
    /// Начальный alert filter.
    #[serde(default)]
    pub alert_filter: Option<String>,
    /// Ёмкость broadcast канала событий для presentation layer.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

fn default_capacity() -> usize {
    100
}
fn default_sweep_interval_ms() -> u64 {
    60_000
}
fn default_stale_threshold_ms() -> u64 {
    180_000
}
fn default_true() -> bool {
    true
}
fn default_event_buffer() -> usize {
    256
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            filter: None,
            capacity: default_capacity(),
            sweep_interval_ms: default_sweep_interval_ms(),
            stale_threshold_ms: default_stale_threshold_ms(),
            notifications: true,
            depth_filter: true,
            reset_on_capacity_change: true,
            alert_filter: None,
            event_buffer: default_event_buffer(),
        }
    }
}

impl ViewerConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        capacity_from(self.capacity)?;
        if self.sweep_interval_ms == 0 {
            return Err(EngineError::Config("sweep_interval_ms must be > 0".into()));
        }
        if self.event_buffer == 0 {
            return Err(EngineError::Config("event_buffer must be > 0".into()));
        }
        Ok(())
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

/// Capacity должна быть положительной.
pub fn capacity_from(capacity: usize) -> Result<NonZeroUsize, EngineError> {
    NonZeroUsize::new(capacity)
        .ok_or_else(|| EngineError::Config("capacity must be a positive integer".into()))
}
