use viewer_api::{ErrorKind, ViewerError};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("config error: {0}")]
    Config(String),

    #[error("invalid subscription filter '{filter}': {reason}")]
    InvalidFilter { filter: String, reason: &'static str },

    #[error("transport error: {0}")]
    Transport(#[from] ViewerError),

    #[error("connection task is not running")]
    ConnectionClosed,
}

impl EngineError {
    /// Повтор не поможет: брокер отверг клиента.
    pub fn is_permanent(&self) -> bool {
        matches!(self, EngineError::Transport(e) if e.kind() == ErrorKind::Config)
    }
}
