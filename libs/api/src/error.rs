/// Category of a transport error. The connection manager retries `Io`
/// and gives up on `Config`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Broker rejected the client (credentials, protocol). Permanent.
    Config,
    /// Network error or connection loss. Transient, reconnect.
    Io,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Config => f.write_str("config"),
            ErrorKind::Io => f.write_str("io"),
        }
    }
}

/// Error type for transport implementations: `ErrorKind` plus a
/// human-readable message.
#[derive(Clone, thiserror::Error)]
#[error("{message}")]
pub struct ViewerError {
    kind: ErrorKind,
    message: String,
}

impl ViewerError {
    /// Permanent error, retrying will not help.
    pub fn config(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Config, message: msg.into() }
    }

    /// Transient I/O error, may retry.
    pub fn io(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Io, message: msg.into() }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

impl std::fmt::Debug for ViewerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}
