#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("config ({context}): {detail}")]
    Config { context: &'static str, detail: String },

    #[error("viewer: {0}")]
    Engine(#[from] viewer_engine::EngineError),

    #[error("signal: {0}")]
    Signal(#[from] std::io::Error),
}
