use thiserror::Error;

/// Errors produced by the WebVerse protocol layer.
#[derive(Debug, Error)]
pub enum WebVerseError {
    #[error("codec error: {0}")]
    Codec(String),

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("tls error: {0}")]
    Tls(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for WebVerseError {
    fn from(e: serde_json::Error) -> Self {
        WebVerseError::Codec(e.to_string())
    }
}

pub type WebVerseResult<T> = Result<T, WebVerseError>;
