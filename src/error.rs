use thiserror::Error;

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("transport error: {0}")]
    Transport(Box<tokio_tungstenite::tungstenite::Error>),
    #[error("broker error: {0}")]
    Protocol(String),
    #[error("connection not established within the configured timeout")]
    ConnectTimeout,
    #[error("transport not connected")]
    NotConnected,
    #[error("malformed frame: {0}")]
    MalformedFrame(String),
    #[error("json decode error: {0}")]
    Json(#[from] simd_json::Error),
    #[error("request error: {0}")]
    Http(#[from] reqwest::Error),
}

impl From<tokio_tungstenite::tungstenite::Error> for MonitorError {
    fn from(value: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Transport(Box::new(value))
    }
}
