use thiserror::Error;

/// Main error type for the scalping engine.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Exchange rejected request: {0}")]
    Exchange(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl EngineError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::Connection(_) | EngineError::RateLimit(_) | EngineError::WebSocket(_)
        )
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            EngineError::Connection("Request timeout".to_string())
        } else if err.is_connect() {
            EngineError::Connection("Failed to connect to exchange API".to_string())
        } else if let Some(status) = err.status() {
            match status.as_u16() {
                429 => EngineError::RateLimit(
                    "Too many requests. Back off before retrying.".to_string(),
                ),
                418 => EngineError::Connection("IP address banned by exchange".to_string()),
                403 => EngineError::Connection("WAF limit violated".to_string()),
                500..=599 => EngineError::Connection(format!(
                    "Exchange server error (HTTP {})",
                    status.as_u16()
                )),
                _ => EngineError::Exchange(format!("HTTP error: {}", status)),
            }
        } else {
            EngineError::Connection(err.to_string())
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Parse(format!("JSON parsing failed: {}", err))
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for EngineError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        EngineError::WebSocket(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
