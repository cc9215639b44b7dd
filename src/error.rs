use thiserror::Error;

/// Failure of a single poll or stream session. Always transient: callers
/// log it, keep their previous state and retry on their own cadence.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP status {status}: {body}")]
    HttpStatus {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("timed out: {0}")]
    Timeout(&'static str),

    #[error("malformed payload: {0}")]
    Malformed(String),

    #[error("stream closed by peer")]
    Closed,
}

pub type FeedResult<T> = Result<T, FeedError>;

/// Reject non-2xx responses, keeping the body for the log line.
pub async fn check_status(resp: reqwest::Response) -> FeedResult<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(FeedError::HttpStatus { status, body })
}
