use thiserror::Error;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected status {status}: {detail}")]
    Status { status: u16, detail: String },

    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("config error: {0}")]
    Config(String),
}

impl RemoteError {
    pub fn status(status: u16, detail: impl Into<String>) -> Self {
        Self::Status {
            status,
            detail: detail.into(),
        }
    }
}
