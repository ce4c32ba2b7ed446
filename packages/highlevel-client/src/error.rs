use thiserror::Error;

#[derive(Debug, Error)]
pub enum HighLevelError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid client configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, HighLevelError>;
