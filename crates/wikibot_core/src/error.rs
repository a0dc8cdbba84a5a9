use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type WikiResult<T> = std::result::Result<T, WikiError>;

/// Faults raised by the client. Expected API failures are not faults: they
/// travel inside [`crate::response::ApiResponse`] instead.
#[derive(Error, Debug)]
pub enum WikiError {
    #[error("MediaWiki API request failed with HTTP {status} after {attempts} attempts")]
    Transport { status: u16, attempts: usize },

    #[error("failed to call MediaWiki API")]
    Http(#[from] reqwest::Error),

    #[error("failed to decode MediaWiki API response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("MediaWiki API error [{}]: {}", .0.code, .0.info)]
    Api(ApiError),

    #[error("csrf token still rejected after {attempts} attempts")]
    TokenRetriesExhausted { attempts: usize },

    #[error("page cache failure: {0}")]
    Cache(#[from] rusqlite::Error),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),
}

/// A server-reported `{code, info}` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    pub code: String,
    #[serde(default)]
    pub info: String,
}

impl ApiError {
    pub fn new(code: impl Into<String>, info: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            info: info.into(),
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.info)
    }
}
