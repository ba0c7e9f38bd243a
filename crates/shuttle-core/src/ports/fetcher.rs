//! Fetcher port. HTTP details live outside the engine.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{Request, Response};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("fetch of {url} timed out")]
    Timeout { url: String },

    #[error("fetch of {url} failed: {reason}")]
    Failed { url: String, reason: String },
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &Request) -> Result<Response, FetchError>;
}
