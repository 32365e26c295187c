use crate::classifier::RawTrafficStatus;
use crate::viewport::BoundingBoxKey;
use std::future::Future;
use thiserror::Error;

pub mod http;
pub mod mock;

pub const STATUS_PATH: &str = "/api/v1/traffic/status";

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// Non-2xx answer; the message is taken from the response body.
    #[error("{message}")]
    Status { code: u16, message: String },
    #[error("invalid traffic payload: {0}")]
    Decode(String),
    #[error("{0}")]
    Unavailable(String),
}

/// Network call that returns traffic conditions for a bounding box.
pub trait TrafficSource: Send + Sync + 'static {
    fn fetch_status(
        &self,
        bbox: &BoundingBoxKey,
    ) -> impl Future<Output = Result<RawTrafficStatus, FetchError>> + Send;
}
