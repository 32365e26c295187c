use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid bounding box: {0}")]
    InvalidBoundingBox(String),
    #[error("no viewport received yet")]
    NoViewport,
    #[error("traffic monitor stopped")]
    MonitorStopped,
    #[error("state lock poisoned")]
    StateLock,
}
