use crate::render::{ConfidenceBar, LevelStyle, SpeedBar};
use serde::Serialize;

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct ErrorResponse {
    pub error_code: ErrorCode,
    pub error_message: String,
    pub timestamp: String,
}

#[derive(Debug, Serialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidBbox,
    NoViewport,
    MonitorStopped,
    InternalError,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct ViewportAcceptedResponse {
    pub bbox: String,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct RefreshAcceptedResponse {
    pub query_id: u64,
    pub bbox: String,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct StatusPanelResponse {
    pub badge: LevelStyle,
    pub alert: bool,
    pub loading: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bbox: Option<String>,
    pub body: PanelBodyResponse,
    pub timestamp: String,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PanelBodyResponse {
    Empty,
    Unavailable {
        message: String,
    },
    Report {
        speed: SpeedBar,
        confidence: ConfidenceBar,
        has_traffic: bool,
        updated_at: String,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct LegendResponse {
    pub levels: Vec<LevelStyle>,
}

#[derive(Debug, Serialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    Degraded,
    Ko,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub timestamp: String,
}
