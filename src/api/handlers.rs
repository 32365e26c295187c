use crate::api::ApiState;
use crate::api::responses::{
    ErrorCode, ErrorResponse, HealthResponse, HealthStatus, LegendResponse, PanelBodyResponse,
    RefreshAcceptedResponse, StatusPanelResponse, ViewportAcceptedResponse,
};
use crate::error::AppError;
use crate::render::{PanelBody, Segment, legend, segment_strokes, status_panel, strokes_geojson};
use crate::state::AppState;
use crate::viewport::Viewport;
use crate::watcher::ViewportWatcher;
use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use std::sync::{Arc, RwLock};
use std::time::SystemTime;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::error;

const INTERNAL_ERROR_MESSAGE: &str = "Internal server error";
const EPOCH_TIMESTAMP: &str = "1970-01-01T00:00:00Z";

pub enum ApiResponse<T> {
    Success { status: StatusCode, body: T },
    Error {
        status: StatusCode,
        body: ErrorResponse,
    },
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        match self {
            ApiResponse::Success { status, body } => (status, Json(body)).into_response(),
            ApiResponse::Error { status, body } => (status, Json(body)).into_response(),
        }
    }
}

pub async fn post_viewport(
    State(api): State<ApiState>,
    Json(viewport): Json<Viewport>,
) -> impl IntoResponse {
    accept_viewport(&api.watcher, viewport, SystemTime::now())
}

pub async fn post_refresh(State(api): State<ApiState>) -> impl IntoResponse {
    let result = api.watcher.monitor().refresh_now().await;
    let now = SystemTime::now();
    match result {
        Ok(query) => ApiResponse::Success {
            status: StatusCode::ACCEPTED,
            body: RefreshAcceptedResponse {
                query_id: query.id,
                bbox: query.bbox.to_string(),
                timestamp: format_timestamp(now),
            },
        },
        Err(err) => error_response(&err, now),
    }
}

pub async fn get_status(State(api): State<ApiState>) -> impl IntoResponse {
    build_status_response(&api.state, SystemTime::now())
}

pub async fn get_legend() -> impl IntoResponse {
    Json(LegendResponse {
        levels: legend().to_vec(),
    })
}

pub async fn post_segments(Json(segments): Json<Vec<Segment>>) -> impl IntoResponse {
    Json(strokes_geojson(&segment_strokes(&segments)))
}

pub async fn get_health(State(api): State<ApiState>) -> impl IntoResponse {
    build_health_response(&api.state, SystemTime::now())
}

fn accept_viewport(
    watcher: &ViewportWatcher,
    viewport: Viewport,
    now: SystemTime,
) -> ApiResponse<ViewportAcceptedResponse> {
    match watcher.publish(viewport) {
        Ok(key) => ApiResponse::Success {
            status: StatusCode::ACCEPTED,
            body: ViewportAcceptedResponse {
                bbox: key.to_string(),
                timestamp: format_timestamp(now),
            },
        },
        Err(err) => error_response(&err, now),
    }
}

fn build_status_response(
    state: &Arc<RwLock<AppState>>,
    now: SystemTime,
) -> ApiResponse<StatusPanelResponse> {
    let monitor = match state.read() {
        Ok(guard) => guard.monitor().clone(),
        Err(_) => return error_response(&AppError::StateLock, now),
    };

    let panel = status_panel(monitor.status.as_ref(), monitor.loading);
    let body = match panel.body {
        PanelBody::Empty => PanelBodyResponse::Empty,
        PanelBody::Unavailable { message } => PanelBodyResponse::Unavailable {
            message: message.to_string(),
        },
        PanelBody::Report {
            speed,
            confidence,
            has_traffic,
            updated_at,
        } => PanelBodyResponse::Report {
            speed,
            confidence,
            has_traffic,
            updated_at: format_timestamp(updated_at),
        },
    };

    ApiResponse::Success {
        status: StatusCode::OK,
        body: StatusPanelResponse {
            badge: *panel.badge,
            alert: panel.alert,
            loading: panel.loading,
            provider: panel.provider,
            query_id: monitor.current_query.as_ref().map(|q| q.id),
            bbox: monitor.current_query.map(|q| q.bbox.to_string()),
            body,
            timestamp: format_timestamp(now),
        },
    }
}

fn build_health_response(
    state: &Arc<RwLock<AppState>>,
    now: SystemTime,
) -> ApiResponse<HealthResponse> {
    let (running, degraded) = match state.read() {
        Ok(guard) => (
            guard.monitor().running,
            guard.status().is_some_and(|s| s.is_error()),
        ),
        Err(_) => return error_response(&AppError::StateLock, now),
    };

    let (status_code, status) = match (running, degraded) {
        (false, _) => (StatusCode::SERVICE_UNAVAILABLE, HealthStatus::Ko),
        (true, true) => (StatusCode::OK, HealthStatus::Degraded),
        (true, false) => (StatusCode::OK, HealthStatus::Ok),
    };

    ApiResponse::Success {
        status: status_code,
        body: HealthResponse {
            status,
            timestamp: format_timestamp(now),
        },
    }
}

fn error_response<T>(err: &AppError, now: SystemTime) -> ApiResponse<T> {
    let (status, error_code, error_message) = match err {
        AppError::InvalidBoundingBox(_) => {
            (StatusCode::BAD_REQUEST, ErrorCode::InvalidBbox, err.to_string())
        }
        AppError::NoViewport => (StatusCode::CONFLICT, ErrorCode::NoViewport, err.to_string()),
        AppError::MonitorStopped => (
            StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::MonitorStopped,
            err.to_string(),
        ),
        AppError::StateLock => {
            error!(error = %err, "Internal error while handling request");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorCode::InternalError,
                INTERNAL_ERROR_MESSAGE.to_string(),
            )
        }
    };

    ApiResponse::Error {
        status,
        body: ErrorResponse {
            error_code,
            error_message,
            timestamp: format_timestamp(now),
        },
    }
}

fn format_timestamp(timestamp: SystemTime) -> String {
    OffsetDateTime::from(timestamp)
        .format(&Rfc3339)
        .unwrap_or_else(|err| {
            error!(error = %err, "Failed to format timestamp");
            EPOCH_TIMESTAMP.to_string()
        })
}
