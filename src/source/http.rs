use crate::classifier::RawTrafficStatus;
use crate::config::normalize_backend_url;
use crate::source::{FetchError, STATUS_PATH, TrafficSource};
use crate::viewport::BoundingBoxKey;
use reqwest::Client;
use std::fmt;
use std::time::Duration;
use tracing::debug;

/// Queries `GET {backend}/api/v1/traffic/status?bbox=w,s,e,n`.
pub struct HttpTrafficSource {
    client: Client,
    endpoint: String,
}

impl HttpTrafficSource {
    pub fn new(backend_url: &str, timeout: Option<Duration>) -> Result<Self, FetchError> {
        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build()?;
        let endpoint = format!("{}{STATUS_PATH}", normalize_backend_url(Some(backend_url)));
        Ok(Self { client, endpoint })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl fmt::Debug for HttpTrafficSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpTrafficSource")
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

impl TrafficSource for HttpTrafficSource {
    async fn fetch_status(&self, bbox: &BoundingBoxKey) -> Result<RawTrafficStatus, FetchError> {
        debug!(endpoint = %self.endpoint, bbox = %bbox, "Requesting traffic status");
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("bbox", bbox.as_str())])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(FetchError::Status {
                code: status.as_u16(),
                message: error_message(status.as_u16(), &body),
            });
        }

        serde_json::from_str(&body).map_err(|err| FetchError::Decode(err.to_string()))
    }
}

/// Human-readable message for a failed response: the JSON `detail`, `error`
/// or `message` field when present, else the raw body, else `HTTP <code>`.
fn error_message(code: u16, body: &str) -> String {
    let trimmed = body.trim();
    if let Ok(serde_json::Value::Object(map)) = serde_json::from_str::<serde_json::Value>(trimmed) {
        for field in ["detail", "error", "message"] {
            if let Some(serde_json::Value::String(text)) = map.get(field)
                && !text.trim().is_empty()
            {
                return text.clone();
            }
        }
    }
    if trimmed.is_empty() {
        format!("HTTP {code}")
    } else {
        trimmed.to_string()
    }
}
