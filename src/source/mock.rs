use crate::classifier::RawTrafficStatus;
use crate::source::{FetchError, TrafficSource};
use crate::viewport::BoundingBoxKey;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

/// One scripted answer: how long the call takes and what it returns.
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub delay: Duration,
    pub result: Result<RawTrafficStatus, String>,
}

impl MockResponse {
    pub fn ok(payload: RawTrafficStatus) -> Self {
        Self {
            delay: Duration::ZERO,
            result: Ok(payload),
        }
    }

    pub fn fail(message: &str) -> Self {
        Self {
            delay: Duration::ZERO,
            result: Err(message.to_string()),
        }
    }

    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// Replays scripted responses in call order and records every requested bbox.
/// Once the script runs out, calls succeed immediately with an empty payload.
#[derive(Debug, Default)]
pub struct MockTrafficSource {
    script: Mutex<VecDeque<MockResponse>>,
    calls: Mutex<Vec<BoundingBoxKey>>,
}

impl MockTrafficSource {
    pub fn new(script: Vec<MockResponse>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<BoundingBoxKey> {
        self.calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    fn next_response(&self, bbox: &BoundingBoxKey) -> MockResponse {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(bbox.clone());
        }
        self.script
            .lock()
            .ok()
            .and_then(|mut script| script.pop_front())
            .unwrap_or_else(|| MockResponse::ok(RawTrafficStatus::default()))
    }
}

impl TrafficSource for MockTrafficSource {
    async fn fetch_status(&self, bbox: &BoundingBoxKey) -> Result<RawTrafficStatus, FetchError> {
        let response = self.next_response(bbox);
        if !response.delay.is_zero() {
            tokio::time::sleep(response.delay).await;
        }
        response.result.map_err(FetchError::Unavailable)
    }
}
