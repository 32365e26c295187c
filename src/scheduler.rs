//! Debounced, cancellable scheduling of traffic queries.
//!
//! The monitor runs as a single tokio task that owns the debounce timer and
//! the query sequence. Viewport settle events reset the timer; when it fires,
//! or on an explicit refresh, a new [`TrafficQuery`] becomes current and its
//! network call is spawned. Responses come back through a channel and are
//! applied only if they belong to the current query, so a slow response to a
//! superseded query can never overwrite a newer result.

use crate::classifier::{Classifier, RawTrafficStatus, TrafficStatus};
use crate::error::AppError;
use crate::source::{FetchError, TrafficSource};
use crate::state::{AppState, QueryId, TrafficQuery};
use crate::viewport::BoundingBoxKey;
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime};
use tokio::sync::{mpsc, oneshot};
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, warn};

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

#[derive(Debug)]
enum Command {
    Settled(BoundingBoxKey),
    Refresh(oneshot::Sender<Result<TrafficQuery, AppError>>),
    Stop,
}

#[derive(Debug)]
struct Completion {
    query_id: QueryId,
    bbox: BoundingBoxKey,
    result: Result<RawTrafficStatus, FetchError>,
}

/// Cloneable front end to a running monitor task.
#[derive(Debug, Clone)]
pub struct MonitorHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl MonitorHandle {
    /// Restart the debounce timer for `key`. A key equal to the last settled
    /// one is ignored.
    pub fn on_viewport_settled(&self, key: BoundingBoxKey) -> Result<(), AppError> {
        self.commands
            .send(Command::Settled(key))
            .map_err(|_| AppError::MonitorStopped)
    }

    /// Cancel any pending timer and query the last known bbox right away.
    pub async fn refresh_now(&self) -> Result<TrafficQuery, AppError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(Command::Refresh(reply_tx))
            .map_err(|_| AppError::MonitorStopped)?;
        reply_rx.await.map_err(|_| AppError::MonitorStopped)?
    }

    /// Cancel the pending timer and ignore any response still in flight.
    pub fn stop(&self) {
        let _ = self.commands.send(Command::Stop);
    }

    pub fn is_stopped(&self) -> bool {
        self.commands.is_closed()
    }
}

pub fn spawn_monitor<S>(
    source: Arc<S>,
    classifier: Classifier,
    debounce: Duration,
    state: Arc<RwLock<AppState>>,
) -> (MonitorHandle, JoinHandle<()>)
where
    S: TrafficSource,
{
    let (commands_tx, commands_rx) = mpsc::unbounded_channel();
    let (completions_tx, completions_rx) = mpsc::unbounded_channel();

    let monitor = Monitor {
        source,
        classifier,
        debounce,
        state,
        last_key: None,
        deadline: None,
        next_id: 0,
        current_id: None,
        in_flight: None,
        completions: completions_tx,
    };

    info!(debounce_ms = debounce.as_millis(), "Starting traffic monitor");
    let task = tokio::spawn(monitor.run(commands_rx, completions_rx));
    (
        MonitorHandle {
            commands: commands_tx,
        },
        task,
    )
}

struct Monitor<S> {
    source: Arc<S>,
    classifier: Classifier,
    debounce: Duration,
    state: Arc<RwLock<AppState>>,
    last_key: Option<BoundingBoxKey>,
    deadline: Option<Instant>,
    next_id: QueryId,
    current_id: Option<QueryId>,
    /// Fetch task of the current query. Superseded fetches run to completion.
    in_flight: Option<AbortHandle>,
    completions: mpsc::UnboundedSender<Completion>,
}

impl<S: TrafficSource> Monitor<S> {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut completions: mpsc::UnboundedReceiver<Completion>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Settled(key)) => self.on_viewport_settled(key),
                    Some(Command::Refresh(reply)) => {
                        let _ = reply.send(self.refresh_now());
                    }
                    Some(Command::Stop) | None => break,
                },
                () = wait_until(self.deadline) => {
                    self.deadline = None;
                    if let Some(key) = self.last_key.clone() {
                        self.issue(key);
                    }
                }
                Some(completion) = completions.recv() => self.apply(completion),
            }
        }
        self.stop();
    }

    fn on_viewport_settled(&mut self, key: BoundingBoxKey) {
        if self.last_key.as_ref() == Some(&key) {
            debug!(bbox = %key, "Viewport settled on unchanged bbox, skipping");
            return;
        }
        if self.deadline.is_some() {
            debug!(bbox = %key, "Coalescing viewport change into pending query");
        }
        self.last_key = Some(key);
        self.deadline = Some(Instant::now() + self.debounce);
    }

    fn refresh_now(&mut self) -> Result<TrafficQuery, AppError> {
        let key = self.last_key.clone().ok_or(AppError::NoViewport)?;
        self.deadline = None;
        Ok(self.issue(key))
    }

    fn issue(&mut self, bbox: BoundingBoxKey) -> TrafficQuery {
        self.next_id += 1;
        let query = TrafficQuery {
            id: self.next_id,
            bbox,
            issued_at: SystemTime::now(),
        };
        self.current_id = Some(query.id);

        match self.state.write() {
            Ok(mut guard) => guard.begin_query(query.clone()),
            Err(_) => warn!(query_id = query.id, "State lock poisoned while starting query"),
        }
        info!(query_id = query.id, bbox = %query.bbox, "Issuing traffic query");

        let source = Arc::clone(&self.source);
        let completions = self.completions.clone();
        let query_id = query.id;
        let bbox = query.bbox.clone();
        let fetch = tokio::spawn(async move {
            let result = source.fetch_status(&bbox).await;
            // The monitor may have stopped; the result is ignorable then.
            let _ = completions.send(Completion {
                query_id,
                bbox,
                result,
            });
        });
        self.in_flight = Some(fetch.abort_handle());

        query
    }

    fn apply(&mut self, completion: Completion) {
        if self.current_id != Some(completion.query_id) {
            debug!(
                query_id = completion.query_id,
                current = ?self.current_id,
                "Discarding stale traffic response"
            );
            return;
        }
        self.in_flight = None;

        let now = SystemTime::now();
        let status = match completion.result {
            Ok(raw) => {
                let report = self.classifier.classify(&raw, now);
                info!(
                    query_id = completion.query_id,
                    level = %report.congestion_level,
                    level_source = ?report.level_source,
                    speed_ratio = report.speed_ratio,
                    "Traffic status updated"
                );
                TrafficStatus::Ok(report)
            }
            Err(err) => {
                warn!(
                    query_id = completion.query_id,
                    bbox = %completion.bbox,
                    error = %err,
                    "Traffic status request failed"
                );
                TrafficStatus::error(err.to_string(), now)
            }
        };

        match self.state.write() {
            Ok(mut guard) => {
                guard.accept_status(completion.query_id, status);
            }
            Err(_) => warn!(
                query_id = completion.query_id,
                "State lock poisoned while applying traffic status"
            ),
        }
    }

    fn stop(&mut self) {
        self.deadline = None;
        self.current_id = None;
        if let Some(fetch) = self.in_flight.take() {
            debug!("Aborting in-flight traffic query");
            fetch.abort();
        }
        match self.state.write() {
            Ok(mut guard) => guard.mark_stopped(),
            Err(_) => warn!("State lock poisoned while stopping monitor"),
        }
        info!("Traffic monitor stopped");
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::CongestionLevel;
    use crate::source::mock::{MockResponse, MockTrafficSource};
    use crate::state::MonitorSnapshot;
    use crate::viewport::BoundingBox;
    use tokio::time::sleep;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn key(west: f64) -> BoundingBoxKey {
        BoundingBox::new(west, -1.0, west + 0.2, -0.9)
            .expect("valid bbox")
            .key()
    }

    fn payload(level: &str, current: f64, free_flow: f64) -> RawTrafficStatus {
        RawTrafficStatus {
            provider: Some("tomtom".to_string()),
            current_speed: Some(current),
            free_flow_speed: Some(free_flow),
            confidence: Some(0.9),
            has_traffic: None,
            congestion_level: Some(level.to_string()),
        }
    }

    fn start(
        script: Vec<MockResponse>,
    ) -> (
        Arc<MockTrafficSource>,
        Arc<RwLock<AppState>>,
        MonitorHandle,
        JoinHandle<()>,
    ) {
        let source = Arc::new(MockTrafficSource::new(script));
        let state = Arc::new(RwLock::new(AppState::new()));
        let (handle, task) = spawn_monitor(
            Arc::clone(&source),
            Classifier::default(),
            DEFAULT_DEBOUNCE,
            Arc::clone(&state),
        );
        (source, state, handle, task)
    }

    fn snapshot(state: &Arc<RwLock<AppState>>) -> MonitorSnapshot {
        state.read().expect("state lock").monitor().clone()
    }

    #[tokio::test(start_paused = true)]
    async fn burst_of_settles_issues_one_query_for_last_bbox() -> TestResult {
        let (source, _state, handle, _task) = start(Vec::new());
        let keys: Vec<_> = (0..5).map(|i| key(-80.8 + f64::from(i) * 0.01)).collect();

        for k in &keys {
            handle.on_viewport_settled(k.clone())?;
            sleep(Duration::from_millis(100)).await;
        }
        assert!(source.calls().is_empty());

        sleep(Duration::from_millis(450)).await;

        assert_eq!(source.calls(), vec![keys[4].clone()]);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn late_response_for_superseded_query_is_dropped() -> TestResult {
        let (source, state, handle, _task) = start(vec![
            MockResponse::ok(payload("free", 48.0, 50.0)).after(Duration::from_millis(1000)),
            MockResponse::ok(payload("severe", 10.0, 50.0)).after(Duration::from_millis(50)),
        ]);

        handle.on_viewport_settled(key(-80.8))?;
        sleep(Duration::from_millis(600)).await;
        handle.on_viewport_settled(key(-80.7))?;
        sleep(Duration::from_millis(600)).await;

        let current = snapshot(&state);
        assert_eq!(current.current_query.as_ref().map(|q| q.id), Some(2));
        assert_eq!(
            current.status.as_ref().and_then(TrafficStatus::congestion_level),
            Some(CongestionLevel::Severe)
        );

        // query 1 resolves here, after query 2
        sleep(Duration::from_millis(800)).await;

        let after = snapshot(&state);
        assert_eq!(source.calls().len(), 2);
        assert_eq!(
            after.status.as_ref().and_then(TrafficStatus::congestion_level),
            Some(CongestionLevel::Severe)
        );
        assert!(!after.loading);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_bypasses_debounce_and_cancels_timer() -> TestResult {
        let (source, _state, handle, _task) = start(Vec::new());
        let k = key(-80.8);

        handle.on_viewport_settled(k.clone())?;
        sleep(Duration::from_millis(100)).await;
        let query = handle.refresh_now().await?;
        sleep(Duration::from_millis(1)).await;

        assert_eq!(query.id, 1);
        assert_eq!(query.bbox, k);
        assert_eq!(source.calls(), vec![k.clone()]);

        sleep(Duration::from_secs(2)).await;
        assert_eq!(source.calls(), vec![k]);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_without_viewport_is_rejected() {
        let (source, _state, handle, _task) = start(Vec::new());

        let result = handle.refresh_now().await;

        assert!(matches!(result, Err(AppError::NoViewport)));
        assert!(source.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn unchanged_bbox_does_not_schedule_again() -> TestResult {
        let (source, _state, handle, _task) = start(Vec::new());
        let k = key(-80.8);

        // move-end and zoom-end both fire for one gesture
        handle.on_viewport_settled(k.clone())?;
        handle.on_viewport_settled(k.clone())?;
        sleep(Duration::from_millis(600)).await;
        assert_eq!(source.calls().len(), 1);

        handle.on_viewport_settled(k)?;
        sleep(Duration::from_millis(600)).await;
        assert_eq!(source.calls().len(), 1);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn failure_replaces_success_and_is_not_retried() -> TestResult {
        let (source, state, handle, _task) = start(vec![
            MockResponse::ok(payload("heavy", 15.0, 50.0)),
            MockResponse::fail("HTTP 502"),
        ]);

        handle.on_viewport_settled(key(-80.8))?;
        sleep(Duration::from_millis(600)).await;
        assert_eq!(
            snapshot(&state)
                .status
                .as_ref()
                .and_then(TrafficStatus::congestion_level),
            Some(CongestionLevel::Heavy)
        );

        handle.refresh_now().await?;
        sleep(Duration::from_millis(10)).await;

        match snapshot(&state).status {
            Some(TrafficStatus::Error { message, .. }) => assert_eq!(message, "HTTP 502"),
            other => panic!("expected error status, got {other:?}"),
        }

        sleep(Duration::from_secs(5)).await;
        assert_eq!(source.calls().len(), 2);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancels_pending_timer() -> TestResult {
        let (source, state, handle, task) = start(Vec::new());

        handle.on_viewport_settled(key(-80.8))?;
        sleep(Duration::from_millis(100)).await;
        handle.stop();
        task.await?;
        sleep(Duration::from_secs(1)).await;

        assert!(source.calls().is_empty());
        assert!(!snapshot(&state).running);
        assert!(handle.is_stopped());
        assert!(matches!(
            handle.on_viewport_settled(key(-80.7)),
            Err(AppError::MonitorStopped)
        ));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn stop_ignores_in_flight_response() -> TestResult {
        let (source, state, handle, task) = start(vec![
            MockResponse::ok(payload("heavy", 15.0, 50.0)).after(Duration::from_millis(300)),
        ]);

        handle.on_viewport_settled(key(-80.8))?;
        sleep(Duration::from_millis(600)).await;
        assert_eq!(source.calls().len(), 1);
        handle.stop();
        task.await?;
        sleep(Duration::from_secs(1)).await;

        let current = snapshot(&state);
        assert_eq!(current.status, None);
        assert!(!current.loading);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn stop_aborts_hung_fetch() -> TestResult {
        let (source, _state, handle, task) = start(vec![
            MockResponse::ok(payload("heavy", 15.0, 50.0)).after(Duration::from_secs(3600)),
        ]);

        handle.on_viewport_settled(key(-80.8))?;
        sleep(Duration::from_millis(600)).await;
        assert_eq!(source.calls().len(), 1);
        // the fetch task holds its own clone of the source
        assert!(Arc::strong_count(&source) > 2);

        handle.stop();
        task.await?;
        sleep(Duration::from_millis(1)).await;

        assert_eq!(Arc::strong_count(&source), 1);
        Ok(())
    }
}
