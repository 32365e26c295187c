use crate::classifier::TrafficStatus;
use crate::viewport::{BoundingBoxKey, Viewport};
use std::time::SystemTime;
use tokio::sync::watch;

pub type QueryId = u64;

/// One issued traffic request. Only the current query may update the status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrafficQuery {
    pub id: QueryId,
    pub bbox: BoundingBoxKey,
    pub issued_at: SystemTime,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MonitorSnapshot {
    pub running: bool,
    pub current_query: Option<TrafficQuery>,
    pub loading: bool,
    pub status: Option<TrafficStatus>,
}

impl MonitorSnapshot {
    fn new() -> Self {
        Self {
            running: true,
            current_query: None,
            loading: false,
            status: None,
        }
    }
}

#[derive(Debug)]
pub struct AppState {
    viewport: Option<Viewport>,
    monitor: MonitorSnapshot,
    monitor_tx: watch::Sender<MonitorSnapshot>,
}

impl AppState {
    pub fn new() -> Self {
        let monitor = MonitorSnapshot::new();
        let (monitor_tx, _monitor_rx) = watch::channel(monitor.clone());
        Self {
            viewport: None,
            monitor,
            monitor_tx,
        }
    }

    pub fn viewport(&self) -> Option<&Viewport> {
        self.viewport.as_ref()
    }

    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = Some(viewport);
    }

    pub fn monitor(&self) -> &MonitorSnapshot {
        &self.monitor
    }

    pub fn status(&self) -> Option<&TrafficStatus> {
        self.monitor.status.as_ref()
    }

    pub fn subscribe_monitor(&self) -> watch::Receiver<MonitorSnapshot> {
        self.monitor_tx.subscribe()
    }

    /// Make `query` the current one. The previous status stays visible until
    /// the new query's result is accepted.
    pub fn begin_query(&mut self, query: TrafficQuery) {
        self.monitor.current_query = Some(query);
        self.monitor.loading = true;
        self.publish();
    }

    /// Replace the status with `status` if `query_id` is still current.
    /// Returns `false` when the result is stale and was dropped.
    pub fn accept_status(&mut self, query_id: QueryId, status: TrafficStatus) -> bool {
        let is_current = self.monitor.running
            && self
                .monitor
                .current_query
                .as_ref()
                .is_some_and(|query| query.id == query_id);
        if !is_current {
            return false;
        }

        self.monitor.status = Some(status);
        self.monitor.loading = false;
        self.publish();
        true
    }

    pub fn mark_stopped(&mut self) {
        self.monitor.running = false;
        self.monitor.loading = false;
        self.publish();
    }

    // Subscribers may come and go; the snapshot is kept either way.
    fn publish(&self) {
        self.monitor_tx.send_replace(self.monitor.clone());
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}
