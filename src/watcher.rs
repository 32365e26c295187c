use crate::error::AppError;
use crate::scheduler::MonitorHandle;
use crate::state::AppState;
use crate::viewport::{BoundingBox, BoundingBoxKey, LatLon, Viewport, zoom_level};
use std::sync::{Arc, RwLock};
use tracing::debug;

/// Read side of the map widget. The monitor never moves the camera.
pub trait MapView {
    fn center(&self) -> LatLon;
    fn zoom(&self) -> f64;
    fn bounds(&self) -> BoundingBox;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapEvent {
    MoveEnd,
    ZoomEnd,
}

/// Take an immutable snapshot of what `map` currently shows.
pub fn snapshot<M: MapView + ?Sized>(map: &M) -> Viewport {
    Viewport {
        center: map.center(),
        zoom: zoom_level(map.zoom()),
        bbox: map.bounds(),
    }
}

/// Forwards settled viewports to the monitor and remembers the latest one.
#[derive(Debug, Clone)]
pub struct ViewportWatcher {
    monitor: MonitorHandle,
    state: Arc<RwLock<AppState>>,
}

impl ViewportWatcher {
    pub fn new(monitor: MonitorHandle, state: Arc<RwLock<AppState>>) -> Self {
        Self { monitor, state }
    }

    pub fn handle_event<M: MapView + ?Sized>(
        &self,
        map: &M,
        event: MapEvent,
    ) -> Result<BoundingBoxKey, AppError> {
        debug!(?event, "Map event received");
        self.publish(snapshot(map))
    }

    pub fn publish(&self, viewport: Viewport) -> Result<BoundingBoxKey, AppError> {
        viewport.bbox.validate()?;
        let key = viewport.key();
        {
            let mut guard = self.state.write().map_err(|_| AppError::StateLock)?;
            guard.set_viewport(viewport);
        }
        self.monitor.on_viewport_settled(key.clone())?;
        Ok(key)
    }

    pub fn monitor(&self) -> &MonitorHandle {
        &self.monitor
    }
}
