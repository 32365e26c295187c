//! Map viewport snapshots and the bounding-box key derived from them.
//!
//! A [`BoundingBoxKey`] is both the `bbox` query parameter sent to the traffic
//! backend and the equality key the scheduler uses to skip settle events that
//! did not move the visible region.

use crate::error::AppError;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

pub const MAX_ZOOM: u8 = 24;

/// Round a fractional map zoom to the nearest level in `0..=MAX_ZOOM`.
/// Non-finite input maps to 0.
pub fn zoom_level(zoom: f64) -> u8 {
    if zoom.is_finite() {
        zoom.round().clamp(0.0, f64::from(MAX_ZOOM)) as u8
    } else {
        0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLon {
    pub lat: f64,
    pub lon: f64,
}

/// WGS84 extent of the visible map region, in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

impl BoundingBox {
    pub fn new(west: f64, south: f64, east: f64, north: f64) -> Result<Self, AppError> {
        let bbox = Self {
            west,
            south,
            east,
            north,
        };
        bbox.validate()?;
        Ok(bbox)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        let values = [self.west, self.south, self.east, self.north];
        if values.iter().any(|v| !v.is_finite()) {
            return Err(AppError::InvalidBoundingBox(
                "coordinates must be finite".to_string(),
            ));
        }
        if [self.west, self.east].iter().any(|lon| lon.abs() > 180.0) {
            return Err(AppError::InvalidBoundingBox(
                "longitude must be within [-180, 180]".to_string(),
            ));
        }
        if [self.south, self.north].iter().any(|lat| lat.abs() > 90.0) {
            return Err(AppError::InvalidBoundingBox(
                "latitude must be within [-90, 90]".to_string(),
            ));
        }
        if self.west >= self.east || self.south >= self.north {
            return Err(AppError::InvalidBoundingBox(
                "expected west < east and south < north".to_string(),
            ));
        }
        Ok(())
    }

    pub fn center(&self) -> LatLon {
        LatLon {
            lat: (self.south + self.north) / 2.0,
            lon: (self.west + self.east) / 2.0,
        }
    }

    pub fn key(&self) -> BoundingBoxKey {
        BoundingBoxKey::from_bbox(self)
    }
}

impl FromStr for BoundingBox {
    type Err = AppError;

    /// Parses `west,south,east,north`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts = s
            .split(',')
            .map(|part| part.trim().parse::<f64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| AppError::InvalidBoundingBox(format!("{s:?}: {err}")))?;

        match parts.as_slice() {
            [west, south, east, north] => Self::new(*west, *south, *east, *north),
            _ => Err(AppError::InvalidBoundingBox(format!(
                "{s:?}: expected 4 values, got {}",
                parts.len()
            ))),
        }
    }
}

/// Immutable snapshot of what the map shows once a pan or zoom settles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub center: LatLon,
    #[serde(deserialize_with = "fractional_zoom")]
    pub zoom: u8,
    pub bbox: BoundingBox,
}

// Map widgets report zoom as a float, e.g. 13.47.
fn fractional_zoom<'de, D>(deserializer: D) -> Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    f64::deserialize(deserializer).map(zoom_level)
}

impl Viewport {
    pub fn key(&self) -> BoundingBoxKey {
        BoundingBoxKey::from_viewport(self)
    }
}

/// Canonical `west,south,east,north` string for a bounding box.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct BoundingBoxKey(String);

impl BoundingBoxKey {
    pub fn from_viewport(viewport: &Viewport) -> Self {
        Self::from_bbox(&viewport.bbox)
    }

    pub fn from_bbox(bbox: &BoundingBox) -> Self {
        Self(format!(
            "{},{},{},{}",
            canonical(bbox.west),
            canonical(bbox.south),
            canonical(bbox.east),
            canonical(bbox.north)
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BoundingBoxKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// -0.0 and 0.0 must produce the same key.
fn canonical(value: f64) -> f64 {
    value + 0.0
}
