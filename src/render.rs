//! Presentation model for congestion levels.
//!
//! One style table drives both the status panel and the map polylines, so the
//! two surfaces always agree on what a level looks like.

use crate::classifier::{CongestionLevel, TrafficStatus};
use crate::viewport::LatLon;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Value, json};
use std::time::SystemTime;

pub const UNAVAILABLE_MESSAGE: &str = "No se pudo obtener el tráfico actual.";
pub const CONFIDENCE_COLOR: &str = "#C8102E";
pub const SEGMENT_WIDTH: f64 = 5.0;
pub const SEGMENT_OPACITY: f64 = 0.85;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LevelStyle {
    pub level: Option<CongestionLevel>,
    pub label: &'static str,
    pub fill_color: &'static str,
    pub text_color: &'static str,
}

static LEVEL_STYLES: [LevelStyle; 4] = [
    LevelStyle {
        level: Some(CongestionLevel::Free),
        label: "Fluido",
        fill_color: "#22c55e",
        text_color: "#15803d",
    },
    LevelStyle {
        level: Some(CongestionLevel::Moderate),
        label: "Moderado",
        fill_color: "#eab308",
        text_color: "#a16207",
    },
    LevelStyle {
        level: Some(CongestionLevel::Heavy),
        label: "Pesado",
        fill_color: "#f97316",
        text_color: "#c2410c",
    },
    LevelStyle {
        level: Some(CongestionLevel::Severe),
        label: "Severo",
        fill_color: "#dc2626",
        text_color: "#b91c1c",
    },
];

static FALLBACK_STYLE: LevelStyle = LevelStyle {
    level: None,
    label: "N/D",
    fill_color: "#888888",
    text_color: "#374151",
};

pub fn style_for(level: Option<CongestionLevel>) -> &'static LevelStyle {
    match level {
        Some(CongestionLevel::Free) => &LEVEL_STYLES[0],
        Some(CongestionLevel::Moderate) => &LEVEL_STYLES[1],
        Some(CongestionLevel::Heavy) => &LEVEL_STYLES[2],
        Some(CongestionLevel::Severe) => &LEVEL_STYLES[3],
        None => &FALLBACK_STYLE,
    }
}

/// Same as [`style_for`] for a level name as received from the wire.
pub fn style_for_name(name: &str) -> &'static LevelStyle {
    style_for(CongestionLevel::parse(name))
}

/// Legend entries, ordered from free to severe.
pub fn legend() -> &'static [LevelStyle] {
    &LEVEL_STYLES
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpeedBar {
    pub current_kmh: Option<f64>,
    pub free_flow_kmh: Option<f64>,
    pub percent: u8,
    pub color: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfidenceBar {
    pub percent: u8,
    pub color: &'static str,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PanelBody {
    /// Nothing accepted yet
    Empty,
    Unavailable { message: &'static str },
    Report {
        speed: SpeedBar,
        confidence: ConfidenceBar,
        has_traffic: bool,
        updated_at: SystemTime,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatusPanel {
    pub badge: &'static LevelStyle,
    pub provider: Option<String>,
    /// Pulsing emphasis, shown while the level is severe
    pub alert: bool,
    pub loading: bool,
    pub body: PanelBody,
}

pub fn status_panel(status: Option<&TrafficStatus>, loading: bool) -> StatusPanel {
    let badge = style_for(status.and_then(TrafficStatus::known_level));
    let alert = badge.level == Some(CongestionLevel::Severe);

    let (provider, body) = match status {
        None => (None, PanelBody::Empty),
        Some(TrafficStatus::Error { .. }) => (
            None,
            PanelBody::Unavailable {
                message: UNAVAILABLE_MESSAGE,
            },
        ),
        Some(TrafficStatus::Ok(report)) => (
            Some(report.provider.clone()),
            PanelBody::Report {
                speed: SpeedBar {
                    current_kmh: report.current_speed,
                    free_flow_kmh: report.free_flow_speed,
                    percent: report.speed_percent(),
                    color: badge.fill_color,
                },
                confidence: ConfidenceBar {
                    percent: report.confidence_percent,
                    color: CONFIDENCE_COLOR,
                },
                has_traffic: report.has_traffic,
                updated_at: report.updated_at,
            },
        ),
    };

    StatusPanel {
        badge,
        provider,
        alert,
        loading,
        body,
    }
}

/// A route piece computed upstream, colored here by its level.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Segment {
    pub coordinates: Vec<LatLon>,
    #[serde(default, deserialize_with = "lenient_level")]
    pub level: Option<CongestionLevel>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SegmentStroke {
    pub coordinates: Vec<LatLon>,
    pub label: &'static str,
    pub color: &'static str,
    pub width: f64,
    pub opacity: f64,
}

pub fn segment_strokes(segments: &[Segment]) -> Vec<SegmentStroke> {
    segments
        .iter()
        .filter(|segment| segment.coordinates.len() >= 2)
        .map(|segment| {
            let style = style_for(segment.level);
            SegmentStroke {
                coordinates: segment.coordinates.clone(),
                label: style.label,
                color: style.fill_color,
                width: SEGMENT_WIDTH,
                opacity: SEGMENT_OPACITY,
            }
        })
        .collect()
}

/// GeoJSON `FeatureCollection` of line strings, coordinates in `[lon, lat]`.
pub fn strokes_geojson(strokes: &[SegmentStroke]) -> Value {
    let features: Vec<Value> = strokes
        .iter()
        .map(|stroke| {
            let coordinates: Vec<[f64; 2]> = stroke
                .coordinates
                .iter()
                .map(|point| [point.lon, point.lat])
                .collect();
            json!({
                "type": "Feature",
                "properties": {
                    "label": stroke.label,
                    "line-color": stroke.color,
                    "line-width": stroke.width,
                    "line-opacity": stroke.opacity,
                },
                "geometry": {
                    "type": "LineString",
                    "coordinates": coordinates,
                },
            })
        })
        .collect();

    json!({
        "type": "FeatureCollection",
        "features": features,
    })
}

fn lenient_level<'de, D>(deserializer: D) -> Result<Option<CongestionLevel>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(CongestionLevel::parse))
}
