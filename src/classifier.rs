//! Turns a raw traffic-status payload into a [`TrafficReport`].
//!
//! The provider is authoritative for the congestion level. The level is only
//! derived locally from the speed ratio when the payload omits it or sends a
//! value this crate does not know.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::SystemTime;

pub const DEFAULT_PROVIDER: &str = "unknown";

const FREE_RATIO: f64 = 0.9;
const MODERATE_RATIO: f64 = 0.7;
const HEAVY_RATIO: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CongestionLevel {
    Free,
    Moderate,
    Heavy,
    Severe,
}

impl CongestionLevel {
    pub const ALL: [CongestionLevel; 4] = [
        CongestionLevel::Free,
        CongestionLevel::Moderate,
        CongestionLevel::Heavy,
        CongestionLevel::Severe,
    ];

    /// Returns `None` for anything outside the four known levels.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "free" => Some(Self::Free),
            "moderate" => Some(Self::Moderate),
            "heavy" => Some(Self::Heavy),
            "severe" => Some(Self::Severe),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Moderate => "moderate",
            Self::Heavy => "heavy",
            Self::Severe => "severe",
        }
    }
}

impl fmt::Display for CongestionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a report's congestion level came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelSource {
    Provided,
    /// Computed from the speed ratio
    Derived,
    /// No provider level and no usable speeds. The level is a placeholder.
    Defaulted,
}

/// Body of `GET /api/v1/traffic/status`. Every field is optional so a partial
/// payload still classifies.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTrafficStatus {
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub current_speed: Option<f64>,
    #[serde(default)]
    pub free_flow_speed: Option<f64>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub has_traffic: Option<bool>,
    #[serde(default)]
    pub congestion_level: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrafficReport {
    pub provider: String,
    pub current_speed: Option<f64>,
    pub free_flow_speed: Option<f64>,
    /// Clamped to `[0, 1]`
    pub confidence: f64,
    pub has_traffic: bool,
    pub congestion_level: CongestionLevel,
    pub level_source: LevelSource,
    /// `current_speed / free_flow_speed`, clamped to `[0, 1]`
    pub speed_ratio: f64,
    pub confidence_percent: u8,
    pub updated_at: SystemTime,
}

impl TrafficReport {
    pub fn speed_percent(&self) -> u8 {
        to_percent(self.speed_ratio)
    }

    /// The level to show, or `None` when nothing backs it.
    pub fn known_level(&self) -> Option<CongestionLevel> {
        match self.level_source {
            LevelSource::Defaulted => None,
            LevelSource::Provided | LevelSource::Derived => Some(self.congestion_level),
        }
    }
}

/// Latest accepted result of a traffic query. Replaced wholesale, never merged.
#[derive(Debug, Clone, PartialEq)]
pub enum TrafficStatus {
    Ok(TrafficReport),
    Error {
        message: String,
        updated_at: SystemTime,
    },
}

impl TrafficStatus {
    pub fn error(message: impl Into<String>, updated_at: SystemTime) -> Self {
        Self::Error {
            message: message.into(),
            updated_at,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    pub fn congestion_level(&self) -> Option<CongestionLevel> {
        match self {
            Self::Ok(report) => Some(report.congestion_level),
            Self::Error { .. } => None,
        }
    }

    pub fn known_level(&self) -> Option<CongestionLevel> {
        match self {
            Self::Ok(report) => report.known_level(),
            Self::Error { .. } => None,
        }
    }

    pub fn updated_at(&self) -> SystemTime {
        match self {
            Self::Ok(report) => report.updated_at,
            Self::Error { updated_at, .. } => *updated_at,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Classifier {
    traffic_threshold: f64,
}

impl Classifier {
    pub fn new(traffic_threshold: f64) -> Self {
        Self { traffic_threshold }
    }

    pub fn classify(&self, raw: &RawTrafficStatus, updated_at: SystemTime) -> TrafficReport {
        let ratio = speed_ratio(raw.current_speed, raw.free_flow_speed);
        let confidence = clamp_unit(raw.confidence.unwrap_or(0.0));

        let provided = raw
            .congestion_level
            .as_deref()
            .and_then(CongestionLevel::parse);
        let (congestion_level, level_source) = match provided {
            Some(level) => (level, LevelSource::Provided),
            None => match level_from_speeds(raw.current_speed, raw.free_flow_speed) {
                Some(level) => (level, LevelSource::Derived),
                None => (CongestionLevel::Free, LevelSource::Defaulted),
            },
        };

        let has_traffic = raw.has_traffic.unwrap_or_else(|| {
            match (valid_speed(raw.current_speed), valid_speed(raw.free_flow_speed)) {
                (Some(current), Some(free)) if free > 0.0 => {
                    current < free * self.traffic_threshold
                }
                _ => false,
            }
        });

        TrafficReport {
            provider: raw
                .provider
                .clone()
                .filter(|p| !p.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_PROVIDER.to_string()),
            current_speed: valid_speed(raw.current_speed),
            free_flow_speed: valid_speed(raw.free_flow_speed),
            confidence,
            has_traffic,
            congestion_level,
            level_source,
            speed_ratio: ratio,
            confidence_percent: to_percent(confidence),
            updated_at,
        }
    }
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_TRAFFIC_THRESHOLD)
    }
}

/// `clamp(current / free_flow, 0, 1)`, or 0 when either speed is missing or
/// the free-flow speed is not positive.
pub fn speed_ratio(current: Option<f64>, free_flow: Option<f64>) -> f64 {
    match (valid_speed(current), valid_speed(free_flow)) {
        (Some(current), Some(free)) if free > 0.0 => clamp_unit(current / free),
        _ => 0.0,
    }
}

pub fn confidence_percent(confidence: Option<f64>) -> u8 {
    to_percent(clamp_unit(confidence.unwrap_or(0.0)))
}

/// Fallback level used only when the provider gives none. `None` when the
/// speeds cannot produce a ratio.
pub fn level_from_speeds(current: Option<f64>, free_flow: Option<f64>) -> Option<CongestionLevel> {
    let (Some(current), Some(free)) = (valid_speed(current), valid_speed(free_flow)) else {
        return None;
    };
    if free <= 0.0 {
        return None;
    }

    let ratio = current / free;
    let level = if ratio >= FREE_RATIO {
        CongestionLevel::Free
    } else if ratio >= MODERATE_RATIO {
        CongestionLevel::Moderate
    } else if ratio >= HEAVY_RATIO {
        CongestionLevel::Heavy
    } else {
        CongestionLevel::Severe
    };
    Some(level)
}

fn valid_speed(speed: Option<f64>) -> Option<f64> {
    speed.filter(|s| s.is_finite())
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

fn to_percent(unit: f64) -> u8 {
    (clamp_unit(unit) * 100.0).round() as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, UNIX_EPOCH};

    fn raw(current: Option<f64>, free: Option<f64>) -> RawTrafficStatus {
        RawTrafficStatus {
            provider: Some("tomtom".to_string()),
            current_speed: current,
            free_flow_speed: free,
            confidence: Some(0.5),
            has_traffic: None,
            congestion_level: None,
        }
    }

    #[test]
    fn heavy_example_matches_expected_ratio_and_confidence() -> Result<(), serde_json::Error> {
        let payload: RawTrafficStatus = serde_json::from_str(
            r#"{"provider":"tomtom","currentSpeed":15,"freeFlowSpeed":50,"confidence":0.8,"hasTraffic":true,"congestionLevel":"heavy"}"#,
        )?;

        let report = Classifier::default().classify(&payload, UNIX_EPOCH);

        assert_eq!(report.speed_ratio, 0.3);
        assert_eq!(report.speed_percent(), 30);
        assert_eq!(report.confidence_percent, 80);
        assert_eq!(report.congestion_level, CongestionLevel::Heavy);
        assert!(report.has_traffic);
        assert_eq!(report.provider, "tomtom");
        Ok(())
    }

    #[test]
    fn ratio_is_zero_without_usable_free_flow_speed() {
        assert_eq!(speed_ratio(Some(30.0), None), 0.0);
        assert_eq!(speed_ratio(Some(30.0), Some(0.0)), 0.0);
        assert_eq!(speed_ratio(Some(30.0), Some(-5.0)), 0.0);
        assert_eq!(speed_ratio(None, Some(50.0)), 0.0);
        assert_eq!(speed_ratio(Some(f64::NAN), Some(50.0)), 0.0);
    }

    #[test]
    fn ratio_is_clamped_to_unit_interval() {
        assert_eq!(speed_ratio(Some(80.0), Some(50.0)), 1.0);
        assert_eq!(speed_ratio(Some(-10.0), Some(50.0)), 0.0);
    }

    #[test]
    fn confidence_is_clamped_before_percent() {
        assert_eq!(confidence_percent(Some(1.7)), 100);
        assert_eq!(confidence_percent(Some(-0.3)), 0);
        assert_eq!(confidence_percent(Some(f64::NAN)), 0);
        assert_eq!(confidence_percent(None), 0);
        assert_eq!(confidence_percent(Some(0.874)), 87);
    }

    #[test]
    fn empty_payload_yields_defined_empty_report() -> Result<(), serde_json::Error> {
        let payload: RawTrafficStatus = serde_json::from_str("{}")?;

        let report = Classifier::default().classify(&payload, UNIX_EPOCH);

        assert_eq!(report.speed_ratio, 0.0);
        assert_eq!(report.confidence_percent, 0);
        assert_eq!(report.congestion_level, CongestionLevel::Free);
        assert_eq!(report.level_source, LevelSource::Defaulted);
        assert_eq!(report.known_level(), None);
        assert!(!report.has_traffic);
        assert_eq!(report.provider, DEFAULT_PROVIDER);
        assert_eq!(report.current_speed, None);
        Ok(())
    }

    #[test]
    fn provider_level_wins_over_ratio() {
        let mut payload = raw(Some(49.0), Some(50.0));
        payload.congestion_level = Some("severe".to_string());

        let report = Classifier::default().classify(&payload, UNIX_EPOCH);

        assert_eq!(report.congestion_level, CongestionLevel::Severe);
        assert_eq!(report.level_source, LevelSource::Provided);
    }

    #[test]
    fn unknown_level_falls_back_to_ratio_thresholds() {
        let mut payload = raw(Some(30.0), Some(50.0));
        payload.congestion_level = Some("gridlock".to_string());

        let report = Classifier::default().classify(&payload, UNIX_EPOCH);

        assert_eq!(report.congestion_level, CongestionLevel::Heavy);
        assert_eq!(report.level_source, LevelSource::Derived);
        assert_eq!(report.known_level(), Some(CongestionLevel::Heavy));
    }

    #[test]
    fn unknown_level_without_speeds_is_not_known() {
        let mut payload = raw(None, Some(50.0));
        payload.congestion_level = Some("gridlock".to_string());

        let status = TrafficStatus::Ok(Classifier::default().classify(&payload, UNIX_EPOCH));

        assert_eq!(status.congestion_level(), Some(CongestionLevel::Free));
        assert_eq!(status.known_level(), None);
    }

    #[test]
    fn ratio_thresholds_cover_all_levels() {
        assert_eq!(level_from_speeds(Some(45.0), Some(50.0)), Some(CongestionLevel::Free));
        assert_eq!(
            level_from_speeds(Some(35.0), Some(50.0)),
            Some(CongestionLevel::Moderate)
        );
        assert_eq!(level_from_speeds(Some(25.0), Some(50.0)), Some(CongestionLevel::Heavy));
        assert_eq!(level_from_speeds(Some(10.0), Some(50.0)), Some(CongestionLevel::Severe));
        assert_eq!(level_from_speeds(None, Some(50.0)), None);
        assert_eq!(level_from_speeds(Some(30.0), Some(0.0)), None);
    }

    #[test]
    fn has_traffic_falls_back_to_threshold() {
        let classifier = Classifier::new(0.8);
        let slow = classifier.classify(&raw(Some(39.0), Some(50.0)), UNIX_EPOCH);
        let fast = classifier.classify(&raw(Some(41.0), Some(50.0)), UNIX_EPOCH);

        assert!(slow.has_traffic);
        assert!(!fast.has_traffic);
    }

    #[test]
    fn status_accessors_reflect_variant() {
        let at = UNIX_EPOCH + Duration::from_secs(3);
        let ok = TrafficStatus::Ok(Classifier::default().classify(&raw(Some(10.0), Some(50.0)), at));
        let err = TrafficStatus::error("HTTP 502", at);

        assert_eq!(ok.congestion_level(), Some(CongestionLevel::Severe));
        assert!(!ok.is_error());
        assert_eq!(err.congestion_level(), None);
        assert!(err.is_error());
        assert_eq!(err.updated_at(), at);
    }

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!(CongestionLevel::parse(" Heavy "), Some(CongestionLevel::Heavy));
        assert_eq!(CongestionLevel::parse(""), None);
    }
}
