use crate::math::GeoPoint;
use crate::processing::hail::HailConfig;
use crate::processing::rotation::RotationConfig;
use crate::processing::segmenter::SegmenterConfig;
use crate::processing::threat::ThreatConfig;
use crate::tracking::manager::TrackerConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Calibration constants for every stage of a scan pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub segmenter: SegmenterConfig,
    pub rotation: RotationConfig,
    pub hail: HailConfig,
    pub tracker: TrackerConfig,
    pub threat: ThreatConfig,
}

/// Common error type for scan processing.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("malformed grid: {0}")]
    MalformedGrid(String),
    #[error("scan mismatch: {0}")]
    ScanMismatch(String),
    #[error("scan pass cancelled for station {0}")]
    Cancelled(String),
    #[error("worker for station {0} stopped")]
    WorkerStopped(String),
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Supplies the height of the 0 °C level for a location and time.
pub trait FreezingLevelSource: Send + Sync {
    /// Freezing-level height above the radar datum in kilometres, if known.
    fn freezing_level_km(&self, at: GeoPoint, time: DateTime<Utc>) -> Option<f64>;
}

/// Same freezing level everywhere.
#[derive(Debug, Clone, Copy)]
pub struct FixedFreezingLevel(pub f64);

impl FreezingLevelSource for FixedFreezingLevel {
    fn freezing_level_km(&self, _at: GeoPoint, _time: DateTime<Utc>) -> Option<f64> {
        Some(self.0)
    }
}

/// No atmospheric data available.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoFreezingLevel;

impl FreezingLevelSource for NoFreezingLevel {
    fn freezing_level_km(&self, _at: GeoPoint, _time: DateTime<Utc>) -> Option<f64> {
        None
    }
}

impl<F> FreezingLevelSource for F
where
    F: Fn(GeoPoint, DateTime<Utc>) -> Option<f64> + Send + Sync,
{
    fn freezing_level_km(&self, at: GeoPoint, time: DateTime<Utc>) -> Option<f64> {
        self(at, time)
    }
}
