use crate::math::geo::{self, GeoPoint};
use crate::math::StatsHelper;
use crate::processing::features::RegionFeatures;
use crate::processing::hail::HailEstimate;
use crate::processing::rotation::{RotationAssessment, RotationClass};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

/// Per-station storm identifier, allocated once and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StormId(pub u64);

impl fmt::Display for StormId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CELL-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackState {
    /// Matched in the most recent scan.
    Active,
    /// Unmatched but within miss tolerance; position extrapolated.
    Coasting,
    Terminated,
}

/// Inputs that move a track between states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackTransition {
    Matched,
    Missed { misses: u32, tolerance: u32 },
    Merged,
}

impl TrackState {
    /// Transition table. A terminated track never receives input again.
    pub fn on(self, transition: TrackTransition) -> TrackState {
        match (self, transition) {
            (TrackState::Terminated, transition) => {
                panic!("track already terminated, received {:?}", transition)
            }
            (_, TrackTransition::Matched) => TrackState::Active,
            (_, TrackTransition::Missed { misses, tolerance }) if misses <= tolerance => {
                TrackState::Coasting
            }
            (_, TrackTransition::Missed { .. }) => TrackState::Terminated,
            (_, TrackTransition::Merged) => TrackState::Terminated,
        }
    }
}

/// Ground velocity of a storm in east/north components.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotionVector {
    pub east_mps: f64,
    pub north_mps: f64,
}

impl MotionVector {
    pub fn from_displacement(east_km: f64, north_km: f64, elapsed_s: f64) -> Self {
        Self {
            east_mps: east_km * 1000.0 / elapsed_s,
            north_mps: north_km * 1000.0 / elapsed_s,
        }
    }

    /// Direction of travel, degrees clockwise from north.
    pub fn bearing_deg(&self) -> f64 {
        geo::normalize_bearing(self.east_mps.atan2(self.north_mps).to_degrees())
    }

    pub fn speed_mps(&self) -> f64 {
        self.east_mps.hypot(self.north_mps)
    }

    pub fn speed_mph(&self) -> f64 {
        geo::mps_to_mph(self.speed_mps())
    }

    /// East/north displacement in km after `elapsed_s` seconds.
    pub fn displacement_km(&self, elapsed_s: f64) -> (f64, f64) {
        (
            self.east_mps * elapsed_s / 1000.0,
            self.north_mps * elapsed_s / 1000.0,
        )
    }

    pub fn smoothed(&self, sample: MotionVector, alpha: f64) -> MotionVector {
        MotionVector {
            east_mps: StatsHelper::smooth(self.east_mps, sample.east_mps, alpha),
            north_mps: StatsHelper::smooth(self.north_mps, sample.north_mps, alpha),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    New,
    Intensifying,
    Steady,
    Weakening,
}

/// One matched scan in a track's history.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackObservation {
    pub timestamp: DateTime<Utc>,
    pub centroid: GeoPoint,
    pub peak_dbz: f32,
    pub area_km2: f64,
}

/// Everything measured about one region in the current scan.
#[derive(Debug, Clone, PartialEq)]
pub struct CellObservation {
    pub features: RegionFeatures,
    pub rotation: RotationAssessment,
    pub hail: HailEstimate,
}

/// Most recent rotation seen with velocity data available.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RotationMemory {
    pub assessment: RotationAssessment,
    pub scans_since: u32,
}

/// The persistent storm entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StormCell {
    pub id: StormId,
    pub parent: Option<StormId>,
    pub state: TrackState,
    /// Observed centroid, or the extrapolated one while coasting.
    pub centroid: GeoPoint,
    /// Centroid at the last matched scan.
    pub observed_position: GeoPoint,
    pub peak_dbz: f32,
    pub area_km2: f64,
    pub effective_diameter_km: f64,
    pub intensity_rank: usize,
    pub rotation: RotationAssessment,
    pub last_known_rotation: Option<RotationMemory>,
    pub hail: HailEstimate,
    pub motion: Option<MotionVector>,
    /// Scans survived since birth.
    pub age: u32,
    pub last_observed: DateTime<Utc>,
    pub misses: u32,
    pub confidence: f64,
}

/// A storm cell together with its observation history.
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    cell: StormCell,
    history: VecDeque<TrackObservation>,
    history_limit: usize,
}

impl Track {
    pub fn born(
        id: StormId,
        parent: Option<StormId>,
        observation: &CellObservation,
        scan_time: DateTime<Utc>,
        history_limit: usize,
    ) -> Self {
        let features = &observation.features;
        let cell = StormCell {
            id,
            parent,
            state: TrackState::Active,
            centroid: features.centroid,
            observed_position: features.centroid,
            peak_dbz: features.peak_dbz,
            area_km2: features.area_km2,
            effective_diameter_km: features.effective_diameter_km,
            intensity_rank: features.intensity_rank,
            rotation: observation.rotation,
            last_known_rotation: remembered(observation.rotation),
            hail: observation.hail,
            motion: None,
            age: 0,
            last_observed: scan_time,
            misses: 0,
            confidence: 0.0,
        };
        let mut track = Self {
            cell,
            history: VecDeque::new(),
            history_limit: history_limit.max(1),
        };
        track.record(scan_time);
        track
    }

    pub fn id(&self) -> StormId {
        self.cell.id
    }

    pub fn cell(&self) -> &StormCell {
        &self.cell
    }

    pub fn history(&self) -> impl Iterator<Item = &TrackObservation> {
        self.history.iter()
    }

    /// Peak-intensity trend between the last two observations.
    pub fn trend(&self, threshold_dbz: f32) -> Trend {
        let mut recent = self.history.iter().rev();
        match (recent.next(), recent.next()) {
            (Some(latest), Some(previous)) => {
                let delta = latest.peak_dbz - previous.peak_dbz;
                if delta >= threshold_dbz {
                    Trend::Intensifying
                } else if delta <= -threshold_dbz {
                    Trend::Weakening
                } else {
                    Trend::Steady
                }
            }
            _ => Trend::New,
        }
    }

    /// Seconds from the last matched observation to `at`.
    pub fn elapsed_since_observed(&self, at: DateTime<Utc>) -> f64 {
        (at - self.cell.last_observed).num_milliseconds() as f64 / 1000.0
    }

    /// Last observed position advanced along the motion vector to `at`.
    pub fn extrapolated(&self, at: DateTime<Utc>) -> GeoPoint {
        match self.cell.motion {
            Some(motion) => {
                let (east, north) = motion.displacement_km(self.elapsed_since_observed(at));
                geo::offset(self.cell.observed_position, east, north)
            }
            None => self.cell.observed_position,
        }
    }

    pub(crate) fn apply_match(
        &mut self,
        observation: &CellObservation,
        scan_time: DateTime<Utc>,
        smoothing: f64,
        tolerance: u32,
    ) {
        let elapsed = self.elapsed_since_observed(scan_time);
        let features = &observation.features;
        if elapsed > 0.0 {
            let (east, north) = geo::east_north_km(self.cell.observed_position, features.centroid);
            let raw = MotionVector::from_displacement(east, north, elapsed);
            self.cell.motion = Some(match self.cell.motion {
                Some(previous) => previous.smoothed(raw, smoothing),
                None => raw,
            });
        }

        let cell = &mut self.cell;
        cell.state = cell.state.on(TrackTransition::Matched);
        cell.centroid = features.centroid;
        cell.observed_position = features.centroid;
        cell.peak_dbz = features.peak_dbz;
        cell.area_km2 = features.area_km2;
        cell.effective_diameter_km = features.effective_diameter_km;
        cell.intensity_rank = features.intensity_rank;
        cell.hail = observation.hail;
        cell.rotation = observation.rotation;
        cell.last_known_rotation = remembered(observation.rotation).or_else(|| aged(cell.last_known_rotation));
        cell.misses = 0;
        cell.age += 1;
        cell.last_observed = scan_time;
        self.record(scan_time);
        self.refresh_confidence(tolerance);
    }

    /// Registers a scan without a match; returns the new state.
    pub(crate) fn apply_miss(&mut self, scan_time: DateTime<Utc>, tolerance: u32) -> TrackState {
        let centroid = self.extrapolated(scan_time);
        let cell = &mut self.cell;
        cell.misses += 1;
        cell.state = cell.state.on(TrackTransition::Missed {
            misses: cell.misses,
            tolerance,
        });
        if cell.state == TrackState::Coasting {
            cell.centroid = centroid;
            cell.age += 1;
            cell.rotation = RotationAssessment::unknown();
            cell.last_known_rotation = aged(cell.last_known_rotation);
        }
        self.refresh_confidence(tolerance);
        self.cell.state
    }

    pub(crate) fn apply_merge(&mut self) {
        self.cell.state = self.cell.state.on(TrackTransition::Merged);
    }

    fn record(&mut self, scan_time: DateTime<Utc>) {
        if let Some(last) = self.history.back() {
            assert!(
                scan_time >= last.timestamp,
                "{} history out of order: {} after {}",
                self.cell.id,
                scan_time,
                last.timestamp
            );
            if scan_time == last.timestamp {
                self.history.pop_back();
            }
        }
        self.history.push_back(TrackObservation {
            timestamp: scan_time,
            centroid: self.cell.centroid,
            peak_dbz: self.cell.peak_dbz,
            area_km2: self.cell.area_km2,
        });
        while self.history.len() > self.history_limit {
            self.history.pop_front();
        }
    }

    fn refresh_confidence(&mut self, tolerance: u32) {
        let observations = self.history.len() as i32;
        let maturity = 1.0 - 0.5_f64.powi(observations);
        let reliability = 1.0 - f64::from(self.cell.misses) / f64::from(tolerance + 1);
        self.cell.confidence = (maturity * reliability).clamp(0.0, 1.0);
    }
}

fn remembered(rotation: RotationAssessment) -> Option<RotationMemory> {
    (rotation.class != RotationClass::Unknown).then_some(RotationMemory {
        assessment: rotation,
        scans_since: 0,
    })
}

fn aged(memory: Option<RotationMemory>) -> Option<RotationMemory> {
    memory.map(|memory| RotationMemory {
        scans_since: memory.scans_since + 1,
        ..memory
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::processing::hail::HailEstimate;
    use crate::processing::segmenter::GeoBounds;
    use crate::radar_interface::grid::tests::scan_time;

    /// A 3 km by 3 km storm centred on `centroid`.
    pub(crate) fn observation(centroid: GeoPoint, peak_dbz: f32) -> CellObservation {
        let south_west = geo::offset(centroid, -1.5, -1.5);
        let north_east = geo::offset(centroid, 1.5, 1.5);
        CellObservation {
            features: RegionFeatures {
                peak_dbz,
                peak_location: centroid,
                centroid,
                area_cells: 9,
                area_km2: 9.0,
                effective_diameter_km: 2.0 * (9.0 / std::f64::consts::PI).sqrt(),
                intensity_rank: 0,
                bounds: GeoBounds {
                    min_lat: south_west.lat,
                    max_lat: north_east.lat,
                    min_lon: south_west.lon,
                    max_lon: north_east.lon,
                },
            },
            rotation: RotationAssessment::unknown(),
            hail: HailEstimate::none(),
        }
    }

    #[test]
    fn transition_table() {
        use TrackState::*;
        assert_eq!(Active.on(TrackTransition::Matched), Active);
        assert_eq!(Coasting.on(TrackTransition::Matched), Active);
        let within = TrackTransition::Missed { misses: 2, tolerance: 2 };
        let beyond = TrackTransition::Missed { misses: 3, tolerance: 2 };
        assert_eq!(Active.on(within), Coasting);
        assert_eq!(Coasting.on(beyond), Terminated);
        assert_eq!(Active.on(TrackTransition::Merged), Terminated);
    }

    #[test]
    #[should_panic(expected = "already terminated")]
    fn terminated_tracks_reject_input() {
        TrackState::Terminated.on(TrackTransition::Matched);
    }

    #[test]
    fn motion_vector_bearing_and_speed() {
        let east = MotionVector::from_displacement(1.2, 0.0, 60.0);
        assert!((east.bearing_deg() - 90.0).abs() < 1e-9);
        assert!((east.speed_mps() - 20.0).abs() < 1e-9);
        let south_west = MotionVector::from_displacement(-1.0, -1.0, 100.0);
        assert!((south_west.bearing_deg() - 225.0).abs() < 1e-9);
        assert!((MotionVector::from_displacement(0.0, 1.0, 100.0).speed_mph() - 22.369).abs() < 1e-3);
    }

    #[test]
    fn match_updates_motion_and_trend() {
        let start = GeoPoint::new(35.0, -97.0);
        let mut track = Track::born(StormId(1), None, &observation(start, 45.0), scan_time(0), 8);
        assert_eq!(track.trend(3.0), Trend::New);
        assert!(track.cell().motion.is_none());

        let moved = geo::offset(start, 1.5, 0.6);
        track.apply_match(&observation(moved, 52.0), scan_time(1), 0.5, 2);
        let motion = track.cell().motion.unwrap();
        assert!((motion.east_mps - 25.0).abs() < 1e-6);
        assert!((motion.north_mps - 10.0).abs() < 1e-6);
        assert_eq!(track.cell().age, 1);
        assert_eq!(track.trend(3.0), Trend::Intensifying);
        assert_eq!(track.history().count(), 2);

        let predicted = track.extrapolated(scan_time(2));
        let (east, north) = geo::east_north_km(moved, predicted);
        assert!((east - 1.5).abs() < 1e-6 && (north - 0.6).abs() < 1e-6);
    }

    #[test]
    fn misses_coast_then_terminate() {
        let start = GeoPoint::new(35.0, -97.0);
        let mut track = Track::born(StormId(4), None, &observation(start, 50.0), scan_time(0), 8);
        assert_eq!(track.apply_miss(scan_time(5), 1), TrackState::Coasting);
        assert!(track.cell().confidence < 0.5);
        assert_eq!(track.apply_miss(scan_time(10), 1), TrackState::Terminated);
    }

    #[test]
    fn history_is_bounded_and_ordered() {
        let start = GeoPoint::new(35.0, -97.0);
        let mut track = Track::born(StormId(2), None, &observation(start, 50.0), scan_time(0), 3);
        for minute in 1..6 {
            track.apply_match(&observation(start, 50.0), scan_time(minute), 0.5, 2);
        }
        let times: Vec<_> = track.history().map(|o| o.timestamp).collect();
        assert_eq!(times, vec![scan_time(3), scan_time(4), scan_time(5)]);
    }

    #[test]
    fn rotation_memory_survives_scans_without_velocity() {
        let start = GeoPoint::new(35.0, -97.0);
        let mut first = observation(start, 55.0);
        first.rotation = RotationAssessment {
            class: RotationClass::Meso,
            peak_shear_per_s: Some(0.008),
            couplet: None,
        };
        let mut track = Track::born(StormId(3), None, &first, scan_time(0), 8);
        track.apply_match(&observation(start, 55.0), scan_time(5), 0.5, 2);

        let cell = track.cell();
        assert_eq!(cell.rotation.class, RotationClass::Unknown);
        let memory = cell.last_known_rotation.unwrap();
        assert_eq!(memory.assessment.class, RotationClass::Meso);
        assert_eq!(memory.scans_since, 1);
    }
}
