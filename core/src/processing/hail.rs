use crate::math::geo::EARTH_RADIUS_KM;
use crate::processing::segmenter::CandidateRegion;
use crate::radar_interface::grid::Grid;
use serde::{Deserialize, Serialize};

// Effective earth radius factor for standard refraction.
const REFRACTION_FACTOR: f64 = 4.0 / 3.0;
const VIL_COEFFICIENT: f64 = 3.44e-6;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HailConfig {
    /// Used when no freezing level is supplied.
    pub default_freezing_level_km: f64,
    /// Reflectivity marking the hail core when measuring depth above freezing.
    pub hail_core_dbz: f32,
    /// Reflectivity cap applied before integration, suppressing hail contamination.
    pub reflectivity_cap_dbz: f32,
    pub diameter_coefficient: f64,
    /// Core depth above freezing that gives a unit height factor.
    pub reference_depth_km: f64,
    pub max_depth_factor: f64,
    /// Column depth assumed when only one level is available.
    pub single_level_depth_km: f64,
    /// Diameters at or below this have zero severity probability.
    pub severe_onset_in: f64,
    /// Diameter at which the severity probability reaches 0.95.
    pub likely_severe_in: f64,
}

impl Default for HailConfig {
    fn default() -> Self {
        Self {
            default_freezing_level_km: 4.0,
            hail_core_dbz: 45.0,
            reflectivity_cap_dbz: 56.0,
            diameter_coefficient: 0.28,
            reference_depth_km: 6.0,
            max_depth_factor: 1.5,
            single_level_depth_km: 6.0,
            severe_onset_in: 0.75,
            likely_severe_in: 2.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HailConfidence {
    Normal,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HailEstimate {
    pub diameter_in: f64,
    /// Probability of severe hail, 0–1.
    pub probability: f64,
    pub confidence: HailConfidence,
    pub vil_kg_m2: f64,
    /// Highest level at or above the hail-core reflectivity.
    pub echo_top_km: Option<f64>,
}

impl HailEstimate {
    pub fn none() -> Self {
        Self {
            diameter_in: 0.0,
            probability: 0.0,
            confidence: HailConfidence::Low,
            vil_kg_m2: 0.0,
            echo_top_km: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProfileLevel {
    pub elevation_deg: f64,
    /// Beam-centre height above the radar; `None` when the site is unknown.
    pub height_km: Option<f64>,
    pub max_dbz: f32,
}

/// Maximum reflectivity under a region, tilt by tilt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VerticalProfile {
    pub levels: Vec<ProfileLevel>,
}

impl VerticalProfile {
    pub fn peak_dbz(&self) -> Option<f32> {
        self.levels.iter().map(|level| level.max_dbz).reduce(f32::max)
    }
}

/// Beam-centre height (km) at slant range `range_km` for elevation `elevation_deg`.
pub fn beam_height_km(range_km: f64, elevation_deg: f64) -> f64 {
    let effective_radius = REFRACTION_FACTOR * EARTH_RADIUS_KM;
    (range_km.powi(2)
        + effective_radius.powi(2)
        + 2.0 * range_km * effective_radius * elevation_deg.to_radians().sin())
    .sqrt()
        - effective_radius
}

/// Maps region footprints onto every reflectivity tilt of a scan.
pub struct ProfileSampler<'a> {
    tilts: &'a [Grid],
    co_registered: Vec<bool>,
}

impl<'a> ProfileSampler<'a> {
    /// `tilts[0]` is the grid the regions were segmented from.
    pub fn new(tilts: &'a [Grid]) -> Self {
        let co_registered = match tilts.first() {
            Some(base) => tilts.iter().map(|tilt| base.is_co_registered(tilt)).collect(),
            None => Vec::new(),
        };
        Self {
            tilts,
            co_registered,
        }
    }

    pub fn profile(&self, region: &CandidateRegion) -> VerticalProfile {
        let mut levels = Vec::with_capacity(self.tilts.len());
        for (tilt, co_registered) in self.tilts.iter().zip(&self.co_registered) {
            let mut strongest: Option<((usize, usize), f32)> = None;
            for cell in &region.cells {
                let target = if *co_registered {
                    Some((cell.row, cell.col))
                } else {
                    tilt.nearest_cell(cell.location)
                };
                let Some((row, col)) = target else {
                    continue;
                };
                let Some(value) = tilt.value(row, col) else {
                    continue;
                };
                if strongest.map_or(true, |(_, best)| value > best) {
                    strongest = Some(((row, col), value));
                }
            }

            if let Some(((row, col), max_dbz)) = strongest {
                let height_km = tilt
                    .range_km(row, col)
                    .map(|range| beam_height_km(range, tilt.elevation_deg()));
                levels.push(ProfileLevel {
                    elevation_deg: tilt.elevation_deg(),
                    height_km,
                    max_dbz,
                });
            }
        }
        VerticalProfile { levels }
    }
}

/// Hail size and severity from vertical reflectivity structure.
pub struct HailEstimator {
    config: HailConfig,
}

impl HailEstimator {
    pub fn new(config: HailConfig) -> Self {
        Self { config }
    }

    pub fn estimate(&self, profile: &VerticalProfile, freezing_level_km: Option<f64>) -> HailEstimate {
        let cfg = &self.config;
        let Some(peak_dbz) = profile.peak_dbz() else {
            return HailEstimate::none();
        };

        let mut confidence = HailConfidence::Normal;
        let freezing_km = match freezing_level_km.filter(|h| h.is_finite()) {
            Some(height) => height,
            None => {
                confidence = HailConfidence::Low;
                cfg.default_freezing_level_km
            }
        };

        let mut measured: Vec<(f64, f32)> = profile
            .levels
            .iter()
            .filter_map(|level| level.height_km.map(|h| (h, level.max_dbz)))
            .collect();
        measured.sort_by(|a, b| a.0.total_cmp(&b.0));

        // True when the sampled levels never reach the top of the core.
        let mut partial_column = measured.len() < 2;
        let (vil, factor, echo_top_km) = if measured.len() >= 2 {
            let vil: f64 = measured
                .windows(2)
                .map(|pair| {
                    let mean_z = (self.linear_z(pair[0].1) + self.linear_z(pair[1].1)) / 2.0;
                    let depth_m = (pair[1].0 - pair[0].0).max(0.0) * 1000.0;
                    VIL_COEFFICIENT * mean_z.powf(4.0 / 7.0) * depth_m
                })
                .sum();
            let echo_top = measured
                .iter()
                .filter(|(_, dbz)| *dbz >= cfg.hail_core_dbz)
                .map(|(height, _)| *height)
                .reduce(f64::max);
            let mut factor = echo_top.map_or(0.0, |top| {
                ((top - freezing_km) / cfg.reference_depth_km).clamp(0.0, cfg.max_depth_factor)
            });
            let untopped = measured.last().is_some_and(|&(height, dbz)| {
                height < freezing_km || dbz >= cfg.hail_core_dbz
            });
            if untopped {
                partial_column = true;
                confidence = HailConfidence::Low;
                factor = factor.max(1.0);
            }
            (vil, factor, echo_top)
        } else {
            confidence = HailConfidence::Low;
            let vil = VIL_COEFFICIENT
                * self.linear_z(peak_dbz).powf(4.0 / 7.0)
                * cfg.single_level_depth_km
                * 1000.0;
            (vil, 1.0, None)
        };

        let diameter_in = cfg.diameter_coefficient * vil.sqrt() * factor;
        let mut probability = self.severity_probability(diameter_in);
        if partial_column {
            let legacy = (f64::from(peak_dbz) - 40.0) * 0.025;
            probability = probability.max(legacy.clamp(0.0, 1.0));
        }

        HailEstimate {
            diameter_in,
            probability,
            confidence,
            vil_kg_m2: vil,
            echo_top_km,
        }
    }

    /// Monotonic map from diameter to severe-hail probability.
    pub fn severity_probability(&self, diameter_in: f64) -> f64 {
        let onset = self.config.severe_onset_in;
        if !(diameter_in > onset) {
            return 0.0;
        }
        let span = (self.config.likely_severe_in - onset).max(f64::EPSILON);
        let rate = 20.0_f64.ln() / span;
        1.0 - (-rate * (diameter_in - onset)).exp()
    }

    fn linear_z(&self, dbz: f32) -> f64 {
        let capped = f64::from(dbz.min(self.config.reflectivity_cap_dbz));
        10.0_f64.powf(capped / 10.0)
    }
}
