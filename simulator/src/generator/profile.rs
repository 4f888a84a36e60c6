use crate::generator::stations;
use anyhow::Context;
use chrono::{DateTime, Duration, TimeZone, Utc};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use stormcore::math::geo::{self, GeoPoint};
use stormcore::processing::hail::beam_height_km;
use stormcore::radar_interface::{Grid, GridGeometry, GridMeta, ProductKind, ScanVolume};

/// Rankine vortex embedded in a storm.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CoupletProfile {
    /// Distance between the velocity maxima.
    pub diameter_km: f64,
    /// Outbound minus inbound maximum.
    pub delta_v_mps: f32,
}

/// One storm placed relative to the radar at the first scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyntheticStorm {
    pub range_km: f64,
    pub azimuth_deg: f64,
    pub peak_dbz: f32,
    pub radius_km: f64,
    pub east_mps: f64,
    pub north_mps: f64,
    /// Echo top; tilts sampling above it see background only.
    pub top_km: f64,
    pub couplet: Option<CoupletProfile>,
}

/// Configuration for generating synthetic polar scans.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub station: String,
    pub seed: u64,
    pub start: DateTime<Utc>,
    pub scan_interval_s: i64,
    pub azimuths: usize,
    pub gates: usize,
    pub first_gate_km: f64,
    pub gate_spacing_km: f64,
    pub elevations_deg: Vec<f64>,
    pub velocity: bool,
    pub noise_dbz: f32,
    pub storms: Vec<SyntheticStorm>,
    pub description: Option<String>,
    pub scenario: Option<String>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            station: "KTLX".into(),
            seed: 0,
            start: Utc
                .with_ymd_and_hms(2024, 5, 20, 21, 0, 0)
                .single()
                .unwrap_or_default(),
            scan_interval_s: 300,
            azimuths: 360,
            gates: 160,
            first_gate_km: 2.0,
            gate_spacing_km: 1.0,
            elevations_deg: vec![0.5, 1.5, 2.4],
            velocity: true,
            noise_dbz: 2.0,
            storms: vec![
                SyntheticStorm {
                    range_km: 60.0,
                    azimuth_deg: 250.0,
                    peak_dbz: 64.0,
                    radius_km: 7.0,
                    east_mps: 12.0,
                    north_mps: 7.0,
                    top_km: 14.0,
                    couplet: Some(CoupletProfile {
                        diameter_km: 2.0,
                        delta_v_mps: 50.0,
                    }),
                },
                SyntheticStorm {
                    range_km: 95.0,
                    azimuth_deg: 200.0,
                    peak_dbz: 52.0,
                    radius_km: 5.0,
                    east_mps: 10.0,
                    north_mps: 10.0,
                    top_km: 9.0,
                    couplet: None,
                },
            ],
            description: None,
            scenario: None,
        }
    }
}

impl GeneratorConfig {
    fn normalized_azimuths(&self) -> usize {
        self.azimuths.max(1)
    }

    fn normalized_gates(&self) -> usize {
        self.gates.max(1)
    }

    pub fn site(&self) -> anyhow::Result<GeoPoint> {
        stations::find(&self.station)
            .map(|station| station.location())
            .with_context(|| format!("unknown radar station {}", self.station))
    }

    pub fn scan_time(&self, scan_index: usize) -> DateTime<Utc> {
        self.start + Duration::seconds(self.scan_interval_s * scan_index as i64)
    }

    /// Position of `storm` at `scan_index`.
    pub fn storm_center(&self, site: GeoPoint, storm: &SyntheticStorm, scan_index: usize) -> GeoPoint {
        let origin = geo::destination(site, storm.azimuth_deg, storm.range_km);
        let elapsed = (self.scan_interval_s * scan_index as i64) as f64;
        geo::offset(
            origin,
            storm.east_mps * elapsed / 1000.0,
            storm.north_mps * elapsed / 1000.0,
        )
    }

    fn geometry(&self, site: GeoPoint) -> GridGeometry {
        let step = 360.0 / self.normalized_azimuths() as f64;
        GridGeometry::Polar {
            site,
            first_gate_km: self.first_gate_km,
            gate_spacing_km: self.gate_spacing_km,
            azimuths_deg: (0..self.normalized_azimuths()).map(|i| i as f64 * step).collect(),
        }
    }
}

struct Gate {
    azimuth_deg: f64,
    range_km: f64,
    location: GeoPoint,
}

fn gates(config: &GeneratorConfig, site: GeoPoint) -> Vec<Vec<Gate>> {
    let step = 360.0 / config.normalized_azimuths() as f64;
    (0..config.normalized_azimuths())
        .map(|row| {
            let azimuth_deg = row as f64 * step;
            (0..config.normalized_gates())
                .map(|col| {
                    let range_km = config.first_gate_km + col as f64 * config.gate_spacing_km;
                    Gate {
                        azimuth_deg,
                        range_km,
                        location: geo::destination(site, azimuth_deg, range_km),
                    }
                })
                .collect()
        })
        .collect()
}

fn storm_dbz(storm: &SyntheticStorm, center: GeoPoint, gate: &Gate, elevation_deg: f64) -> Option<f32> {
    let height = beam_height_km(gate.range_km, elevation_deg);
    if height > storm.top_km {
        return None;
    }
    let ratio = geo::haversine_km(center, gate.location) / storm.radius_km.max(0.1);
    if ratio >= 1.0 {
        return None;
    }
    let falloff = (storm.peak_dbz - 20.0) * (ratio * ratio) as f32;
    Some(storm.peak_dbz - falloff - 3.0 * height as f32)
}

/// Radial component of storm motion plus any couplet, positive away from the radar.
fn storm_velocity(storm: &SyntheticStorm, center: GeoPoint, gate: &Gate) -> f32 {
    let (sin_az, cos_az) = gate.azimuth_deg.to_radians().sin_cos();
    let mut radial = (storm.east_mps * sin_az + storm.north_mps * cos_az) as f32;

    if let Some(couplet) = storm.couplet {
        let (east, north) = geo::east_north_km(center, gate.location);
        // Offset across the beam, positive clockwise.
        let across = east * cos_az - north * sin_az;
        let distance = east.hypot(north);
        let core = couplet.diameter_km / 2.0;
        if distance > 0.0 && distance < 3.0 * core {
            let tangential = f64::from(couplet.delta_v_mps) / 2.0
                * if distance < core {
                    distance / core
                } else {
                    core / distance
                };
            radial += (tangential * across / distance) as f32;
        }
    }
    radial
}

fn near_storm(config: &GeneratorConfig, centers: &[GeoPoint], gate: &Gate) -> Option<usize> {
    config
        .storms
        .iter()
        .zip(centers)
        .position(|(storm, center)| geo::haversine_km(*center, gate.location) < 3.0 * storm.radius_km)
}

/// Builds the full volume for scan number `scan_index`.
pub fn build_scan(config: &GeneratorConfig, scan_index: usize) -> anyhow::Result<ScanVolume> {
    let site = config.site()?;
    let timestamp = config.scan_time(scan_index);
    let geometry = config.geometry(site);
    let gates = gates(config, site);
    let centers: Vec<GeoPoint> = config
        .storms
        .iter()
        .map(|storm| config.storm_center(site, storm, scan_index))
        .collect();
    let seed = config.seed.wrapping_add(scan_index as u64);
    let mut rng = StdRng::seed_from_u64(seed);

    let mut elevations = config.elevations_deg.clone();
    if elevations.is_empty() {
        elevations.push(0.5);
    }
    elevations.sort_by(|a, b| a.total_cmp(b));

    let mut tilts = Vec::with_capacity(elevations.len());
    for &elevation in &elevations {
        let rows: Vec<Vec<f32>> = gates
            .iter()
            .map(|radial| {
                radial
                    .iter()
                    .map(|gate| {
                        let background = rng.gen_range(-5.0_f32..15.0);
                        let jitter = if config.noise_dbz > 0.0 {
                            rng.gen_range(-config.noise_dbz..config.noise_dbz)
                        } else {
                            0.0
                        };
                        config
                            .storms
                            .iter()
                            .zip(&centers)
                            .filter_map(|(storm, center)| storm_dbz(storm, *center, gate, elevation))
                            .map(|dbz| dbz + jitter)
                            .fold(background, f32::max)
                    })
                    .collect()
            })
            .collect();
        let meta = GridMeta::new(config.station.clone(), timestamp, elevation);
        let grid = Grid::new(meta, ProductKind::Reflectivity, rows, &geometry)
            .with_context(|| format!("building {:.1}° reflectivity tilt", elevation))?;
        tilts.push(grid);
    }

    let mut tilts = tilts.into_iter();
    let base = tilts.next().context("generator produced no reflectivity tilt")?;
    let mut volume = tilts.fold(ScanVolume::from_base(base), ScanVolume::with_tilt);

    if config.velocity {
        let rows: Vec<Vec<f32>> = gates
            .iter()
            .map(|radial| {
                radial
                    .iter()
                    .map(|gate| match near_storm(config, &centers, gate) {
                        Some(index) => storm_velocity(&config.storms[index], centers[index], gate),
                        None => f32::NAN,
                    })
                    .collect()
            })
            .collect();
        let meta = GridMeta::new(config.station.clone(), timestamp, elevations[0]);
        let velocity = Grid::new(meta, ProductKind::Velocity, rows, &geometry)
            .context("building velocity sweep")?;
        volume = volume.with_velocity(velocity);
    }

    Ok(volume)
}
