use crate::math::geo::{self, GeoPoint};
use crate::processing::segmenter::CandidateRegion;
use crate::radar_interface::grid::{Grid, ProductKind};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RotationConfig {
    /// Minimum shear (s⁻¹) for a gate pair to join a couplet, and for MESO.
    pub meso_shear_per_s: f64,
    pub tvs_shear_per_s: f64,
    pub tvs_max_diameter_km: f64,
    pub meso_max_diameter_km: f64,
    /// Consecutive qualifying gate pairs required to accept a couplet.
    pub min_gate_pairs: usize,
    /// Largest offset tolerated when mapping footprint cells onto a
    /// velocity grid that is not co-registered.
    pub max_coregistration_km: f64,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            meso_shear_per_s: 0.005,
            tvs_shear_per_s: 0.02,
            tvs_max_diameter_km: 3.0,
            meso_max_diameter_km: 10.0,
            min_gate_pairs: 2,
            max_coregistration_km: 2.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationClass {
    /// No velocity data for this scan.
    Unknown,
    None,
    Meso,
    Tvs,
}

impl RotationClass {
    fn strength(self) -> u8 {
        match self {
            RotationClass::Unknown | RotationClass::None => 0,
            RotationClass::Meso => 1,
            RotationClass::Tvs => 2,
        }
    }

    pub fn is_rotating(self) -> bool {
        self.strength() > 0
    }
}

/// An inbound/outbound velocity pair bounding a run of strong shear.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Couplet {
    pub center: GeoPoint,
    pub diameter_km: f64,
    /// (outbound − inbound) / diameter.
    pub shear_per_s: f64,
    pub inbound_mps: f32,
    pub outbound_mps: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RotationAssessment {
    pub class: RotationClass,
    /// Strongest gate-to-gate shear magnitude in the footprint; `None` without velocity.
    pub peak_shear_per_s: Option<f64>,
    pub couplet: Option<Couplet>,
}

impl RotationAssessment {
    pub fn unknown() -> Self {
        Self {
            class: RotationClass::Unknown,
            peak_shear_per_s: None,
            couplet: None,
        }
    }

    /// Shear of the classified couplet, falling back to the peak gate-to-gate shear.
    pub fn shear_per_s(&self) -> Option<f64> {
        self.couplet
            .map(|couplet| couplet.shear_per_s)
            .or(self.peak_shear_per_s)
    }
}

type Footprint = BTreeSet<(usize, usize)>;

/// Scans velocity gates under each region for rotation couplets.
pub struct RotationAnalyzer {
    config: RotationConfig,
}

impl RotationAnalyzer {
    pub fn new(config: RotationConfig) -> Self {
        Self { config }
    }

    /// One assessment per region, in region order.
    pub fn analyze(
        &self,
        regions: &[CandidateRegion],
        base: &Grid,
        velocity: Option<&Grid>,
    ) -> Vec<RotationAssessment> {
        let Some(velocity) = velocity.filter(|grid| grid.kind() == ProductKind::Velocity) else {
            return vec![RotationAssessment::unknown(); regions.len()];
        };
        let co_registered = base.is_co_registered(velocity);

        regions
            .iter()
            .map(|region| {
                let footprint = self.footprint(region, velocity, co_registered);
                self.assess_footprint(&footprint, velocity)
            })
            .collect()
    }

    fn footprint(&self, region: &CandidateRegion, velocity: &Grid, co_registered: bool) -> Footprint {
        if co_registered {
            return region.cells.iter().map(|cell| (cell.row, cell.col)).collect();
        }
        region
            .cells
            .iter()
            .filter_map(|cell| {
                let (row, col) = velocity.nearest_cell(cell.location)?;
                let gate = velocity.location(row, col)?;
                (geo::haversine_km(cell.location, gate) <= self.config.max_coregistration_km)
                    .then_some((row, col))
            })
            .collect()
    }

    /// Classifies the strongest couplet among the given velocity gates.
    pub fn assess_footprint(&self, footprint: &Footprint, velocity: &Grid) -> RotationAssessment {
        let mut peak_shear: f64 = 0.0;
        let mut best: Option<(RotationClass, Couplet)> = None;

        for segment in Self::segments(footprint, velocity) {
            let (segment_peak, couplets) = self.scan_segment(&segment);
            peak_shear = peak_shear.max(segment_peak);
            for couplet in couplets {
                let class = self.classify(&couplet);
                if !class.is_rotating() {
                    continue;
                }
                let stronger = best.map_or(true, |(best_class, best_couplet)| {
                    (class.strength(), couplet.shear_per_s)
                        > (best_class.strength(), best_couplet.shear_per_s)
                });
                if stronger {
                    best = Some((class, couplet));
                }
            }
        }

        RotationAssessment {
            class: best.map_or(RotationClass::None, |(class, _)| class),
            peak_shear_per_s: Some(peak_shear),
            couplet: best.map(|(_, couplet)| couplet),
        }
    }

    fn classify(&self, couplet: &Couplet) -> RotationClass {
        let cfg = &self.config;
        if couplet.diameter_km <= cfg.tvs_max_diameter_km
            && couplet.shear_per_s >= cfg.tvs_shear_per_s
        {
            RotationClass::Tvs
        } else if couplet.diameter_km <= cfg.meso_max_diameter_km
            && couplet.shear_per_s >= cfg.meso_shear_per_s
        {
            RotationClass::Meso
        } else {
            RotationClass::None
        }
    }

    // Contiguous runs of valid gates along rows and along columns.
    fn segments(footprint: &Footprint, velocity: &Grid) -> Vec<Vec<(GeoPoint, f32)>> {
        // (axis, line index) -> (position along the line, cell)
        let mut lines: BTreeMap<(u8, usize), Vec<(usize, (usize, usize))>> = BTreeMap::new();
        for &(row, col) in footprint {
            lines.entry((0, row)).or_default().push((col, (row, col)));
            lines.entry((1, col)).or_default().push((row, (row, col)));
        }

        let mut segments = Vec::new();
        for gates in lines.values() {
            let mut current: Vec<(GeoPoint, f32)> = Vec::new();
            let mut last: Option<usize> = None;
            for &(pos, (row, col)) in gates {
                let sample = velocity.location(row, col).zip(velocity.value(row, col));
                let contiguous = last.map_or(true, |prev| prev + 1 == pos);
                if sample.is_none() || !contiguous {
                    segments.push(std::mem::take(&mut current));
                }
                match sample {
                    Some(sample) => {
                        current.push(sample);
                        last = Some(pos);
                    }
                    None => last = None,
                }
            }
            segments.push(current);
        }

        segments.retain(|segment| segment.len() >= 2);
        segments
    }

    // Returns the peak pair shear and every couplet found along one segment.
    fn scan_segment(&self, gates: &[(GeoPoint, f32)]) -> (f64, Vec<Couplet>) {
        let mut peak: f64 = 0.0;
        let mut couplets = Vec::new();
        // (first gate index, sign, pair count)
        let mut run: Option<(usize, f64, usize)> = None;

        for i in 0..gates.len().saturating_sub(1) {
            let (here, v0) = gates[i];
            let (next, v1) = gates[i + 1];
            let separation_m = geo::haversine_km(here, next) * 1000.0;
            let shear = if separation_m > 0.0 {
                f64::from(v1 - v0) / separation_m
            } else {
                0.0
            };
            peak = peak.max(shear.abs());

            let qualifies = shear.abs() >= self.config.meso_shear_per_s;
            let sign = shear.signum();
            run = match run {
                Some((start, run_sign, pairs)) if qualifies && run_sign == sign => {
                    Some((start, run_sign, pairs + 1))
                }
                previous => {
                    if let Some((start, _, pairs)) = previous {
                        couplets.extend(self.close_run(gates, start, i, pairs));
                    }
                    qualifies.then_some((i, sign, 1))
                }
            };
        }
        if let Some((start, _, pairs)) = run {
            couplets.extend(self.close_run(gates, start, gates.len() - 1, pairs));
        }

        (peak, couplets)
    }

    fn close_run(
        &self,
        gates: &[(GeoPoint, f32)],
        start: usize,
        end: usize,
        pairs: usize,
    ) -> Option<Couplet> {
        if pairs < self.config.min_gate_pairs {
            return None;
        }
        let (first, v_first) = gates[start];
        let (last, v_last) = gates[end];
        let inbound = v_first.min(v_last);
        let outbound = v_first.max(v_last);
        if !(inbound < 0.0 && outbound > 0.0) {
            return None;
        }

        let diameter_km = geo::haversine_km(first, last);
        if diameter_km <= 0.0 {
            return None;
        }
        let center = GeoPoint::new((first.lat + last.lat) / 2.0, (first.lon + last.lon) / 2.0);
        Some(Couplet {
            center,
            diameter_km,
            shear_per_s: f64::from(outbound - inbound) / (diameter_km * 1000.0),
            inbound_mps: inbound,
            outbound_mps: outbound,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::radar_interface::grid::tests::scan_time;
    use crate::radar_interface::grid::{GridGeometry, GridMeta};
    use crate::processing::segmenter::{Segmenter, SegmenterConfig};

    const ROWS: usize = 14;
    const COLS: usize = 6;

    fn geometry() -> GridGeometry {
        // Roughly 1 km between neighbouring gates in both directions at 35°N.
        GridGeometry::Regular {
            origin: GeoPoint::new(35.0, -97.5),
            lat_step_deg: 0.009,
            lon_step_deg: 0.011,
        }
    }

    fn grid(kind: ProductKind, rows: Vec<Vec<f32>>) -> Grid {
        Grid::new(GridMeta::new("KTLX", scan_time(0), 0.5), kind, rows, &geometry()).unwrap()
    }

    fn storm() -> (Grid, Vec<CandidateRegion>) {
        let base = grid(ProductKind::Reflectivity, vec![vec![50.0; COLS]; ROWS]);
        let regions = Segmenter::new(SegmenterConfig::default()).segment(&base).unwrap();
        (base, regions)
    }

    /// Column 2 ramps from −25 m/s to +25 m/s over `width` gates starting at row 2.
    fn couplet_velocity(width: usize) -> Grid {
        let mut rows = vec![vec![0.0_f32; COLS]; ROWS];
        for step in 0..=width {
            let v = -25.0 + 50.0 * step as f32 / width as f32;
            rows[2 + step][2] = v;
        }
        grid(ProductKind::Velocity, rows)
    }

    #[test]
    fn missing_velocity_is_unknown_not_none() {
        let (base, regions) = storm();
        let result = RotationAnalyzer::new(RotationConfig::default()).analyze(&regions, &base, None);
        assert_eq!(result[0].class, RotationClass::Unknown);
        assert_eq!(result[0].peak_shear_per_s, None);
    }

    #[test]
    fn tight_couplet_is_tvs() {
        let (base, regions) = storm();
        let velocity = couplet_velocity(2);
        let result = RotationAnalyzer::new(RotationConfig::default())
            .analyze(&regions, &base, Some(&velocity));
        let rotation = result[0];
        assert_eq!(rotation.class, RotationClass::Tvs);
        let couplet = rotation.couplet.unwrap();
        assert!((couplet.diameter_km - 2.0).abs() < 0.05);
        assert!(couplet.shear_per_s > 0.024);
        assert_eq!((couplet.inbound_mps, couplet.outbound_mps), (-25.0, 25.0));
    }

    #[test]
    fn wide_couplet_is_meso() {
        let (base, regions) = storm();
        let velocity = couplet_velocity(8);
        let result = RotationAnalyzer::new(RotationConfig::default())
            .analyze(&regions, &base, Some(&velocity));
        assert_eq!(result[0].class, RotationClass::Meso);
        let couplet = result[0].couplet.unwrap();
        assert!((couplet.diameter_km - 8.0).abs() < 0.1);
        assert!(result[0].peak_shear_per_s.unwrap() >= couplet.shear_per_s);
    }

    #[test]
    fn single_gate_spike_is_rejected() {
        let (base, regions) = storm();
        let mut rows = vec![vec![0.0_f32; COLS]; ROWS];
        rows[5][2] = -25.0;
        rows[6][2] = 25.0;
        let velocity = grid(ProductKind::Velocity, rows);
        let result = RotationAnalyzer::new(RotationConfig::default())
            .analyze(&regions, &base, Some(&velocity));
        assert_eq!(result[0].class, RotationClass::None);
        assert!(result[0].peak_shear_per_s.unwrap() > 0.04);
    }

    #[test]
    fn uniform_flow_has_no_rotation() {
        let (base, regions) = storm();
        let velocity = grid(ProductKind::Velocity, vec![vec![12.0; COLS]; ROWS]);
        let result = RotationAnalyzer::new(RotationConfig::default())
            .analyze(&regions, &base, Some(&velocity));
        assert_eq!(result[0].class, RotationClass::None);
        assert_eq!(result[0].peak_shear_per_s, Some(0.0));
    }

    #[test]
    fn offset_velocity_grid_maps_through_nearest_gate() {
        let (base, regions) = storm();
        let mut rows = vec![vec![0.0_f32; COLS]; ROWS];
        for step in 0..=2 {
            rows[2 + step][2] = -25.0 + 25.0 * step as f32;
        }
        let shifted = GridGeometry::Regular {
            origin: GeoPoint::new(35.0001, -97.5001),
            lat_step_deg: 0.009,
            lon_step_deg: 0.011,
        };
        let velocity = Grid::new(
            GridMeta::new("KTLX", scan_time(0), 0.5),
            ProductKind::Velocity,
            rows,
            &shifted,
        )
        .unwrap();
        assert!(!base.is_co_registered(&velocity));
        let result = RotationAnalyzer::new(RotationConfig::default())
            .analyze(&regions, &base, Some(&velocity));
        assert_eq!(result[0].class, RotationClass::Tvs);
    }
}
