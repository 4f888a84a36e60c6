use crate::math::geo::{self, GeoPoint};
use crate::math::{DisjointSet, StatsHelper};
use crate::prelude::{EngineError, EngineResult};
use crate::radar_interface::grid::{Connectivity, Grid, ProductKind};
use crate::telemetry::log::LogManager;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmenterConfig {
    /// Cells must exceed this reflectivity to join a region.
    pub threshold_dbz: f32,
    pub min_area_cells: usize,
    pub connectivity: Connectivity,
    /// Regions whose centroids are this close are treated as one storm; 0 disables.
    pub merge_distance_km: f64,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            threshold_dbz: 35.0,
            min_area_cells: 4,
            connectivity: Connectivity::Eight,
            merge_distance_km: 5.0,
        }
    }
}

/// One member cell of a candidate region.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionCell {
    pub row: usize,
    pub col: usize,
    pub value: f32,
    pub location: GeoPoint,
    pub area_km2: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoBounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

impl GeoBounds {
    fn around(points: impl Iterator<Item = GeoPoint>) -> Self {
        points.fold(
            GeoBounds {
                min_lat: f64::INFINITY,
                max_lat: f64::NEG_INFINITY,
                min_lon: f64::INFINITY,
                max_lon: f64::NEG_INFINITY,
            },
            |bounds, p| GeoBounds {
                min_lat: bounds.min_lat.min(p.lat),
                max_lat: bounds.max_lat.max(p.lat),
                min_lon: bounds.min_lon.min(p.lon),
                max_lon: bounds.max_lon.max(p.lon),
            },
        )
    }

    pub fn contains(&self, point: GeoPoint) -> bool {
        (self.min_lat..=self.max_lat).contains(&point.lat)
            && (self.min_lon..=self.max_lon).contains(&point.lon)
    }

    /// Great-circle distance from `point` to the closest point of the box; 0 inside.
    pub fn distance_km(&self, point: GeoPoint) -> f64 {
        if self.min_lat > self.max_lat || self.min_lon > self.max_lon {
            return f64::INFINITY;
        }
        let nearest = GeoPoint::new(
            point.lat.clamp(self.min_lat, self.max_lat),
            point.lon.clamp(self.min_lon, self.max_lon),
        );
        geo::haversine_km(point, nearest)
    }
}

/// Connected above-threshold cells from a single scan.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateRegion {
    /// Members ordered by (row, col).
    pub cells: Vec<RegionCell>,
    pub peak_dbz: f32,
    /// Intensity-weighted centroid.
    pub centroid: GeoPoint,
    pub bounds: GeoBounds,
}

impl CandidateRegion {
    /// Builds a region from a non-empty set of member cells.
    pub fn from_cells(mut cells: Vec<RegionCell>) -> Self {
        cells.sort_by_key(|cell| (cell.row, cell.col));
        let peak_dbz = cells
            .iter()
            .map(|cell| cell.value)
            .fold(f32::NEG_INFINITY, f32::max);
        let centroid = weighted_centroid(&cells);
        let bounds = GeoBounds::around(cells.iter().map(|cell| cell.location));
        Self {
            cells,
            peak_dbz,
            centroid,
            bounds,
        }
    }

    pub fn area_cells(&self) -> usize {
        self.cells.len()
    }

    fn absorb(self, other: CandidateRegion) -> Self {
        let mut cells = self.cells;
        cells.extend(other.cells);
        Self::from_cells(cells)
    }
}

/// Σ value·coordinate / Σ value; falls back to the plain mean when no cell has positive weight.
pub fn weighted_centroid(cells: &[RegionCell]) -> GeoPoint {
    let weight = |cell: &RegionCell| f64::from(cell.value.max(0.0));
    let lat = StatsHelper::weighted_mean(cells.iter().map(|c| (c.location.lat, weight(c))));
    let lon = StatsHelper::weighted_mean(cells.iter().map(|c| (c.location.lon, weight(c))));
    match (lat, lon) {
        (Some(lat), Some(lon)) => GeoPoint::new(lat, lon),
        _ => {
            let lat = StatsHelper::weighted_mean(cells.iter().map(|c| (c.location.lat, 1.0)));
            let lon = StatsHelper::weighted_mean(cells.iter().map(|c| (c.location.lon, 1.0)));
            GeoPoint::new(lat.unwrap_or(f64::NAN), lon.unwrap_or(f64::NAN))
        }
    }
}

/// Thresholds a reflectivity grid into candidate storm regions.
pub struct Segmenter {
    config: SegmenterConfig,
    logger: LogManager,
}

impl Segmenter {
    pub fn new(config: SegmenterConfig) -> Self {
        Self {
            config,
            logger: LogManager::for_component("segmenter"),
        }
    }

    pub fn segment(&self, grid: &Grid) -> EngineResult<Vec<CandidateRegion>> {
        if grid.kind() != ProductKind::Reflectivity {
            return Err(EngineError::ScanMismatch(
                "segmentation requires a reflectivity grid".into(),
            ));
        }

        let (rows, cols) = grid.dim();
        let threshold = self.config.threshold_dbz;
        let above = |row: usize, col: usize| grid.value(row, col).is_some_and(|v| v > threshold);

        let mut sets = DisjointSet::new(rows * cols);
        for row in 0..rows {
            for col in 0..cols {
                if !above(row, col) {
                    continue;
                }
                for (nr, nc) in grid.neighbors(row, col, self.config.connectivity) {
                    if above(nr, nc) {
                        sets.union(row * cols + col, nr * cols + nc);
                    }
                }
            }
        }

        let mut components: BTreeMap<usize, Vec<RegionCell>> = BTreeMap::new();
        for row in 0..rows {
            for col in 0..cols {
                let Some(value) = grid.value(row, col).filter(|v| *v > threshold) else {
                    continue;
                };
                let Some(location) = grid.location(row, col) else {
                    continue;
                };
                let root = sets.find(row * cols + col);
                components.entry(root).or_default().push(RegionCell {
                    row,
                    col,
                    value,
                    location,
                    area_km2: grid.cell_area_km2(row, col),
                });
            }
        }

        let component_count = components.len();
        let kept: Vec<CandidateRegion> = components
            .into_values()
            .filter(|cells| cells.len() >= self.config.min_area_cells)
            .map(CandidateRegion::from_cells)
            .collect();
        let discarded = component_count - kept.len();

        let mut regions = self.merge_close_regions(kept);
        regions.sort_by(|a, b| {
            a.centroid
                .lat
                .total_cmp(&b.centroid.lat)
                .then(a.centroid.lon.total_cmp(&b.centroid.lon))
                .then(a.peak_dbz.total_cmp(&b.peak_dbz))
        });

        self.logger.detail(&format!(
            "Segmenter {} regions ({} components, {} below min area)",
            regions.len(),
            component_count,
            discarded
        ));
        Ok(regions)
    }

    // Closest qualifying pair first, repeated until no pair is within range.
    fn merge_close_regions(&self, mut regions: Vec<CandidateRegion>) -> Vec<CandidateRegion> {
        let limit = self.config.merge_distance_km;
        if limit <= 0.0 {
            return regions;
        }

        loop {
            let mut closest: Option<(usize, usize, f64)> = None;
            for i in 0..regions.len() {
                for j in (i + 1)..regions.len() {
                    let distance = geo::haversine_km(regions[i].centroid, regions[j].centroid);
                    if distance <= limit && closest.map_or(true, |(_, _, best)| distance < best) {
                        closest = Some((i, j, distance));
                    }
                }
            }

            let Some((keep, absorbed, _)) = closest else {
                return regions;
            };
            let other = regions.remove(absorbed);
            let merged = regions[keep].clone().absorb(other);
            regions[keep] = merged;
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::radar_interface::grid::tests::{regular, scan_time};
    use crate::radar_interface::grid::GridMeta;
    use std::collections::HashSet;

    pub(crate) const ORIGIN: GeoPoint = GeoPoint {
        lat: 35.0,
        lon: -97.5,
    };

    /// Writes a 3×3 block with `peak` at its centre and `edge` around it.
    pub(crate) fn stamp_block(
        rows: &mut [Vec<f32>],
        top: usize,
        left: usize,
        peak: f32,
        edge: f32,
    ) {
        for r in top..top + 3 {
            for c in left..left + 3 {
                rows[r][c] = if r == top + 1 && c == left + 1 { peak } else { edge };
            }
        }
    }

    pub(crate) fn reflectivity(rows: Vec<Vec<f32>>, minute: u32) -> Grid {
        Grid::new(
            GridMeta::new("KTLX", scan_time(minute), 0.5),
            ProductKind::Reflectivity,
            rows,
            &regular(ORIGIN, 0.01),
        )
        .unwrap()
    }

    #[test]
    fn single_block_yields_one_region() {
        let mut rows = vec![vec![10.0; 10]; 10];
        stamp_block(&mut rows, 3, 4, 45.0, 40.0);
        let regions = Segmenter::new(SegmenterConfig::default())
            .segment(&reflectivity(rows, 0))
            .unwrap();

        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].area_cells(), 9);
        assert_eq!(regions[0].peak_dbz, 45.0);
        let centre = GeoPoint::new(ORIGIN.lat + 0.04, ORIGIN.lon + 0.05);
        assert!(geo::haversine_km(regions[0].centroid, centre) < 1e-6);
        assert!(regions[0].bounds.contains(centre));
        assert_eq!(regions[0].bounds.distance_km(centre), 0.0);
        let east = GeoPoint::new(centre.lat, ORIGIN.lon + 0.11);
        let gap = regions[0].bounds.distance_km(east);
        assert!(gap > 4.0 && gap < 5.0, "gap {}", gap);
    }

    #[test]
    fn small_components_are_noise() {
        let mut rows = vec![vec![10.0; 10]; 10];
        rows[1][1] = 50.0;
        rows[1][2] = 50.0;
        let regions = Segmenter::new(SegmenterConfig::default())
            .segment(&reflectivity(rows, 0))
            .unwrap();
        assert!(regions.is_empty());
    }

    #[test]
    fn regions_are_disjoint_and_deterministic() {
        let mut rows = vec![vec![0.0; 40]; 12];
        stamp_block(&mut rows, 0, 0, 55.0, 45.0);
        stamp_block(&mut rows, 8, 18, 60.0, 42.0);
        stamp_block(&mut rows, 2, 34, 48.0, 38.0);
        rows[6][10] = f32::NAN;
        let grid = reflectivity(rows, 0);
        let segmenter = Segmenter::new(SegmenterConfig::default());

        let first = segmenter.segment(&grid).unwrap();
        let second = segmenter.segment(&grid).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 3);

        let mut seen = HashSet::new();
        for region in &first {
            for cell in &region.cells {
                assert!(seen.insert((cell.row, cell.col)), "cell claimed twice");
            }
        }

        let lats: Vec<f64> = first.iter().map(|r| r.centroid.lat).collect();
        assert!(lats.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn nearby_regions_merge_distant_regions_do_not() {
        let mut rows = vec![vec![0.0; 60]; 5];
        stamp_block(&mut rows, 1, 0, 50.0, 45.0);
        stamp_block(&mut rows, 1, 4, 50.0, 45.0);
        let regions = Segmenter::new(SegmenterConfig::default())
            .segment(&reflectivity(rows, 0))
            .unwrap();
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].area_cells(), 18);

        let mut rows = vec![vec![0.0; 60]; 5];
        stamp_block(&mut rows, 1, 0, 50.0, 45.0);
        stamp_block(&mut rows, 1, 55, 50.0, 45.0);
        let regions = Segmenter::new(SegmenterConfig::default())
            .segment(&reflectivity(rows, 0))
            .unwrap();
        assert_eq!(regions.len(), 2);
    }

    #[test]
    fn four_connectivity_splits_diagonal_touch() {
        let mut rows = vec![vec![0.0; 12]; 12];
        stamp_block(&mut rows, 0, 0, 50.0, 45.0);
        stamp_block(&mut rows, 3, 3, 50.0, 45.0);
        let config = SegmenterConfig {
            connectivity: Connectivity::Four,
            merge_distance_km: 0.0,
            ..Default::default()
        };
        let regions = Segmenter::new(config).segment(&reflectivity(rows.clone(), 0)).unwrap();
        assert_eq!(regions.len(), 2);

        let config = SegmenterConfig {
            merge_distance_km: 0.0,
            ..Default::default()
        };
        let regions = Segmenter::new(config).segment(&reflectivity(rows, 0)).unwrap();
        assert_eq!(regions.len(), 1);
    }

    #[test]
    fn velocity_grid_is_rejected() {
        let grid = Grid::new(
            GridMeta::new("KTLX", scan_time(0), 0.5),
            ProductKind::Velocity,
            vec![vec![0.0; 3]; 3],
            &regular(ORIGIN, 0.01),
        )
        .unwrap();
        let err = Segmenter::new(SegmenterConfig::default())
            .segment(&grid)
            .unwrap_err();
        assert!(matches!(err, EngineError::ScanMismatch(_)));
    }
}
