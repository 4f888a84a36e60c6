use crate::math::GeoPoint;
use crate::processing::segmenter::{weighted_centroid, CandidateRegion, GeoBounds};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Descriptors of one candidate region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionFeatures {
    pub peak_dbz: f32,
    pub peak_location: GeoPoint,
    pub centroid: GeoPoint,
    pub area_cells: usize,
    pub area_km2: f64,
    /// Diameter of a circle with the same area.
    pub effective_diameter_km: f64,
    /// Position in the scan ordered by intensity; 0 is the weakest region.
    pub intensity_rank: usize,
    pub bounds: GeoBounds,
}

pub struct FeatureExtractor;

impl FeatureExtractor {
    /// Features of a single region; `intensity_rank` is left at 0.
    pub fn extract(region: &CandidateRegion) -> RegionFeatures {
        // First cell wins ties, cells are in (row, col) order.
        let peak = region
            .cells
            .iter()
            .reduce(|best, cell| if cell.value > best.value { cell } else { best });
        let (peak_dbz, peak_location) = peak
            .map(|cell| (cell.value, cell.location))
            .unwrap_or((region.peak_dbz, region.centroid));

        let area_km2: f64 = region.cells.iter().map(|cell| cell.area_km2).sum();
        RegionFeatures {
            peak_dbz,
            peak_location,
            centroid: weighted_centroid(&region.cells),
            area_cells: region.area_cells(),
            area_km2,
            effective_diameter_km: 2.0 * (area_km2 / PI).sqrt(),
            intensity_rank: 0,
            bounds: region.bounds,
        }
    }

    /// Features of every region of a scan, in the same order, with intensity ranks.
    pub fn extract_all(regions: &[CandidateRegion]) -> Vec<RegionFeatures> {
        let mut features: Vec<RegionFeatures> = regions.iter().map(Self::extract).collect();

        let mut order: Vec<usize> = (0..features.len()).collect();
        order.sort_by(|&a, &b| {
            features[a]
                .peak_dbz
                .total_cmp(&features[b].peak_dbz)
                .then(features[a].area_km2.total_cmp(&features[b].area_km2))
                .then(b.cmp(&a))
        });
        for (rank, index) in order.into_iter().enumerate() {
            features[index].intensity_rank = rank;
        }
        features
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::segmenter::tests::{reflectivity, stamp_block};
    use crate::processing::segmenter::{RegionCell, Segmenter, SegmenterConfig};

    fn cell(row: usize, col: usize, value: f32, lat: f64, lon: f64) -> RegionCell {
        RegionCell {
            row,
            col,
            value,
            location: GeoPoint::new(lat, lon),
            area_km2: 1.0,
        }
    }

    #[test]
    fn centroid_is_weighted_towards_the_core() {
        let region = CandidateRegion::from_cells(vec![
            cell(0, 0, 40.0, 35.0, -97.0),
            cell(0, 1, 60.0, 35.0, -96.9),
        ]);
        let features = FeatureExtractor::extract(&region);
        assert!((features.centroid.lon - (-96.94)).abs() < 1e-9);
        assert_eq!(features.peak_dbz, 60.0);
        assert_eq!(features.peak_location, GeoPoint::new(35.0, -96.9));
    }

    #[test]
    fn effective_diameter_from_circular_area() {
        let cells = (0..4)
            .map(|i| cell(0, i, 45.0, 35.0, -97.0 + i as f64 * 0.01))
            .collect();
        let features = FeatureExtractor::extract(&CandidateRegion::from_cells(cells));
        assert_eq!(features.area_km2, 4.0);
        assert!((features.effective_diameter_km - 2.0 * (4.0 / PI).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn ranks_increase_with_intensity() {
        let mut rows = vec![vec![0.0; 40]; 6];
        stamp_block(&mut rows, 0, 0, 50.0, 40.0);
        stamp_block(&mut rows, 2, 15, 62.0, 45.0);
        stamp_block(&mut rows, 1, 30, 41.0, 38.0);
        let config = SegmenterConfig::default();
        let regions = Segmenter::new(config).segment(&reflectivity(rows, 0)).unwrap();
        let features = FeatureExtractor::extract_all(&regions);

        assert_eq!(features.len(), 3);
        let by_peak = |peak: f32| features.iter().find(|f| f.peak_dbz == peak).unwrap();
        assert_eq!(by_peak(41.0).intensity_rank, 0);
        assert_eq!(by_peak(50.0).intensity_rank, 1);
        assert_eq!(by_peak(62.0).intensity_rank, 2);
        assert_eq!(features, FeatureExtractor::extract_all(&regions));
    }
}
