use crate::math::geo::{self, GeoPoint};
use crate::prelude::{EngineError, EngineResult};
use chrono::{DateTime, Utc};
use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};

/// Radar product carried by a grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductKind {
    /// Reflectivity factor, dBZ.
    Reflectivity,
    /// Radial velocity, m/s (positive outbound).
    Velocity,
}

/// Sample payload tagged by product. Missing samples are `NaN`.
#[derive(Debug, Clone, PartialEq)]
pub enum Product {
    Reflectivity(Array2<f32>),
    Velocity(Array2<f32>),
}

impl Product {
    fn from_kind(kind: ProductKind, samples: Array2<f32>) -> Self {
        match kind {
            ProductKind::Reflectivity => Product::Reflectivity(samples),
            ProductKind::Velocity => Product::Velocity(samples),
        }
    }

    pub fn kind(&self) -> ProductKind {
        match self {
            Product::Reflectivity(_) => ProductKind::Reflectivity,
            Product::Velocity(_) => ProductKind::Velocity,
        }
    }

    pub fn samples(&self) -> ArrayView2<'_, f32> {
        match self {
            Product::Reflectivity(samples) | Product::Velocity(samples) => samples.view(),
        }
    }
}

/// Neighbourhood used for adjacency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Connectivity {
    Four,
    Eight,
}

const FOUR_NEIGHBORS: [(isize, isize); 4] = [(-1, 0), (0, -1), (0, 1), (1, 0)];
const EIGHT_NEIGHBORS: [(isize, isize); 8] = [
    (-1, -1),
    (-1, 0),
    (-1, 1),
    (0, -1),
    (0, 1),
    (1, -1),
    (1, 0),
    (1, 1),
];

impl Connectivity {
    fn offsets(self) -> &'static [(isize, isize)] {
        match self {
            Connectivity::Four => &FOUR_NEIGHBORS,
            Connectivity::Eight => &EIGHT_NEIGHBORS,
        }
    }
}

/// Sweep identification shared by every grid of a scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridMeta {
    pub station: String,
    pub timestamp: DateTime<Utc>,
    pub elevation_deg: f64,
    /// Radar antenna location, required for beam-height computations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site: Option<GeoPoint>,
}

impl GridMeta {
    pub fn new(station: impl Into<String>, timestamp: DateTime<Utc>, elevation_deg: f64) -> Self {
        Self {
            station: station.into(),
            timestamp,
            elevation_deg,
            site: None,
        }
    }

    pub fn with_site(mut self, site: GeoPoint) -> Self {
        self.site = Some(site);
        self
    }
}

/// Built-in coordinate mappings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GridGeometry {
    /// Rows are radials at `azimuths_deg`, columns are range gates.
    Polar {
        site: GeoPoint,
        first_gate_km: f64,
        gate_spacing_km: f64,
        azimuths_deg: Vec<f64>,
    },
    /// Row/column steps in degrees from the location of cell (0, 0).
    Regular {
        origin: GeoPoint,
        lat_step_deg: f64,
        lon_step_deg: f64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct RegularLayout {
    origin: GeoPoint,
    lat_step_deg: f64,
    lon_step_deg: f64,
}

/// One radar sweep of a single product, immutable after construction.
#[derive(Debug, Clone, PartialEq)]
pub struct Grid {
    meta: GridMeta,
    product: Product,
    latitudes: Array2<f64>,
    longitudes: Array2<f64>,
    regular: Option<RegularLayout>,
}

impl Grid {
    /// Builds a grid from sample rows and an arbitrary `(row, col)` mapping.
    pub fn from_mapping<F>(
        meta: GridMeta,
        kind: ProductKind,
        rows: Vec<Vec<f32>>,
        mapping: F,
    ) -> EngineResult<Self>
    where
        F: Fn(usize, usize) -> GeoPoint,
    {
        let samples = samples_from_rows(rows)?;
        let (row_count, col_count) = samples.dim();

        let mut latitudes = Array2::<f64>::zeros((row_count, col_count));
        let mut longitudes = Array2::<f64>::zeros((row_count, col_count));
        for row in 0..row_count {
            for col in 0..col_count {
                let point = mapping(row, col);
                if !point.is_valid() {
                    return Err(EngineError::MalformedGrid(format!(
                        "cell ({}, {}) maps outside geographic bounds: {:.4}, {:.4}",
                        row, col, point.lat, point.lon
                    )));
                }
                latitudes[[row, col]] = point.lat;
                longitudes[[row, col]] = point.lon;
            }
        }

        if let Some(site) = meta.site {
            if !site.is_valid() {
                return Err(EngineError::MalformedGrid(format!(
                    "site outside geographic bounds: {:.4}, {:.4}",
                    site.lat, site.lon
                )));
            }
        }

        Ok(Self {
            meta,
            product: Product::from_kind(kind, samples),
            latitudes,
            longitudes,
            regular: None,
        })
    }

    /// Builds a grid using one of the built-in geometries.
    pub fn new(
        meta: GridMeta,
        kind: ProductKind,
        rows: Vec<Vec<f32>>,
        geometry: &GridGeometry,
    ) -> EngineResult<Self> {
        match geometry {
            GridGeometry::Polar {
                site,
                first_gate_km,
                gate_spacing_km,
                azimuths_deg,
            } => {
                if rows.len() != azimuths_deg.len() {
                    return Err(EngineError::MalformedGrid(format!(
                        "{} radials but {} azimuths",
                        rows.len(),
                        azimuths_deg.len()
                    )));
                }
                if !(gate_spacing_km.is_finite() && *gate_spacing_km > 0.0)
                    || !(first_gate_km.is_finite() && *first_gate_km >= 0.0)
                {
                    return Err(EngineError::MalformedGrid(
                        "gate spacing must be positive and first gate non-negative".into(),
                    ));
                }
                let meta = if meta.site.is_none() {
                    meta.with_site(*site)
                } else {
                    meta
                };
                Self::from_mapping(meta, kind, rows, |row, col| {
                    let range_km = first_gate_km + col as f64 * gate_spacing_km;
                    geo::destination(*site, azimuths_deg[row], range_km)
                })
            }
            GridGeometry::Regular {
                origin,
                lat_step_deg,
                lon_step_deg,
            } => {
                if *lat_step_deg == 0.0 || *lon_step_deg == 0.0 {
                    return Err(EngineError::MalformedGrid(
                        "regular grid steps must be non-zero".into(),
                    ));
                }
                let mut grid = Self::from_mapping(meta, kind, rows, |row, col| {
                    GeoPoint::new(
                        origin.lat + row as f64 * lat_step_deg,
                        origin.lon + col as f64 * lon_step_deg,
                    )
                })?;
                grid.regular = Some(RegularLayout {
                    origin: *origin,
                    lat_step_deg: *lat_step_deg,
                    lon_step_deg: *lon_step_deg,
                });
                Ok(grid)
            }
        }
    }

    pub fn meta(&self) -> &GridMeta {
        &self.meta
    }

    pub fn station(&self) -> &str {
        &self.meta.station
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.meta.timestamp
    }

    pub fn elevation_deg(&self) -> f64 {
        self.meta.elevation_deg
    }

    pub fn site(&self) -> Option<GeoPoint> {
        self.meta.site
    }

    pub fn kind(&self) -> ProductKind {
        self.product.kind()
    }

    pub fn product(&self) -> &Product {
        &self.product
    }

    pub fn samples(&self) -> ArrayView2<'_, f32> {
        self.product.samples()
    }

    /// `(rows, cols)`.
    pub fn dim(&self) -> (usize, usize) {
        self.latitudes.dim()
    }

    pub fn len(&self) -> usize {
        let (rows, cols) = self.dim();
        rows * cols
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sample at `(row, col)`; `None` when out of range or missing.
    pub fn value(&self, row: usize, col: usize) -> Option<f32> {
        self.samples()
            .get((row, col))
            .copied()
            .filter(|value| !value.is_nan())
    }

    pub fn location(&self, row: usize, col: usize) -> Option<GeoPoint> {
        let lat = self.latitudes.get((row, col))?;
        let lon = self.longitudes.get((row, col))?;
        Some(GeoPoint::new(*lat, *lon))
    }

    /// In-bounds neighbours of `(row, col)` in a fixed order.
    pub fn neighbors(
        &self,
        row: usize,
        col: usize,
        connectivity: Connectivity,
    ) -> impl Iterator<Item = (usize, usize)> + '_ {
        let (rows, cols) = self.dim();
        connectivity.offsets().iter().filter_map(move |&(dr, dc)| {
            let r = row.checked_add_signed(dr)?;
            let c = col.checked_add_signed(dc)?;
            (r < rows && c < cols).then_some((r, c))
        })
    }

    /// Approximate footprint of one cell in km², from the spacing to its neighbours.
    pub fn cell_area_km2(&self, row: usize, col: usize) -> f64 {
        let along_row = self.step_km(row, col, (0, 1));
        let along_col = self.step_km(row, col, (1, 0));
        match (along_row, along_col) {
            (Some(dx), Some(dy)) => dx * dy,
            (Some(d), None) | (None, Some(d)) => d * d,
            (None, None) => 0.0,
        }
    }

    fn step_km(&self, row: usize, col: usize, (dr, dc): (usize, usize)) -> Option<f64> {
        let here = self.location(row, col)?;
        if let Some(next) = self.location(row + dr, col + dc) {
            return Some(geo::haversine_km(here, next));
        }
        let prev = self.location(row.checked_sub(dr)?, col.checked_sub(dc)?)?;
        Some(geo::haversine_km(here, prev))
    }

    /// Cell whose centre is closest to `point`.
    ///
    /// Regular grids answer analytically and return `None` outside the grid;
    /// other geometries search exhaustively.
    pub fn nearest_cell(&self, point: GeoPoint) -> Option<(usize, usize)> {
        let (rows, cols) = self.dim();
        if let Some(layout) = self.regular {
            let row = ((point.lat - layout.origin.lat) / layout.lat_step_deg).round();
            let col = ((point.lon - layout.origin.lon) / layout.lon_step_deg).round();
            if row < 0.0 || col < 0.0 || row >= rows as f64 || col >= cols as f64 {
                return None;
            }
            return Some((row as usize, col as usize));
        }

        let cos_lat = point.lat.to_radians().cos();
        let mut best: Option<((usize, usize), f64)> = None;
        for ((row, col), lat) in self.latitudes.indexed_iter() {
            let dlat = lat - point.lat;
            let dlon = (self.longitudes[[row, col]] - point.lon) * cos_lat;
            let dist = dlat * dlat + dlon * dlon;
            if best.map_or(true, |(_, current)| dist < current) {
                best = Some(((row, col), dist));
            }
        }
        best.map(|(cell, _)| cell)
    }

    /// True when `other` samples exactly the same locations.
    pub fn is_co_registered(&self, other: &Grid) -> bool {
        const TOLERANCE_DEG: f64 = 1e-9;
        self.dim() == other.dim()
            && self
                .latitudes
                .iter()
                .zip(other.latitudes.iter())
                .chain(self.longitudes.iter().zip(other.longitudes.iter()))
                .all(|(a, b)| (a - b).abs() <= TOLERANCE_DEG)
    }

    /// Slant range from the radar site to `(row, col)` in km, when the site is known.
    pub fn range_km(&self, row: usize, col: usize) -> Option<f64> {
        let site = self.site()?;
        Some(geo::haversine_km(site, self.location(row, col)?))
    }
}

fn samples_from_rows(rows: Vec<Vec<f32>>) -> EngineResult<Array2<f32>> {
    let row_count = rows.len();
    let col_count = rows.first().map(Vec::len).unwrap_or(0);
    if row_count == 0 || col_count == 0 {
        return Err(EngineError::MalformedGrid("grid has no samples".into()));
    }

    let mut flat = Vec::with_capacity(row_count * col_count);
    for (index, row) in rows.into_iter().enumerate() {
        if row.len() != col_count {
            return Err(EngineError::MalformedGrid(format!(
                "row {} has {} samples, expected {}",
                index,
                row.len(),
                col_count
            )));
        }
        if let Some(bad) = row.iter().find(|value| value.is_infinite()) {
            return Err(EngineError::MalformedGrid(format!(
                "row {} contains non-finite sample {}",
                index, bad
            )));
        }
        flat.extend(row);
    }

    Array2::from_shape_vec((row_count, col_count), flat)
        .map_err(|err| EngineError::MalformedGrid(err.to_string()))
}
