use crate::prelude::{EngineError, EngineResult};
use crate::radar_interface::grid::{Grid, ProductKind};
use chrono::{DateTime, Utc};

/// Every grid available for one station at one scan time.
#[derive(Debug, Clone)]
pub struct ScanVolume {
    pub station: String,
    pub timestamp: DateTime<Utc>,
    /// Reflectivity tilts in ascending elevation; the first one is segmented.
    pub reflectivity: Vec<Grid>,
    pub velocity: Option<Grid>,
}

impl ScanVolume {
    /// Builds a volume from a base reflectivity sweep, taking station and time from it.
    pub fn from_base(base: Grid) -> Self {
        Self {
            station: base.station().to_string(),
            timestamp: base.timestamp(),
            reflectivity: vec![base],
            velocity: None,
        }
    }

    pub fn with_tilt(mut self, tilt: Grid) -> Self {
        self.reflectivity.push(tilt);
        self.reflectivity
            .sort_by(|a, b| a.elevation_deg().total_cmp(&b.elevation_deg()));
        self
    }

    pub fn with_velocity(mut self, velocity: Grid) -> Self {
        self.velocity = Some(velocity);
        self
    }

    /// Lowest reflectivity tilt.
    pub fn base(&self) -> EngineResult<&Grid> {
        self.reflectivity
            .first()
            .ok_or_else(|| EngineError::ScanMismatch("scan has no reflectivity grid".into()))
    }

    /// Checks that every grid belongs to this station and scan time and
    /// carries the expected product.
    pub fn validate(&self) -> EngineResult<()> {
        self.base()?;

        for grid in &self.reflectivity {
            self.check_grid(grid, ProductKind::Reflectivity)?;
        }
        if let Some(velocity) = &self.velocity {
            self.check_grid(velocity, ProductKind::Velocity)?;
        }

        let ascending = self
            .reflectivity
            .windows(2)
            .all(|pair| pair[0].elevation_deg() <= pair[1].elevation_deg());
        if !ascending {
            return Err(EngineError::ScanMismatch(
                "reflectivity tilts are not in ascending elevation".into(),
            ));
        }
        Ok(())
    }

    fn check_grid(&self, grid: &Grid, expected: ProductKind) -> EngineResult<()> {
        if grid.kind() != expected {
            return Err(EngineError::ScanMismatch(format!(
                "expected {:?} grid, found {:?}",
                expected,
                grid.kind()
            )));
        }
        if grid.station() != self.station {
            return Err(EngineError::ScanMismatch(format!(
                "grid from station {} in scan for {}",
                grid.station(),
                self.station
            )));
        }
        if grid.timestamp() != self.timestamp {
            return Err(EngineError::ScanMismatch(format!(
                "{:?} grid at {} in scan at {}",
                grid.kind(),
                grid.timestamp(),
                self.timestamp
            )));
        }
        if !grid.elevation_deg().is_finite() {
            return Err(EngineError::MalformedGrid(format!(
                "{:?} grid has a non-finite elevation",
                grid.kind()
            )));
        }
        Ok(())
    }
}
