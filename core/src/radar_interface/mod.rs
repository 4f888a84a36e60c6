pub mod grid;
pub mod scan;
pub mod snapshot;

pub use grid::{Connectivity, Grid, GridGeometry, GridMeta, Product, ProductKind};
pub use scan::ScanVolume;
pub use snapshot::{
    StormCellRecord, TerminationReason, TrackEvent, TrackEventKind, TrackSnapshot,
};
