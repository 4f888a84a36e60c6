//! Storm-cell detection, tracking and threat classification for weather radar.
//!
//! Each scan flows through segmentation, feature extraction, rotation and
//! hail analysis before the per-station track manager associates the regions
//! with persistent storm cells and the threat classifier ranks them.

pub mod math;
pub mod prelude;
pub mod processing;
pub mod radar_interface;
pub mod telemetry;
pub mod tracking;

pub use prelude::{EngineConfig, EngineError, EngineResult, FreezingLevelSource};
pub use radar_interface::{Grid, GridGeometry, ScanVolume, TrackEvent, TrackSnapshot};
pub use tracking::{StormEngine, StormId};
