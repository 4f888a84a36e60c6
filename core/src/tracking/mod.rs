pub mod engine;
pub mod manager;
pub mod station;
pub mod track;

pub use engine::{PendingScan, StormEngine};
pub use manager::{TrackManager, TrackerConfig};
pub use station::{PendingPass, ScanReport, StationTracker};
pub use track::{CellObservation, MotionVector, StormCell, StormId, Track, TrackState, Trend};
