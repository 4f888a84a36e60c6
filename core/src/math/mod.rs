pub mod assignment;
pub mod disjoint_set;
pub mod geo;
pub mod stats;

pub use assignment::AssignmentSolver;
pub use disjoint_set::DisjointSet;
pub use geo::GeoPoint;
pub use stats::StatsHelper;
