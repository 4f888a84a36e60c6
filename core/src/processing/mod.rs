pub mod features;
pub mod hail;
pub mod rotation;
pub mod segmenter;
pub mod threat;

pub use features::{FeatureExtractor, RegionFeatures};
pub use hail::{HailEstimate, HailEstimator, ProfileSampler};
pub use rotation::{RotationAnalyzer, RotationAssessment, RotationClass};
pub use segmenter::{CandidateRegion, Segmenter};
pub use threat::{ThreatAssessment, ThreatClassifier, ThreatTier};
