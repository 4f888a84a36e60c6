use crate::processing::rotation::{RotationAssessment, RotationClass};
use crate::tracking::track::StormCell;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreatConfig {
    /// TVS plus hail above this probability is extreme.
    pub extreme_hail_probability: f64,
    pub meso_hail_probability: f64,
    pub strong_meso_shear_per_s: f64,
    pub severe_hail_probability: f64,
    pub moderate_hail_probability: f64,
    pub minor_hail_probability: f64,
    pub moderate_dbz: f32,
    pub minor_dbz: f32,
    /// Scans a rotation observation stays usable once velocity drops out.
    pub rotation_memory_scans: u32,
}

impl Default for ThreatConfig {
    fn default() -> Self {
        Self {
            extreme_hail_probability: 0.7,
            meso_hail_probability: 0.5,
            strong_meso_shear_per_s: 0.01,
            severe_hail_probability: 0.7,
            moderate_hail_probability: 0.4,
            minor_hail_probability: 0.1,
            moderate_dbz: 60.0,
            minor_dbz: 50.0,
            rotation_memory_scans: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreatTier {
    None,
    Minor,
    Moderate,
    Severe,
    Extreme,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreatIndicator {
    TornadoVortexSignature,
    Mesocyclone,
    StrongShear,
    SevereHail,
    HailPossible,
    ExtremeReflectivity,
    HighReflectivity,
    RotationUnavailable,
    RotationCarriedForward,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreatAssessment {
    pub tier: ThreatTier,
    pub indicators: Vec<ThreatIndicator>,
}

pub struct ThreatClassifier {
    config: ThreatConfig,
}

impl ThreatClassifier {
    pub fn new(config: ThreatConfig) -> Self {
        Self { config }
    }

    pub fn classify(&self, cell: &StormCell) -> ThreatAssessment {
        let mut indicators = Vec::new();
        let rotation = self.effective_rotation(cell, &mut indicators);
        let hail = cell.hail.probability;
        let peak = cell.peak_dbz;
        let cfg = &self.config;

        let mut tier = ThreatTier::None;
        let mut raise = |candidate: ThreatTier| tier = tier.max(candidate);

        let strong_shear = rotation
            .shear_per_s()
            .map_or(false, |shear| shear >= cfg.strong_meso_shear_per_s);
        match rotation.class {
            RotationClass::Tvs => {
                indicators.push(ThreatIndicator::TornadoVortexSignature);
                raise(if hail > cfg.extreme_hail_probability {
                    ThreatTier::Extreme
                } else {
                    ThreatTier::Severe
                });
            }
            RotationClass::Meso => {
                indicators.push(ThreatIndicator::Mesocyclone);
                if strong_shear {
                    indicators.push(ThreatIndicator::StrongShear);
                }
                raise(if hail > cfg.meso_hail_probability || strong_shear {
                    ThreatTier::Severe
                } else {
                    ThreatTier::Moderate
                });
            }
            RotationClass::None | RotationClass::Unknown => {}
        }

        if hail >= cfg.severe_hail_probability {
            indicators.push(ThreatIndicator::SevereHail);
            raise(ThreatTier::Severe);
        } else if hail >= cfg.moderate_hail_probability {
            indicators.push(ThreatIndicator::HailPossible);
            raise(ThreatTier::Moderate);
        } else if hail >= cfg.minor_hail_probability {
            indicators.push(ThreatIndicator::HailPossible);
            raise(ThreatTier::Minor);
        }

        if peak >= cfg.moderate_dbz {
            indicators.push(ThreatIndicator::ExtremeReflectivity);
            raise(ThreatTier::Moderate);
        } else if peak >= cfg.minor_dbz {
            indicators.push(ThreatIndicator::HighReflectivity);
            raise(ThreatTier::Minor);
        }

        ThreatAssessment { tier, indicators }
    }

    /// Rotation to classify on; an unknown scan falls back to recent memory.
    fn effective_rotation(
        &self,
        cell: &StormCell,
        indicators: &mut Vec<ThreatIndicator>,
    ) -> RotationAssessment {
        if cell.rotation.class != RotationClass::Unknown {
            return cell.rotation;
        }
        match cell.last_known_rotation {
            Some(memory) if memory.scans_since <= self.config.rotation_memory_scans => {
                indicators.push(ThreatIndicator::RotationCarriedForward);
                memory.assessment
            }
            _ => {
                indicators.push(ThreatIndicator::RotationUnavailable);
                cell.rotation
            }
        }
    }
}

impl Default for ThreatClassifier {
    fn default() -> Self {
        Self::new(ThreatConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::GeoPoint;
    use crate::processing::hail::HailEstimate;
    use crate::radar_interface::grid::tests::scan_time;
    use crate::tracking::track::tests::observation;
    use crate::tracking::track::{RotationMemory, StormId, Track};

    fn cell(class: RotationClass, shear: Option<f64>, hail: f64, peak: f32) -> StormCell {
        let mut observed = observation(GeoPoint::new(35.2, -97.4), peak);
        observed.rotation = RotationAssessment {
            class,
            peak_shear_per_s: shear,
            couplet: None,
        };
        observed.hail = HailEstimate {
            probability: hail,
            ..HailEstimate::none()
        };
        Track::born(StormId(1), None, &observed, scan_time(0), 4)
            .cell()
            .clone()
    }

    fn tier(cell: &StormCell) -> ThreatTier {
        ThreatClassifier::default().classify(cell).tier
    }

    #[test]
    fn decision_table() {
        use RotationClass::*;
        assert_eq!(tier(&cell(Tvs, Some(0.03), 0.8, 55.0)), ThreatTier::Extreme);
        assert_eq!(tier(&cell(Tvs, Some(0.03), 0.7, 55.0)), ThreatTier::Severe);
        assert_eq!(tier(&cell(Meso, Some(0.006), 0.6, 45.0)), ThreatTier::Severe);
        assert_eq!(tier(&cell(Meso, Some(0.012), 0.0, 45.0)), ThreatTier::Severe);
        assert_eq!(tier(&cell(Meso, Some(0.006), 0.2, 45.0)), ThreatTier::Moderate);
        assert_eq!(tier(&cell(None, Some(0.001), 0.75, 45.0)), ThreatTier::Severe);
        assert_eq!(tier(&cell(None, Some(0.001), 0.45, 45.0)), ThreatTier::Moderate);
        assert_eq!(tier(&cell(None, Some(0.001), 0.0, 62.0)), ThreatTier::Moderate);
        assert_eq!(tier(&cell(None, Some(0.001), 0.0, 52.0)), ThreatTier::Minor);
        assert_eq!(tier(&cell(None, Some(0.001), 0.15, 45.0)), ThreatTier::Minor);
        assert_eq!(tier(&cell(None, Some(0.001), 0.0, 45.0)), ThreatTier::None);
    }

    #[test]
    fn indicators_explain_the_tier() {
        let assessment =
            ThreatClassifier::default().classify(&cell(RotationClass::Meso, Some(0.015), 0.2, 61.0));
        assert_eq!(assessment.tier, ThreatTier::Severe);
        assert!(assessment.indicators.contains(&ThreatIndicator::Mesocyclone));
        assert!(assessment.indicators.contains(&ThreatIndicator::StrongShear));
        assert!(assessment.indicators.contains(&ThreatIndicator::ExtremeReflectivity));
    }

    #[test]
    fn unknown_rotation_neither_escalates_nor_downgrades() {
        let mut current = cell(RotationClass::Unknown, None, 0.0, 45.0);
        let assessment = ThreatClassifier::default().classify(&current);
        assert_eq!(assessment.tier, ThreatTier::None);
        assert_eq!(assessment.indicators, vec![ThreatIndicator::RotationUnavailable]);

        current.last_known_rotation = Some(RotationMemory {
            assessment: RotationAssessment {
                class: RotationClass::Tvs,
                peak_shear_per_s: Some(0.03),
                couplet: None,
            },
            scans_since: 2,
        });
        let carried = ThreatClassifier::default().classify(&current);
        assert_eq!(carried.tier, ThreatTier::Severe);
        assert!(carried.indicators.contains(&ThreatIndicator::RotationCarriedForward));

        if let Some(memory) = current.last_known_rotation.as_mut() {
            memory.scans_since = 4;
        }
        assert_eq!(tier(&current), ThreatTier::None);
    }
}
