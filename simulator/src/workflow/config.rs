use crate::generator::profile::GeneratorConfig;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use stormcore::prelude::{EngineConfig, FixedFreezingLevel, FreezingLevelSource, NoFreezingLevel};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    pub engine: EngineConfig,
    pub generator: GeneratorConfig,
    /// Number of consecutive scans an offline run generates.
    pub scans: usize,
    /// Freezing level applied everywhere; absent means unknown.
    pub freezing_level_km: Option<f64>,
    pub journal: PathBuf,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            generator: GeneratorConfig::default(),
            scans: 6,
            freezing_level_km: Some(4.0),
            journal: PathBuf::from("tools/data/track_events.log"),
        }
    }
}

impl WorkflowConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path_ref = path.as_ref();
        let contents = fs::read_to_string(path_ref)
            .with_context(|| format!("reading workflow config {}", path_ref.display()))?;
        let config: WorkflowConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("parsing workflow config {}", path_ref.display()))?;
        Ok(config)
    }

    pub fn from_args(station: &str, scans: usize, seed: u64) -> Self {
        let defaults = Self::default();
        Self {
            generator: GeneratorConfig {
                station: station.to_uppercase(),
                seed,
                ..defaults.generator
            },
            scans,
            ..defaults
        }
    }

    pub fn freezing_source(&self) -> Arc<dyn FreezingLevelSource> {
        match self.freezing_level_km {
            Some(height) => Arc::new(FixedFreezingLevel(height)),
            None => Arc::new(NoFreezingLevel),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn config_from_args_overrides_generator() {
        let cfg = WorkflowConfig::from_args("kfws", 3, 42);
        assert_eq!(cfg.generator.station, "KFWS");
        assert_eq!(cfg.generator.seed, 42);
        assert_eq!(cfg.scans, 3);
        assert_eq!(cfg.engine, EngineConfig::default());
    }

    #[test]
    fn config_load_reads_yaml() {
        let mut temp = NamedTempFile::new().unwrap();
        temp.write_all(
            b"scans: 4\nfreezing_level_km: null\nengine:\n  segmenter:\n    threshold_dbz: 30.0\n  tracker:\n    miss_tolerance: 1\ngenerator:\n  station: KINX\n  velocity: false\n",
        )
        .unwrap();
        let path = temp.into_temp_path();
        let cfg = WorkflowConfig::load(&path).unwrap();
        assert_eq!(cfg.scans, 4);
        assert_eq!(cfg.freezing_level_km, None);
        assert_eq!(cfg.engine.segmenter.threshold_dbz, 30.0);
        assert_eq!(cfg.engine.segmenter.min_area_cells, 4);
        assert_eq!(cfg.engine.tracker.miss_tolerance, 1);
        assert_eq!(cfg.generator.station, "KINX");
        assert!(!cfg.generator.velocity);
        assert_eq!(cfg.generator.gates, 160);
    }

    #[test]
    fn config_load_reports_bad_yaml() {
        let mut temp = NamedTempFile::new().unwrap();
        temp.write_all(b"scans: [not a number\n").unwrap();
        let path = temp.into_temp_path();
        let err = WorkflowConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains("parsing workflow config"));
    }
}
