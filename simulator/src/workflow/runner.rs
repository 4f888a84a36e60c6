use crate::generator::profile::{build_scan, GeneratorConfig};
use crate::workflow::config::WorkflowConfig;
use crate::workflow::journal::Journal;
use anyhow::{bail, Context};
use log::info;
use std::sync::Arc;
use stormcore::radar_interface::TrackSnapshot;
use stormcore::tracking::{ScanReport, StormEngine};
use tokio::sync::Mutex;

pub struct WorkflowResult {
    pub reports: Vec<ScanReport>,
}

impl WorkflowResult {
    pub fn last_snapshot(&self) -> Option<Arc<TrackSnapshot>> {
        self.reports.last().map(|report| Arc::clone(&report.snapshot))
    }

    pub fn event_count(&self) -> usize {
        self.reports.iter().map(|report| report.events.len()).sum()
    }
}

/// Feeds generated scans through a shared engine.
#[derive(Clone)]
pub struct Runner {
    config: Arc<WorkflowConfig>,
    engine: StormEngine,
    /// Index of the next generated scan; held for a whole ingest so scans
    /// reach the engine in time order.
    next_scan: Arc<Mutex<usize>>,
}

impl Runner {
    pub fn new(config: WorkflowConfig) -> Self {
        let engine = StormEngine::new(config.engine.clone(), config.freezing_source());
        Self {
            config: Arc::new(config),
            engine,
            next_scan: Arc::new(Mutex::new(0)),
        }
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    pub fn engine(&self) -> &StormEngine {
        &self.engine
    }

    /// Generates the next scan from `generator` and waits for its pass.
    /// Scans older than the station's last committed scan are rejected.
    pub async fn ingest(&self, generator: &GeneratorConfig) -> anyhow::Result<ScanReport> {
        let mut next_scan = self.next_scan.lock().await;
        let index = *next_scan;
        let owned = generator.clone();
        let scan = tokio::task::spawn_blocking(move || build_scan(&owned, index))
            .await
            .context("joining scan generator")?
            .with_context(|| format!("generating scan {} for {}", index, generator.station))?;

        let last = self
            .engine
            .snapshot(&scan.station)
            .and_then(|snapshot| snapshot.scan_time);
        if let Some(last) = last {
            if scan.timestamp < last {
                bail!(
                    "scan at {} for {} is older than the last committed scan at {}",
                    scan.timestamp,
                    scan.station,
                    last
                );
            }
        }
        *next_scan += 1;

        let report = self
            .engine
            .submit(scan)
            .outcome()
            .await
            .with_context(|| format!("processing scan {} for {}", index, generator.station))?;
        info!(
            "{} scan {} -> {} cells, {} events",
            report.station,
            index,
            report.snapshot.cells.len(),
            report.events.len()
        );
        Ok(report)
    }

    /// Runs the configured number of scans, journaling every event.
    pub async fn execute(&self, mut journal: Option<&mut Journal>) -> anyhow::Result<WorkflowResult> {
        let mut reports = Vec::with_capacity(self.config.scans);
        for _ in 0..self.config.scans {
            let report = self.ingest(&self.config.generator).await?;
            if let Some(journal) = journal.as_deref_mut() {
                for event in &report.events {
                    journal.append(event)?;
                }
            }
            reports.push(report);
        }
        if let Some(journal) = journal {
            journal.flush()?;
        }
        Ok(WorkflowResult { reports })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stormcore::processing::rotation::RotationClass;
    use stormcore::tracking::StormId;

    fn small_workflow(scans: usize) -> WorkflowConfig {
        let mut cfg = WorkflowConfig::from_args("KTLX", scans, 5);
        cfg.generator.gates = 120;
        cfg
    }

    #[tokio::test]
    async fn runner_tracks_generated_storms() {
        let runner = Runner::new(small_workflow(3));
        let result = runner.execute(None).await.unwrap();
        assert_eq!(result.reports.len(), 3);

        let births: u64 = result.reports.iter().map(|r| r.births()).sum();
        assert_eq!(births, 2);
        let snapshot = result.last_snapshot().unwrap();
        assert_eq!(snapshot.ids(), vec![StormId(1), StormId(2)]);
        assert_eq!(snapshot.sequence, 3);
        assert!(snapshot
            .cells
            .iter()
            .all(|record| record.cell.rotation.class != RotationClass::Unknown));
        assert!(snapshot.cells.iter().all(|record| record.cell.motion.is_some()));
        assert_eq!(runner.engine().metrics().scans_processed, 3);
    }

    #[tokio::test]
    async fn older_scan_is_rejected_before_submission() {
        let runner = Runner::new(small_workflow(1));
        let generator = runner.config().generator.clone();
        runner.ingest(&generator).await.unwrap();

        let earlier = GeneratorConfig {
            start: generator.start - chrono::Duration::hours(1),
            ..generator.clone()
        };
        let err = runner.ingest(&earlier).await.unwrap_err();
        assert!(format!("{:#}", err).contains("older than the last committed scan"));
        assert_eq!(runner.engine().metrics().scans_processed, 1);

        let report = runner.ingest(&generator).await.unwrap();
        assert_eq!(report.sequence, 2);
    }

    #[tokio::test]
    async fn runner_journals_every_event() {
        let dir = tempfile::tempdir().unwrap();
        let mut journal = Journal::open(dir.path().join("events.log")).unwrap();
        let runner = Runner::new(small_workflow(2));
        let result = runner.execute(Some(&mut journal)).await.unwrap();
        assert_eq!(journal.written(), result.event_count());

        let contents = std::fs::read_to_string(journal.path()).unwrap();
        assert_eq!(contents.lines().count(), result.event_count());
    }
}
