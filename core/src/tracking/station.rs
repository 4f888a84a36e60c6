use crate::prelude::{EngineConfig, EngineError, EngineResult, FreezingLevelSource};
use crate::processing::features::FeatureExtractor;
use crate::processing::hail::{HailEstimator, ProfileSampler};
use crate::processing::rotation::RotationAnalyzer;
use crate::processing::segmenter::Segmenter;
use crate::processing::threat::ThreatClassifier;
use crate::radar_interface::scan::ScanVolume;
use crate::radar_interface::snapshot::{StormCellRecord, TrackEvent, TrackEventKind, TrackSnapshot};
use crate::telemetry::log::LogManager;
use crate::tracking::manager::TrackManager;
use crate::tracking::track::CellObservation;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Everything one station's pipeline keeps between scans.
pub struct StationTracker {
    station: String,
    segmenter: Segmenter,
    rotation: RotationAnalyzer,
    hail: HailEstimator,
    threat: ThreatClassifier,
    tracks: TrackManager,
    snapshot: Arc<TrackSnapshot>,
    logger: LogManager,
}

/// A fully computed pass that has not touched the station state yet.
pub struct PendingPass {
    scan_time: DateTime<Utc>,
    tracks: TrackManager,
    snapshot: Arc<TrackSnapshot>,
    events: Vec<TrackEvent>,
    regions: usize,
}

/// Summary of a committed pass.
#[derive(Debug, Clone)]
pub struct ScanReport {
    pub station: String,
    pub scan_time: DateTime<Utc>,
    pub sequence: u64,
    /// Regions produced by segmentation, before the intensity filter.
    pub regions: usize,
    pub events: Vec<TrackEvent>,
    pub snapshot: Arc<TrackSnapshot>,
}

impl ScanReport {
    fn count(&self, matches: impl Fn(&TrackEventKind) -> bool) -> u64 {
        self.events.iter().filter(|event| matches(&event.kind)).count() as u64
    }

    pub fn births(&self) -> u64 {
        self.count(|kind| matches!(kind, TrackEventKind::Born { .. }))
    }

    pub fn terminations(&self) -> u64 {
        self.count(|kind| matches!(kind, TrackEventKind::Terminated { .. }))
    }

    pub fn merges(&self) -> u64 {
        self.count(|kind| matches!(kind, TrackEventKind::Merged { .. }))
    }

    pub fn splits(&self) -> u64 {
        self.count(|kind| matches!(kind, TrackEventKind::Split { .. }))
    }
}

impl StationTracker {
    pub fn new(station: impl Into<String>, config: &EngineConfig) -> Self {
        let station = station.into();
        Self {
            snapshot: Arc::new(TrackSnapshot::empty(station.clone())),
            station,
            segmenter: Segmenter::new(config.segmenter.clone()),
            rotation: RotationAnalyzer::new(config.rotation.clone()),
            hail: HailEstimator::new(config.hail.clone()),
            threat: ThreatClassifier::new(config.threat.clone()),
            tracks: TrackManager::new(config.tracker.clone()),
            logger: LogManager::for_component("station"),
        }
    }

    pub fn station(&self) -> &str {
        &self.station
    }

    pub fn snapshot(&self) -> Arc<TrackSnapshot> {
        Arc::clone(&self.snapshot)
    }

    pub fn tracks(&self) -> &TrackManager {
        &self.tracks
    }

    /// Runs the full pipeline for `scan` against a copy of the registry.
    pub fn prepare(
        &self,
        scan: &ScanVolume,
        freezing: &dyn FreezingLevelSource,
    ) -> EngineResult<PendingPass> {
        if scan.station != self.station {
            return Err(EngineError::ScanMismatch(format!(
                "scan for {} submitted to {}",
                scan.station, self.station
            )));
        }
        scan.validate()?;
        let base = scan.base()?;

        let regions = self.segmenter.segment(base)?;
        let features = FeatureExtractor::extract_all(&regions);
        let rotations = self.rotation.analyze(&regions, base, scan.velocity.as_ref());
        let sampler = ProfileSampler::new(&scan.reflectivity);
        let observations: Vec<CellObservation> = regions
            .iter()
            .zip(features)
            .zip(rotations)
            .map(|((region, features), rotation)| {
                let freezing_km = freezing.freezing_level_km(features.centroid, scan.timestamp);
                let hail = self.hail.estimate(&sampler.profile(region), freezing_km);
                CellObservation {
                    features,
                    rotation,
                    hail,
                }
            })
            .collect();

        let mut tracks = self.tracks.clone();
        let changes = tracks.update(scan.timestamp, observations);
        let trend_threshold = tracks.config().trend_threshold_dbz;
        let cells = tracks
            .tracks()
            .map(|track| {
                StormCellRecord::new(
                    track.cell().clone(),
                    track.trend(trend_threshold),
                    self.threat.classify(track.cell()),
                )
            })
            .collect();
        let snapshot = Arc::new(TrackSnapshot {
            station: self.station.clone(),
            scan_time: Some(scan.timestamp),
            sequence: self.snapshot.sequence + 1,
            cells,
        });
        let events = changes
            .into_iter()
            .map(|(id, kind)| TrackEvent {
                station: self.station.clone(),
                scan_time: scan.timestamp,
                id,
                kind,
            })
            .collect();

        Ok(PendingPass {
            scan_time: scan.timestamp,
            tracks,
            snapshot,
            events,
            regions: regions.len(),
        })
    }

    /// Prepares and immediately commits a pass.
    pub fn process(
        &mut self,
        scan: &ScanVolume,
        freezing: &dyn FreezingLevelSource,
    ) -> EngineResult<ScanReport> {
        let pass = self.prepare(scan, freezing)?;
        Ok(pass.commit(self))
    }
}

impl PendingPass {
    pub fn snapshot(&self) -> &TrackSnapshot {
        &self.snapshot
    }

    /// Replaces the station's registry and snapshot with this pass.
    /// Panics if another pass was committed since this one was prepared.
    pub fn commit(self, tracker: &mut StationTracker) -> ScanReport {
        assert_eq!(
            self.snapshot.sequence,
            tracker.snapshot.sequence + 1,
            "stale pass for {}",
            tracker.station
        );
        tracker.tracks = self.tracks;
        tracker.snapshot = Arc::clone(&self.snapshot);
        for event in &self.events {
            tracker.logger.event("track_event", event);
        }
        tracker.logger.record(&format!(
            "{} pass {}: {} regions, {} cells, {} events",
            tracker.station,
            self.snapshot.sequence,
            self.regions,
            self.snapshot.cells.len(),
            self.events.len()
        ));

        ScanReport {
            station: tracker.station.clone(),
            scan_time: self.scan_time,
            sequence: self.snapshot.sequence,
            regions: self.regions,
            events: self.events,
            snapshot: self.snapshot,
        }
    }
}
