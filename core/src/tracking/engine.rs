use crate::prelude::{EngineConfig, EngineError, EngineResult, FreezingLevelSource};
use crate::radar_interface::scan::ScanVolume;
use crate::radar_interface::snapshot::{TrackEvent, TrackSnapshot};
use crate::telemetry::log::LogManager;
use crate::telemetry::metrics::{MetricsRecorder, MetricsSnapshot};
use crate::tracking::station::{ScanReport, StationTracker};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc, oneshot, watch};

const EVENT_CAPACITY: usize = 1024;

struct Shared {
    config: EngineConfig,
    freezing: Arc<dyn FreezingLevelSource>,
    metrics: MetricsRecorder,
    events: broadcast::Sender<TrackEvent>,
    logger: LogManager,
}

struct Job {
    scan: ScanVolume,
    cancelled: Arc<AtomicBool>,
    reply: oneshot::Sender<EngineResult<ScanReport>>,
}

struct StationHandle {
    queue: mpsc::UnboundedSender<Job>,
    snapshot: watch::Receiver<Arc<TrackSnapshot>>,
}

/// Multi-station front end: one worker task per station, scans of a station
/// processed in submission order.
///
/// Workers are spawned on the ambient tokio runtime the first time a station
/// is seen, so `submit` must be called from within one.
#[derive(Clone)]
pub struct StormEngine {
    shared: Arc<Shared>,
    stations: Arc<Mutex<HashMap<String, StationHandle>>>,
}

/// Handle to a submitted scan.
pub struct PendingScan {
    station: String,
    cancelled: Arc<AtomicBool>,
    outcome: oneshot::Receiver<EngineResult<ScanReport>>,
}

impl PendingScan {
    /// Prevents the pass from being committed if it has not been already.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub async fn outcome(self) -> EngineResult<ScanReport> {
        match self.outcome.await {
            Ok(result) => result,
            Err(_) => Err(EngineError::WorkerStopped(self.station)),
        }
    }
}

impl StormEngine {
    pub fn new(config: EngineConfig, freezing: Arc<dyn FreezingLevelSource>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                config,
                freezing,
                metrics: MetricsRecorder::new(),
                events,
                logger: LogManager::for_component("engine"),
            }),
            stations: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    pub fn submit(&self, scan: ScanVolume) -> PendingScan {
        let station = scan.station.clone();
        let cancelled = Arc::new(AtomicBool::new(false));
        let (reply, outcome) = oneshot::channel();
        let job = Job {
            scan,
            cancelled: Arc::clone(&cancelled),
            reply,
        };

        match self.stations.lock() {
            Ok(mut stations) => {
                let handle = stations
                    .entry(station.clone())
                    .or_insert_with(|| self.spawn_station(&station));
                if let Err(mpsc::error::SendError(job)) = handle.queue.send(job) {
                    self.shared
                        .logger
                        .warn(&format!("worker for {} is gone", station));
                    let _ = job.reply.send(Err(EngineError::WorkerStopped(station.clone())));
                }
            }
            Err(_) => {
                let _ = job.reply.send(Err(EngineError::WorkerStopped(station.clone())));
            }
        }

        PendingScan {
            station,
            cancelled,
            outcome,
        }
    }

    /// Latest committed snapshot for `station`, if it was ever submitted.
    pub fn snapshot(&self, station: &str) -> Option<Arc<TrackSnapshot>> {
        let stations = self.stations.lock().ok()?;
        let handle = stations.get(station)?;
        let snapshot = handle.snapshot.borrow().clone();
        Some(snapshot)
    }

    /// Receiver notified on every commit for `station`.
    pub fn watch(&self, station: &str) -> Option<watch::Receiver<Arc<TrackSnapshot>>> {
        let stations = self.stations.lock().ok()?;
        stations.get(station).map(|handle| handle.snapshot.clone())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TrackEvent> {
        self.shared.events.subscribe()
    }

    pub fn stations(&self) -> Vec<String> {
        let mut names: Vec<String> = match self.stations.lock() {
            Ok(stations) => stations.keys().cloned().collect(),
            Err(_) => Vec::new(),
        };
        names.sort();
        names
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    fn spawn_station(&self, station: &str) -> StationHandle {
        let tracker = StationTracker::new(station, &self.shared.config);
        let (queue, jobs) = mpsc::unbounded_channel();
        let (publish, snapshot) = watch::channel(tracker.snapshot());
        self.shared
            .logger
            .record(&format!("starting worker for {}", station));
        tokio::spawn(run_station(tracker, jobs, publish, Arc::clone(&self.shared)));
        StationHandle { queue, snapshot }
    }
}

async fn run_station(
    mut tracker: StationTracker,
    mut jobs: mpsc::UnboundedReceiver<Job>,
    publish: watch::Sender<Arc<TrackSnapshot>>,
    shared: Arc<Shared>,
) {
    while let Some(job) = jobs.recv().await {
        let station = tracker.station().to_string();
        if job.cancelled.load(Ordering::SeqCst) {
            shared.metrics.record_aborted();
            let _ = job.reply.send(Err(EngineError::Cancelled(station)));
            continue;
        }

        let pass = match tracker.prepare(&job.scan, shared.freezing.as_ref()) {
            Ok(pass) => pass,
            Err(err) => {
                shared
                    .logger
                    .warn(&format!("pass for {} aborted: {}", station, err));
                shared.metrics.record_aborted();
                let _ = job.reply.send(Err(err));
                continue;
            }
        };
        if job.cancelled.load(Ordering::SeqCst) {
            shared.metrics.record_aborted();
            let _ = job.reply.send(Err(EngineError::Cancelled(station)));
            continue;
        }

        let report = pass.commit(&mut tracker);
        publish.send_replace(Arc::clone(&report.snapshot));
        for event in &report.events {
            // No subscribers is fine.
            let _ = shared.events.send(event.clone());
        }
        shared.metrics.record_processed();
        shared.metrics.record_lifecycle(
            report.births(),
            report.terminations(),
            report.merges(),
            report.splits(),
        );
        let _ = job.reply.send(Ok(report));
        tokio::task::yield_now().await;
    }
}
