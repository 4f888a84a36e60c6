use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stormcore::radar_interface::TrackEvent;
use stormcore::tracking::ScanReport;

/// Response to a generated-scan ingest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestSummary {
    pub status: String,
    pub station: String,
    pub scan_time: DateTime<Utc>,
    pub sequence: u64,
    pub regions: usize,
    pub cells: usize,
    pub events: Vec<TrackEvent>,
    pub description: String,
}

impl IngestSummary {
    pub fn from_report(report: &ScanReport, description: Option<&str>) -> Self {
        Self {
            status: "ok".into(),
            station: report.station.clone(),
            scan_time: report.scan_time,
            sequence: report.sequence,
            regions: report.regions,
            cells: report.snapshot.cells.len(),
            events: report.events.clone(),
            description: description.unwrap_or_default().to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub status: String,
    pub message: String,
}

impl ErrorBody {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: "error".into(),
            message: message.into(),
        }
    }
}
