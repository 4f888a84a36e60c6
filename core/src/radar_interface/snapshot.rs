use crate::processing::threat::ThreatAssessment;
use crate::tracking::track::{StormCell, StormId, Trend};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Read-only view of one storm cell as published after a pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StormCellRecord {
    #[serde(flatten)]
    pub cell: StormCell,
    pub trend: Trend,
    pub threat: ThreatAssessment,
    pub bearing_deg: Option<f64>,
    pub speed_mph: Option<f64>,
}

impl StormCellRecord {
    pub fn new(cell: StormCell, trend: Trend, threat: ThreatAssessment) -> Self {
        let bearing_deg = cell.motion.map(|motion| motion.bearing_deg());
        let speed_mph = cell.motion.map(|motion| motion.speed_mph());
        Self {
            cell,
            trend,
            threat,
            bearing_deg,
            speed_mph,
        }
    }

    pub fn id(&self) -> StormId {
        self.cell.id
    }
}

/// Committed registry state of one station, cells ordered by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackSnapshot {
    pub station: String,
    pub scan_time: Option<DateTime<Utc>>,
    /// Number of committed passes.
    pub sequence: u64,
    pub cells: Vec<StormCellRecord>,
}

impl TrackSnapshot {
    pub fn empty(station: impl Into<String>) -> Self {
        Self {
            station: station.into(),
            scan_time: None,
            sequence: 0,
            cells: Vec::new(),
        }
    }

    pub fn cell(&self, id: StormId) -> Option<&StormCellRecord> {
        self.cells.iter().find(|record| record.id() == id)
    }

    pub fn ids(&self) -> Vec<StormId> {
        self.cells.iter().map(StormCellRecord::id).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    /// Unmatched for more scans than the miss tolerance.
    MissLimit,
    Merged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TrackEventKind {
    Born { parent: Option<StormId> },
    Updated,
    Coasting { misses: u32 },
    Merged { into: StormId },
    Split { child: StormId },
    Terminated { reason: TerminationReason },
}

/// Lifecycle change of one storm cell during a committed pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackEvent {
    pub station: String,
    pub scan_time: DateTime<Utc>,
    pub id: StormId,
    #[serde(flatten)]
    pub kind: TrackEventKind,
}
