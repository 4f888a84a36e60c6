use crate::math::geo::{self, GeoPoint};
use crate::math::AssignmentSolver;
use crate::radar_interface::snapshot::{TerminationReason, TrackEventKind};
use crate::telemetry::log::LogManager;
use crate::tracking::track::{CellObservation, StormId, Track, TrackState};
use chrono::{DateTime, Utc};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Cost given to pairs outside the association gate.
const GATED_OUT: f64 = 1.0e9;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub max_storm_speed_mps: f64,
    pub gate_floor_km: f64,
    /// Association cost added per dBZ of peak difference.
    pub intensity_penalty_km_per_dbz: f64,
    pub smoothing_alpha: f64,
    pub miss_tolerance: u32,
    pub min_peak_dbz: f32,
    pub history_limit: usize,
    pub trend_threshold_dbz: f32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            max_storm_speed_mps: 40.0,
            gate_floor_km: 2.0,
            intensity_penalty_km_per_dbz: 0.5,
            smoothing_alpha: 0.5,
            miss_tolerance: 2,
            min_peak_dbz: 40.0,
            history_limit: 64,
            trend_threshold_dbz: 3.0,
        }
    }
}

/// Owner of one station's live tracks.
#[derive(Debug, Clone)]
pub struct TrackManager {
    config: TrackerConfig,
    tracks: BTreeMap<StormId, Track>,
    next_id: u64,
    last_scan: Option<DateTime<Utc>>,
    logger: LogManager,
}

/// Result of association for one scan, as indices into the track and
/// region lists.
struct Association {
    /// Region held by each track.
    held: Vec<Option<usize>>,
    /// Track that absorbed each merged-away track.
    merged_into: Vec<Option<usize>>,
    /// Parent track of each region spun off by a split.
    split_from: Vec<Option<usize>>,
}

impl TrackManager {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            tracks: BTreeMap::new(),
            next_id: 1,
            last_scan: None,
            logger: LogManager::for_component("tracker"),
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn tracks(&self) -> impl Iterator<Item = &Track> {
        self.tracks.values()
    }

    pub fn get(&self, id: StormId) -> Option<&Track> {
        self.tracks.get(&id)
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn last_scan(&self) -> Option<DateTime<Utc>> {
        self.last_scan
    }

    /// Associates one scan's observations with the live tracks and applies the
    /// resulting lifecycle changes. Panics if `scan_time` precedes the
    /// previous scan.
    pub fn update(
        &mut self,
        scan_time: DateTime<Utc>,
        observations: Vec<CellObservation>,
    ) -> Vec<(StormId, TrackEventKind)> {
        if let Some(previous) = self.last_scan {
            assert!(
                scan_time >= previous,
                "scan at {} precedes the previous scan at {}",
                scan_time,
                previous
            );
        }

        let regions: Vec<CellObservation> = observations
            .into_iter()
            .filter(|obs| obs.features.peak_dbz >= self.config.min_peak_dbz)
            .collect();
        let ids: Vec<StormId> = self.tracks.keys().copied().collect();
        let costs = self.cost_matrix(&ids, &regions, scan_time);
        let association = self.associate(&ids, &regions, &costs, scan_time);

        let mut events = Vec::new();
        let tolerance = self.config.miss_tolerance;
        for (t, id) in ids.iter().enumerate() {
            if let Some(survivor) = association.merged_into[t] {
                let into = ids[survivor];
                if let Some(track) = self.tracks.get_mut(id) {
                    track.apply_merge();
                }
                self.tracks.remove(id);
                events.push((*id, TrackEventKind::Merged { into }));
                events.push((
                    *id,
                    TrackEventKind::Terminated {
                        reason: TerminationReason::Merged,
                    },
                ));
                continue;
            }
            let Some(track) = self.tracks.get_mut(id) else {
                continue;
            };
            match association.held[t] {
                Some(r) => {
                    track.apply_match(&regions[r], scan_time, self.config.smoothing_alpha, tolerance);
                    events.push((*id, TrackEventKind::Updated));
                }
                None => match track.apply_miss(scan_time, tolerance) {
                    TrackState::Terminated => {
                        self.tracks.remove(id);
                        events.push((
                            *id,
                            TrackEventKind::Terminated {
                                reason: TerminationReason::MissLimit,
                            },
                        ));
                    }
                    _ => events.push((
                        *id,
                        TrackEventKind::Coasting {
                            misses: track.cell().misses,
                        },
                    )),
                },
            }
        }

        let held: BTreeSet<usize> = association.held.iter().flatten().copied().collect();
        for (r, region) in regions.iter().enumerate() {
            if held.contains(&r) {
                continue;
            }
            let parent = association.split_from[r].map(|t| ids[t]);
            let id = self.allocate_id();
            let track = Track::born(id, parent, region, scan_time, self.config.history_limit);
            self.tracks.insert(id, track);
            if let Some(parent) = parent {
                events.push((parent, TrackEventKind::Split { child: id }));
            }
            events.push((id, TrackEventKind::Born { parent }));
        }

        self.last_scan = Some(scan_time);
        self.logger.detail(&format!(
            "{} regions, {} live tracks, {} events at {}",
            regions.len(),
            self.tracks.len(),
            events.len(),
            scan_time
        ));
        events
    }

    fn allocate_id(&mut self) -> StormId {
        let id = StormId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Distance from each track's predicted position to each region centroid
    /// plus the intensity penalty, or `None` when outside the gate.
    fn cost_matrix(
        &self,
        ids: &[StormId],
        regions: &[CellObservation],
        scan_time: DateTime<Utc>,
    ) -> Array2<Option<f64>> {
        let mut costs = Array2::from_elem((ids.len(), regions.len()), None);
        for (t, id) in ids.iter().enumerate() {
            let Some(track) = self.tracks.get(id) else {
                continue;
            };
            let predicted = track.extrapolated(scan_time);
            let elapsed = track.elapsed_since_observed(scan_time).max(0.0);
            let gate_km = self
                .config
                .gate_floor_km
                .max(self.config.max_storm_speed_mps * elapsed / 1000.0);
            for (r, region) in regions.iter().enumerate() {
                let distance = geo::haversine_km(predicted, region.features.centroid);
                if distance <= gate_km {
                    let intensity = (region.features.peak_dbz - track.cell().peak_dbz).abs();
                    costs[(t, r)] = Some(
                        distance + self.config.intensity_penalty_km_per_dbz * f64::from(intensity),
                    );
                }
            }
        }
        costs
    }

    fn associate(
        &self,
        ids: &[StormId],
        regions: &[CellObservation],
        costs: &Array2<Option<f64>>,
        scan_time: DateTime<Utc>,
    ) -> Association {
        let dense = costs.mapv(|cost| cost.unwrap_or(GATED_OUT));
        let mut held: Vec<Option<usize>> = AssignmentSolver::solve(dense.view())
            .into_iter()
            .enumerate()
            .map(|(t, r)| r.filter(|&r| costs[(t, r)].is_some()))
            .collect();
        let mut holder: Vec<Option<usize>> = vec![None; regions.len()];
        for (t, r) in held.iter().enumerate() {
            if let Some(r) = r {
                holder[*r] = Some(t);
            }
        }

        let best_region = |t: usize| -> Option<usize> {
            (0..regions.len())
                .filter_map(|r| costs[(t, r)].map(|cost| (r, cost)))
                .min_by(|a, b| a.1.total_cmp(&b.1))
                .map(|(r, _)| r)
        };
        let best_track = |r: usize, exclude: &[Option<usize>]| -> Option<usize> {
            (0..ids.len())
                .filter(|&t| exclude[t].is_none())
                .filter_map(|t| costs[(t, r)].map(|cost| (t, cost)))
                .min_by(|a, b| a.1.total_cmp(&b.1))
                .map(|(t, _)| t)
        };

        // Predicted position and radius of each track's storm.
        let footprints: Vec<Option<(GeoPoint, f64)>> = ids
            .iter()
            .map(|id| {
                self.tracks.get(id).map(|track| {
                    (track.extrapolated(scan_time), track.cell().effective_diameter_km / 2.0)
                })
            })
            .collect();
        let overlaps = |t: usize, r: usize| {
            footprints[t].is_some_and(|(predicted, radius_km)| {
                regions[r].features.bounds.distance_km(predicted) <= radius_km
            })
        };

        // Merges: an unmatched track whose best region is already held and
        // overlaps its predicted footprint.
        let mut merged_into: Vec<Option<usize>> = vec![None; ids.len()];
        for t in 0..ids.len() {
            if held[t].is_some() || merged_into[t].is_some() {
                continue;
            }
            let Some(r) = best_region(t) else {
                continue;
            };
            let Some(other) = holder[r] else {
                continue;
            };
            if !overlaps(t, r) {
                continue;
            }
            let (survivor, absorbed) = if self.outranks(ids[t], ids[other]) {
                (t, other)
            } else {
                (other, t)
            };
            held[absorbed] = None;
            held[survivor] = Some(r);
            holder[r] = Some(survivor);
            merged_into[absorbed] = Some(survivor);
            for target in merged_into.iter_mut() {
                if *target == Some(absorbed) {
                    *target = Some(survivor);
                }
            }
            self.logger.detail(&format!("{} merged into {}", ids[absorbed], ids[survivor]));
        }

        // Splits: an unmatched region within the footprint of a track that
        // already holds another.
        let mut split_from: Vec<Option<usize>> = vec![None; regions.len()];
        for r in 0..regions.len() {
            if holder[r].is_some() || split_from[r].is_some() {
                continue;
            }
            let Some(t) = best_track(r, &merged_into) else {
                continue;
            };
            let Some(current) = held[t] else {
                continue;
            };
            if !overlaps(t, r) {
                continue;
            }
            let (kept, child) = if more_intense(&regions[r], &regions[current]) {
                (r, current)
            } else {
                (current, r)
            };
            held[t] = Some(kept);
            holder[kept] = Some(t);
            holder[child] = None;
            split_from[child] = Some(t);
            self.logger.detail(&format!("{} split, child region {}", ids[t], child));
        }

        Association {
            held,
            merged_into,
            split_from,
        }
    }

    /// The more intense track wins a merge; ties go to the lower id.
    fn outranks(&self, a: StormId, b: StormId) -> bool {
        let peak = |id: StormId| self.tracks.get(&id).map_or(f32::MIN, |t| t.cell().peak_dbz);
        match peak(a).total_cmp(&peak(b)) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Less => false,
            std::cmp::Ordering::Equal => a < b,
        }
    }
}

fn more_intense(a: &CellObservation, b: &CellObservation) -> bool {
    match a.features.peak_dbz.total_cmp(&b.features.peak_dbz) {
        std::cmp::Ordering::Greater => true,
        std::cmp::Ordering::Less => false,
        std::cmp::Ordering::Equal => a.features.intensity_rank > b.features.intensity_rank,
    }
}

impl Default for TrackManager {
    fn default() -> Self {
        Self::new(TrackerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::radar_interface::grid::tests::scan_time;
    use crate::tracking::track::tests::observation;

    const HOME: GeoPoint = GeoPoint {
        lat: 35.3,
        lon: -97.6,
    };

    fn at(east_km: f64, peak: f32) -> CellObservation {
        observation(geo::offset(HOME, east_km, 0.0), peak)
    }

    fn ranked(east_km: f64, peak: f32, rank: usize) -> CellObservation {
        let mut obs = at(east_km, peak);
        obs.features.intensity_rank = rank;
        obs
    }

    #[test]
    fn steady_motion_keeps_identity() {
        let mut manager = TrackManager::default();
        let born = manager.update(scan_time(0), vec![at(0.0, 50.0)]);
        assert_eq!(born, vec![(StormId(1), TrackEventKind::Born { parent: None })]);

        for minute in 1..6 {
            let events = manager.update(scan_time(minute), vec![at(1.5 * minute as f64, 50.0)]);
            assert_eq!(events, vec![(StormId(1), TrackEventKind::Updated)]);
        }
        let cell = manager.get(StormId(1)).unwrap().cell();
        let motion = cell.motion.unwrap();
        assert!((motion.speed_mps() - 25.0).abs() < 0.1);
        assert!((motion.bearing_deg() - 90.0).abs() < 0.5);
        assert_eq!(cell.age, 5);
    }

    #[test]
    fn assignment_is_globally_optimal() {
        let mut manager = TrackManager::default();
        manager.update(scan_time(0), vec![at(0.0, 50.0), at(2.0, 50.0)]);
        // Closest-first would hand the middle region to CELL-2 and strand CELL-1.
        let events = manager.update(scan_time(1), vec![at(1.1, 50.0), at(3.0, 50.0)]);
        assert!(events.iter().all(|(_, kind)| *kind == TrackEventKind::Updated));

        let east_of = |id: u64| {
            let cell = manager.get(StormId(id)).unwrap().cell();
            geo::east_north_km(HOME, cell.centroid).0
        };
        assert!((east_of(1) - 1.1).abs() < 1e-6);
        assert!((east_of(2) - 3.0).abs() < 1e-6);
    }

    #[test]
    fn missing_tracks_coast_then_terminate_for_good() {
        let mut manager = TrackManager::default();
        manager.update(scan_time(0), vec![at(0.0, 50.0)]);
        manager.update(scan_time(1), vec![at(1.0, 50.0)]);

        let first = manager.update(scan_time(2), vec![]);
        assert_eq!(first, vec![(StormId(1), TrackEventKind::Coasting { misses: 1 })]);
        let coasting = manager.get(StormId(1)).unwrap().cell();
        assert_eq!(coasting.state, TrackState::Coasting);
        assert!(geo::east_north_km(HOME, coasting.centroid).0 > 1.5);

        manager.update(scan_time(3), vec![]);
        let last = manager.update(scan_time(4), vec![]);
        assert_eq!(
            last,
            vec![(
                StormId(1),
                TrackEventKind::Terminated {
                    reason: TerminationReason::MissLimit
                }
            )]
        );
        assert!(manager.is_empty());

        let reborn = manager.update(scan_time(5), vec![at(0.0, 50.0)]);
        assert_eq!(reborn, vec![(StormId(2), TrackEventKind::Born { parent: None })]);
    }

    #[test]
    fn coasting_track_is_recovered() {
        let mut manager = TrackManager::default();
        manager.update(scan_time(0), vec![at(0.0, 50.0)]);
        manager.update(scan_time(1), vec![at(1.0, 50.0)]);
        manager.update(scan_time(2), vec![]);
        let events = manager.update(scan_time(3), vec![at(3.0, 50.0)]);
        assert_eq!(events, vec![(StormId(1), TrackEventKind::Updated)]);
        let cell = manager.get(StormId(1)).unwrap().cell();
        assert_eq!(cell.state, TrackState::Active);
        assert_eq!(cell.misses, 0);
    }

    #[test]
    fn weak_regions_never_become_cells() {
        let mut manager = TrackManager::default();
        let events = manager.update(scan_time(0), vec![at(0.0, 39.5), at(10.0, 40.0)]);
        assert_eq!(events, vec![(StormId(1), TrackEventKind::Born { parent: None })]);
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn merge_keeps_the_more_intense_track() {
        let mut manager = TrackManager::default();
        manager.update(scan_time(0), vec![at(-2.0, 50.0), at(2.0, 55.0)]);
        // Cheapest pairing holds the weaker CELL-1; the merge hands it to CELL-2.
        let events = manager.update(scan_time(1), vec![at(0.0, 50.0)]);

        assert!(events.contains(&(StormId(1), TrackEventKind::Merged { into: StormId(2) })));
        assert!(events.contains(&(
            StormId(1),
            TrackEventKind::Terminated {
                reason: TerminationReason::Merged
            }
        )));
        assert!(events.contains(&(StormId(2), TrackEventKind::Updated)));
        assert!(manager.get(StormId(1)).is_none());
        assert_eq!(manager.get(StormId(2)).unwrap().cell().peak_dbz, 50.0);
    }

    #[test]
    fn missed_scan_beside_a_neighbour_coasts() {
        let mut manager = TrackManager::default();
        manager.update(scan_time(0), vec![at(0.0, 50.0), at(8.0, 52.0)]);

        // CELL-1 is inside CELL-2's gate but nowhere near its storm.
        let missed = manager.update(scan_time(5), vec![at(8.0, 52.0)]);
        assert_eq!(
            missed,
            vec![
                (StormId(1), TrackEventKind::Coasting { misses: 1 }),
                (StormId(2), TrackEventKind::Updated),
            ]
        );

        let back = manager.update(scan_time(10), vec![at(0.0, 50.0), at(8.0, 52.0)]);
        assert_eq!(
            back,
            vec![
                (StormId(1), TrackEventKind::Updated),
                (StormId(2), TrackEventKind::Updated),
            ]
        );
        assert_eq!(manager.len(), 2);
        assert_eq!(manager.get(StormId(1)).unwrap().cell().state, TrackState::Active);
    }

    #[test]
    fn distant_region_in_gate_is_not_a_split() {
        let mut manager = TrackManager::default();
        manager.update(scan_time(0), vec![at(0.0, 50.0)]);
        let events = manager.update(scan_time(5), vec![at(0.5, 50.0), at(9.0, 48.0)]);
        assert_eq!(
            events,
            vec![
                (StormId(1), TrackEventKind::Updated),
                (StormId(2), TrackEventKind::Born { parent: None }),
            ]
        );
    }

    #[test]
    fn split_spawns_a_child_with_parent() {
        let mut manager = TrackManager::default();
        manager.update(scan_time(0), vec![at(0.0, 50.0)]);
        let events = manager.update(scan_time(1), vec![ranked(-1.0, 52.0, 0), ranked(1.0, 58.0, 1)]);

        assert!(events.contains(&(StormId(1), TrackEventKind::Updated)));
        assert!(events.contains(&(StormId(1), TrackEventKind::Split { child: StormId(2) })));
        assert!(events.contains(&(
            StormId(2),
            TrackEventKind::Born {
                parent: Some(StormId(1))
            }
        )));
        assert_eq!(manager.get(StormId(1)).unwrap().cell().peak_dbz, 58.0);
        let child = manager.get(StormId(2)).unwrap().cell();
        assert_eq!(child.parent, Some(StormId(1)));
        assert_eq!(child.peak_dbz, 52.0);
    }

    #[test]
    fn repeated_scan_time_skips_motion_update() {
        let mut manager = TrackManager::default();
        manager.update(scan_time(0), vec![at(0.0, 50.0)]);
        manager.update(scan_time(0), vec![at(0.5, 50.0)]);
        assert!(manager.get(StormId(1)).unwrap().cell().motion.is_none());
    }

    #[test]
    #[should_panic(expected = "precedes the previous scan")]
    fn out_of_order_scan_panics() {
        let mut manager = TrackManager::default();
        manager.update(scan_time(5), vec![at(0.0, 50.0)]);
        manager.update(scan_time(4), vec![at(0.0, 50.0)]);
    }
}
