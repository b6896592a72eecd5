//! Track ownership and per-frame / per-tick orchestration.

use std::time::Instant;

use nalgebra::{Point2, Vector2};
use tracing::debug;

use crate::config::TrackerConfig;
use crate::error::Error;
use crate::flow::FlowField;
use crate::tracker::matching::{self, Detection};
use crate::tracker::nms;
use crate::tracker::rect::Rect;
use crate::tracker::status::TrackStatus;
use crate::tracker::track::Track;

/// Emitted when a track is confirmed; the export collaborator joins these
/// with geolocation outside the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfirmedEvent {
    pub track_id: u64,
    pub timestamp: Instant,
}

/// Immutable per-track view for the render collaborator.
#[derive(Debug, Clone)]
pub struct TrackSnapshot {
    pub id: u64,
    pub class_id: u32,
    pub position: Point2<f32>,
    pub velocity: Vector2<f32>,
    pub rect: Rect,
    pub status: TrackStatus,
    pub animation_active: bool,
}

/// Owns every track and drives their lifecycle.
///
/// The registry itself is not synchronized; callers that share it across
/// contexts wrap it in a mutex (see [`crate::session::TrackingSession`]).
pub struct TrackRegistry {
    tracks: Vec<Track>,
    next_id: u64,
    config: TrackerConfig,
    confirmed_events: Vec<ConfirmedEvent>,
}

impl TrackRegistry {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            tracks: Vec::new(),
            next_id: 1,
            config,
            confirmed_events: Vec::new(),
        }
    }

    /// Process one frame of raw detections.
    ///
    /// Clears every track's `associated` flag, suppresses duplicates per
    /// class, associates the survivors with current tracks using the
    /// configured strategy, folds matched detections in and spawns a new
    /// candidate track per unmatched detection. Unmatched tracks are left
    /// untouched; their staleness is evaluated only in [`Self::update_trackers`].
    ///
    /// An empty detection list is valid input and changes no track state.
    pub fn process_detections(&mut self, raw: &[Detection], now: Instant) -> Result<(), Error> {
        for track in &mut self.tracks {
            track.associated = false;
        }

        let filtered = nms::suppress(raw, self.config.nms_iou_threshold);
        if filtered.is_empty() {
            return Ok(());
        }

        // Expired tracks awaiting the next sweep must not receive detections.
        let live: Vec<usize> = (0..self.tracks.len())
            .filter(|&i| self.tracks[i].status != TrackStatus::Expired)
            .collect();
        let positions: Vec<Point2<f32>> = live.iter().map(|&i| self.tracks[i].position()).collect();

        let costs = matching::distance_cost_matrix(&filtered, &positions);
        let result = self
            .config
            .assignment
            .solve(&costs, self.config.association_gate)?;

        for (det_idx, track_idx) in result.matches {
            let track = &mut self.tracks[live[track_idx]];
            if track.add_detection(&filtered[det_idx], now, &self.config) {
                self.confirmed_events.push(ConfirmedEvent {
                    track_id: track.id,
                    timestamp: now,
                });
            }
        }

        for det_idx in result.unmatched_detections {
            let id = self.next_id;
            self.next_id += 1;
            self.tracks
                .push(Track::new(id, &filtered[det_idx], &self.config));
        }

        Ok(())
    }

    /// Periodic tick: sweep removable tracks, apply ego-motion compensation
    /// to tracks without a fresh detection, then predict every track
    /// forward and evaluate expiry.
    ///
    /// Tracks that became Expired during this pass stay visible until the
    /// next one; stale candidates are pruned directly (removal, not a
    /// status transition).
    pub fn update_trackers(&mut self, now: Instant, flow: Option<&FlowField>) {
        let staleness = self.config.staleness_timeout;
        let before = self.tracks.len();
        self.tracks.retain(|track| {
            if track.status == TrackStatus::Expired {
                return false;
            }
            !(track.status == TrackStatus::Candidate
                && track
                    .time_since_seen(now)
                    .is_some_and(|stale| stale > staleness))
        });
        if self.tracks.len() < before {
            debug!(removed = before - self.tracks.len(), "swept stale tracks");
        }

        if let Some(field) = flow {
            for track in self.tracks.iter_mut().filter(|t| !t.associated) {
                if let Some(velocity) = field.median_velocity_near(track.position()) {
                    track.update_speed(velocity);
                }
            }
        }

        for track in &mut self.tracks {
            track.update(now, &self.config);
        }
    }

    /// Consistent copy of the current tracks for rendering.
    pub fn snapshot(&self) -> Vec<TrackSnapshot> {
        self.tracks
            .iter()
            .map(|t| TrackSnapshot {
                id: t.id,
                class_id: t.class_id,
                position: t.position(),
                velocity: t.velocity(),
                rect: t.rect(),
                status: t.status,
                animation_active: t.animation_active(),
            })
            .collect()
    }

    /// The reported waste count.
    pub fn confirmed_count(&self) -> usize {
        self.tracks
            .iter()
            .filter(|t| t.status == TrackStatus::Confirmed)
            .count()
    }

    /// Take the confirmed-track events recorded since the last drain.
    pub fn drain_confirmed_events(&mut self) -> Vec<ConfirmedEvent> {
        std::mem::take(&mut self.confirmed_events)
    }

    /// Drop all tracks and pending events. Ids are never reused, so the id
    /// counter keeps running.
    pub fn reset(&mut self) {
        self.tracks.clear();
        self.confirmed_events.clear();
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn det_at(x: f32, y: f32, t: Instant) -> Detection {
        Detection::new(0, 0.9, Rect::from_center(Point2::new(x, y), 20.0, 20.0), t)
    }

    #[test]
    fn test_two_far_detections_spawn_two_tracks() {
        let mut registry = TrackRegistry::new(TrackerConfig::default());
        let t0 = Instant::now();

        registry
            .process_detections(&[det_at(10.0, 10.0, t0), det_at(500.0, 500.0, t0)], t0)
            .unwrap();
        assert_eq!(registry.len(), 2);

        let ids: Vec<u64> = registry.tracks().iter().map(|t| t.id).collect();
        assert!(ids[0] < ids[1], "ids must be strictly increasing");

        // A nearby detection next frame associates instead of spawning.
        let t1 = t0 + Duration::from_millis(100);
        registry
            .process_detections(&[det_at(12.0, 11.0, t1)], t1)
            .unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.tracks()[0].hits(), 2);
    }

    #[test]
    fn test_empty_detection_list_is_noop() {
        let mut registry = TrackRegistry::new(TrackerConfig::default());
        let t0 = Instant::now();
        registry.process_detections(&[det_at(10.0, 10.0, t0)], t0).unwrap();

        registry.process_detections(&[], t0 + Duration::from_millis(50)).unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.tracks()[0].hits(), 1);
    }

    #[test]
    fn test_far_detection_spawns_instead_of_matching() {
        let mut registry = TrackRegistry::new(TrackerConfig::default());
        let t0 = Instant::now();
        registry.process_detections(&[det_at(10.0, 10.0, t0)], t0).unwrap();

        // 80 px away with a 50 px gate: new track.
        let t1 = t0 + Duration::from_millis(100);
        registry.process_detections(&[det_at(90.0, 10.0, t1)], t1).unwrap();
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_confirmation_emits_event_and_counts() {
        let mut registry = TrackRegistry::new(TrackerConfig::default());
        let t0 = Instant::now();
        let mut now = t0;
        for i in 0..6u64 {
            now = t0 + Duration::from_millis(100 * i);
            registry.process_detections(&[det_at(10.0, 10.0, now)], now).unwrap();
        }

        assert_eq!(registry.confirmed_count(), 1);
        let events = registry.drain_confirmed_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].track_id, registry.tracks()[0].id);
        assert!(registry.drain_confirmed_events().is_empty());
    }

    #[test]
    fn test_expired_track_removed_next_pass() {
        let mut registry = TrackRegistry::new(TrackerConfig::default());
        let t0 = Instant::now();
        let mut now = t0;
        for i in 0..6u64 {
            now = t0 + Duration::from_millis(100 * i);
            registry.process_detections(&[det_at(10.0, 10.0, now)], now).unwrap();
        }
        assert_eq!(registry.confirmed_count(), 1);

        // Past the staleness timeout: the pass marks it expired but keeps it.
        let later = now + Duration::from_millis(3500);
        registry.update_trackers(later, None);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.tracks()[0].status, TrackStatus::Expired);
        assert_eq!(registry.confirmed_count(), 0);

        // Next pass removes it.
        registry.update_trackers(later + Duration::from_millis(250), None);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_stale_candidate_pruned() {
        let mut registry = TrackRegistry::new(TrackerConfig::default());
        let t0 = Instant::now();
        registry.process_detections(&[det_at(10.0, 10.0, t0)], t0).unwrap();
        assert_eq!(registry.tracks()[0].status, TrackStatus::Candidate);

        registry.update_trackers(t0 + Duration::from_secs(4), None);
        assert!(registry.is_empty(), "stale candidate should be pruned");
    }

    #[test]
    fn test_expired_track_gets_no_detections() {
        let mut registry = TrackRegistry::new(TrackerConfig::default());
        let t0 = Instant::now();
        let mut now = t0;
        for i in 0..6u64 {
            now = t0 + Duration::from_millis(100 * i);
            registry.process_detections(&[det_at(10.0, 10.0, now)], now).unwrap();
        }
        let later = now + Duration::from_millis(3500);
        registry.update_trackers(later, None);
        assert_eq!(registry.tracks()[0].status, TrackStatus::Expired);

        // A detection at the expired track's position spawns a fresh track.
        registry.process_detections(&[det_at(10.0, 10.0, later)], later).unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.tracks()[1].status, TrackStatus::Candidate);
    }

    #[test]
    fn test_ids_not_reused_after_reset() {
        let mut registry = TrackRegistry::new(TrackerConfig::default());
        let t0 = Instant::now();
        registry.process_detections(&[det_at(10.0, 10.0, t0)], t0).unwrap();
        let first_id = registry.tracks()[0].id;

        registry.reset();
        assert!(registry.is_empty());

        registry.process_detections(&[det_at(10.0, 10.0, t0)], t0).unwrap();
        assert!(registry.tracks()[0].id > first_id);
    }

    #[test]
    fn test_duplicate_detections_collapse_to_one_track() {
        let mut registry = TrackRegistry::new(TrackerConfig::default());
        let t0 = Instant::now();
        // Three near-identical boxes of the same class: NMS keeps one.
        registry
            .process_detections(
                &[
                    det_at(10.0, 10.0, t0),
                    det_at(11.0, 10.0, t0),
                    det_at(10.0, 11.0, t0),
                ],
                t0,
            )
            .unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_snapshot_matches_tracks() {
        let mut registry = TrackRegistry::new(TrackerConfig::default());
        let t0 = Instant::now();
        registry
            .process_detections(&[det_at(10.0, 10.0, t0), det_at(500.0, 500.0, t0)], t0)
            .unwrap();

        let snap = registry.snapshot();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap[0].id, registry.tracks()[0].id);
        assert_eq!(snap[0].status, TrackStatus::Candidate);
        assert!(!snap[0].animation_active);
    }
}
