//! Per-object track: Kalman estimator plus lifecycle state machine.

use std::time::Instant;

use nalgebra::{Point2, Vector2};

use crate::config::TrackerConfig;
use crate::tracker::kalman::KalmanFilter;
use crate::tracker::matching::Detection;
use crate::tracker::rect::Rect;
use crate::tracker::status::TrackStatus;

/// One persistent object hypothesis.
///
/// Owned exclusively by the registry; all mutation goes through the
/// operations below.
#[derive(Debug, Clone)]
pub struct Track {
    /// Unique identifier, monotonically assigned, never reused.
    pub id: u64,
    /// Class of the seed detection.
    pub class_id: u32,
    pub status: TrackStatus,
    /// Set when a detection was matched to this track in the current
    /// frame; cleared at the start of every detection-processing pass.
    pub associated: bool,
    filter: KalmanFilter,
    position: Point2<f32>,
    velocity: Vector2<f32>,
    rect: Rect,
    hits: u32,
    /// Last time `update` or `add_detection` ran; basis for the predict dt.
    last_update: Instant,
    /// Last time a detection was folded in; basis for staleness.
    last_seen: Instant,
    /// Set at the candidate → confirmed transition, cleared once the
    /// animation duration has elapsed.
    animation: Option<Instant>,
}

impl Track {
    /// Create a candidate track from a seed detection. The seed counts as
    /// the first hit; velocity starts at zero.
    pub fn new(id: u64, det: &Detection, config: &TrackerConfig) -> Self {
        let center = det.center();
        Self {
            id,
            class_id: det.class_id,
            status: TrackStatus::Candidate,
            associated: false,
            filter: KalmanFilter::new(center, config.process_noise, config.measurement_noise),
            position: center,
            velocity: Vector2::zeros(),
            rect: det.rect,
            hits: 1,
            last_update: det.timestamp,
            last_seen: det.timestamp,
            animation: None,
        }
    }

    pub fn position(&self) -> Point2<f32> {
        self.position
    }

    pub fn velocity(&self) -> Vector2<f32> {
        self.velocity
    }

    pub fn rect(&self) -> Rect {
        self.rect
    }

    pub fn hits(&self) -> u32 {
        self.hits
    }

    /// Whether the one-shot "just confirmed" signal is currently set.
    pub fn animation_active(&self) -> bool {
        self.animation.is_some()
    }

    /// Distance from this track's position to a point, the association cost.
    pub fn dist_to(&self, point: Point2<f32>) -> f32 {
        (self.position - point).norm()
    }

    /// Time since the last detection was folded in. `None` if `now` is
    /// before `last_seen` (non-monotonic clock).
    pub fn time_since_seen(&self, now: Instant) -> Option<std::time::Duration> {
        now.checked_duration_since(self.last_seen)
    }

    /// Fold a matched detection into the track.
    ///
    /// Runs a Kalman position correction preserving the current velocity
    /// estimate, bumps the hit counter and evaluates the candidate →
    /// confirmed transition. Returns `true` when the track was confirmed by
    /// this detection.
    pub fn add_detection(&mut self, det: &Detection, now: Instant, config: &TrackerConfig) -> bool {
        self.filter.correct_position(det.center());
        self.position = self.filter.position();
        self.velocity = self.filter.velocity();
        self.rect = det.rect;
        self.hits += 1;
        self.associated = true;
        self.last_update = now;
        self.last_seen = now;

        if self.status == TrackStatus::Candidate && self.hits > config.confirm_hits {
            self.status = TrackStatus::Confirmed;
            self.animation = Some(now);
            return true;
        }
        false
    }

    /// Fold an externally measured velocity (from ego-motion compensation)
    /// into the filter without a position measurement.
    pub fn update_speed(&mut self, velocity: Vector2<f32>) {
        self.filter.correct_velocity(velocity);
        self.velocity = self.filter.velocity();
    }

    /// Periodic update: predict over the elapsed interval, refresh the
    /// visible state, evaluate expiry and the animation timeout.
    pub fn update(&mut self, now: Instant, config: &TrackerConfig) {
        // A clock running backwards yields no dt; the predict step is
        // skipped rather than corrupting the state matrices.
        if let Some(dt) = now.checked_duration_since(self.last_update) {
            self.filter.predict(dt.as_secs_f32());
            self.position = self.filter.position();
            self.velocity = self.filter.velocity();
            self.rect = Rect::from_center(self.position, self.rect.width, self.rect.height);
        }

        if self.status == TrackStatus::Confirmed
            && self
                .time_since_seen(now)
                .is_some_and(|stale| stale > config.staleness_timeout)
        {
            self.status = TrackStatus::Expired;
        }

        // The animation flag self-clears independent of status.
        if let Some(set_at) = self.animation
            && now
                .checked_duration_since(set_at)
                .is_some_and(|elapsed| elapsed >= config.animation_duration)
        {
            self.animation = None;
        }

        self.last_update = now;
    }
}
