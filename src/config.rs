//! Configuration for the tracking engine.
//!
//! Each stage has its own config struct with defaults matching the tuned
//! values of the litter-survey application; [`SessionConfig`] bundles them
//! for [`crate::session::TrackingSession`].

use std::time::Duration;

use crate::tracker::AssignmentStrategy;

/// Configuration for detection filtering, association and track lifecycle.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Per-class IoU threshold for duplicate suppression.
    pub nms_iou_threshold: f32,
    /// Maximum centroid distance (pixels) for a detection-to-track match.
    pub association_gate: f32,
    /// Assignment strategy used when processing a frame of detections.
    pub assignment: AssignmentStrategy,
    /// Hits required before a candidate is confirmed. The seed detection
    /// counts as the first hit; confirmation happens once the counter
    /// exceeds this value.
    pub confirm_hits: u32,
    /// How long the just-confirmed animation flag stays set.
    pub animation_duration: Duration,
    /// Time without a fresh detection before a track goes stale.
    pub staleness_timeout: Duration,
    /// Scale of the Kalman process noise diagonal.
    pub process_noise: f32,
    /// Scale of the Kalman measurement noise diagonal.
    pub measurement_noise: f32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            nms_iou_threshold: 0.6,
            association_gate: 50.0,
            assignment: AssignmentStrategy::Greedy,
            confirm_hits: 5,
            animation_duration: Duration::from_millis(1000),
            staleness_timeout: Duration::from_millis(3000),
            process_noise: 1.0,
            measurement_noise: 1.0,
        }
    }
}

/// Configuration for sparse optical-flow motion estimation.
#[derive(Debug, Clone)]
pub struct FlowConfig {
    /// Working-set cap for tracked feature points.
    pub max_points: usize,
    /// Corners are re-detected when the surviving point count falls under
    /// `max_points / refill_divisor`.
    pub refill_divisor: usize,
    /// Minimum pixel distance between detected corners.
    pub min_corner_distance: f32,
    /// Corner quality threshold relative to the strongest response.
    pub quality_level: f32,
    /// Lucas-Kanade patch half-size; the window is `(2n + 1)²` pixels.
    pub window_size: usize,
    /// Pyramid depth for coarse-to-fine tracking.
    pub pyramid_levels: usize,
    /// Maximum Lucas-Kanade iterations per pyramid level.
    pub max_iterations: usize,
    /// Convergence threshold in pixels.
    pub epsilon: f32,
    /// Integer factor the frames were downsampled by before estimation;
    /// emitted flow vectors are scaled back up by this factor.
    pub scale_factor: u32,
    /// Neighbor count for the local median-flow query.
    pub median_neighbors: usize,
    /// Cap on the rolling history of timestamped flow fields.
    pub history_len: usize,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            max_points: 50,
            refill_divisor: 2,
            min_corner_distance: 8.0,
            quality_level: 0.1,
            window_size: 7,
            pyramid_levels: 3,
            max_iterations: 30,
            epsilon: 0.01,
            scale_factor: 1,
            median_neighbors: 6,
            history_len: 50,
        }
    }
}

/// Configuration for a [`crate::session::TrackingSession`].
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub tracker: TrackerConfig,
    pub flow: FlowConfig,
    /// Interval of the periodic motion tick.
    pub tick_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tracker: TrackerConfig::default(),
            flow: FlowConfig::default(),
            tick_interval: Duration::from_millis(250),
        }
    }
}
