//! Sparse optical-flow motion estimation.
//!
//! Keeps the previous frame's pyramid and a bounded working set of feature
//! points, re-detecting corners when too few survive, and emits one flow
//! vector per point successfully tracked between consecutive frames. Every
//! failure mode degrades to "no flow this tick": the previous frame and
//! points are still advanced so the next tick can attempt a refill, and
//! nothing propagates to the caller.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use nalgebra::{Point2, Vector2};
use tracing::{debug, warn};

use crate::config::FlowConfig;
use crate::flow::corners::detect_corners;
use crate::flow::frame::GrayFrame;
use crate::flow::klt::{FlowStatus, KltTracker};
use crate::flow::pyramid::Pyramid;
use crate::tracker::Rect;

/// Displacement of one background feature between consecutive motion ticks,
/// in full-frame coordinates.
#[derive(Debug, Clone, Copy)]
pub struct FlowVector {
    pub origin: Point2<f32>,
    pub delta: Vector2<f32>,
}

/// One tick's flow vectors plus the interval they were measured over.
#[derive(Debug, Clone)]
pub struct FlowField {
    pub vectors: Vec<FlowVector>,
    /// Time between the two frames the vectors connect.
    pub elapsed: Duration,
    /// Neighbor count used by the local median queries.
    pub neighbors: usize,
}

impl FlowField {
    fn empty(elapsed: Duration, neighbors: usize) -> Self {
        Self {
            vectors: Vec::new(),
            elapsed,
            neighbors,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Component-wise median displacement of the `k` flow vectors nearest
    /// to `point`. The median (rather than the mean) resists outliers from
    /// mistracked features. `None` when the field is empty.
    pub fn median_flow_near(&self, point: Point2<f32>, k: usize) -> Option<Vector2<f32>> {
        median_flow(&self.vectors, point, k)
    }

    /// Local median displacement converted to a velocity over the field's
    /// interval, for folding into a track's Kalman state.
    pub fn median_velocity_near(&self, point: Point2<f32>) -> Option<Vector2<f32>> {
        let secs = self.elapsed.as_secs_f32();
        if secs <= 0.0 {
            return None;
        }
        self.median_flow_near(point, self.neighbors)
            .map(|delta| delta / secs)
    }
}

/// Component-wise median displacement of the `k` vectors nearest to `point`.
fn median_flow(vectors: &[FlowVector], point: Point2<f32>, k: usize) -> Option<Vector2<f32>> {
    if vectors.is_empty() || k == 0 {
        return None;
    }

    let mut by_distance: Vec<&FlowVector> = vectors.iter().collect();
    by_distance.sort_by(|a, b| {
        (a.origin - point)
            .norm_squared()
            .total_cmp(&(b.origin - point).norm_squared())
    });
    by_distance.truncate(k);

    let mut xs: Vec<f32> = by_distance.iter().map(|v| v.delta.x).collect();
    let mut ys: Vec<f32> = by_distance.iter().map(|v| v.delta.y).collect();
    xs.sort_by(f32::total_cmp);
    ys.sort_by(f32::total_cmp);
    Some(Vector2::new(xs[xs.len() / 2], ys[ys.len() / 2]))
}

struct TimedField {
    vectors: Vec<FlowVector>,
    neighbors: usize,
    generated: Instant,
}

/// Sparse feature tracker producing per-tick flow fields.
pub struct MotionEstimator {
    config: FlowConfig,
    klt: KltTracker,
    prev: Option<Pyramid>,
    points: Vec<Point2<f32>>,
    last_frame_at: Option<Instant>,
    history: VecDeque<TimedField>,
}

impl MotionEstimator {
    pub fn new(config: FlowConfig) -> Self {
        let klt = KltTracker::new(config.window_size, config.max_iterations, config.epsilon);
        Self {
            config,
            klt,
            prev: None,
            points: Vec::new(),
            last_frame_at: None,
            history: VecDeque::new(),
        }
    }

    /// Number of feature points currently in the working set.
    pub fn tracked_point_count(&self) -> usize {
        self.points.len()
    }

    /// Ingest the next grayscale frame and compute flow against the
    /// previous one. The first frame, a frame-size change, or an empty
    /// working set all yield an empty field; state is advanced regardless.
    pub fn process_frame(&mut self, frame: &GrayFrame, now: Instant) -> FlowField {
        let elapsed = self
            .last_frame_at
            .and_then(|t| now.checked_duration_since(t))
            .unwrap_or(Duration::ZERO);
        self.last_frame_at = Some(now);

        let pyramid = Pyramid::build(frame, self.config.pyramid_levels);
        let neighbors = self.config.median_neighbors;

        let field = match self.prev.take() {
            None => {
                self.points = self.detect(&pyramid);
                self.prev = Some(pyramid);
                FlowField::empty(elapsed, neighbors)
            }
            Some(prev) if prev.dimensions() != pyramid.dimensions() => {
                warn!(
                    prev = ?prev.dimensions(),
                    curr = ?pyramid.dimensions(),
                    "frame size changed, dropping current flow"
                );
                self.points = self.detect(&pyramid);
                self.prev = Some(pyramid);
                FlowField::empty(elapsed, neighbors)
            }
            Some(prev) => {
                if self.points.len() < self.config.max_points / self.config.refill_divisor.max(1) {
                    self.refill(&pyramid);
                }

                let tracked = self.klt.track(&prev, &pyramid, &self.points);
                let scale = self.config.scale_factor.max(1) as f32;

                let mut vectors = Vec::with_capacity(tracked.len());
                let mut survivors = Vec::with_capacity(tracked.len());
                for (origin, result) in self.points.iter().zip(&tracked) {
                    if result.status == FlowStatus::Tracked {
                        vectors.push(FlowVector {
                            origin: Point2::new(origin.x * scale, origin.y * scale),
                            delta: (result.point - origin) * scale,
                        });
                        survivors.push(result.point);
                    }
                }
                if vectors.is_empty() {
                    debug!("flow produced no vectors this tick");
                }

                self.points = survivors;
                self.prev = Some(pyramid);
                FlowField {
                    vectors,
                    elapsed,
                    neighbors,
                }
            }
        };

        self.history.push_back(TimedField {
            vectors: field.vectors.clone(),
            neighbors,
            generated: now,
        });
        while self.history.len() > self.config.history_len {
            self.history.pop_front();
        }

        field
    }

    /// Cumulative local flow displacement at `point` accumulated by every
    /// field generated at or after `since`. Used to move detections whose
    /// frame was captured before a slow inference call returned.
    pub fn displacement_since(&self, point: Point2<f32>, since: Instant) -> Vector2<f32> {
        let mut total = Vector2::zeros();
        for timed in &self.history {
            if timed.generated < since {
                continue;
            }
            if let Some(delta) = median_flow(&timed.vectors, point, timed.neighbors) {
                total += delta;
            }
        }
        total
    }

    fn detect(&self, pyramid: &Pyramid) -> Vec<Point2<f32>> {
        let corners = detect_corners(
            pyramid.level(0),
            self.config.max_points,
            self.config.quality_level,
            self.config.min_corner_distance,
        );
        if corners.is_empty() {
            debug!("no corners detected");
        }
        corners
    }

    /// Top the working set back up: detect corners in the current frame
    /// and merge them with still-valid points, respecting the cap and the
    /// minimum corner spacing.
    fn refill(&mut self, pyramid: &Pyramid) {
        let missing = self.config.max_points.saturating_sub(self.points.len());
        if missing == 0 {
            return;
        }
        let min_dist_sq = self.config.min_corner_distance * self.config.min_corner_distance;
        let fresh = detect_corners(
            pyramid.level(0),
            self.config.max_points,
            self.config.quality_level,
            self.config.min_corner_distance,
        );
        for corner in fresh {
            if self.points.len() >= self.config.max_points {
                break;
            }
            let spaced = self
                .points
                .iter()
                .all(|p| (corner - p).norm_squared() >= min_dist_sq);
            if spaced {
                self.points.push(corner);
            }
        }
    }
}

/// Padded search regions around the given track boxes, clamped to the
/// frame. Corner detection may restrict its search to these regions as an
/// optimization.
pub fn regions_of_interest(
    rects: &[Rect],
    frame_width: usize,
    frame_height: usize,
    padding_factor: f32,
    min_size: f32,
) -> Vec<Rect> {
    let frame_w = frame_width as f32;
    let frame_h = frame_height as f32;

    rects
        .iter()
        .filter(|r| !r.is_degenerate())
        .map(|r| {
            let width = (r.width * padding_factor).max(min_size).min(frame_w);
            let height = (r.height * padding_factor).max(min_size).min(frame_h);
            let center = r.center();
            let x = (center.x - width / 2.0).clamp(0.0, frame_w - width);
            let y = (center.y - height / 2.0).clamp(0.0, frame_h - height);
            Rect::new(x, y, width, height)
        })
        .collect()
}
