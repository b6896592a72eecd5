//! Pyramidal Lucas-Kanade sparse optical flow.
//!
//! Forward-additive formulation: per pyramid level, iterate a 2x2
//! Gauss-Newton system built from gradients at the warped position in the
//! current frame, propagating the displacement coarse-to-fine.

use nalgebra::Point2;

use crate::flow::frame::Plane;
use crate::flow::pyramid::Pyramid;

/// Outcome of tracking one point between consecutive frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowStatus {
    /// Successfully tracked to a new position.
    Tracked,
    /// The solver diverged or the local gradient was degenerate.
    Lost,
    /// The tracked position left the frame.
    OutOfBounds,
}

/// A point with its tracking outcome. The position is only meaningful when
/// `status == Tracked`.
#[derive(Debug, Clone, Copy)]
pub struct TrackedPoint {
    pub point: Point2<f32>,
    pub status: FlowStatus,
}

/// Sparse Lucas-Kanade tracker.
#[derive(Debug, Clone)]
pub struct KltTracker {
    /// Patch half-size; the window is (2n + 1) squared.
    pub window_size: usize,
    /// Maximum Gauss-Newton iterations per pyramid level.
    pub max_iterations: usize,
    /// Convergence threshold in pixels.
    pub epsilon: f32,
}

enum LevelResult {
    Converged(f32, f32),
    MaxIter(f32, f32),
    Singular,
}

impl KltTracker {
    pub fn new(window_size: usize, max_iterations: usize, epsilon: f32) -> Self {
        Self {
            window_size,
            max_iterations,
            epsilon,
        }
    }

    /// Track points from the previous frame's pyramid to the current one.
    /// Returns one entry per input point, in order.
    pub fn track(
        &self,
        prev: &Pyramid,
        curr: &Pyramid,
        points: &[Point2<f32>],
    ) -> Vec<TrackedPoint> {
        let num_levels = prev.num_levels().min(curr.num_levels());
        points
            .iter()
            .map(|&p| self.track_single(prev, curr, p, num_levels))
            .collect()
    }

    fn track_single(
        &self,
        prev: &Pyramid,
        curr: &Pyramid,
        point: Point2<f32>,
        num_levels: usize,
    ) -> TrackedPoint {
        let mut dx = 0.0f32;
        let mut dy = 0.0f32;

        for level in (0..num_levels).rev() {
            let prev_plane = prev.level(level);
            let curr_plane = curr.level(level);

            let scale = 1.0 / (1u32 << level) as f32;
            let result = self.iterate_level(
                prev_plane,
                curr_plane,
                point.x * scale,
                point.y * scale,
                dx,
                dy,
            );

            match result {
                LevelResult::Converged(nx, ny) | LevelResult::MaxIter(nx, ny) => {
                    dx = nx;
                    dy = ny;
                }
                LevelResult::Singular => {
                    return TrackedPoint {
                        point,
                        status: FlowStatus::Lost,
                    };
                }
            }

            // Displacement doubles going to the next finer level.
            if level > 0 {
                dx *= 2.0;
                dy *= 2.0;
            }
        }

        let tracked = Point2::new(point.x + dx, point.y + dy);
        let (width, height) = prev.dimensions();
        let in_bounds = tracked.x >= 0.0
            && tracked.x < width as f32
            && tracked.y >= 0.0
            && tracked.y < height as f32;

        TrackedPoint {
            point: tracked,
            status: if in_bounds {
                FlowStatus::Tracked
            } else {
                FlowStatus::OutOfBounds
            },
        }
    }

    /// Iterative Lucas-Kanade at one pyramid level. Gradients are taken at
    /// the warped position in the current frame, so the 2x2 Hessian is
    /// rebuilt every iteration.
    fn iterate_level(
        &self,
        prev_plane: &Plane,
        curr_plane: &Plane,
        px: f32,
        py: f32,
        mut dx: f32,
        mut dy: f32,
    ) -> LevelResult {
        let half = self.window_size as isize;

        for _ in 0..self.max_iterations {
            let mut h00 = 0.0f32;
            let mut h01 = 0.0f32;
            let mut h11 = 0.0f32;
            let mut b0 = 0.0f32;
            let mut b1 = 0.0f32;

            for wy in -half..=half {
                for wx in -half..=half {
                    let tx = px + wx as f32;
                    let ty = py + wy as f32;
                    let template = prev_plane.sample(tx, ty);

                    let cx = tx + dx;
                    let cy = ty + dy;
                    let warped = curr_plane.sample(cx, cy);
                    let error = template - warped;

                    // Central differences at the warped position.
                    let gx = 0.5 * (curr_plane.sample(cx + 1.0, cy) - curr_plane.sample(cx - 1.0, cy));
                    let gy = 0.5 * (curr_plane.sample(cx, cy + 1.0) - curr_plane.sample(cx, cy - 1.0));

                    h00 += gx * gx;
                    h01 += gx * gy;
                    h11 += gy * gy;
                    b0 += gx * error;
                    b1 += gy * error;
                }
            }

            let det = h00 * h11 - h01 * h01;
            if det.abs() < 1e-6 {
                return LevelResult::Singular;
            }
            let inv_det = 1.0 / det;
            let step_x = inv_det * (h11 * b0 - h01 * b1);
            let step_y = inv_det * (h00 * b1 - h01 * b0);

            dx += step_x;
            dy += step_y;

            if step_x * step_x + step_y * step_y < self.epsilon * self.epsilon {
                return LevelResult::Converged(dx, dy);
            }
        }

        LevelResult::MaxIter(dx, dy)
    }
}
