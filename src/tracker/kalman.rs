//! Constant-velocity Kalman filter over a fixed-size 4-state.
//!
//! State is [x, y, vx, vy]. The transition matrix is identity with dt
//! coupling position to velocity; the measurement matrix is identity
//! (position and velocity observed directly), which keeps the correction
//! step to a single 4x4 inversion.

use nalgebra::{Matrix4, Point2, Vector2, Vector4};
use tracing::warn;

#[derive(Debug, Clone)]
pub struct KalmanFilter {
    state: Vector4<f32>,
    covariance: Matrix4<f32>,
    process_noise: Matrix4<f32>,
    measurement_noise: Matrix4<f32>,
}

impl KalmanFilter {
    /// Initialize from a first observed position with zero velocity.
    pub fn new(position: Point2<f32>, process_noise: f32, measurement_noise: f32) -> Self {
        Self {
            state: Vector4::new(position.x, position.y, 0.0, 0.0),
            covariance: Matrix4::identity(),
            process_noise: Matrix4::identity() * process_noise,
            measurement_noise: Matrix4::identity() * measurement_noise,
        }
    }

    /// Current position estimate.
    pub fn position(&self) -> Point2<f32> {
        Point2::new(self.state[0], self.state[1])
    }

    /// Current velocity estimate.
    pub fn velocity(&self) -> Vector2<f32> {
        Vector2::new(self.state[2], self.state[3])
    }

    /// Predict step over `dt` seconds. A non-positive dt is skipped so a
    /// non-monotonic clock read cannot corrupt the state matrices.
    pub fn predict(&mut self, dt: f32) {
        if dt <= 0.0 {
            return;
        }
        let mut transition = Matrix4::identity();
        transition[(0, 2)] = dt;
        transition[(1, 3)] = dt;

        self.state = transition * self.state;
        self.covariance =
            transition * self.covariance * transition.transpose() + self.process_noise;
    }

    /// Correct with a full [x, y, vx, vy] measurement.
    pub fn correct(&mut self, measurement: Vector4<f32>) {
        // With H = I the innovation covariance is S = P + R.
        let innovation_cov = self.covariance + self.measurement_noise;
        let Some(inv) = innovation_cov.try_inverse() else {
            warn!("singular innovation covariance, skipping correction");
            return;
        };
        let gain = self.covariance * inv;
        self.state += gain * (measurement - self.state);
        self.covariance = (Matrix4::identity() - gain) * self.covariance;
    }

    /// Fold in an observed position, preserving the current velocity
    /// estimate. Used when a fresh detection arrives.
    pub fn correct_position(&mut self, position: Point2<f32>) {
        let measurement = Vector4::new(position.x, position.y, self.state[2], self.state[3]);
        self.correct(measurement);
    }

    /// Fold in an externally measured velocity without a position
    /// measurement. Used for ego-motion compensation between detections.
    pub fn correct_velocity(&mut self, velocity: Vector2<f32>) {
        let measurement = Vector4::new(self.state[0], self.state[1], velocity.x, velocity.y);
        self.correct(measurement);
    }
}
