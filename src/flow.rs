//! Ego-motion estimation from sparse optical flow.

mod corners;
mod estimator;
mod frame;
mod klt;
mod pyramid;

pub use corners::detect_corners;
pub use estimator::{FlowField, FlowVector, MotionEstimator, regions_of_interest};
pub use frame::{GrayFrame, Plane};
pub use klt::{FlowStatus, KltTracker, TrackedPoint};
pub use pyramid::Pyramid;
