//! Multi-object tracking engine for floating-debris litter surveys.
//!
//! Given per-frame object detections (bounding boxes, class, confidence) and
//! grayscale camera frames, the engine maintains a set of persistent tracks,
//! compensates track positions for camera ego-motion between detector
//! inference cycles, and classifies each track's lifecycle
//! (candidate → confirmed → expired) to drive a reliable debris count.
//!
//! The crate deliberately excludes camera capture, model inference and
//! rendering; see [`session::TrackingSession`] for the contract those
//! collaborators plug into.

pub mod config;
pub mod error;
pub mod flow;
pub mod session;
pub mod tracker;

pub use config::{FlowConfig, SessionConfig, TrackerConfig};
pub use error::Error;
pub use flow::{FlowField, FlowVector, GrayFrame, MotionEstimator};
pub use session::TrackingSession;
pub use tracker::{
    AssignmentStrategy, ConfirmedEvent, Detection, Rect, TrackRegistry, TrackSnapshot, TrackStatus,
};
