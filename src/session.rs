//! Tracking session: shared-state discipline and the periodic motion tick.
//!
//! Three contexts touch the registry. The detection-completion context
//! calls [`TrackingSession::process_detections`] after running inference
//! outside any lock. The internal tick thread runs motion estimation
//! (outside the registry lock), then folds the result in under the lock.
//! The render context reads owned snapshots. One coarse mutex guards the
//! registry; motion estimation and the frame slot each have their own, and
//! no path acquires two of them at once except the tick thread, which
//! takes them strictly in sequence, never nested.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use tracing::debug;

use crate::config::SessionConfig;
use crate::error::Error;
use crate::flow::{GrayFrame, MotionEstimator};
use crate::tracker::{ConfirmedEvent, Detection, TrackRegistry, TrackSnapshot};

struct Control {
    paused: bool,
    ended: bool,
}

struct Shared {
    registry: Mutex<TrackRegistry>,
    estimator: Mutex<MotionEstimator>,
    frame_slot: Mutex<Option<GrayFrame>>,
    control: Mutex<Control>,
    signal: Condvar,
}

/// A live tracking session.
///
/// Owns the registry and the motion-tick thread. Pausing suspends the tick
/// loop without touching the track set; ending (or dropping) the session
/// stops the thread and discards all state.
pub struct TrackingSession {
    shared: Arc<Shared>,
    config: SessionConfig,
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// A poisoned mutex only means another thread panicked mid-update of
/// plain-old-data; recover the guard rather than cascading the panic.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl TrackingSession {
    pub fn new(config: SessionConfig) -> Self {
        let shared = Arc::new(Shared {
            registry: Mutex::new(TrackRegistry::new(config.tracker.clone())),
            estimator: Mutex::new(MotionEstimator::new(config.flow.clone())),
            frame_slot: Mutex::new(None),
            control: Mutex::new(Control {
                paused: false,
                ended: false,
            }),
            signal: Condvar::new(),
        });

        let worker = {
            let shared = Arc::clone(&shared);
            let tick_interval = config.tick_interval;
            thread::spawn(move || tick_loop(&shared, tick_interval))
        };

        Self {
            shared,
            config,
            worker: Mutex::new(Some(worker)),
        }
    }

    fn ensure_live(&self) -> Result<(), Error> {
        if lock(&self.shared.control).ended {
            return Err(Error::SessionEnded);
        }
        Ok(())
    }

    /// Apply one frame of detector results. The inference producing them
    /// must run before this call, outside the registry lock; only the
    /// finished list is passed in here.
    ///
    /// Each detection is first moved by the flow accumulated since its
    /// capture timestamp, compensating for camera motion during a slow
    /// inference call.
    pub fn process_detections(&self, detections: &[Detection]) -> Result<(), Error> {
        self.ensure_live()?;

        let moved: Vec<Detection> = {
            let estimator = lock(&self.shared.estimator);
            detections
                .iter()
                .map(|det| {
                    let delta = estimator.displacement_since(det.center(), det.timestamp);
                    Detection {
                        rect: det.rect.translated(delta),
                        ..det.clone()
                    }
                })
                .collect()
        };

        lock(&self.shared.registry).process_detections(&moved, Instant::now())
    }

    /// Hand the latest grayscale frame to the motion estimator. Frames
    /// arriving faster than the tick interval replace each other; only the
    /// newest is consumed per tick.
    pub fn submit_frame(&self, frame: GrayFrame) -> Result<(), Error> {
        self.ensure_live()?;
        *lock(&self.shared.frame_slot) = Some(frame);
        Ok(())
    }

    /// Consistent view of the current tracks for rendering.
    pub fn snapshot(&self) -> Vec<TrackSnapshot> {
        lock(&self.shared.registry).snapshot()
    }

    /// The reported waste count.
    pub fn confirmed_count(&self) -> usize {
        lock(&self.shared.registry).confirmed_count()
    }

    /// Take the confirmed-track events recorded since the last drain.
    pub fn drain_confirmed_events(&self) -> Vec<ConfirmedEvent> {
        lock(&self.shared.registry).drain_confirmed_events()
    }

    /// Suspend the tick loop. The track set is preserved across the pause.
    pub fn pause(&self) {
        lock(&self.shared.control).paused = true;
        self.shared.signal.notify_all();
    }

    /// Resume a paused session.
    pub fn resume(&self) {
        lock(&self.shared.control).paused = false;
        self.shared.signal.notify_all();
    }

    pub fn is_paused(&self) -> bool {
        lock(&self.shared.control).paused
    }

    /// Drop all tracks and pending events without ending the session.
    pub fn reset(&self) {
        lock(&self.shared.registry).reset();
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// End the session: stop the tick thread. Ended sessions reject
    /// further detections and frames. Also runs on drop.
    pub fn end(&self) {
        lock(&self.shared.control).ended = true;
        self.shared.signal.notify_all();
        if let Some(worker) = lock(&self.worker).take()
            && worker.join().is_err()
        {
            debug!("tick thread panicked during shutdown");
        }
    }
}

impl Drop for TrackingSession {
    fn drop(&mut self) {
        self.end();
    }
}

fn tick_loop(shared: &Shared, tick_interval: std::time::Duration) {
    let mut control = lock(&shared.control);
    loop {
        if control.ended {
            return;
        }
        if control.paused {
            // Suspend with no busy work until resumed or ended.
            control = shared
                .signal
                .wait(control)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            continue;
        }

        let (guard, _) = shared
            .signal
            .wait_timeout(control, tick_interval)
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        control = guard;
        if control.ended {
            return;
        }
        if control.paused {
            continue;
        }
        drop(control);

        tick(shared);

        control = lock(&shared.control);
    }
}

/// One motion tick: estimate flow outside the registry lock, then update
/// every track under it.
fn tick(shared: &Shared) {
    let frame = lock(&shared.frame_slot).take();

    let field = frame.map(|frame| {
        // The estimator has its own lock; the slow feature tracking never
        // runs under the registry lock.
        lock(&shared.estimator).process_frame(&frame, Instant::now())
    });

    lock(&shared.registry).update_trackers(Instant::now(), field.as_ref());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FlowConfig, TrackerConfig};
    use crate::tracker::{Rect, TrackStatus};
    use nalgebra::Point2;
    use std::time::Duration;

    fn fast_config() -> SessionConfig {
        SessionConfig {
            tracker: TrackerConfig::default(),
            flow: FlowConfig::default(),
            tick_interval: Duration::from_millis(10),
        }
    }

    fn det_at(x: f32, y: f32) -> Detection {
        Detection::new(
            0,
            0.9,
            Rect::from_center(Point2::new(x, y), 20.0, 20.0),
            Instant::now(),
        )
    }

    #[test]
    fn test_detections_visible_in_snapshot() {
        let session = TrackingSession::new(fast_config());
        session.process_detections(&[det_at(10.0, 10.0)]).unwrap();

        let snap = session.snapshot();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].status, TrackStatus::Candidate);
        session.end();
    }

    #[test]
    fn test_confirmation_through_session() {
        let session = TrackingSession::new(fast_config());
        for _ in 0..6 {
            session.process_detections(&[det_at(10.0, 10.0)]).unwrap();
        }
        assert_eq!(session.confirmed_count(), 1);

        let events = session.drain_confirmed_events();
        assert_eq!(events.len(), 1);
        session.end();
    }

    #[test]
    fn test_pause_preserves_tracks() {
        let session = TrackingSession::new(fast_config());
        session.process_detections(&[det_at(10.0, 10.0)]).unwrap();

        session.pause();
        assert!(session.is_paused());
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(session.snapshot().len(), 1);

        session.resume();
        assert!(!session.is_paused());
        session.end();
    }

    #[test]
    fn test_reset_clears_tracks() {
        let session = TrackingSession::new(fast_config());
        session.process_detections(&[det_at(10.0, 10.0)]).unwrap();
        session.reset();
        assert!(session.snapshot().is_empty());
        session.end();
    }

    #[test]
    fn test_frames_drive_ticks() {
        let session = TrackingSession::new(fast_config());
        let frame = GrayFrame::new(64, 64, vec![128; 64 * 64]).unwrap();
        session.submit_frame(frame).unwrap();
        std::thread::sleep(Duration::from_millis(60));
        // The tick consumed the frame; the session is still live.
        assert!(session.snapshot().is_empty());
        session.end();
    }

    #[test]
    fn test_stale_track_removed_by_ticks() {
        let mut config = fast_config();
        config.tracker.staleness_timeout = Duration::from_millis(30);
        let session = TrackingSession::new(config);
        session.process_detections(&[det_at(10.0, 10.0)]).unwrap();
        assert_eq!(session.snapshot().len(), 1);

        // Candidate goes stale and is pruned by the periodic tick.
        std::thread::sleep(Duration::from_millis(120));
        assert!(session.snapshot().is_empty());
        session.end();
    }

    #[test]
    fn test_snapshot_consistent_under_concurrent_updates() {
        let session = Arc::new(TrackingSession::new(fast_config()));
        let writer = {
            let session = Arc::clone(&session);
            thread::spawn(move || {
                for i in 0..200 {
                    let x = 10.0 + (i % 5) as f32;
                    let _ = session.process_detections(&[det_at(x, 10.0), det_at(500.0, 500.0)]);
                }
            })
        };

        for _ in 0..200 {
            for snap in session.snapshot() {
                assert!(snap.position.x.is_finite());
                assert!(snap.position.y.is_finite());
            }
            let _ = session.confirmed_count();
        }
        writer.join().expect("writer thread");
    }

    #[test]
    fn test_ended_session_rejects_input() {
        let session = TrackingSession::new(fast_config());
        session.process_detections(&[det_at(10.0, 10.0)]).unwrap();
        session.end();

        let err = session.process_detections(&[det_at(10.0, 10.0)]).unwrap_err();
        assert!(matches!(err, Error::SessionEnded));

        let frame = GrayFrame::new(32, 32, vec![0; 32 * 32]).unwrap();
        assert!(matches!(
            session.submit_frame(frame),
            Err(Error::SessionEnded)
        ));
    }
}
