use std::time::{Duration, Instant};

use nalgebra::{Point2, Vector2};

use flotsam::config::TrackerConfig;
use flotsam::flow::{FlowField, FlowVector};
use flotsam::tracker::{
    AssignmentStrategy, Detection, Rect, TrackRegistry, TrackStatus, distance_cost_matrix,
};

fn det_at(x: f32, y: f32, t: Instant) -> Detection {
    Detection::new(0, 0.9, Rect::from_center(Point2::new(x, y), 20.0, 20.0), t)
}

#[test]
fn test_basic_tracking_lifecycle() {
    let mut registry = TrackRegistry::new(TrackerConfig::default());
    let t0 = Instant::now();

    // Two far-apart detections spawn two candidates with increasing ids.
    registry
        .process_detections(&[det_at(10.0, 10.0, t0), det_at(500.0, 500.0, t0)], t0)
        .unwrap();
    let snap = registry.snapshot();
    assert_eq!(snap.len(), 2);
    assert!(snap[0].id < snap[1].id);
    assert!(snap.iter().all(|s| s.status == TrackStatus::Candidate));
    assert_eq!(registry.confirmed_count(), 0);

    // A nearby detection the next frame associates with the first track.
    let t1 = t0 + Duration::from_millis(100);
    registry.process_detections(&[det_at(12.0, 11.0, t1)], t1).unwrap();
    assert_eq!(registry.snapshot().len(), 2);

    // Keep feeding the first object until it confirms.
    let mut now = t1;
    for i in 2..=5u64 {
        now = t0 + Duration::from_millis(100 * i);
        registry.process_detections(&[det_at(12.0, 11.0, now)], now).unwrap();
    }
    let snap = registry.snapshot();
    let confirmed: Vec<_> = snap
        .iter()
        .filter(|s| s.status == TrackStatus::Confirmed)
        .collect();
    assert_eq!(confirmed.len(), 1);
    assert!(confirmed[0].animation_active);
    assert_eq!(registry.confirmed_count(), 1);

    let events = registry.drain_confirmed_events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].track_id, confirmed[0].id);

    // The animation one-shot clears after a second.
    registry.update_trackers(now + Duration::from_millis(1100), None);
    let snap = registry.snapshot();
    let track = snap.iter().find(|s| s.status == TrackStatus::Confirmed).unwrap();
    assert!(!track.animation_active);

    // With no further detections the confirmed track expires and is gone
    // one pass later; the stale candidate at (500, 500) is pruned too.
    let later = now + Duration::from_millis(3500);
    registry.update_trackers(later, None);
    registry.update_trackers(later + Duration::from_millis(250), None);
    assert!(registry.snapshot().is_empty());
    assert_eq!(registry.confirmed_count(), 0);
}

#[test]
fn test_motion_compensation_moves_unmatched_track() {
    let mut registry = TrackRegistry::new(TrackerConfig::default());
    let t0 = Instant::now();
    registry.process_detections(&[det_at(100.0, 100.0, t0)], t0).unwrap();

    // The camera pans: background features all drift (+8, 0) per tick.
    let field = FlowField {
        vectors: (0..10)
            .map(|i| FlowVector {
                origin: Point2::new(20.0 * i as f32, 90.0),
                delta: Vector2::new(8.0, 0.0),
            })
            .collect(),
        elapsed: Duration::from_millis(250),
        neighbors: 6,
    };

    let mut now = t0;
    let start_x = registry.snapshot()[0].position.x;
    for _ in 0..4 {
        now += Duration::from_millis(250);
        registry.update_trackers(now, Some(&field));
    }

    let snap = registry.snapshot();
    assert_eq!(snap.len(), 1);
    assert!(
        snap[0].position.x > start_x + 5.0,
        "track should drift with the flow: started {start_x}, now {}",
        snap[0].position.x
    );
    assert!(snap[0].velocity.x > 0.0);
}

#[test]
fn test_fresh_detection_suppresses_flow_compensation() {
    let mut registry = TrackRegistry::new(TrackerConfig::default());
    let t0 = Instant::now();
    registry.process_detections(&[det_at(100.0, 100.0, t0)], t0).unwrap();

    // Matched this frame: `associated` is set, so the flow field must not
    // be folded into this track on the same tick.
    let t1 = t0 + Duration::from_millis(100);
    registry.process_detections(&[det_at(101.0, 100.0, t1)], t1).unwrap();

    let field = FlowField {
        vectors: (0..10)
            .map(|i| FlowVector {
                origin: Point2::new(20.0 * i as f32, 90.0),
                delta: Vector2::new(-50.0, 0.0),
            })
            .collect(),
        elapsed: Duration::from_millis(250),
        neighbors: 6,
    };
    registry.update_trackers(t1, Some(&field));
    let vx = registry.snapshot()[0].velocity.x;
    assert!(
        vx > -20.0,
        "fresh detection should mask the strong leftward flow, vx = {vx}"
    );
}

#[test]
fn test_greedy_validated_by_optimal() {
    // On a well-separated frame the latency-bounded greedy pass must agree
    // with the optimal solver.
    let t0 = Instant::now();
    let detections = vec![
        det_at(10.0, 10.0, t0),
        det_at(200.0, 200.0, t0),
        det_at(400.0, 50.0, t0),
    ];
    let positions = vec![
        Point2::new(12.0, 11.0),
        Point2::new(205.0, 198.0),
        Point2::new(398.0, 52.0),
    ];
    let costs = distance_cost_matrix(&detections, &positions);

    let greedy = AssignmentStrategy::Greedy.solve(&costs, 50.0).unwrap();
    let mut optimal = AssignmentStrategy::Optimal.solve(&costs, 50.0).unwrap();
    optimal.matches.sort_unstable();
    assert_eq!(greedy.matches, optimal.matches);
    assert_eq!(greedy.matches.len(), 3);
}

#[test]
fn test_optimal_strategy_in_registry() {
    let config = TrackerConfig {
        assignment: AssignmentStrategy::Optimal,
        ..TrackerConfig::default()
    };
    let mut registry = TrackRegistry::new(config);
    let t0 = Instant::now();
    registry
        .process_detections(&[det_at(10.0, 10.0, t0), det_at(300.0, 300.0, t0)], t0)
        .unwrap();

    let t1 = t0 + Duration::from_millis(100);
    registry
        .process_detections(&[det_at(13.0, 10.0, t1), det_at(302.0, 301.0, t1)], t1)
        .unwrap();
    // Both detections associated; no new tracks spawned.
    assert_eq!(registry.snapshot().len(), 2);
}

#[test]
fn test_prediction_carries_track_between_detections() {
    let mut registry = TrackRegistry::new(TrackerConfig::default());
    let t0 = Instant::now();

    // Feed a rightward-moving object every 100 ms.
    let mut now = t0;
    for i in 0..6u64 {
        now = t0 + Duration::from_millis(100 * i);
        registry
            .process_detections(&[det_at(100.0 + 10.0 * i as f32, 100.0, now)], now)
            .unwrap();
        registry.update_trackers(now, None);
    }
    let before = registry.snapshot()[0].position.x;

    // With no detection this tick, prediction keeps the track moving right.
    registry.update_trackers(now + Duration::from_millis(500), None);
    let after = registry.snapshot()[0].position.x;
    assert!(
        after > before,
        "predicted position should advance: {before} -> {after}"
    );
}
