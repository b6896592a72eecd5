//! Detection-to-track association.
//!
//! Both strategies consume a detections x tracks cost matrix of centroid
//! distances and a gating threshold, and return matched pairs plus the
//! unmatched index sets. The output is structurally free of double
//! assignments: a detection matches at most one track and vice versa.

use std::time::Instant;

use nalgebra::Point2;
use ndarray::Array2;
use tracing::warn;

use crate::error::Error;
use crate::tracker::rect::Rect;

/// Detection input to the tracking engine.
///
/// Immutable once produced by the detector collaborator.
#[derive(Debug, Clone)]
pub struct Detection {
    /// Class label id assigned by the detector.
    pub class_id: u32,
    /// Detection confidence in [0, 1].
    pub confidence: f32,
    /// Bounding box in frame coordinates.
    pub rect: Rect,
    /// Capture time of the frame this detection came from.
    pub timestamp: Instant,
}

impl Detection {
    pub fn new(class_id: u32, confidence: f32, rect: Rect, timestamp: Instant) -> Self {
        Self {
            class_id,
            confidence,
            rect,
            timestamp,
        }
    }

    /// Center of the bounding box, the measurement fed to association
    /// and the Kalman filter.
    pub fn center(&self) -> Point2<f32> {
        self.rect.center()
    }
}

/// How detections are matched against existing tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AssignmentStrategy {
    /// Single-pass nearest-centroid matching in input order. Not globally
    /// optimal but latency-bounded; the per-frame default.
    #[default]
    Greedy,
    /// Minimal-total-cost bipartite matching (Jonker-Volgenant). For batch
    /// association or re-validating greedy results.
    Optimal,
}

impl AssignmentStrategy {
    /// Solve the assignment described by `costs` (detections x tracks).
    ///
    /// Pairs with cost at or above `gate` are rejected. Fails fast on a
    /// malformed cost matrix (negative or non-finite entries); distances
    /// are non-negative by construction, so such a matrix is a programmer
    /// error, not a runtime condition.
    pub fn solve(&self, costs: &Array2<f32>, gate: f32) -> Result<AssignmentResult, Error> {
        for ((row, col), &cost) in costs.indexed_iter() {
            if !cost.is_finite() || cost < 0.0 {
                return Err(Error::CostMatrix { row, col });
            }
        }
        Ok(match self {
            AssignmentStrategy::Greedy => greedy_assignment(costs, gate),
            AssignmentStrategy::Optimal => optimal_assignment(costs, gate),
        })
    }
}

/// Outcome of one association pass.
#[derive(Debug, Clone)]
pub struct AssignmentResult {
    /// Matched (detection index, track index) pairs.
    pub matches: Vec<(usize, usize)>,
    pub unmatched_detections: Vec<usize>,
    pub unmatched_tracks: Vec<usize>,
}

/// Euclidean distance matrix between detection centers and track positions,
/// shape (detections, tracks).
pub fn distance_cost_matrix(detections: &[Detection], positions: &[Point2<f32>]) -> Array2<f32> {
    let mut costs = Array2::zeros((detections.len(), positions.len()));
    for (i, det) in detections.iter().enumerate() {
        let center = det.center();
        for (j, pos) in positions.iter().enumerate() {
            costs[[i, j]] = (center - pos).norm();
        }
    }
    costs
}

/// Greedy nearest-centroid assignment: for each detection in input order,
/// claim the closest still-unclaimed track if it lies under the gate.
fn greedy_assignment(costs: &Array2<f32>, gate: f32) -> AssignmentResult {
    let (num_dets, num_tracks) = costs.dim();
    let mut claimed = vec![false; num_tracks];
    let mut matches = Vec::new();
    let mut unmatched_detections = Vec::new();

    for i in 0..num_dets {
        let mut best: Option<(usize, f32)> = None;
        for j in 0..num_tracks {
            if claimed[j] {
                continue;
            }
            let cost = costs[[i, j]];
            if best.is_none_or(|(_, b)| cost < b) {
                best = Some((j, cost));
            }
        }
        match best {
            Some((j, cost)) if cost < gate => {
                claimed[j] = true;
                matches.push((i, j));
            }
            _ => unmatched_detections.push(i),
        }
    }

    let unmatched_tracks = claimed
        .iter()
        .enumerate()
        .filter_map(|(j, &c)| if c { None } else { Some(j) })
        .collect();

    AssignmentResult {
        matches,
        unmatched_detections,
        unmatched_tracks,
    }
}

/// Optimal assignment over a square-padded matrix. Produces the pairing
/// that minimizes total cost; pairs over the gate are discarded afterwards.
fn optimal_assignment(costs: &Array2<f32>, gate: f32) -> AssignmentResult {
    let (num_dets, num_tracks) = costs.dim();

    if num_dets == 0 {
        return AssignmentResult {
            matches: vec![],
            unmatched_detections: vec![],
            unmatched_tracks: (0..num_tracks).collect(),
        };
    }
    if num_tracks == 0 {
        return AssignmentResult {
            matches: vec![],
            unmatched_detections: (0..num_dets).collect(),
            unmatched_tracks: vec![],
        };
    }

    let size = num_dets.max(num_tracks);
    let mut padded = Array2::<f64>::from_elem((size, size), 1e6);
    for i in 0..num_dets {
        for j in 0..num_tracks {
            padded[[i, j]] = costs[[i, j]] as f64;
        }
    }

    let mut matches = vec![];
    let mut unmatched_detections = vec![];
    let mut unmatched_track_mask = vec![true; num_tracks];

    match lapjv::lapjv(&padded) {
        Ok((row_to_col, _)) => {
            for (row, &col) in row_to_col.iter().enumerate() {
                if row >= num_dets {
                    continue;
                }
                if col < num_tracks && costs[[row, col]] < gate {
                    matches.push((row, col));
                    unmatched_track_mask[col] = false;
                } else {
                    unmatched_detections.push(row);
                }
            }
        }
        Err(_) => {
            warn!("linear assignment failed, leaving frame unmatched");
            unmatched_detections = (0..num_dets).collect();
        }
    }

    let unmatched_tracks = unmatched_track_mask
        .iter()
        .enumerate()
        .filter_map(|(j, &u)| if u { Some(j) } else { None })
        .collect();

    AssignmentResult {
        matches,
        unmatched_detections,
        unmatched_tracks,
    }
}
