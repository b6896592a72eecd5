//! Per-class duplicate suppression (non-maximum suppression).
//!
//! Raw detector output often contains several overlapping boxes for one
//! object. Per class, the highest-confidence box of each overlap cluster is
//! kept and the rest are discarded.

use std::cmp::Ordering;

use crate::tracker::matching::Detection;

/// Suppress duplicate detections per class.
///
/// Degenerate (zero-area) boxes are excluded up front. Within a class,
/// candidates are visited by confidence descending, ties broken by original
/// list order; every remaining same-class box whose IoU with the selected
/// box is at or above `iou_threshold` is discarded. Idempotent: re-applying
/// to its own output is a no-op.
pub fn suppress(detections: &[Detection], iou_threshold: f32) -> Vec<Detection> {
    let mut kept = Vec::new();

    // Classes in first-seen order so the output order is deterministic.
    let mut classes: Vec<u32> = Vec::new();
    for det in detections {
        if !classes.contains(&det.class_id) {
            classes.push(det.class_id);
        }
    }

    for class_id in classes {
        let mut pool: Vec<&Detection> = detections
            .iter()
            .filter(|d| d.class_id == class_id && !d.rect.is_degenerate())
            .collect();

        // Stable sort: equal confidences keep their original order.
        pool.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(Ordering::Equal)
        });

        while let Some(&best) = pool.first() {
            kept.push(best.clone());
            // IoU(best, best) = 1, so the selected box is dropped as well.
            pool.retain(|d| d.rect.iou(&best.rect) < iou_threshold);
        }
    }

    kept
}
