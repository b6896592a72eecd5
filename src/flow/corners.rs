//! Shi-Tomasi corner detection for the optical-flow working set.
//!
//! Min-eigenvalue score over a 3x3 structure tensor of Sobel gradients,
//! thresholded relative to the strongest response, then greedily selected
//! strongest-first with a minimum spacing.

use nalgebra::Point2;

use crate::flow::frame::Plane;

/// Margin kept clear of the border: 1 px for the Sobel stencil plus 1 px
/// for the tensor window.
const BORDER: usize = 2;

/// Detect up to `max_corners` corners.
///
/// `quality_level` rejects responses weaker than that fraction of the
/// strongest response; `min_distance` enforces spacing between selected
/// corners. A frame too small for the stencils yields no corners.
pub fn detect_corners(
    plane: &Plane,
    max_corners: usize,
    quality_level: f32,
    min_distance: f32,
) -> Vec<Point2<f32>> {
    let width = plane.width();
    let height = plane.height();
    if max_corners == 0 || width <= 2 * BORDER || height <= 2 * BORDER {
        return Vec::new();
    }

    // Sobel gradients over the interior.
    let mut gx = vec![0.0f32; width * height];
    let mut gy = vec![0.0f32; width * height];
    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let p = |dx: isize, dy: isize| {
                plane.get((x as isize + dx) as usize, (y as isize + dy) as usize)
            };
            gx[y * width + x] = (p(1, -1) + 2.0 * p(1, 0) + p(1, 1))
                - (p(-1, -1) + 2.0 * p(-1, 0) + p(-1, 1));
            gy[y * width + x] = (p(-1, 1) + 2.0 * p(0, 1) + p(1, 1))
                - (p(-1, -1) + 2.0 * p(0, -1) + p(1, -1));
        }
    }

    // Min-eigenvalue response of the structure tensor, summed over a 3x3
    // window around each interior pixel.
    let mut responses: Vec<(f32, usize, usize)> = Vec::new();
    let mut max_response = 0.0f32;
    for y in BORDER..height - BORDER {
        for x in BORDER..width - BORDER {
            let mut sxx = 0.0f32;
            let mut sxy = 0.0f32;
            let mut syy = 0.0f32;
            for wy in y - 1..=y + 1 {
                for wx in x - 1..=x + 1 {
                    let ix = gx[wy * width + wx];
                    let iy = gy[wy * width + wx];
                    sxx += ix * ix;
                    sxy += ix * iy;
                    syy += iy * iy;
                }
            }
            // Smaller eigenvalue of [[sxx, sxy], [sxy, syy]].
            let trace = sxx + syy;
            let delta = ((sxx - syy) * (sxx - syy) + 4.0 * sxy * sxy).sqrt();
            let min_eig = 0.5 * (trace - delta);
            if min_eig > 0.0 {
                responses.push((min_eig, x, y));
                max_response = max_response.max(min_eig);
            }
        }
    }
    if responses.is_empty() {
        return Vec::new();
    }

    let threshold = quality_level * max_response;
    responses.retain(|&(score, _, _)| score >= threshold);
    responses.sort_by(|a, b| b.0.total_cmp(&a.0));

    // Strongest first, skipping anything closer than min_distance to an
    // already selected corner.
    let min_dist_sq = min_distance * min_distance;
    let mut corners: Vec<Point2<f32>> = Vec::with_capacity(max_corners);
    for &(_, x, y) in &responses {
        if corners.len() >= max_corners {
            break;
        }
        let candidate = Point2::new(x as f32, y as f32);
        let spaced = corners
            .iter()
            .all(|c| (candidate - c).norm_squared() >= min_dist_sq);
        if spaced {
            corners.push(candidate);
        }
    }

    corners
}
