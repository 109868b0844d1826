//! Chessboard corner localization seeded by decoded markers.

use super::{Correspondence, DetectorParams};
use crate::board::CharucoBoard;
use charuco_dataset_aruco::MarkerDetection;
use charuco_dataset_core::{estimate_homography, sample_bilinear, GrayImageView, Homography};
use nalgebra::{Matrix2, Point2, Vector2};
use std::collections::HashMap;

/// Locate every inner corner next to at least one decoded marker.
///
/// Output is sorted by corner id.
pub(crate) fn locate_corners(
    image: &GrayImageView<'_>,
    board: &CharucoBoard,
    markers: &[MarkerDetection],
    params: &DetectorParams,
) -> Vec<Correspondence> {
    let by_id: HashMap<u32, &MarkerDetection> = markers.iter().map(|m| (m.id, m)).collect();
    let l = board.spec().square_length;
    let m = board.marker_margin();

    let mut out = Vec::new();
    for (id, corner) in board.corner_points() {
        let mut src = Vec::with_capacity(8);
        let mut dst = Vec::with_capacity(8);
        for marker_id in board.corner_markers(id) {
            let (Some(det), Some(outline)) =
                (by_id.get(&marker_id), board.marker_corners(marker_id))
            else {
                continue;
            };
            for (b, p) in outline.iter().zip(det.corners.iter()) {
                src.push(Point2::new(b.x, b.y));
                dst.push(*p);
            }
        }
        let Some(h) = estimate_homography(&src, &dst) else {
            continue;
        };

        let c = Point2::new(corner.x, corner.y);
        let seed = h.apply(c);
        let step = |dx: f64, dy: f64| (h.apply(Point2::new(c.x + dx, c.y + dy)) - seed).norm();
        let square_px = step(l, 0.0).min(step(0.0, l)).min(step(-l, 0.0)).min(step(0.0, -l));
        let margin_px = step(0.65 * m, 0.0)
            .min(step(0.0, 0.65 * m))
            .min(step(-0.65 * m, 0.0))
            .min(step(0.0, -0.65 * m));
        let radius = margin_px.clamp(2.0, params.corner_max_window_px.max(2.0));

        let reach = radius + 2.0;
        if seed.x < reach
            || seed.y < reach
            || seed.x > image.width as f64 - 1.0 - reach
            || seed.y > image.height as f64 - 1.0 - reach
        {
            continue;
        }

        let max_shift = (params.corner_max_shift_frac * square_px).max(1.0);
        let Some(refined) = refine_saddle(image, seed, radius, params.corner_max_iters, max_shift)
        else {
            continue;
        };

        let Some((i, j)) = board.corner_grid(id) else {
            continue;
        };
        if !has_saddle_contrast(image, &h, c, refined, 0.5 * m, (i + j) % 2 == 0, params) {
            continue;
        }

        out.push(Correspondence {
            id,
            board: corner,
            image: refined,
        });
    }
    out
}

/// Gradient-orthogonality refinement of an X-junction.
///
/// Every gradient inside the window is orthogonal to the vector from the
/// corner to its sample point, so the corner solves
/// `sum(g gᵀ) q = sum(g gᵀ p)`.
fn refine_saddle(
    image: &GrayImageView<'_>,
    seed: Point2<f64>,
    radius: f64,
    max_iters: usize,
    max_shift: f64,
) -> Option<Point2<f64>> {
    let ri = radius.ceil() as i32;
    let two_sigma_sq = radius * radius;
    let mut q = seed;

    for _ in 0..max_iters.max(1) {
        let mut a = Matrix2::<f64>::zeros();
        let mut b = Vector2::<f64>::zeros();
        for dy in -ri..=ri {
            for dx in -ri..=ri {
                let (fx, fy) = (dx as f64, dy as f64);
                let w = (-(fx * fx + fy * fy) / two_sigma_sq).exp();
                let p = Vector2::new(q.x + fx, q.y + fy);
                let gx = 0.5
                    * (sample_bilinear(image, p.x + 1.0, p.y)
                        - sample_bilinear(image, p.x - 1.0, p.y));
                let gy = 0.5
                    * (sample_bilinear(image, p.x, p.y + 1.0)
                        - sample_bilinear(image, p.x, p.y - 1.0));
                let gg = Matrix2::new(gx * gx, gx * gy, gx * gy, gy * gy) * w;
                a += gg;
                b += gg * p;
            }
        }
        let next = Point2::from(a.try_inverse()? * b);
        if !next.x.is_finite() || !next.y.is_finite() || (next - seed).norm() > max_shift {
            return None;
        }
        let moved = (next - q).norm();
        q = next;
        if moved < 1e-3 {
            break;
        }
    }
    Some(q)
}

/// Check that the two black squares meeting at the corner are darker than the
/// two white ones. `top_left_black` is the colour of the square up-left of the
/// corner in board coordinates.
fn has_saddle_contrast(
    image: &GrayImageView<'_>,
    h: &Homography,
    board_corner: Point2<f64>,
    corner_px: Point2<f64>,
    offset: f64,
    top_left_black: bool,
    params: &DetectorParams,
) -> bool {
    let origin = h.apply(board_corner);
    let sample = |dx: f64, dy: f64| {
        let d = h.apply(Point2::new(board_corner.x + dx, board_corner.y + dy)) - origin;
        let p = corner_px + d;
        let mut acc = 0.0;
        for (ox, oy) in [(0.0, 0.0), (0.5, 0.0), (-0.5, 0.0), (0.0, 0.5), (0.0, -0.5)] {
            acc += sample_bilinear(image, p.x + ox, p.y + oy);
        }
        acc / 5.0
    };
    let diag = [sample(-offset, -offset), sample(offset, offset)];
    let anti = [sample(offset, -offset), sample(-offset, offset)];
    let (black, white) = if top_left_black { (diag, anti) } else { (anti, diag) };
    let darkest_white = white[0].min(white[1]);
    let lightest_black = black[0].max(black[1]);
    darkest_white - lightest_black >= params.corner_min_contrast
}
