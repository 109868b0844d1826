//! Marker candidate extraction: adaptive threshold, connected components and
//! sub-pixel quad fitting.

use super::DetectorParams;
use charuco_dataset_core::{sample_bilinear, GrayImageView};
use nalgebra::{Point2, Vector2};

/// Dark-pixel mask from a box-mean adaptive threshold.
pub(crate) fn adaptive_threshold(image: &GrayImageView<'_>, window: usize, offset: f64) -> Vec<bool> {
    let (w, h) = (image.width, image.height);
    // integral image with a zero row/column in front
    let mut integral = vec![0u64; (w + 1) * (h + 1)];
    for y in 0..h {
        let mut row = 0u64;
        for x in 0..w {
            row += image.get(x, y) as u64;
            integral[(y + 1) * (w + 1) + x + 1] = integral[y * (w + 1) + x + 1] + row;
        }
    }

    let r = window / 2;
    let mut mask = vec![false; w * h];
    for y in 0..h {
        let y0 = y.saturating_sub(r);
        let y1 = (y + r + 1).min(h);
        for x in 0..w {
            let x0 = x.saturating_sub(r);
            let x1 = (x + r + 1).min(w);
            let sum = integral[y1 * (w + 1) + x1] + integral[y0 * (w + 1) + x0]
                - integral[y0 * (w + 1) + x1]
                - integral[y1 * (w + 1) + x0];
            let mean = sum as f64 / ((x1 - x0) * (y1 - y0)) as f64;
            mask[y * w + x] = (image.get(x, y) as f64) < mean - offset;
        }
    }
    mask
}

/// An 8-connected set of dark pixels.
pub(crate) struct Component {
    pub pixels: Vec<(u32, u32)>,
    pub min: (u32, u32),
    pub max: (u32, u32),
}

/// 8-connected components of the mask, with an explicit stack.
pub(crate) fn connected_components(mask: &[bool], width: usize, height: usize) -> Vec<Component> {
    let mut visited = vec![false; mask.len()];
    let mut out = Vec::new();
    let mut stack = Vec::new();

    for start in 0..mask.len() {
        if !mask[start] || visited[start] {
            continue;
        }
        visited[start] = true;
        stack.push(start);
        let mut comp = Component {
            pixels: Vec::new(),
            min: (u32::MAX, u32::MAX),
            max: (0, 0),
        };

        while let Some(idx) = stack.pop() {
            let x = (idx % width) as u32;
            let y = (idx / width) as u32;
            comp.pixels.push((x, y));
            comp.min = (comp.min.0.min(x), comp.min.1.min(y));
            comp.max = (comp.max.0.max(x), comp.max.1.max(y));

            for dy in -1i64..=1 {
                for dx in -1i64..=1 {
                    let nx = x as i64 + dx;
                    let ny = y as i64 + dy;
                    if nx < 0 || ny < 0 || nx >= width as i64 || ny >= height as i64 {
                        continue;
                    }
                    let n = ny as usize * width + nx as usize;
                    if mask[n] && !visited[n] {
                        visited[n] = true;
                        stack.push(n);
                    }
                }
            }
        }
        out.push(comp);
    }
    out
}

/// Candidate marker outlines (clockwise, image coordinates).
pub(crate) fn find_quads(image: &GrayImageView<'_>, params: &DetectorParams) -> Vec<[Point2<f64>; 4]> {
    let window = params.window_for(image.width, image.height);
    let mask = adaptive_threshold(image, window, params.threshold_offset);
    let components = connected_components(&mask, image.width, image.height);

    let min_side = params.min_marker_side_px;
    let max_side = params.max_marker_side_frac * image.width.max(image.height) as f64;
    let margin = params.border_margin_px;

    let mut quads = Vec::new();
    for comp in components {
        let bw = (comp.max.0 - comp.min.0 + 1) as f64;
        let bh = (comp.max.1 - comp.min.1 + 1) as f64;
        if bw < min_side || bh < min_side || bw > max_side || bh > max_side {
            continue;
        }
        if (comp.pixels.len() as f64) < 2.0 * min_side {
            continue;
        }
        if (comp.min.0 as f64) < margin
            || (comp.min.1 as f64) < margin
            || (comp.max.0 as f64) >= image.width as f64 - margin
            || (comp.max.1 as f64) >= image.height as f64 - margin
        {
            continue;
        }

        let hull = convex_hull(&comp.pixels);
        let Some(rough) = rough_quad(&hull) else {
            continue;
        };
        if !is_plausible_quad(&rough, &hull, min_side) {
            continue;
        }
        // outlines of light holes inside dark blobs fail here too
        if let Some(quad) = refine_quad(image, &rough) {
            quads.push(quad);
        }
    }
    quads
}

fn cross(o: Point2<f64>, a: Point2<f64>, b: Point2<f64>) -> f64 {
    (a.x - o.x) * (b.y - o.y) - (a.y - o.y) * (b.x - o.x)
}

/// Monotone-chain convex hull of pixel centres.
fn convex_hull(pixels: &[(u32, u32)]) -> Vec<Point2<f64>> {
    let mut pts: Vec<Point2<f64>> = pixels
        .iter()
        .map(|&(x, y)| Point2::new(x as f64, y as f64))
        .collect();
    pts.sort_by(|a, b| a.x.total_cmp(&b.x).then(a.y.total_cmp(&b.y)));
    pts.dedup();
    if pts.len() < 3 {
        return pts;
    }

    let mut lower: Vec<Point2<f64>> = Vec::new();
    for &p in &pts {
        while lower.len() >= 2 && cross(lower[lower.len() - 2], lower[lower.len() - 1], p) <= 0.0 {
            lower.pop();
        }
        lower.push(p);
    }
    let mut upper: Vec<Point2<f64>> = Vec::new();
    for &p in pts.iter().rev() {
        while upper.len() >= 2 && cross(upper[upper.len() - 2], upper[upper.len() - 1], p) <= 0.0 {
            upper.pop();
        }
        upper.push(p);
    }
    lower.pop();
    upper.pop();
    lower.extend(upper);
    lower
}

fn polygon_area(poly: &[Point2<f64>]) -> f64 {
    let n = poly.len();
    let mut a = 0.0;
    for i in 0..n {
        let p = poly[i];
        let q = poly[(i + 1) % n];
        a += p.x * q.y - q.x * p.y;
    }
    0.5 * a.abs()
}

/// Four hull vertices approximating a convex quadrilateral.
///
/// The vertex farthest from the centroid and the vertex farthest from it form
/// a diagonal; the remaining corners are the extreme vertices on each side.
fn rough_quad(hull: &[Point2<f64>]) -> Option<[Point2<f64>; 4]> {
    if hull.len() < 4 {
        return None;
    }
    let n = hull.len() as f64;
    let c = hull.iter().fold(Vector2::zeros(), |acc, p| acc + p.coords) / n;
    let far = |from: Vector2<f64>| {
        hull.iter()
            .copied()
            .max_by(|a, b| (a.coords - from).norm_squared().total_cmp(&(b.coords - from).norm_squared()))
    };
    let p0 = far(c)?;
    let p2 = far(p0.coords)?;

    let (mut best_pos, mut best_neg) = ((0.0, None), (0.0, None));
    for &p in hull {
        let d = cross(p0, p2, p);
        if d > best_pos.0 {
            best_pos = (d, Some(p));
        } else if d < best_neg.0 {
            best_neg = (d, Some(p));
        }
    }
    let p1 = best_pos.1?;
    let p3 = best_neg.1?;
    Some(charuco_dataset_aruco::order_quad([p0, p1, p2, p3]))
}

fn is_plausible_quad(quad: &[Point2<f64>; 4], hull: &[Point2<f64>], min_side: f64) -> bool {
    for i in 0..4 {
        let a = quad[i];
        let b = quad[(i + 1) % 4];
        let c = quad[(i + 2) % 4];
        if (b - a).norm() < min_side - 1.0 {
            return false;
        }
        // strictly convex, clockwise in image coordinates
        if cross(a, b, c) <= 0.0 {
            return false;
        }
    }
    let hull_area = polygon_area(hull);
    let quad_area = polygon_area(quad);
    // a quad fit to a blob that is not four-sided leaves hull area outside
    hull_area > 0.0 && quad_area / hull_area > 0.9
}

/// Sub-pixel outline: fit a line to the dark-to-light transition along each
/// side and intersect neighbouring lines. `None` when a side has no such
/// transition.
fn refine_quad(image: &GrayImageView<'_>, rough: &[Point2<f64>; 4]) -> Option<[Point2<f64>; 4]> {
    const SAMPLES: usize = 12;
    const STEP: f64 = 0.25;
    const MIN_EDGE_CONTRAST: f64 = 20.0;

    let mut lines = Vec::with_capacity(4);
    for i in 0..4 {
        let a = rough[i];
        let b = rough[(i + 1) % 4];
        let len = (b - a).norm();
        let d = (b - a) / len;
        // outward normal for a clockwise quad in y-down coordinates
        let nrm = Vector2::new(d.y, -d.x);
        let r = (0.1 * len).clamp(1.5, 6.0);
        let steps = (2.0 * r / STEP).round() as usize;

        let mut pts = Vec::with_capacity(SAMPLES);
        for k in 0..SAMPLES {
            let t = 0.15 + 0.7 * (k as f64 + 0.5) / SAMPLES as f64;
            let base = a + (b - a) * t;
            let profile: Vec<f64> = (0..=steps)
                .map(|s| {
                    let p = base + nrm * (-r + s as f64 * STEP);
                    sample_bilinear(image, p.x, p.y)
                })
                .collect();
            let lo = profile.iter().copied().fold(f64::INFINITY, f64::min);
            let hi = profile.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            if hi - lo < MIN_EDGE_CONTRAST {
                continue;
            }
            let level = 0.5 * (lo + hi);
            // darkest sample on the inner half, then the first rise through `level`
            let inner = steps / 2 + 2;
            let start = (0..inner.min(steps))
                .min_by(|&x, &y| profile[x].total_cmp(&profile[y]))
                .unwrap_or(0);
            for s in start..steps {
                let (v0, v1) = (profile[s], profile[s + 1]);
                if v0 < level && v1 >= level {
                    let frac = (level - v0) / (v1 - v0);
                    let off = -r + (s as f64 + frac) * STEP;
                    pts.push(base + nrm * off);
                    break;
                }
            }
        }
        if pts.len() < 4 {
            return None;
        }
        lines.push(fit_line(&pts)?);
    }

    let mut out = [Point2::origin(); 4];
    for i in 0..4 {
        // corner i joins side i-1 and side i
        let prev = lines[(i + 3) % 4];
        let cur = lines[i];
        let p = intersect(prev, cur)?;
        if (p - rough[i]).norm() > 4.0 {
            return None;
        }
        out[i] = p;
    }
    Some(out)
}

/// Total least-squares line through `pts`: (point, unit direction).
fn fit_line(pts: &[Point2<f64>]) -> Option<(Point2<f64>, Vector2<f64>)> {
    let n = pts.len() as f64;
    let c = pts.iter().fold(Vector2::zeros(), |acc, p| acc + p.coords) / n;
    let (mut sxx, mut sxy, mut syy) = (0.0, 0.0, 0.0);
    for p in pts {
        let d = p.coords - c;
        sxx += d.x * d.x;
        sxy += d.x * d.y;
        syy += d.y * d.y;
    }
    let theta = 0.5 * (2.0 * sxy).atan2(sxx - syy);
    let dir = Vector2::new(theta.cos(), theta.sin());
    if !dir.x.is_finite() {
        return None;
    }
    Some((Point2::from(c), dir))
}

fn intersect(l1: (Point2<f64>, Vector2<f64>), l2: (Point2<f64>, Vector2<f64>)) -> Option<Point2<f64>> {
    let (p, r) = l1;
    let (q, s) = l2;
    let denom = r.x * s.y - r.y * s.x;
    if denom.abs() < 1e-6 {
        return None;
    }
    let qp = q - p;
    let t = (qp.x * s.y - qp.y * s.x) / denom;
    Some(p + r * t)
}

#[cfg(test)]
mod tests {
    use super::*;
    use charuco_dataset_core::GrayImage;

    fn square_image() -> GrayImage {
        // dark 30x30 square with a white interior hole, on a light background
        let mut img = GrayImage::filled(80, 80, 220);
        for y in 20..50 {
            for x in 20..50 {
                let inner = (27..43).contains(&x) && (27..43).contains(&y);
                img.data[y * 80 + x] = if inner { 220 } else { 30 };
            }
        }
        img
    }

    #[test]
    fn threshold_marks_dark_ring() {
        let img = square_image();
        let mask = adaptive_threshold(&img.view(), 15, 7.0);
        assert!(mask[20 * 80 + 20]);
        assert!(!mask[35 * 80 + 35]);
        assert!(!mask[5 * 80 + 5]);
    }

    #[test]
    fn components_split_disjoint_blobs() {
        let mut mask = vec![false; 10 * 10];
        mask[0] = true;
        mask[11] = true; // diagonal neighbour joins the first blob
        mask[99] = true;
        let comps = connected_components(&mask, 10, 10);
        assert_eq!(comps.len(), 2);
        assert_eq!(comps[0].pixels.len(), 2);
    }

    #[test]
    fn square_outline_is_recovered_with_subpixel_edges() {
        let img = square_image();
        let quads = find_quads(&img.view(), &DetectorParams::default());
        assert_eq!(quads.len(), 1);
        let expected = [
            Point2::new(19.5, 19.5),
            Point2::new(49.5, 19.5),
            Point2::new(49.5, 49.5),
            Point2::new(19.5, 49.5),
        ];
        for (q, e) in quads[0].iter().zip(expected) {
            assert!((q - e).norm() < 0.2, "{q:?} vs {e:?}");
        }
    }
}
