//! Marker decoding from an image quad.

use crate::threshold::otsu_threshold;
use crate::Matcher;
use charuco_dataset_core::{homography_from_4pt, sample_bilinear, GrayImageView};
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

/// Decoder configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DecodeConfig {
    /// Marker border width in cells.
    pub border_bits: usize,
    /// Fraction of a cell ignored on each side when sampling.
    pub cell_inset_frac: f64,
    /// Samples per cell along each axis.
    pub samples_per_cell: usize,
    /// Required fraction of dark border cells.
    pub min_border_score: f64,
    /// Required gray-level gap between light and dark cell means.
    pub min_contrast: f64,
    /// Hamming threshold for dictionary matching (capped by the dictionary).
    pub max_hamming: u8,
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self {
            border_bits: 1,
            cell_inset_frac: 0.25,
            samples_per_cell: 3,
            min_border_score: 0.85,
            min_contrast: 25.0,
            max_hamming: 2,
        }
    }
}

/// One decoded marker.
#[derive(Clone, Debug, PartialEq)]
pub struct MarkerDetection {
    pub id: u32,
    /// Quarter turns (clockwise) between the printed marker and its appearance.
    pub rotation: u8,
    pub hamming: u8,
    pub border_score: f64,
    pub contrast: f64,
    /// Observed inner bits (row-major, black=1).
    pub code: u64,
    /// Image corners of the marker outline in the marker's own order
    /// (top-left, top-right, bottom-right, bottom-left as printed).
    pub corners: [Point2<f64>; 4],
}

impl MarkerDetection {
    pub fn center(&self) -> Point2<f64> {
        let s = self
            .corners
            .iter()
            .fold(nalgebra::Vector2::zeros(), |acc, p| acc + p.coords);
        Point2::from(s / 4.0)
    }
}

/// Reorder a quad to run clockwise in image coordinates (y down), starting
/// at the corner closest to the image origin along `x + y`.
pub fn order_quad(quad: [Point2<f64>; 4]) -> [Point2<f64>; 4] {
    let mut area2 = 0.0;
    for i in 0..4 {
        let a = quad[i];
        let b = quad[(i + 1) % 4];
        area2 += a.x * b.y - b.x * a.y;
    }
    let cw = if area2 >= 0.0 {
        quad
    } else {
        [quad[0], quad[3], quad[2], quad[1]]
    };
    let start = (0..4)
        .min_by(|&a, &b| (cw[a].x + cw[a].y).total_cmp(&(cw[b].x + cw[b].y)))
        .unwrap_or(0);
    [0, 1, 2, 3].map(|i| cw[(start + i) % 4])
}

/// Decode the marker whose outer border outline is `quad`.
///
/// `quad` may start at any corner and run in either direction; the reported
/// rotation is relative to [`order_quad`].
pub fn decode_quad(
    image: &GrayImageView<'_>,
    quad: &[Point2<f64>; 4],
    cfg: &DecodeConfig,
    matcher: &Matcher,
) -> Option<MarkerDetection> {
    let bits = matcher.dictionary().marker_size;
    let cells = bits + 2 * cfg.border_bits;
    let quad = order_quad(*quad);

    let c = cells as f64;
    let canonical = [
        Point2::new(0.0, 0.0),
        Point2::new(c, 0.0),
        Point2::new(c, c),
        Point2::new(0.0, c),
    ];
    let h = homography_from_4pt(&canonical, &quad)?;

    let k = cfg.samples_per_cell.max(1);
    let inset = cfg.cell_inset_frac.clamp(0.0, 0.45);
    let span = 1.0 - 2.0 * inset;
    let mut means = Vec::with_capacity(cells * cells);
    for cy in 0..cells {
        for cx in 0..cells {
            let mut acc = 0.0;
            for sy in 0..k {
                for sx in 0..k {
                    let u = cx as f64 + inset + span * (sx as f64 + 0.5) / k as f64;
                    let v = cy as f64 + inset + span * (sy as f64 + 0.5) / k as f64;
                    let p = h.apply(Point2::new(u, v));
                    if !p.x.is_finite() || !p.y.is_finite() {
                        return None;
                    }
                    acc += sample_bilinear(image, p.x, p.y);
                }
            }
            means.push(acc / (k * k) as f64);
        }
    }

    let t = otsu_threshold(&means);
    let (mut dark_sum, mut dark_n, mut light_sum, mut light_n) = (0.0, 0usize, 0.0, 0usize);
    for &m in &means {
        if m <= t {
            dark_sum += m;
            dark_n += 1;
        } else {
            light_sum += m;
            light_n += 1;
        }
    }
    if dark_n == 0 || light_n == 0 {
        return None;
    }
    let contrast = light_sum / light_n as f64 - dark_sum / dark_n as f64;
    if contrast < cfg.min_contrast {
        return None;
    }

    let b = cfg.border_bits;
    let mut border_total = 0usize;
    let mut border_dark = 0usize;
    let mut code = 0u64;
    for cy in 0..cells {
        for cx in 0..cells {
            let dark = means[cy * cells + cx] <= t;
            let in_border = cx < b || cy < b || cx >= cells - b || cy >= cells - b;
            if in_border {
                border_total += 1;
                border_dark += dark as usize;
            } else if dark {
                code |= 1u64 << ((cy - b) * bits + (cx - b));
            }
        }
    }
    let border_score = border_dark as f64 / border_total.max(1) as f64;
    if border_score < cfg.min_border_score {
        return None;
    }

    let m = matcher.match_code(code)?;
    let r = m.rotation as usize;
    let corners = [0, 1, 2, 3].map(|i| quad[(i + r) % 4]);

    Some(MarkerDetection {
        id: m.id,
        rotation: m.rotation,
        hamming: m.hamming,
        border_score,
        contrast,
        code,
        corners,
    })
}
