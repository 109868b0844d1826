//! Synthetic views of a board through a known camera.
//!
//! Used to build test datasets with exact ground truth. Each pixel averages
//! `supersample²` sub-pixel rays; a ray that hits the board plane takes the
//! printed colour there.

use crate::board::CharucoBoard;
use charuco_dataset_core::synthetic::PixelNoise;
use charuco_dataset_core::{GrayImage, PerspectiveIntrinsics};
use nalgebra::{Matrix3, Point2, Vector2, Vector3};
use serde::{Deserialize, Serialize};

/// Rendering options.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderOptions {
    /// Sub-pixel samples per axis.
    pub supersample: usize,
    /// White print border around the squares, in square lengths.
    pub print_margin: f64,
    pub background: u8,
    pub black: u8,
    pub white: u8,
    /// Axis-aligned pixel rectangles `[x0, y0, x1, y1]` painted over the view.
    pub occluders: Vec<[f64; 4]>,
    pub occluder_value: u8,
    /// Additive Gaussian noise sigma in gray levels (0 disables).
    pub noise_sigma: f64,
    pub noise_seed: u64,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            supersample: 3,
            print_margin: 0.5,
            background: 150,
            black: 20,
            white: 235,
            occluders: Vec::new(),
            occluder_value: 90,
            noise_sigma: 0.0,
            noise_seed: 0,
        }
    }
}

/// Render the board seen by `camera` at world-to-camera pose `(rotation, translation)`.
pub fn render_view(
    board: &CharucoBoard,
    camera: &PerspectiveIntrinsics,
    rotation: &Matrix3<f64>,
    translation: &Vector3<f64>,
    width: usize,
    height: usize,
    opts: &RenderOptions,
) -> GrayImage {
    let mut out = GrayImage::filled(width, height, opts.background);

    // Board plane (Z=0) to normalized camera coords: [r1 r2 t].
    let g = Matrix3::from_columns(&[
        rotation.column(0).into_owned(),
        rotation.column(1).into_owned(),
        *translation,
    ]);
    let Some(g_inv) = g.try_inverse() else {
        return out;
    };

    let (bw, bh) = board.size();
    let margin = opts.print_margin.max(0.0) * board.spec().square_length;
    let s = opts.supersample.max(1);
    let inv = 1.0 / s as f64;

    for py in 0..height {
        for px in 0..width {
            let mut acc = 0.0;
            let mut hits = 0usize;
            for sy in 0..s {
                for sx in 0..s {
                    let u = px as f64 - 0.5 + (sx as f64 + 0.5) * inv;
                    let v = py as f64 - 0.5 + (sy as f64 + 0.5) * inv;
                    let n = camera.pixel_to_normalized(&Point2::new(u, v));
                    let b = g_inv * Vector3::new(n.x, n.y, 1.0);
                    // b[2] is 1/depth; negative means the plane is behind the camera
                    if b[2] <= 0.0 {
                        continue;
                    }
                    let p = Point2::new(b[0] / b[2], b[1] / b[2]);
                    if p.x < -margin || p.y < -margin || p.x >= bw + margin || p.y >= bh + margin
                    {
                        continue;
                    }
                    let value = match board.is_black_at(p) {
                        Some(true) => opts.black,
                        _ => opts.white,
                    };
                    acc += value as f64;
                    hits += 1;
                }
            }
            if hits > 0 {
                let bg = opts.background as f64 * (s * s - hits) as f64;
                out.data[py * width + px] = ((acc + bg) / (s * s) as f64).round() as u8;
            }
        }
    }

    for rect in &opts.occluders {
        let x0 = rect[0].max(0.0).floor() as usize;
        let y0 = rect[1].max(0.0).floor() as usize;
        let x1 = (rect[2].ceil().max(0.0) as usize).min(width);
        let y1 = (rect[3].ceil().max(0.0) as usize).min(height);
        for y in y0..y1 {
            for x in x0..x1 {
                out.data[y * width + x] = opts.occluder_value;
            }
        }
    }

    if opts.noise_sigma > 0.0 {
        let noise = PixelNoise::Gaussian {
            seed: opts.noise_seed,
            sigma_px: opts.noise_sigma,
        };
        for (i, v) in out.data.iter_mut().enumerate() {
            let d: Vector2<f64> = noise.sample(i / width, i % width);
            *v = (*v as f64 + d.x).round().clamp(0.0, 255.0) as u8;
        }
    }

    out
}
