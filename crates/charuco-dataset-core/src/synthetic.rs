//! Deterministic helpers for synthetic datasets.
//!
//! Noise is derived from a SplitMix64 hash of `(seed, view, point)`, so
//! datasets are stable across platforms without pulling in an RNG crate.

use nalgebra::{Matrix3, Point3, Vector2, Vector3};

/// Deterministic pixel noise: uniform in `[-amplitude, amplitude]` or
/// zero-mean Gaussian with standard deviation `amplitude`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PixelNoise {
    Uniform { seed: u64, max_abs_px: f64 },
    Gaussian { seed: u64, sigma_px: f64 },
}

impl PixelNoise {
    /// Sample the 2D noise vector for a `(view_idx, point_idx)` key.
    pub fn sample(&self, view_idx: usize, point_idx: usize) -> Vector2<f64> {
        match *self {
            PixelNoise::Uniform { seed, max_abs_px } => {
                let (u, v) = unit_pair(seed, view_idx, point_idx);
                let a = max_abs_px.abs();
                Vector2::new((u - 0.5) * 2.0 * a, (v - 0.5) * 2.0 * a)
            }
            PixelNoise::Gaussian { seed, sigma_px } => {
                let (u, v) = unit_pair(seed, view_idx, point_idx);
                // Box-Muller; shift u into (0, 1] so ln stays finite.
                let r = (-2.0 * (1.0 - u).ln()).sqrt();
                let theta = std::f64::consts::TAU * v;
                Vector2::new(r * theta.cos(), r * theta.sin()) * sigma_px
            }
        }
    }
}

/// Deterministic uniform value in `[0, 1)` for an integer key.
pub fn unit_f64(seed: u64, a: usize, b: usize) -> f64 {
    u64_to_unit_f64(splitmix64(mix_key(seed, a, b)))
}

fn unit_pair(seed: u64, view_idx: usize, point_idx: usize) -> (f64, f64) {
    let key = mix_key(seed, view_idx, point_idx);
    (
        u64_to_unit_f64(splitmix64(key)),
        u64_to_unit_f64(splitmix64(key ^ 0x94D0_49BB_1331_11EB)),
    )
}

#[inline]
fn mix_key(seed: u64, view_idx: usize, point_idx: usize) -> u64 {
    seed ^ (view_idx as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)
        ^ (point_idx as u64).wrapping_mul(0xBF58_476D_1CE4_E5B9)
}

/// SplitMix64 finalizer.
#[inline]
pub fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

#[inline]
fn u64_to_unit_f64(x: u64) -> f64 {
    // top 53 bits -> [0, 1)
    ((x >> 11) as f64) * (1.0 / ((1u64 << 53) as f64))
}

/// World-to-camera pose `(R, t)` of a camera at `eye` looking at `target`.
///
/// Camera axes follow the OpenCV convention; `down` is the world direction
/// that should appear downwards in the image. Returns `None` when the viewing
/// direction is parallel to `down`.
pub fn look_at(
    eye: Point3<f64>,
    target: Point3<f64>,
    down: Vector3<f64>,
) -> Option<(Matrix3<f64>, Vector3<f64>)> {
    let z = (target - eye).try_normalize(1e-12)?;
    let x = down.cross(&z).try_normalize(1e-12)?;
    let y = z.cross(&x);
    let r = Matrix3::from_rows(&[x.transpose(), y.transpose(), z.transpose()]);
    let t = -(r * eye.coords);
    Some((r, t))
}
