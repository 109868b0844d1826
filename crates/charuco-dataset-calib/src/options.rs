use serde::{Deserialize, Serialize};

/// Calibration solver options.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverOptions {
    /// Minimum number of usable frames.
    pub min_frames: usize,
    pub max_iters: usize,
    /// Relative cost decrease below which the solve stops.
    pub ftol: f64,
    /// Relative step size below which the solve stops.
    pub xtol: f64,
    /// Gradient orthogonality below which the solve stops.
    pub gtol: f64,
    pub fix_k3: bool,
    pub fix_tangential: bool,
    pub fix_principal_point: bool,
    /// Frames above `max(outlier_factor * rms, outlier_min_px)` are outliers.
    pub outlier_factor: f64,
    pub outlier_min_px: f64,
    /// Final RMS above this is a non-convergence.
    pub max_rms_px: f64,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            min_frames: 5,
            max_iters: 200,
            ftol: 1e-10,
            xtol: 1e-10,
            gtol: 1e-10,
            fix_k3: true,
            fix_tangential: false,
            fix_principal_point: false,
            outlier_factor: 3.0,
            outlier_min_px: 1.0,
            max_rms_px: 5.0,
        }
    }
}

impl SolverOptions {
    /// Which of `[fx, fy, cx, cy, k1, k2, p1, p2, k3]` stay constant.
    pub(crate) fn fixed_mask(&self) -> [bool; 9] {
        let pp = self.fix_principal_point;
        let tan = self.fix_tangential;
        [false, false, pp, pp, false, false, tan, tan, self.fix_k3]
    }
}
