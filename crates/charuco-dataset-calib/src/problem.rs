//! Reprojection model of the joint calibration problem.
//!
//! Parameters are the shared intrinsics `[fx, fy, cx, cy, k1, k2, p1, p2, k3]`
//! plus one pose per frame, stored as a Rodrigues vector and a translation.
//! Analytic pose derivatives are taken for a left increment `exp([δ]ₓ) R`
//! and mapped to the Rodrigues vector through the SO(3) left Jacobian.

use charuco_dataset_core::{
    matrix_to_rodrigues, rodrigues_to_matrix, BrownConrady5, PerspectiveIntrinsics,
};
use nalgebra::{DVector, Matrix2x3, Matrix3, Point2, Point3, SMatrix, SVector, Vector3};

pub(crate) const N_INTRINSICS: usize = 9;

pub(crate) type IntrinsicVec = SVector<f64, N_INTRINSICS>;

pub(crate) fn intrinsics_to_vec(camera: &PerspectiveIntrinsics) -> IntrinsicVec {
    let d = camera.distortion;
    IntrinsicVec::from_column_slice(&[
        camera.fx, camera.fy, camera.cx, camera.cy, d.k1, d.k2, d.p1, d.p2, d.k3,
    ])
}

pub(crate) fn vec_to_intrinsics(k: &IntrinsicVec) -> PerspectiveIntrinsics {
    PerspectiveIntrinsics::new(k[0], k[1], k[2], k[3]).with_distortion(BrownConrady5 {
        k1: k[4],
        k2: k[5],
        p1: k[6],
        p2: k[7],
        k3: k[8],
    })
}

/// Observations of one frame: planar board points and their pixels.
#[derive(Clone, Debug)]
pub(crate) struct FrameData {
    pub image_id: String,
    pub board: Vec<Point2<f64>>,
    pub image: Vec<Point2<f64>>,
}

impl FrameData {
    #[inline]
    pub(crate) fn board_point(&self, idx: usize) -> Vector3<f64> {
        Vector3::new(self.board[idx].x, self.board[idx].y, 0.0)
    }
}

/// Board-to-camera pose of one frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct FramePose {
    pub rotation: Matrix3<f64>,
    pub translation: Vector3<f64>,
}

/// Projected pixel with its derivatives.
pub(crate) struct ProjectionJacobian {
    pub pixel: Point2<f64>,
    pub d_intrinsics: SMatrix<f64, 2, N_INTRINSICS>,
    pub d_pose: SMatrix<f64, 2, 6>,
}

pub(crate) fn project(k: &IntrinsicVec, pose: &FramePose, x: &Vector3<f64>) -> Option<Point2<f64>> {
    let pc = pose.rotation * x + pose.translation;
    vec_to_intrinsics(k).project(&Point3::from(pc))
}

pub(crate) fn project_with_jacobian(
    k: &IntrinsicVec,
    pose: &FramePose,
    x: &Vector3<f64>,
) -> Option<ProjectionJacobian> {
    let rx = pose.rotation * x;
    let pc = rx + pose.translation;
    if pc.z <= 1e-12 {
        return None;
    }
    let (fx, fy, cx, cy) = (k[0], k[1], k[2], k[3]);
    let (k1, k2, p1, p2, k3) = (k[4], k[5], k[6], k[7], k[8]);

    let iz = 1.0 / pc.z;
    let (nx, ny) = (pc.x * iz, pc.y * iz);
    let r2 = nx * nx + ny * ny;
    let r4 = r2 * r2;
    let r6 = r4 * r2;
    let radial = 1.0 + k1 * r2 + k2 * r4 + k3 * r6;
    let xd = nx * radial + 2.0 * p1 * nx * ny + p2 * (r2 + 2.0 * nx * nx);
    let yd = ny * radial + p1 * (r2 + 2.0 * ny * ny) + 2.0 * p2 * nx * ny;

    #[rustfmt::skip]
    let d_intrinsics = SMatrix::<f64, 2, N_INTRINSICS>::from_row_slice(&[
        xd, 0.0, 1.0, 0.0, fx * nx * r2, fx * nx * r4, fx * 2.0 * nx * ny, fx * (r2 + 2.0 * nx * nx), fx * nx * r6,
        0.0, yd, 0.0, 1.0, fy * ny * r2, fy * ny * r4, fy * (r2 + 2.0 * ny * ny), fy * 2.0 * nx * ny, fy * ny * r6,
    ]);

    let dr = k1 + 2.0 * k2 * r2 + 3.0 * k3 * r4;
    let cross = 2.0 * nx * ny * dr + 2.0 * p1 * nx + 2.0 * p2 * ny;
    let dxd_dx = radial + 2.0 * nx * nx * dr + 2.0 * p1 * ny + 6.0 * p2 * nx;
    let dyd_dy = radial + 2.0 * ny * ny * dr + 6.0 * p1 * ny + 2.0 * p2 * nx;
    let d_pix_dn = nalgebra::Matrix2::new(fx * dxd_dx, fx * cross, fy * cross, fy * dyd_dy);
    let d_n_dpc = Matrix2x3::new(iz, 0.0, -nx * iz, 0.0, iz, -ny * iz);
    let d_pix_dpc = d_pix_dn * d_n_dpc;

    let mut d_pose = SMatrix::<f64, 2, 6>::zeros();
    d_pose
        .fixed_view_mut::<2, 3>(0, 0)
        .copy_from(&(d_pix_dpc * -rx.cross_matrix()));
    d_pose.fixed_view_mut::<2, 3>(0, 3).copy_from(&d_pix_dpc);

    Some(ProjectionJacobian {
        pixel: Point2::new(fx * xd + cx, fy * yd + cy),
        d_intrinsics,
        d_pose,
    })
}

/// Squared-error bookkeeping of one frame.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct FrameError {
    pub sum_sq: f64,
    pub sum: f64,
    pub max: f64,
    pub points: usize,
}

impl FrameError {
    /// Per-point RMS in pixels.
    pub(crate) fn rms(&self) -> f64 {
        if self.points == 0 {
            return 0.0;
        }
        (self.sum_sq / self.points as f64).sqrt()
    }
}

pub(crate) fn frame_error(k: &IntrinsicVec, pose: &FramePose, frame: &FrameData) -> FrameError {
    let mut e = FrameError::default();
    for (idx, obs) in frame.image.iter().enumerate() {
        let d = match project(k, pose, &frame.board_point(idx)) {
            Some(p) => (p - obs).norm(),
            None => f64::INFINITY,
        };
        e.sum_sq += d * d;
        e.sum += d;
        e.max = e.max.max(d);
        e.points += 1;
    }
    e
}

/// One immutable iterate of the optimizer.
#[derive(Clone, Debug)]
pub(crate) struct SolveState {
    pub intrinsics: IntrinsicVec,
    pub poses: Vec<FramePose>,
    /// Sum of squared pixel residuals.
    pub cost: f64,
}

impl SolveState {
    pub(crate) fn new(frames: &[FrameData], intrinsics: IntrinsicVec, poses: Vec<FramePose>) -> Self {
        let cost = frames
            .iter()
            .zip(&poses)
            .map(|(f, p)| frame_error(&intrinsics, p, f).sum_sq)
            .sum::<f64>();
        Self {
            intrinsics,
            poses,
            cost: if cost.is_finite() { cost } else { f64::INFINITY },
        }
    }

    pub(crate) fn frame_errors(&self, frames: &[FrameData]) -> Vec<FrameError> {
        frames
            .iter()
            .zip(&self.poses)
            .map(|(f, p)| frame_error(&self.intrinsics, p, f))
            .collect()
    }
}

/// Left Jacobian of SO(3): `exp([ω + dω]ₓ) ≈ exp([J(ω) dω]ₓ) exp([ω]ₓ)`.
pub(crate) fn so3_left_jacobian(w: &Vector3<f64>) -> Matrix3<f64> {
    let theta2 = w.norm_squared();
    let k = w.cross_matrix();
    let k2 = k * k;
    if theta2 < 1e-10 {
        return Matrix3::identity() + 0.5 * k + k2 / 6.0;
    }
    let theta = theta2.sqrt();
    Matrix3::identity()
        + k * ((1.0 - theta.cos()) / theta2)
        + k2 * ((theta - theta.sin()) / (theta2 * theta))
}

/// Position of each optimized quantity in the flat parameter vector:
/// the free intrinsics first, then `[ω, t]` per frame.
#[derive(Clone, Debug)]
pub(crate) struct ParamLayout {
    free: Vec<usize>,
    frames: usize,
}

impl ParamLayout {
    pub(crate) fn new(fixed: &[bool; N_INTRINSICS], frames: usize) -> Self {
        Self {
            free: (0..N_INTRINSICS).filter(|&i| !fixed[i]).collect(),
            frames,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.free.len() + 6 * self.frames
    }

    /// Intrinsic index of each free parameter column.
    pub(crate) fn free_intrinsics(&self) -> &[usize] {
        &self.free
    }

    pub(crate) fn pose_offset(&self, frame: usize) -> usize {
        self.free.len() + 6 * frame
    }

    pub(crate) fn pack(&self, state: &SolveState) -> DVector<f64> {
        let mut x = DVector::zeros(self.len());
        for (col, &i) in self.free.iter().enumerate() {
            x[col] = state.intrinsics[i];
        }
        for (f, pose) in state.poses.iter().enumerate() {
            let o = self.pose_offset(f);
            x.fixed_rows_mut::<3>(o)
                .copy_from(&matrix_to_rodrigues(&pose.rotation));
            x.fixed_rows_mut::<3>(o + 3).copy_from(&pose.translation);
        }
        x
    }

    /// Rebuild a state from `x`; fixed intrinsics come from `base`.
    pub(crate) fn unpack(
        &self,
        frames: &[FrameData],
        base: &IntrinsicVec,
        x: &DVector<f64>,
    ) -> SolveState {
        let mut intrinsics = *base;
        for (col, &i) in self.free.iter().enumerate() {
            intrinsics[i] = x[col];
        }
        let poses = (0..self.frames)
            .map(|f| {
                let o = self.pose_offset(f);
                FramePose {
                    rotation: rodrigues_to_matrix(&x.fixed_rows::<3>(o).into_owned()),
                    translation: x.fixed_rows::<3>(o + 3).into_owned(),
                }
            })
            .collect();
        SolveState::new(frames, intrinsics, poses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Vector6;

    /// `[δ, Δt]` applied as `exp([δ]ₓ) R`, `t + Δt`.
    fn left_step(pose: &FramePose, step: &Vector6<f64>) -> FramePose {
        let delta = Vector3::new(step[0], step[1], step[2]);
        FramePose {
            rotation: rodrigues_to_matrix(&delta) * pose.rotation,
            translation: pose.translation + Vector3::new(step[3], step[4], step[5]),
        }
    }

    fn sample() -> (IntrinsicVec, FramePose, Vector3<f64>) {
        let k = IntrinsicVec::from_column_slice(&[
            810.0, 790.0, 322.0, 241.0, -0.12, 0.04, 0.002, -0.001, 0.01,
        ]);
        let pose = FramePose {
            rotation: rodrigues_to_matrix(&Vector3::new(0.2, -0.3, 0.1)),
            translation: Vector3::new(-0.05, 0.03, 0.6),
        };
        (k, pose, Vector3::new(0.12, 0.08, 0.0))
    }

    #[test]
    fn projection_matches_camera_model() {
        let (k, pose, x) = sample();
        let pj = project_with_jacobian(&k, &pose, &x).expect("projection");
        let reference = project(&k, &pose, &x).expect("projection");
        assert_relative_eq!(pj.pixel, reference, epsilon = 1e-9);
    }

    #[test]
    fn intrinsics_jacobian_matches_finite_differences() {
        let (k, pose, x) = sample();
        let pj = project_with_jacobian(&k, &pose, &x).expect("projection");
        for col in 0..N_INTRINSICS {
            let h = 1e-6 * k[col].abs().max(1e-3);
            let mut kp = k;
            let mut km = k;
            kp[col] += h;
            km[col] -= h;
            let num = (project(&kp, &pose, &x).unwrap() - project(&km, &pose, &x).unwrap()) / (2.0 * h);
            assert_relative_eq!(pj.d_intrinsics[(0, col)], num.x, epsilon = 1e-4, max_relative = 1e-5);
            assert_relative_eq!(pj.d_intrinsics[(1, col)], num.y, epsilon = 1e-4, max_relative = 1e-5);
        }
    }

    #[test]
    fn pose_jacobian_matches_finite_differences() {
        let (k, pose, x) = sample();
        let pj = project_with_jacobian(&k, &pose, &x).expect("projection");
        let h = 1e-7;
        for col in 0..6 {
            let mut step = Vector6::zeros();
            step[col] = h;
            let plus = project(&k, &left_step(&pose, &step), &x).unwrap();
            let minus = project(&k, &left_step(&pose, &-step), &x).unwrap();
            let num = (plus - minus) / (2.0 * h);
            assert_relative_eq!(pj.d_pose[(0, col)], num.x, epsilon = 1e-3, max_relative = 1e-5);
            assert_relative_eq!(pj.d_pose[(1, col)], num.y, epsilon = 1e-3, max_relative = 1e-5);
        }
    }

    #[test]
    fn rodrigues_derivative_goes_through_left_jacobian() {
        let (k, pose, x) = sample();
        let w = matrix_to_rodrigues(&pose.rotation);
        let pj = project_with_jacobian(&k, &pose, &x).expect("projection");
        let analytic = pj.d_pose.fixed_view::<2, 3>(0, 0) * so3_left_jacobian(&w);
        let h = 1e-7;
        for col in 0..3 {
            let mut dw = Vector3::zeros();
            dw[col] = h;
            let at = |w: Vector3<f64>| {
                let p = FramePose {
                    rotation: rodrigues_to_matrix(&w),
                    translation: pose.translation,
                };
                project(&k, &p, &x).unwrap()
            };
            let num = (at(w + dw) - at(w - dw)) / (2.0 * h);
            assert_relative_eq!(analytic[(0, col)], num.x, epsilon = 1e-3, max_relative = 1e-5);
            assert_relative_eq!(analytic[(1, col)], num.y, epsilon = 1e-3, max_relative = 1e-5);
        }
    }

    #[test]
    fn small_angle_left_jacobian_is_continuous() {
        let w = Vector3::new(2e-6, -1e-6, 3e-6);
        let series = so3_left_jacobian(&w);
        let closed = so3_left_jacobian(&(w * 1e3));
        assert_relative_eq!(series, Matrix3::identity(), epsilon = 1e-5);
        assert_relative_eq!(closed, Matrix3::identity(), epsilon = 5e-3);
    }

    #[test]
    fn layout_skips_fixed_intrinsics() {
        let (k, pose, _) = sample();
        let frame = FrameData {
            image_id: "f".into(),
            board: vec![Point2::new(0.0, 0.0), Point2::new(0.1, 0.0)],
            image: vec![Point2::new(300.0, 200.0), Point2::new(400.0, 200.0)],
        };
        let frames = [frame.clone(), frame];
        let mut fixed = [false; N_INTRINSICS];
        fixed[2] = true;
        fixed[8] = true;
        let layout = ParamLayout::new(&fixed, 2);
        assert_eq!(layout.len(), 7 + 12);
        assert_eq!(layout.pose_offset(1), 13);

        let state = SolveState::new(&frames, k, vec![pose, pose]);
        let x = layout.pack(&state);
        let mut base = k;
        base[2] = 0.0;
        base[8] = 0.0;
        let back = layout.unpack(&frames, &base, &x);
        assert_eq!(back.intrinsics[2], 0.0);
        assert_eq!(back.intrinsics[0], k[0]);
        assert_relative_eq!(back.poses[1].rotation, pose.rotation, epsilon = 1e-12);
        assert_relative_eq!(back.poses[1].translation, pose.translation);
    }

    #[test]
    fn behind_camera_is_infinite_cost() {
        let (k, mut pose, _) = sample();
        pose.translation.z = -2.0;
        let frame = FrameData {
            image_id: "f".into(),
            board: vec![Point2::new(0.0, 0.0)],
            image: vec![Point2::new(0.0, 0.0)],
        };
        let state = SolveState::new(&[frame], k, vec![pose]);
        assert!(state.cost.is_infinite());
    }
}
