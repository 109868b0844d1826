//! Levenberg-Marquardt over shared intrinsics and per-frame poses.
//!
//! The joint problem is handed to `levenberg_marquardt` as a dense
//! residual/Jacobian provider. Every parameter update rebuilds a fresh
//! [`SolveState`]; the best state seen is what the solve returns.

use crate::problem::{
    project_with_jacobian, so3_left_jacobian, FrameData, ParamLayout, SolveState, N_INTRINSICS,
};
use levenberg_marquardt::{LeastSquaresProblem, LevenbergMarquardt};
use log::trace;
use nalgebra::{storage::Owned, DMatrix, DVector, Dyn, Vector3};

/// Residual of a point that projects behind the camera.
const BEHIND_CAMERA_PX: f64 = 1e6;

#[derive(Clone, Copy, Debug)]
pub(crate) struct LmSettings {
    pub max_iters: usize,
    pub ftol: f64,
    pub xtol: f64,
    pub gtol: f64,
}

#[derive(Clone, Debug)]
pub(crate) struct LmOutcome {
    pub state: SolveState,
    pub iterations: usize,
    pub converged: bool,
}

struct CalibrationProblem<'a> {
    frames: &'a [FrameData],
    layout: ParamLayout,
    params: DVector<f64>,
    state: SolveState,
    best: SolveState,
}

impl CalibrationProblem<'_> {
    fn residual_count(&self) -> usize {
        2 * self.frames.iter().map(|f| f.image.len()).sum::<usize>()
    }
}

impl LeastSquaresProblem<f64, Dyn, Dyn> for CalibrationProblem<'_> {
    type ResidualStorage = Owned<f64, Dyn>;
    type JacobianStorage = Owned<f64, Dyn, Dyn>;
    type ParameterStorage = Owned<f64, Dyn>;

    fn set_params(&mut self, x: &DVector<f64>) {
        self.params.clone_from(x);
        self.state = self
            .layout
            .unpack(self.frames, &self.state.intrinsics, x);
        if self.state.cost < self.best.cost {
            self.best = self.state.clone();
        }
    }

    fn params(&self) -> DVector<f64> {
        self.params.clone()
    }

    fn residuals(&self) -> Option<DVector<f64>> {
        let mut r = DVector::zeros(self.residual_count());
        let mut row = 0;
        for (frame, pose) in self.frames.iter().zip(&self.state.poses) {
            for (idx, obs) in frame.image.iter().enumerate() {
                let (dx, dy) =
                    match project_with_jacobian(&self.state.intrinsics, pose, &frame.board_point(idx)) {
                        Some(pj) => (pj.pixel.x - obs.x, pj.pixel.y - obs.y),
                        None => (BEHIND_CAMERA_PX, BEHIND_CAMERA_PX),
                    };
                r[row] = dx;
                r[row + 1] = dy;
                row += 2;
            }
        }
        Some(r)
    }

    fn jacobian(&self) -> Option<DMatrix<f64>> {
        let mut j = DMatrix::zeros(self.residual_count(), self.layout.len());
        let free = self.layout.free_intrinsics();
        let mut row = 0;
        for (f, (frame, pose)) in self.frames.iter().zip(&self.state.poses).enumerate() {
            let o = self.layout.pose_offset(f);
            let w = Vector3::new(self.params[o], self.params[o + 1], self.params[o + 2]);
            let jl = so3_left_jacobian(&w);
            for idx in 0..frame.image.len() {
                if let Some(pj) =
                    project_with_jacobian(&self.state.intrinsics, pose, &frame.board_point(idx))
                {
                    for (col, &i) in free.iter().enumerate() {
                        j[(row, col)] = pj.d_intrinsics[(0, i)];
                        j[(row + 1, col)] = pj.d_intrinsics[(1, i)];
                    }
                    let d_rot = pj.d_pose.fixed_view::<2, 3>(0, 0) * jl;
                    j.fixed_view_mut::<2, 3>(row, o).copy_from(&d_rot);
                    j.fixed_view_mut::<2, 3>(row, o + 3)
                        .copy_from(&pj.d_pose.fixed_view::<2, 3>(0, 3));
                }
                row += 2;
            }
        }
        Some(j)
    }
}

/// Minimize the total squared reprojection error starting from `initial`.
///
/// Intrinsics flagged in `fixed` keep their initial value; with every entry
/// fixed this is an extrinsics-only refinement.
pub(crate) fn minimize(
    frames: &[FrameData],
    initial: SolveState,
    fixed: &[bool; N_INTRINSICS],
    settings: &LmSettings,
) -> LmOutcome {
    let layout = ParamLayout::new(fixed, frames.len());
    let problem = CalibrationProblem {
        frames,
        params: layout.pack(&initial),
        layout,
        best: initial.clone(),
        state: initial,
    };
    let start_cost = problem.best.cost;

    let (problem, report) = LevenbergMarquardt::new()
        .with_ftol(settings.ftol)
        .with_xtol(settings.xtol)
        .with_gtol(settings.gtol)
        .with_patience(settings.max_iters.max(1))
        .minimize(problem);

    trace!(
        "lm: cost {:.6e} -> {:.6e} after {} evaluations ({:?})",
        start_cost,
        problem.best.cost,
        report.number_of_evaluations,
        report.termination
    );
    LmOutcome {
        state: problem.best,
        iterations: report.number_of_evaluations,
        converged: report.termination.was_successful(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::problem::{intrinsics_to_vec, project, FramePose, IntrinsicVec};
    use approx::assert_relative_eq;
    use charuco_dataset_core::{rodrigues_to_matrix, PerspectiveIntrinsics};
    use nalgebra::{Point2, Vector3};

    fn settings() -> LmSettings {
        LmSettings {
            max_iters: 100,
            ftol: 1e-12,
            xtol: 1e-12,
            gtol: 1e-12,
        }
    }

    fn perturbed(pose: &FramePose, w: Vector3<f64>, t: Vector3<f64>) -> FramePose {
        FramePose {
            rotation: rodrigues_to_matrix(&w) * pose.rotation,
            translation: pose.translation + t,
        }
    }

    fn frames_for(k: &IntrinsicVec, poses: &[FramePose]) -> Vec<FrameData> {
        poses
            .iter()
            .enumerate()
            .map(|(n, pose)| {
                let mut board = Vec::new();
                let mut image = Vec::new();
                for j in 1..6 {
                    for i in 1..8 {
                        let b = Point2::new(i as f64 * 0.03, j as f64 * 0.03);
                        let p = project(k, pose, &Vector3::new(b.x, b.y, 0.0)).unwrap();
                        board.push(b);
                        image.push(p);
                    }
                }
                FrameData {
                    image_id: format!("frame_{n}"),
                    board,
                    image,
                }
            })
            .collect()
    }

    fn truth_poses() -> Vec<FramePose> {
        [
            (Vector3::new(0.3, 0.1, 0.0), Vector3::new(-0.12, -0.09, 0.55)),
            (Vector3::new(-0.25, 0.3, 0.1), Vector3::new(-0.1, -0.08, 0.6)),
            (Vector3::new(0.1, -0.35, -0.2), Vector3::new(-0.14, -0.06, 0.5)),
            (Vector3::new(-0.2, -0.2, 0.3), Vector3::new(-0.11, -0.1, 0.65)),
        ]
        .iter()
        .map(|(r, t)| FramePose {
            rotation: rodrigues_to_matrix(r),
            translation: *t,
        })
        .collect()
    }

    #[test]
    fn joint_solve_recovers_perturbed_parameters() {
        let truth = IntrinsicVec::from_column_slice(&[
            800.0, 780.0, 320.0, 240.0, -0.1, 0.03, 0.0, 0.0, 0.0,
        ]);
        let poses = truth_poses();
        let frames = frames_for(&truth, &poses);

        let start_k = intrinsics_to_vec(&PerspectiveIntrinsics::new(760.0, 760.0, 319.5, 239.5));
        let start_poses: Vec<FramePose> = poses
            .iter()
            .map(|p| perturbed(p, Vector3::new(0.01, -0.01, 0.02), Vector3::new(0.005, -0.004, 0.01)))
            .collect();
        let initial = SolveState::new(&frames, start_k, start_poses);

        let mut fixed = [false; N_INTRINSICS];
        fixed[8] = true;
        let out = minimize(&frames, initial, &fixed, &settings());

        assert!(out.converged);
        assert!(out.state.cost < 1e-12, "cost {}", out.state.cost);
        assert_relative_eq!(out.state.intrinsics, truth, epsilon = 1e-5);
        for (got, want) in out.state.poses.iter().zip(&poses) {
            assert_relative_eq!(got.rotation, want.rotation, epsilon = 1e-8);
            assert_relative_eq!(got.translation, want.translation, epsilon = 1e-8);
        }
    }

    #[test]
    fn fixed_intrinsics_do_not_move() {
        let truth = intrinsics_to_vec(&PerspectiveIntrinsics::new(700.0, 700.0, 320.0, 240.0));
        let poses = truth_poses();
        let frames = frames_for(&truth, &poses);

        let wrong = intrinsics_to_vec(&PerspectiveIntrinsics::new(650.0, 650.0, 330.0, 250.0));
        let initial = SolveState::new(&frames, wrong, poses.clone());
        let out = minimize(&frames, initial, &[true; N_INTRINSICS], &settings());

        assert_eq!(out.state.intrinsics, wrong);
        assert!(out.state.cost > 0.0);
    }
}
