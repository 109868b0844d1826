//! Camera calibration from ChArUco detections.
//!
//! [`CalibrationSolver`] jointly estimates pinhole intrinsics with
//! Brown-Conrady distortion and one board pose per frame:
//!
//! 1. per-frame board homographies (normalized DLT);
//! 2. closed-form focal lengths with the principal point at the image centre;
//! 3. per-frame poses from `K⁻¹ H`;
//! 4. Levenberg-Marquardt on the reprojection error over the intrinsics and
//!    every pose;
//! 5. outlier frames re-solved extrinsics-only, dropped if still off.
//!
//! ```no_run
//! # use charuco_dataset_calib::{CalibrationSolver, SolverOptions};
//! # fn demo(board: &charuco_dataset_charuco::CharucoBoard, dets: &[charuco_dataset_charuco::Detection]) {
//! match CalibrationSolver::new(SolverOptions::default()).calibrate(board, dets) {
//!     Ok(cal) => println!("rms {:.3} px over {} frames", cal.intrinsics.rms_error, cal.poses.len()),
//!     Err(e) => eprintln!("calibration failed: {e}"),
//! }
//! # }
//! ```

mod init;
mod lm;
mod options;
mod problem;
mod solver;
mod types;

pub use options::SolverOptions;
pub use solver::CalibrationSolver;
pub use types::{
    Calibration, CalibrationFailure, CalibrationReport, DropReason, DroppedFrame, Intrinsics,
    Pose, ReprojectionStats, UncertaintyFlag,
};
