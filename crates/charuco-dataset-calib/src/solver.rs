use crate::init::{board_homography, initial_focal, initial_pose};
use crate::lm::{minimize, LmSettings};
use crate::problem::{
    intrinsics_to_vec, vec_to_intrinsics, FrameData, FrameError, FramePose, IntrinsicVec,
    SolveState, N_INTRINSICS,
};
use crate::{
    Calibration, CalibrationFailure, CalibrationReport, DropReason, DroppedFrame, Intrinsics, Pose,
    ReprojectionStats, SolverOptions, UncertaintyFlag,
};
use charuco_dataset_charuco::{CharucoBoard, Detection};
use charuco_dataset_core::{is_rotation, orthonormalize_rotation, PerspectiveIntrinsics};
use log::{debug, info, warn};
use nalgebra::{Point2, Vector2};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Focal lengths outside `[1/4, 8] * max(width, height)` are flagged.
const FOCAL_RANGE: (f64, f64) = (0.25, 8.0);
/// `|fy / fx - 1|` above this is flagged.
const MAX_ASPECT_DEVIATION: f64 = 0.1;
/// Principal point further than this fraction of the image size from the centre.
const MAX_PRINCIPAL_OFFSET: f64 = 0.15;
/// Distortion moving an image corner by more than this fraction of the diagonal.
const MAX_CORNER_DISPLACEMENT: f64 = 0.05;

/// Joint intrinsics and pose calibration from board detections.
#[derive(Clone, Debug, Default)]
pub struct CalibrationSolver {
    options: SolverOptions,
}

impl CalibrationSolver {
    pub fn new(options: SolverOptions) -> Self {
        Self { options }
    }

    #[inline]
    pub fn options(&self) -> &SolverOptions {
        &self.options
    }

    fn lm_settings(&self) -> LmSettings {
        LmSettings {
            max_iters: self.options.max_iters.max(1),
            ftol: self.options.ftol,
            xtol: self.options.xtol,
            gtol: self.options.gtol,
        }
    }

    fn require_frames(&self, usable: usize) -> Result<(), CalibrationFailure> {
        let required = self.options.min_frames.max(1);
        if usable < required {
            return Err(CalibrationFailure::TooFewFrames {
                attempted: usable,
                required,
            });
        }
        Ok(())
    }

    /// Calibrate the camera that produced `detections`.
    ///
    /// Returned poses follow the order of `detections`; frames that were
    /// dropped are listed in the report instead.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip_all, fields(frames = detections.len()))
    )]
    pub fn calibrate(
        &self,
        board: &CharucoBoard,
        detections: &[Detection],
    ) -> Result<Calibration, CalibrationFailure> {
        let attempted = detections.len();
        self.require_frames(attempted)?;

        let (width, height) = (detections[0].width, detections[0].height);
        if let Some(other) = detections
            .iter()
            .find(|d| (d.width, d.height) != (width, height))
        {
            return Err(CalibrationFailure::MixedImageSizes {
                first: (width, height),
                other: (other.width, other.height),
            });
        }
        if width == 0 || height == 0 {
            return Err(CalibrationFailure::Degenerate("empty image size".into()));
        }

        let mut report = CalibrationReport {
            attempted,
            ..CalibrationReport::default()
        };
        let mut flags = Vec::new();

        // Per-frame homographies; degenerate frames leave here.
        let mut frames = Vec::with_capacity(attempted);
        let mut homographies = Vec::with_capacity(attempted);
        for det in detections {
            let frame = frame_data(board, det);
            match board_homography(&frame.board, &frame.image) {
                Some(h) => {
                    frames.push(frame);
                    homographies.push(h);
                }
                None => {
                    debug!("{}: degenerate board homography", det.image_id);
                    report.dropped.push(DroppedFrame {
                        image_id: det.image_id.clone(),
                        reason: DropReason::DegenerateHomography,
                    });
                }
            }
        }
        self.require_frames(frames.len())?;

        let cx = (width as f64 - 1.0) * 0.5;
        let cy = (height as f64 - 1.0) * 0.5;
        let max_dim = width.max(height) as f64;
        let (fx, fy) = match initial_focal(&homographies, cx, cy, max_dim) {
            Some(f) => f,
            None => {
                warn!("focal length is not observable from these views; seeding f = {max_dim}");
                flags.push(UncertaintyFlag::FocalLengthUnobservable);
                (max_dim, max_dim)
            }
        };
        let seed = PerspectiveIntrinsics::new(fx, fy, cx, cy);
        debug!("initial intrinsics fx {fx:.2} fy {fy:.2} cx {cx:.2} cy {cy:.2}");

        let mut poses = Vec::with_capacity(frames.len());
        let mut kept = Vec::with_capacity(frames.len());
        for frame in frames {
            match initial_pose(&seed, &frame.board, &frame.image) {
                Some(p) => {
                    poses.push(p);
                    kept.push(frame);
                }
                None => {
                    debug!("{}: no initial pose", frame.image_id);
                    report.dropped.push(DroppedFrame {
                        image_id: frame.image_id,
                        reason: DropReason::DegenerateHomography,
                    });
                }
            }
        }
        let mut frames = kept;

        let fixed = self.options.fixed_mask();
        let mut state = SolveState::new(&frames, intrinsics_to_vec(&seed), poses);
        let mut converged;
        loop {
            self.require_frames(frames.len())?;
            let outcome = minimize(&frames, state, &fixed, &self.lm_settings());
            report.iterations += outcome.iterations;
            converged = outcome.converged;
            state = outcome.state;

            let (next_frames, next_state, dropped) =
                self.handle_outliers(frames, state, &mut report);
            frames = next_frames;
            state = next_state;
            if dropped == 0 {
                break;
            }
            info!("dropped {dropped} outlier frame(s), re-solving");
        }

        // Final rotation clean-up; reflections leave the result.
        let mut final_frames = Vec::with_capacity(frames.len());
        let mut final_poses = Vec::with_capacity(frames.len());
        for (frame, pose) in frames.into_iter().zip(state.poses.iter()) {
            match orthonormalize_rotation(&pose.rotation).filter(|r| is_rotation(r, 1e-9)) {
                Some(rotation) => {
                    final_frames.push(frame);
                    final_poses.push(FramePose {
                        rotation,
                        translation: pose.translation,
                    });
                }
                None => {
                    warn!("{}: solved rotation is not proper, dropping frame", frame.image_id);
                    report.dropped.push(DroppedFrame {
                        image_id: frame.image_id,
                        reason: DropReason::Reflection,
                    });
                }
            }
        }
        self.require_frames(final_frames.len())?;
        let state = SolveState::new(&final_frames, state.intrinsics, final_poses);

        let errors = state.frame_errors(&final_frames);
        let stats = reprojection_stats(&errors);
        report.converged = converged;
        report.stats = stats;

        let camera = vec_to_intrinsics(&state.intrinsics);
        let finite = camera.is_finite()
            && state
                .poses
                .iter()
                .all(|p| p.rotation.iter().chain(p.translation.iter()).all(|v| v.is_finite()));
        if !finite || !stats.rms.is_finite() || stats.rms > self.options.max_rms_px {
            warn!("calibration failed: {stats}");
            return Err(CalibrationFailure::NonConvergence { attempted, stats });
        }

        if !converged {
            flags.push(UncertaintyFlag::NotConverged);
        }
        flags.extend(quality_flags(&camera, width, height));
        for flag in &flags {
            warn!("calibration uncertainty: {flag}");
        }
        info!(
            "calibrated {} of {} frames: fx {:.2} fy {:.2} cx {:.2} cy {:.2}, {}",
            final_frames.len(),
            attempted,
            camera.fx,
            camera.fy,
            camera.cx,
            camera.cy,
            stats
        );

        let poses = final_frames
            .iter()
            .zip(&state.poses)
            .zip(&errors)
            .map(|((frame, pose), err)| Pose {
                image_id: frame.image_id.clone(),
                rotation: pose.rotation,
                translation: pose.translation,
                error: err.rms(),
            })
            .collect();

        Ok(Calibration {
            intrinsics: Intrinsics {
                camera: camera.into(),
                width,
                height,
                rms_error: stats.rms,
                flags,
            },
            poses,
            report,
        })
    }

    /// Re-solve outlier frames extrinsics-only and drop those that stay
    /// outliers. Returns the surviving frames, their state and the number
    /// of frames dropped.
    fn handle_outliers(
        &self,
        frames: Vec<FrameData>,
        state: SolveState,
        report: &mut CalibrationReport,
    ) -> (Vec<FrameData>, SolveState, usize) {
        let errors = state.frame_errors(&frames);
        let stats = reprojection_stats(&errors);
        let threshold = (self.options.outlier_factor * stats.rms).max(self.options.outlier_min_px);

        let camera = vec_to_intrinsics(&state.intrinsics);
        let mut kept_frames = Vec::with_capacity(frames.len());
        let mut kept_poses = Vec::with_capacity(frames.len());
        let mut dropped = 0;

        for ((frame, pose), err) in frames.into_iter().zip(state.poses.iter()).zip(&errors) {
            let error = err.rms();
            if error <= threshold {
                kept_frames.push(frame);
                kept_poses.push(*pose);
                continue;
            }

            debug!(
                "{}: outlier ({error:.2} px > {threshold:.2} px), re-solving pose",
                frame.image_id
            );
            let resolved = self.resolve_pose(&camera, &frame, state.intrinsics);
            match resolved {
                Some((pose, e)) if e <= threshold => {
                    report.resolved.push(frame.image_id.clone());
                    kept_frames.push(frame);
                    kept_poses.push(pose);
                }
                other => {
                    let error_px = other.map_or(error, |(_, e)| e);
                    warn!(
                        "{}: dropping frame, reprojection error {error_px:.2} px above {threshold:.2} px",
                        frame.image_id
                    );
                    report.dropped.push(DroppedFrame {
                        image_id: frame.image_id,
                        reason: DropReason::Outlier {
                            error_px,
                            threshold_px: threshold,
                        },
                    });
                    dropped += 1;
                }
            }
        }

        let state = SolveState::new(&kept_frames, state.intrinsics, kept_poses);
        (kept_frames, state, dropped)
    }

    /// Fresh linear pose followed by an extrinsics-only refinement.
    fn resolve_pose(
        &self,
        camera: &PerspectiveIntrinsics,
        frame: &FrameData,
        intrinsics: IntrinsicVec,
    ) -> Option<(FramePose, f64)> {
        let pose = initial_pose(camera, &frame.board, &frame.image)?;
        let single = std::slice::from_ref(frame);
        let state = SolveState::new(single, intrinsics, vec![pose]);
        let outcome = minimize(single, state, &[true; N_INTRINSICS], &self.lm_settings());
        let error = outcome.state.frame_errors(single).first()?.rms();
        let pose = *outcome.state.poses.first()?;
        Some((pose, error))
    }
}

/// Board points are taken from the board model by corner id; ids the board
/// does not have are ignored.
fn frame_data(board: &CharucoBoard, det: &Detection) -> FrameData {
    let (board_pts, image_pts): (Vec<_>, Vec<_>) = det
        .correspondences
        .iter()
        .filter_map(|c| {
            let b = board.corner_point(c.id)?;
            Some((Point2::new(b.x, b.y), c.image))
        })
        .unzip();
    FrameData {
        image_id: det.image_id.clone(),
        board: board_pts,
        image: image_pts,
    }
}

fn reprojection_stats(errors: &[FrameError]) -> ReprojectionStats {
    let points: usize = errors.iter().map(|e| e.points).sum();
    if points == 0 {
        return ReprojectionStats::default();
    }
    let sum_sq: f64 = errors.iter().map(|e| e.sum_sq).sum();
    let sum: f64 = errors.iter().map(|e| e.sum).sum();
    ReprojectionStats {
        rms: (sum_sq / points as f64).sqrt(),
        mean: sum / points as f64,
        max: errors.iter().map(|e| e.max).fold(0.0, f64::max),
        frames: errors.len(),
        points,
    }
}

/// Plausibility checks on solved intrinsics.
fn quality_flags(camera: &PerspectiveIntrinsics, width: usize, height: usize) -> Vec<UncertaintyFlag> {
    let mut flags = Vec::new();
    let (w, h) = (width as f64, height as f64);
    let max_dim = w.max(h);

    let in_range = |f: f64| f >= FOCAL_RANGE.0 * max_dim && f <= FOCAL_RANGE.1 * max_dim;
    if !in_range(camera.fx) || !in_range(camera.fy) {
        flags.push(UncertaintyFlag::FocalLengthOutOfRange);
    }
    if (camera.fy / camera.fx - 1.0).abs() > MAX_ASPECT_DEVIATION {
        flags.push(UncertaintyFlag::AspectRatioSuspicious);
    }
    let dx = (camera.cx - (w - 1.0) * 0.5).abs() / w;
    let dy = (camera.cy - (h - 1.0) * 0.5).abs() / h;
    if dx > MAX_PRINCIPAL_OFFSET || dy > MAX_PRINCIPAL_OFFSET {
        flags.push(UncertaintyFlag::PrincipalPointOffCentre);
    }

    let diagonal = w.hypot(h);
    let corners = [(0.0, 0.0), (w - 1.0, 0.0), (0.0, h - 1.0), (w - 1.0, h - 1.0)];
    let displacement = corners
        .iter()
        .map(|&(u, v)| {
            let n = Vector2::new((u - camera.cx) / camera.fx, (v - camera.cy) / camera.fy);
            let d = camera.distortion.distort(&n) - n;
            Vector2::new(d.x * camera.fx, d.y * camera.fy).norm()
        })
        .fold(0.0, f64::max);
    if displacement > MAX_CORNER_DISPLACEMENT * diagonal {
        flags.push(UncertaintyFlag::LargeDistortion);
    }
    flags
}
