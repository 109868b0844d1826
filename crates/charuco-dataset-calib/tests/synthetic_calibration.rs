use charuco_dataset_aruco::DictionaryId;
use charuco_dataset_calib::{
    CalibrationFailure, CalibrationSolver, DropReason, SolverOptions, UncertaintyFlag,
};
use charuco_dataset_charuco::{BoardSpec, CharucoBoard, Correspondence, Detection};
use charuco_dataset_core::synthetic::{look_at, PixelNoise};
use charuco_dataset_core::{is_rotation, BrownConrady5, PerspectiveIntrinsics};
use nalgebra::{Matrix3, Point3, Vector3};

const WIDTH: usize = 640;
const HEIGHT: usize = 480;

fn board() -> CharucoBoard {
    CharucoBoard::new(BoardSpec {
        squares_x: 9,
        squares_y: 7,
        square_length: 0.03,
        marker_length: 0.022,
        dictionary: DictionaryId::Gen4x4_50,
    })
    .expect("valid board")
}

fn truth_camera() -> PerspectiveIntrinsics {
    PerspectiveIntrinsics::new(800.0, 790.0, 322.0, 236.0).with_distortion(BrownConrady5 {
        k1: -0.12,
        k2: 0.05,
        p1: 0.001,
        p2: -0.0008,
        k3: 0.0,
    })
}

/// Views around the board centre: tilt angles `(yaw, pitch)` in radians,
/// distance in metres and image roll.
fn view_pose(board: &CharucoBoard, yaw: f64, pitch: f64, dist: f64, roll: f64) -> (Matrix3<f64>, Vector3<f64>) {
    let (w, h) = board.size();
    let target = Point3::new(0.5 * w, 0.5 * h, 0.0);
    let dir = Vector3::new(yaw.sin() * pitch.cos(), pitch.sin(), -yaw.cos() * pitch.cos());
    let eye = target + dir * dist;
    let down = Vector3::new(roll.sin(), roll.cos(), 0.0);
    look_at(eye, target, down).expect("pose")
}

fn tilted_views(board: &CharucoBoard, n: usize) -> Vec<(Matrix3<f64>, Vector3<f64>)> {
    (0..n)
        .map(|k| {
            let a = k as f64 / n as f64 * std::f64::consts::TAU;
            view_pose(
                board,
                0.45 * a.cos(),
                0.35 * a.sin(),
                0.55 + 0.05 * (k % 3) as f64,
                0.15 * (k as f64 - n as f64 / 2.0) / n as f64,
            )
        })
        .collect()
}

fn detection(
    board: &CharucoBoard,
    camera: &PerspectiveIntrinsics,
    pose: &(Matrix3<f64>, Vector3<f64>),
    view_idx: usize,
    noise: Option<&PixelNoise>,
) -> Detection {
    let (r, t) = pose;
    let correspondences = board
        .corner_points()
        .filter_map(|(id, p)| {
            let pc = Point3::from(r * p.coords + t);
            let mut px = camera.project(&pc)?;
            if let Some(noise) = noise {
                px += noise.sample(view_idx, id as usize);
            }
            let inside = px.x >= 0.0 && px.y >= 0.0 && px.x <= (WIDTH - 1) as f64 && px.y <= (HEIGHT - 1) as f64;
            inside.then_some(Correspondence {
                id,
                board: p,
                image: px,
            })
        })
        .collect();
    Detection {
        image_id: format!("frame_{:05}.png", view_idx + 1),
        width: WIDTH,
        height: HEIGHT,
        correspondences,
        markers: Vec::new(),
    }
}

fn detections(
    board: &CharucoBoard,
    camera: &PerspectiveIntrinsics,
    views: &[(Matrix3<f64>, Vector3<f64>)],
    noise: Option<&PixelNoise>,
) -> Vec<Detection> {
    views
        .iter()
        .enumerate()
        .map(|(k, v)| detection(board, camera, v, k, noise))
        .collect()
}

#[test]
fn exact_views_recover_camera_and_poses() {
    let board = board();
    let camera = truth_camera();
    let views = tilted_views(&board, 8);
    let dets = detections(&board, &camera, &views, None);
    assert!(dets.iter().all(|d| d.corner_count() > 30));

    let cal = CalibrationSolver::default()
        .calibrate(&board, &dets)
        .expect("calibration");

    let k = cal.intrinsics.camera.perspective();
    assert!((k.fx - 800.0).abs() < 1e-4, "fx {}", k.fx);
    assert!((k.fy - 790.0).abs() < 1e-4, "fy {}", k.fy);
    assert!((k.cx - 322.0).abs() < 1e-4, "cx {}", k.cx);
    assert!((k.cy - 236.0).abs() < 1e-4, "cy {}", k.cy);
    let d = k.distortion;
    assert!((d.k1 + 0.12).abs() < 1e-6, "k1 {}", d.k1);
    assert!((d.k2 - 0.05).abs() < 1e-5, "k2 {}", d.k2);
    assert!((d.p1 - 0.001).abs() < 1e-7, "p1 {}", d.p1);
    assert!((d.p2 + 0.0008).abs() < 1e-7, "p2 {}", d.p2);
    assert_eq!(d.k3, 0.0);

    assert_eq!((cal.intrinsics.width, cal.intrinsics.height), (WIDTH, HEIGHT));
    assert!(cal.intrinsics.rms_error < 1e-6);
    assert!(cal.intrinsics.flags.is_empty(), "{:?}", cal.intrinsics.flags);
    assert!(cal.report.converged);
    assert!(cal.report.dropped.is_empty());
    assert_eq!(cal.report.attempted, 8);
    assert_eq!(cal.report.stats.frames, 8);

    assert_eq!(cal.poses.len(), 8);
    for (k, (pose, (r, t))) in cal.poses.iter().zip(&views).enumerate() {
        assert_eq!(pose.image_id, dets[k].image_id);
        assert!(is_rotation(&pose.rotation, 1e-9));
        assert!((pose.rotation - r).abs().max() < 1e-7, "view {k} rotation");
        assert!((pose.translation - t).norm() < 1e-7, "view {k} translation");
        assert!(pose.error < 1e-6);
    }
}

#[test]
fn gaussian_noise_gives_bounded_errors() {
    let board = board();
    let camera = truth_camera();
    let views = tilted_views(&board, 12);
    let noise = PixelNoise::Gaussian {
        seed: 42,
        sigma_px: 0.5,
    };
    let dets = detections(&board, &camera, &views, Some(&noise));

    let cal = CalibrationSolver::default()
        .calibrate(&board, &dets)
        .expect("calibration");

    // Per-point RMS of 2D Gaussian noise is sigma * sqrt(2).
    let rms = cal.intrinsics.rms_error;
    assert!(rms > 0.5 && rms < 0.85, "rms {rms}");
    let k = cal.intrinsics.camera.perspective();
    assert!((k.fx - 800.0).abs() / 800.0 < 0.01, "fx {}", k.fx);
    assert!((k.fy - 790.0).abs() / 790.0 < 0.01, "fy {}", k.fy);
    assert!((k.cx - 322.0).abs() < 5.0, "cx {}", k.cx);
    assert!((k.cy - 236.0).abs() < 5.0, "cy {}", k.cy);
    assert!(cal.report.dropped.is_empty(), "{:?}", cal.report.dropped);
    assert_eq!(cal.poses.len(), 12);
    assert!(cal.report.stats.max >= cal.report.stats.mean);
}

#[test]
fn too_few_frames_fail() {
    let board = board();
    let camera = truth_camera();
    let dets = detections(&board, &camera, &tilted_views(&board, 3), None);
    let err = CalibrationSolver::default()
        .calibrate(&board, &dets)
        .unwrap_err();
    assert_eq!(
        err,
        CalibrationFailure::TooFewFrames {
            attempted: 3,
            required: 5
        }
    );
}

#[test]
fn mixed_image_sizes_fail() {
    let board = board();
    let camera = truth_camera();
    let mut dets = detections(&board, &camera, &tilted_views(&board, 6), None);
    dets[4].width = 1280;
    let err = CalibrationSolver::default()
        .calibrate(&board, &dets)
        .unwrap_err();
    assert!(matches!(err, CalibrationFailure::MixedImageSizes { .. }));
}

#[test]
fn noisy_frame_is_dropped_and_order_preserved() {
    let board = board();
    let camera = truth_camera();
    let views = tilted_views(&board, 21);
    let clean = PixelNoise::Gaussian {
        seed: 3,
        sigma_px: 0.2,
    };
    let wild = PixelNoise::Gaussian {
        seed: 9,
        sigma_px: 10.0,
    };
    let mut dets = detections(&board, &camera, &views, Some(&clean));
    dets[7] = detection(&board, &camera, &views[7], 7, Some(&wild));

    let cal = CalibrationSolver::default()
        .calibrate(&board, &dets)
        .expect("calibration");

    assert_eq!(cal.report.dropped.len(), 1);
    assert_eq!(cal.report.dropped[0].image_id, dets[7].image_id);
    assert!(matches!(
        cal.report.dropped[0].reason,
        DropReason::Outlier { .. }
    ));
    assert_eq!(cal.poses.len(), 20);
    assert!(cal.poses.iter().all(|p| p.image_id != dets[7].image_id));
    let ids: Vec<&str> = cal.poses.iter().map(|p| p.image_id.as_str()).collect();
    let mut sorted = ids.clone();
    sorted.sort();
    assert_eq!(ids, sorted);

    let k = cal.intrinsics.camera.perspective();
    assert!((k.fx - 800.0).abs() / 800.0 < 0.005, "fx {}", k.fx);
    assert!(cal.intrinsics.rms_error < 0.5);
}

#[test]
fn collinear_frame_is_dropped_as_degenerate() {
    let board = board();
    let camera = truth_camera();
    let mut dets = detections(&board, &camera, &tilted_views(&board, 6), None);
    let row: Vec<Correspondence> = dets[2]
        .correspondences
        .iter()
        .filter(|c| board.corner_grid(c.id).is_some_and(|(_, j)| j == 3))
        .copied()
        .collect();
    assert!(row.len() >= 4);
    dets[2].correspondences = row;

    let cal = CalibrationSolver::default()
        .calibrate(&board, &dets)
        .expect("calibration");
    assert_eq!(cal.poses.len(), 5);
    assert_eq!(cal.report.dropped.len(), 1);
    assert_eq!(cal.report.dropped[0].reason, DropReason::DegenerateHomography);
}

#[test]
fn fronto_parallel_views_flag_unobservable_focal() {
    let board = board();
    let camera = PerspectiveIntrinsics::new(800.0, 800.0, 319.5, 239.5);
    let views: Vec<_> = (0..6)
        .map(|k| view_pose(&board, 0.0, 0.0, 0.5 + 0.04 * k as f64, 0.3 * k as f64 - 0.75))
        .collect();
    let dets = detections(&board, &camera, &views, None);

    let cal = CalibrationSolver::default()
        .calibrate(&board, &dets)
        .expect("calibration");
    assert!(cal
        .intrinsics
        .flags
        .contains(&UncertaintyFlag::FocalLengthUnobservable));
    assert!(cal.intrinsics.rms_error < 1e-3);
}

#[test]
fn strict_rms_limit_reports_non_convergence() {
    let board = board();
    let camera = truth_camera();
    let noise = PixelNoise::Gaussian {
        seed: 5,
        sigma_px: 1.0,
    };
    let dets = detections(&board, &camera, &tilted_views(&board, 8), Some(&noise));
    let solver = CalibrationSolver::new(SolverOptions {
        max_rms_px: 0.1,
        ..SolverOptions::default()
    });
    match solver.calibrate(&board, &dets) {
        Err(CalibrationFailure::NonConvergence { attempted, stats }) => {
            assert_eq!(attempted, 8);
            assert!(stats.rms > 0.1);
        }
        other => panic!("expected non-convergence, got {other:?}"),
    }
}
