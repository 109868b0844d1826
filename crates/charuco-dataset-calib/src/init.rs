//! Closed-form initialization: focal lengths from plane homographies and
//! per-frame poses from `K⁻¹ H`.

use crate::problem::FramePose;
use charuco_dataset_core::{estimate_homography, orthonormalize_rotation, PerspectiveIntrinsics};
use nalgebra::{Matrix2, Matrix3, Point2, Vector2, Vector3};

/// Focal lengths further than this factor from the image size are rejected.
const MAX_FOCAL_FACTOR: f64 = 50.0;
const MIN_SPREAD_RATIO: f64 = 1e-6;

/// Board-to-image homography of one frame in pixels.
///
/// `None` when the board points are (nearly) collinear.
pub(crate) fn board_homography(board: &[Point2<f64>], image: &[Point2<f64>]) -> Option<Matrix3<f64>> {
    if spread_ratio(board)? < MIN_SPREAD_RATIO {
        return None;
    }
    estimate_homography(board, image).map(|h| h.h)
}

/// Ratio of the smaller to the larger principal spread of a point set.
fn spread_ratio(pts: &[Point2<f64>]) -> Option<f64> {
    if pts.is_empty() {
        return None;
    }
    let n = pts.len() as f64;
    let mean = pts.iter().fold(Vector2::zeros(), |acc, p| acc + p.coords) / n;
    let cov = pts.iter().fold(Matrix2::zeros(), |acc, p| {
        let d = p.coords - mean;
        acc + d * d.transpose()
    }) / n;
    let eig = cov.symmetric_eigenvalues();
    let (lo, hi) = (eig.min(), eig.max());
    (hi > 0.0).then(|| lo.max(0.0) / hi)
}

/// Estimate `(fx, fy)` with the principal point held at `(cx, cy)`.
///
/// Each homography contributes two constraints on `(1/fx², 1/fy²)`: the
/// images of the board X and Y axes are orthogonal, and so are the images of
/// the two board diagonals. Returns `None` when the constraints do not pin the
/// focal lengths down (for instance when every view is fronto-parallel).
pub(crate) fn initial_focal(
    homographies: &[Matrix3<f64>],
    cx: f64,
    cy: f64,
    max_dim: f64,
) -> Option<(f64, f64)> {
    let shift = Matrix3::new(1.0, 0.0, -cx, 0.0, 1.0, -cy, 0.0, 0.0, 1.0);
    let mut ata = Matrix2::<f64>::zeros();
    let mut atb = Vector2::<f64>::zeros();

    for h in homographies {
        let h = shift * h;
        let c0 = h.column(0).into_owned();
        let c1 = h.column(1).into_owned();
        let d1 = (c0 + c1) * 0.5;
        let d2 = (c0 - c1) * 0.5;
        let pairs = [(c0, c1), (d1, d2)];
        for (a, b) in pairs {
            let (Some(a), Some(b)) = (a.try_normalize(1e-12), b.try_normalize(1e-12)) else {
                continue;
            };
            let row = Vector2::new(a.x * b.x, a.y * b.y);
            let rhs = -a.z * b.z;
            ata += row * row.transpose();
            atb += row * rhs;
        }
    }

    let scale = ata.abs().max();
    if scale <= 0.0 || ata.determinant().abs() <= 1e-12 * scale * scale {
        return None;
    }
    let w = ata.try_inverse()? * atb;
    if !(w.x > 0.0 && w.y > 0.0) {
        return None;
    }
    let (fx, fy) = (w.x.recip().sqrt(), w.y.recip().sqrt());
    let plausible = |f: f64| f.is_finite() && f > max_dim / MAX_FOCAL_FACTOR && f < max_dim * MAX_FOCAL_FACTOR;
    (plausible(fx) && plausible(fy)).then_some((fx, fy))
}

/// Pose of the board plane from a homography between board `(X, Y)` and
/// normalized image coordinates.
///
/// The sign is chosen so the board lies in front of the camera and the
/// rotation is projected onto SO(3).
pub(crate) fn pose_from_normalized_homography(h: &Matrix3<f64>) -> Option<FramePose> {
    let h1 = h.column(0).into_owned();
    let h2 = h.column(1).into_owned();
    let h3 = h.column(2).into_owned();

    let norm = 0.5 * (h1.norm() + h2.norm());
    if !norm.is_finite() || norm <= 1e-12 {
        return None;
    }
    let mut lambda = 1.0 / norm;
    if h3.z * lambda < 0.0 {
        lambda = -lambda;
    }

    let r1 = h1 * lambda;
    let r2 = h2 * lambda;
    let r3 = r1.cross(&r2);
    let rotation = orthonormalize_rotation(&Matrix3::from_columns(&[r1, r2, r3]))?;
    let translation: Vector3<f64> = h3 * lambda;
    if !translation.iter().all(|v| v.is_finite()) || translation.z <= 0.0 {
        return None;
    }
    Some(FramePose {
        rotation,
        translation,
    })
}

/// Linear pose of one frame under known intrinsics (distortion included).
pub(crate) fn initial_pose(
    camera: &PerspectiveIntrinsics,
    board: &[Point2<f64>],
    image: &[Point2<f64>],
) -> Option<FramePose> {
    let normalized: Vec<Point2<f64>> = image
        .iter()
        .map(|p| Point2::from(camera.pixel_to_normalized(p)))
        .collect();
    let h = estimate_homography(board, &normalized)?;
    pose_from_normalized_homography(&h.h)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use charuco_dataset_core::rodrigues_to_matrix;

    fn board_grid() -> Vec<Point2<f64>> {
        let mut pts = Vec::new();
        for j in 1..5 {
            for i in 1..7 {
                pts.push(Point2::new(i as f64 * 0.04, j as f64 * 0.04));
            }
        }
        pts
    }

    fn project_all(
        camera: &PerspectiveIntrinsics,
        r: &Matrix3<f64>,
        t: &Vector3<f64>,
        board: &[Point2<f64>],
    ) -> Vec<Point2<f64>> {
        board
            .iter()
            .map(|b| {
                let pc = r * Vector3::new(b.x, b.y, 0.0) + t;
                camera.project(&pc.into()).expect("in front")
            })
            .collect()
    }

    #[test]
    fn focal_from_tilted_views() {
        let camera = PerspectiveIntrinsics::new(820.0, 800.0, 319.5, 239.5);
        let board = board_grid();
        let poses = [
            (Vector3::new(0.3, 0.1, 0.05), Vector3::new(-0.12, -0.08, 0.6)),
            (Vector3::new(-0.2, 0.35, 0.1), Vector3::new(-0.1, -0.1, 0.7)),
            (Vector3::new(0.1, -0.3, -0.2), Vector3::new(-0.15, -0.05, 0.55)),
        ];
        let homs: Vec<Matrix3<f64>> = poses
            .iter()
            .map(|(rv, t)| {
                let img = project_all(&camera, &rodrigues_to_matrix(rv), t, &board);
                board_homography(&board, &img).expect("homography")
            })
            .collect();

        let (fx, fy) = initial_focal(&homs, 319.5, 239.5, 640.0).expect("focal");
        assert_relative_eq!(fx, 820.0, max_relative = 1e-6);
        assert_relative_eq!(fy, 800.0, max_relative = 1e-6);
    }

    #[test]
    fn fronto_parallel_views_leave_focal_unobservable() {
        let camera = PerspectiveIntrinsics::new(800.0, 800.0, 319.5, 239.5);
        let board = board_grid();
        let homs: Vec<Matrix3<f64>> = [0.0, 0.4, -0.7]
            .iter()
            .enumerate()
            .map(|(k, &angle)| {
                let r = rodrigues_to_matrix(&Vector3::new(0.0, 0.0, angle));
                let t = Vector3::new(-0.1, -0.08, 0.5 + 0.1 * k as f64);
                let img = project_all(&camera, &r, &t, &board);
                board_homography(&board, &img).expect("homography")
            })
            .collect();
        assert!(initial_focal(&homs, 319.5, 239.5, 640.0).is_none());
    }

    #[test]
    fn pose_from_homography_recovers_truth() {
        let camera = PerspectiveIntrinsics::new(700.0, 700.0, 320.0, 240.0);
        let board = board_grid();
        let r = rodrigues_to_matrix(&Vector3::new(0.25, -0.15, 0.3));
        let t = Vector3::new(-0.1, -0.05, 0.65);
        let img = project_all(&camera, &r, &t, &board);

        let pose = initial_pose(&camera, &board, &img).expect("pose");
        assert_relative_eq!(pose.rotation, r, epsilon = 1e-9);
        assert_relative_eq!(pose.translation, t, epsilon = 1e-9);
    }

    #[test]
    fn collinear_board_points_have_no_homography() {
        let board: Vec<Point2<f64>> = (1..7).map(|i| Point2::new(i as f64 * 0.04, 0.04)).collect();
        let image: Vec<Point2<f64>> = board.iter().map(|p| Point2::new(p.x * 1000.0, 50.0)).collect();
        assert!(board_homography(&board, &image).is_none());
    }

    #[test]
    fn negated_homography_gives_same_pose() {
        let r = rodrigues_to_matrix(&Vector3::new(0.1, 0.2, -0.1));
        let t = Vector3::new(0.02, -0.03, 0.8);
        let h = Matrix3::from_columns(&[r.column(0).into_owned(), r.column(1).into_owned(), t]);
        let pose = pose_from_normalized_homography(&(-h * 3.0)).expect("pose");
        assert_relative_eq!(pose.rotation, r, epsilon = 1e-12);
        assert_relative_eq!(pose.translation, t, epsilon = 1e-12);
    }
}
