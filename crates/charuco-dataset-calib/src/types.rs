use charuco_dataset_core::CameraIntrinsics;
use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Solved camera intrinsics for one image size.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Intrinsics {
    pub camera: CameraIntrinsics,
    pub width: usize,
    pub height: usize,
    /// Overall RMS reprojection error in pixels.
    pub rms_error: f64,
    #[serde(default)]
    pub flags: Vec<UncertaintyFlag>,
}

/// World (board) to camera pose of one image, OpenCV convention.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub image_id: String,
    /// Orthonormal with determinant +1.
    pub rotation: Matrix3<f64>,
    pub translation: Vector3<f64>,
    /// Per-frame RMS reprojection error in pixels.
    pub error: f64,
}

impl Pose {
    /// Camera centre in board coordinates, `-Rᵀ t`.
    pub fn camera_center(&self) -> Vector3<f64> {
        -(self.rotation.transpose() * self.translation)
    }
}

/// Non-fatal warnings attached to a calibration result.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UncertaintyFlag {
    /// No frame constrained the focal length; it was seeded from the image size.
    FocalLengthUnobservable,
    /// Focal length far outside the usual range for the image size.
    FocalLengthOutOfRange,
    /// `fy / fx` far from 1.
    AspectRatioSuspicious,
    /// Principal point far from the image centre.
    PrincipalPointOffCentre,
    /// Distortion displaces the image corners by a large fraction of the diagonal.
    LargeDistortion,
    /// The optimizer stopped on its iteration limit.
    NotConverged,
}

impl UncertaintyFlag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FocalLengthUnobservable => "focal_length_unobservable",
            Self::FocalLengthOutOfRange => "focal_length_out_of_range",
            Self::AspectRatioSuspicious => "aspect_ratio_suspicious",
            Self::PrincipalPointOffCentre => "principal_point_off_centre",
            Self::LargeDistortion => "large_distortion",
            Self::NotConverged => "not_converged",
        }
    }
}

impl fmt::Display for UncertaintyFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reprojection error summary over the frames used in the final solve.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ReprojectionStats {
    pub rms: f64,
    pub mean: f64,
    pub max: f64,
    pub frames: usize,
    pub points: usize,
}

impl fmt::Display for ReprojectionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "rms {:.3} px, mean {:.3} px, max {:.3} px over {} points in {} frames",
            self.rms, self.mean, self.max, self.points, self.frames
        )
    }
}

/// Why a frame was left out of the calibration.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DropReason {
    /// Board-to-image homography could not be estimated.
    DegenerateHomography,
    /// Still above the outlier threshold after an extrinsics-only re-solve.
    Outlier { error_px: f64, threshold_px: f64 },
    /// Rotation did not survive orthonormalization with determinant +1.
    Reflection,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DegenerateHomography => f.write_str("degenerate board homography"),
            Self::Outlier {
                error_px,
                threshold_px,
            } => write!(
                f,
                "reprojection error {error_px:.2} px above {threshold_px:.2} px"
            ),
            Self::Reflection => f.write_str("rotation is a reflection"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DroppedFrame {
    pub image_id: String,
    pub reason: DropReason,
}

/// Bookkeeping of one calibration run.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CalibrationReport {
    /// Frames handed to the solver.
    pub attempted: usize,
    pub dropped: Vec<DroppedFrame>,
    /// Outlier frames rescued by an extrinsics-only re-solve.
    pub resolved: Vec<String>,
    /// Residual evaluations summed over all LM solves.
    pub iterations: usize,
    pub converged: bool,
    pub stats: ReprojectionStats,
}

/// Successful calibration. `poses` follow the input detection order.
#[derive(Clone, Debug, PartialEq)]
pub struct Calibration {
    pub intrinsics: Intrinsics,
    pub poses: Vec<Pose>,
    pub report: CalibrationReport,
}

/// Reasons no calibration could be produced.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum CalibrationFailure {
    #[error("only {attempted} usable frames, {required} required")]
    TooFewFrames { attempted: usize, required: usize },
    #[error("calibration did not converge ({stats})")]
    NonConvergence {
        attempted: usize,
        stats: ReprojectionStats,
    },
    #[error("degenerate calibration problem: {0}")]
    Degenerate(String),
    #[error("detections have different image sizes ({first:?} vs {other:?})")]
    MixedImageSizes {
        first: (usize, usize),
        other: (usize, usize),
    },
}
