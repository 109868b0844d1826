//! Camera models.
//!
//! Pixel coordinates put pixel centers at integer positions. Camera frame is
//! the OpenCV one: X right, Y down, Z forward.

use nalgebra::{Matrix3, Point2, Point3, Vector2};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Supported camera model names.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CameraModel {
    /// Pinhole camera with 5-coefficient Brown-Conrady distortion.
    #[default]
    Perspective,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("unsupported camera model {0:?} (supported: perspective)")]
pub struct UnknownCameraModel(pub String);

impl CameraModel {
    /// Name used in configuration files and `camera.json`.
    pub fn name(&self) -> &'static str {
        match self {
            CameraModel::Perspective => "perspective",
        }
    }

    /// Name used in the `camera_model` field of `transforms.json`.
    pub fn manifest_name(&self) -> &'static str {
        match self {
            CameraModel::Perspective => "OPENCV",
        }
    }

    /// Number of distortion coefficients carried by this model.
    pub fn distortion_len(&self) -> usize {
        match self {
            CameraModel::Perspective => 5,
        }
    }
}

impl FromStr for CameraModel {
    type Err = UnknownCameraModel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "perspective" => Ok(CameraModel::Perspective),
            _ => Err(UnknownCameraModel(s.to_string())),
        }
    }
}

impl fmt::Display for CameraModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Brown-Conrady distortion with radial `k1, k2, k3` and tangential `p1, p2`.
///
/// Acts on normalized image coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BrownConrady5 {
    pub k1: f64,
    pub k2: f64,
    pub p1: f64,
    pub p2: f64,
    pub k3: f64,
}

const UNDISTORT_ITERS: usize = 20;

impl BrownConrady5 {
    /// Coefficients in OpenCV order `[k1, k2, p1, p2, k3]`.
    pub fn to_opencv(&self) -> [f64; 5] {
        [self.k1, self.k2, self.p1, self.p2, self.k3]
    }

    pub fn from_opencv(c: [f64; 5]) -> Self {
        Self {
            k1: c[0],
            k2: c[1],
            p1: c[2],
            p2: c[3],
            k3: c[4],
        }
    }

    pub fn is_zero(&self) -> bool {
        self.to_opencv().iter().all(|&c| c == 0.0)
    }

    pub fn distort(&self, n: &Vector2<f64>) -> Vector2<f64> {
        let (x, y) = (n.x, n.y);
        let r2 = x * x + y * y;
        let radial = 1.0 + r2 * (self.k1 + r2 * (self.k2 + r2 * self.k3));
        let x_tan = 2.0 * self.p1 * x * y + self.p2 * (r2 + 2.0 * x * x);
        let y_tan = self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * x * y;
        Vector2::new(x * radial + x_tan, y * radial + y_tan)
    }

    /// Fixed-point inversion of [`distort`](Self::distort).
    pub fn undistort(&self, d: &Vector2<f64>) -> Vector2<f64> {
        if self.is_zero() {
            return *d;
        }
        let mut u = *d;
        for _ in 0..UNDISTORT_ITERS {
            let err = self.distort(&u) - d;
            u -= err;
            if err.norm_squared() < 1e-24 {
                break;
            }
        }
        u
    }
}

/// Pinhole intrinsics (zero skew) with Brown-Conrady distortion.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PerspectiveIntrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    #[serde(default)]
    pub distortion: BrownConrady5,
}

impl PerspectiveIntrinsics {
    pub fn new(fx: f64, fy: f64, cx: f64, cy: f64) -> Self {
        Self {
            fx,
            fy,
            cx,
            cy,
            distortion: BrownConrady5::default(),
        }
    }

    pub fn with_distortion(mut self, distortion: BrownConrady5) -> Self {
        self.distortion = distortion;
        self
    }

    pub fn k_matrix(&self) -> Matrix3<f64> {
        Matrix3::new(self.fx, 0.0, self.cx, 0.0, self.fy, self.cy, 0.0, 0.0, 1.0)
    }

    /// Pixel of an undistorted normalized coordinate.
    pub fn normalized_to_pixel(&self, n: &Vector2<f64>) -> Point2<f64> {
        let d = self.distortion.distort(n);
        Point2::new(self.fx * d.x + self.cx, self.fy * d.y + self.cy)
    }

    /// Undistorted normalized coordinate of a pixel.
    pub fn pixel_to_normalized(&self, p: &Point2<f64>) -> Vector2<f64> {
        let d = Vector2::new((p.x - self.cx) / self.fx, (p.y - self.cy) / self.fy);
        self.distortion.undistort(&d)
    }

    /// Project a camera-frame point; `None` behind or on the camera plane.
    pub fn project(&self, p: &Point3<f64>) -> Option<Point2<f64>> {
        if p.z <= 1e-12 {
            return None;
        }
        Some(self.normalized_to_pixel(&Vector2::new(p.x / p.z, p.y / p.z)))
    }

    pub fn is_finite(&self) -> bool {
        [self.fx, self.fy, self.cx, self.cy]
            .iter()
            .chain(self.distortion.to_opencv().iter())
            .all(|v| v.is_finite())
    }
}

/// Intrinsics of one supported camera model.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum CameraIntrinsics {
    Perspective(PerspectiveIntrinsics),
}

impl CameraIntrinsics {
    pub fn model(&self) -> CameraModel {
        match self {
            CameraIntrinsics::Perspective(_) => CameraModel::Perspective,
        }
    }

    pub fn project(&self, p: &Point3<f64>) -> Option<Point2<f64>> {
        match self {
            CameraIntrinsics::Perspective(k) => k.project(p),
        }
    }

    pub fn pixel_to_normalized(&self, p: &Point2<f64>) -> Vector2<f64> {
        match self {
            CameraIntrinsics::Perspective(k) => k.pixel_to_normalized(p),
        }
    }

    /// Distortion coefficients in the model's serialization order.
    pub fn distortion_coeffs(&self) -> Vec<f64> {
        match self {
            CameraIntrinsics::Perspective(k) => k.distortion.to_opencv().to_vec(),
        }
    }

    pub fn perspective(&self) -> &PerspectiveIntrinsics {
        match self {
            CameraIntrinsics::Perspective(k) => k,
        }
    }
}

impl From<PerspectiveIntrinsics> for CameraIntrinsics {
    fn from(k: PerspectiveIntrinsics) -> Self {
        CameraIntrinsics::Perspective(k)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sample_camera() -> PerspectiveIntrinsics {
        PerspectiveIntrinsics::new(800.0, 780.0, 319.5, 239.5).with_distortion(BrownConrady5 {
            k1: -0.12,
            k2: 0.05,
            p1: 0.001,
            p2: -0.0005,
            k3: 0.0,
        })
    }

    #[test]
    fn model_names_parse() {
        assert_eq!(
            "Perspective".parse::<CameraModel>(),
            Ok(CameraModel::Perspective)
        );
        assert!("fisheye".parse::<CameraModel>().is_err());
        assert_eq!(CameraModel::Perspective.manifest_name(), "OPENCV");
        assert_eq!(CameraModel::Perspective.distortion_len(), 5);
    }

    #[test]
    fn undistort_inverts_distort() {
        let cam = sample_camera();
        for n in [
            Vector2::new(0.0, 0.0),
            Vector2::new(0.2, -0.1),
            Vector2::new(-0.35, 0.25),
        ] {
            let d = cam.distortion.distort(&n);
            assert_relative_eq!(cam.distortion.undistort(&d), n, epsilon = 1e-10);
        }
    }

    #[test]
    fn pixel_round_trip_through_projection() {
        let cam = sample_camera();
        let p = Point3::new(0.1, -0.05, 1.2);
        let px = cam.project(&p).expect("in front");
        let n = cam.pixel_to_normalized(&px);
        assert_relative_eq!(n, Vector2::new(p.x / p.z, p.y / p.z), epsilon = 1e-10);
        assert!(cam.project(&Point3::new(0.0, 0.0, -1.0)).is_none());
    }

    #[test]
    fn opencv_order_is_k1_k2_p1_p2_k3() {
        let d = BrownConrady5::from_opencv([1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!((d.k1, d.k2, d.p1, d.p2, d.k3), (1.0, 2.0, 3.0, 4.0, 5.0));
        assert_eq!(d.to_opencv(), [1.0, 2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn intrinsics_serialize_with_model_tag() {
        let cam = CameraIntrinsics::from(sample_camera());
        let json = serde_json::to_value(cam).expect("json");
        assert_eq!(json["model"], "perspective");
        let back: CameraIntrinsics = serde_json::from_value(json).expect("parse");
        assert_eq!(back, cam);
    }
}
