//! Camera/world axis conventions.
//!
//! Calibration produces world-to-camera poses in the OpenCV convention
//! (camera looks down +Z with Y down; board frame with Z into the board).
//! Trainers want camera-to-world matrices, usually in the OpenGL convention
//! (camera looks down -Z with Y up).

use charuco_dataset_calib::Pose;
use nalgebra::{Matrix3, Matrix4};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Target convention of exported camera-to-world matrices.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Convention {
    /// Camera X right, Y up, looking down -Z; world Z points out of the board.
    #[default]
    OpenGl,
    /// Calibration axes unchanged.
    OpenCv,
}

impl Convention {
    pub fn name(&self) -> &'static str {
        match self {
            Self::OpenGl => "opengl",
            Self::OpenCv => "opencv",
        }
    }

    pub fn remap(&self) -> ConventionRemap {
        match self {
            Self::OpenGl => ConventionRemap::opengl(),
            Self::OpenCv => ConventionRemap::identity(),
        }
    }
}

impl fmt::Display for Convention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown convention {0:?} (expected \"opengl\" or \"opencv\")")]
pub struct UnknownConvention(pub String);

impl FromStr for Convention {
    type Err = UnknownConvention;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "opengl" => Ok(Self::OpenGl),
            "opencv" => Ok(Self::OpenCv),
            _ => Err(UnknownConvention(s.to_string())),
        }
    }
}

/// Axis changes applied as `c2w = W * [Rᵀ | -Rᵀ t] * C`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ConventionRemap {
    /// Left factor, acting on world axes.
    pub world: Matrix3<f64>,
    /// Right factor, acting on camera axes.
    pub camera: Matrix3<f64>,
}

impl ConventionRemap {
    pub fn identity() -> Self {
        Self {
            world: Matrix3::identity(),
            camera: Matrix3::identity(),
        }
    }

    pub fn opengl() -> Self {
        let flip = Matrix3::from_diagonal(&nalgebra::Vector3::new(1.0, -1.0, -1.0));
        Self {
            world: flip,
            camera: flip,
        }
    }

    /// Camera-to-world matrix of a world-to-camera pose.
    pub fn camera_to_world(&self, pose: &Pose) -> Matrix4<f64> {
        let rt = pose.rotation.transpose();
        let center = -(rt * pose.translation);
        let rotation = self.world * rt * self.camera;
        let position = self.world * center;

        let mut m = Matrix4::identity();
        m.fixed_view_mut::<3, 3>(0, 0).copy_from(&rotation);
        m.fixed_view_mut::<3, 1>(0, 3).copy_from(&position);
        m
    }
}

impl Default for ConventionRemap {
    fn default() -> Self {
        Convention::default().remap()
    }
}

/// Row-major nested array of a 4x4 matrix.
pub fn to_rows(m: &Matrix4<f64>) -> [[f64; 4]; 4] {
    std::array::from_fn(|i| std::array::from_fn(|j| m[(i, j)]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use charuco_dataset_core::rodrigues_to_matrix;
    use nalgebra::{Vector3, Vector4};

    fn pose() -> Pose {
        Pose {
            image_id: "frame_00001.png".into(),
            rotation: rodrigues_to_matrix(&Vector3::new(0.2, -0.1, 0.3)),
            translation: Vector3::new(-0.1, 0.05, 0.7),
            error: 0.1,
        }
    }

    #[test]
    fn identity_remap_inverts_the_pose() {
        let p = pose();
        let c2w = ConventionRemap::identity().camera_to_world(&p);
        let mut w2c = Matrix4::identity();
        w2c.fixed_view_mut::<3, 3>(0, 0).copy_from(&p.rotation);
        w2c.fixed_view_mut::<3, 1>(0, 3).copy_from(&p.translation);
        assert_relative_eq!(c2w * w2c, Matrix4::identity(), epsilon = 1e-12);
    }

    #[test]
    fn opengl_camera_center_and_axes() {
        let p = pose();
        let c2w = ConventionRemap::opengl().camera_to_world(&p);

        // Camera centre: board coordinates with Y and Z flipped.
        let center = p.camera_center();
        assert_relative_eq!(c2w[(0, 3)], center.x, epsilon = 1e-12);
        assert_relative_eq!(c2w[(1, 3)], -center.y, epsilon = 1e-12);
        assert_relative_eq!(c2w[(2, 3)], -center.z, epsilon = 1e-12);

        // The OpenGL viewing direction (-Z) is the OpenCV optical axis.
        let forward_gl = c2w * Vector4::new(0.0, 0.0, -1.0, 0.0);
        let forward_cv = p.rotation.transpose() * Vector3::z();
        assert_relative_eq!(forward_gl.x, forward_cv.x, epsilon = 1e-12);
        assert_relative_eq!(forward_gl.y, -forward_cv.y, epsilon = 1e-12);
        assert_relative_eq!(forward_gl.z, -forward_cv.z, epsilon = 1e-12);

        let r = c2w.fixed_view::<3, 3>(0, 0).into_owned();
        assert_relative_eq!(r.determinant(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn camera_in_front_of_board_is_above_world_origin() {
        // Camera 0.5 units in front of the printed side looks along +Z (board frame).
        let p = Pose {
            image_id: "a".into(),
            rotation: Matrix3::identity(),
            translation: Vector3::new(0.0, 0.0, 0.5),
            error: 0.0,
        };
        let c2w = ConventionRemap::opengl().camera_to_world(&p);
        assert_relative_eq!(c2w[(2, 3)], 0.5, epsilon = 1e-12);
    }

    #[test]
    fn rows_are_row_major() {
        let m = Matrix4::from_fn(|i, j| (4 * i + j) as f64);
        let rows = to_rows(&m);
        assert_eq!(rows[1], [4.0, 5.0, 6.0, 7.0]);
        assert_eq!(rows[3][0], 12.0);
    }

    #[test]
    fn convention_parses_case_insensitively() {
        assert_eq!("OpenGL".parse::<Convention>().unwrap(), Convention::OpenGl);
        assert_eq!("opencv".parse::<Convention>().unwrap(), Convention::OpenCv);
        assert!("blender".parse::<Convention>().is_err());
        assert_eq!(serde_json::to_string(&Convention::OpenGl).unwrap(), "\"opengl\"");
    }
}
