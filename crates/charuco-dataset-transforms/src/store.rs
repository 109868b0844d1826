//! `camera.json` / `poses.json` persistence.

use crate::atomic::{remove_if_present, write_json_atomic, WriteError};
use charuco_dataset_calib::{Intrinsics, Pose, UncertaintyFlag};
use charuco_dataset_core::{
    is_rotation, BrownConrady5, CameraIntrinsics, CameraModel, PerspectiveIntrinsics,
};
use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

#[cfg(feature = "tracing")]
use tracing::instrument;

pub const CAMERA_FILE: &str = "camera.json";
pub const POSES_FILE: &str = "poses.json";
pub const STORE_VERSION: u32 = 1;

/// Tolerance of the orthonormality check on stored rotations.
const ROTATION_TOL: f64 = 1e-6;

#[derive(thiserror::Error, Debug)]
pub enum PoseStoreError {
    #[error("i/o error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("malformed pose store document {file}: {reason}")]
    Malformed { file: String, reason: String },
    #[error("failed to serialize {file}: {source}")]
    Serialize {
        file: String,
        #[source]
        source: serde_json::Error,
    },
}

impl PoseStoreError {
    fn malformed(file: &str, reason: impl Into<String>) -> Self {
        Self::Malformed {
            file: file.to_string(),
            reason: reason.into(),
        }
    }

    fn from_write(path: &Path, file: &str, err: WriteError) -> Self {
        match err {
            WriteError::Io(source) => Self::Io {
                path: path.to_path_buf(),
                source,
            },
            WriteError::Json(source) => Self::Serialize {
                file: file.to_string(),
                source,
            },
        }
    }
}

/// Solved intrinsics and poses as persisted on disk.
#[derive(Clone, Debug, PartialEq)]
pub struct PoseStore {
    pub intrinsics: Intrinsics,
    /// In `poses.json` order.
    pub poses: Vec<Pose>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct CameraDocument {
    version: u32,
    camera_model: String,
    width: usize,
    height: usize,
    fx: f64,
    fy: f64,
    cx: f64,
    cy: f64,
    distortion: Vec<f64>,
    rms_error: f64,
    #[serde(default)]
    flags: Vec<UncertaintyFlag>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct PosesDocument {
    version: u32,
    frames: Vec<FrameRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct FrameRecord {
    image: String,
    rotation: [[f64; 3]; 3],
    translation: [f64; 3],
    error: f64,
}

impl CameraDocument {
    fn from_intrinsics(intrinsics: &Intrinsics) -> Self {
        let k = intrinsics.camera.perspective();
        Self {
            version: STORE_VERSION,
            camera_model: intrinsics.camera.model().name().to_string(),
            width: intrinsics.width,
            height: intrinsics.height,
            fx: k.fx,
            fy: k.fy,
            cx: k.cx,
            cy: k.cy,
            distortion: intrinsics.camera.distortion_coeffs(),
            rms_error: intrinsics.rms_error,
            flags: intrinsics.flags.clone(),
        }
    }

    fn into_intrinsics(self) -> Result<Intrinsics, PoseStoreError> {
        let bad = |reason: String| PoseStoreError::malformed(CAMERA_FILE, reason);
        if self.version != STORE_VERSION {
            return Err(bad(format!("unsupported version {}", self.version)));
        }
        let model: CameraModel = self
            .camera_model
            .parse()
            .map_err(|e| bad(format!("{e}")))?;
        if self.distortion.len() != model.distortion_len() {
            return Err(bad(format!(
                "expected {} distortion coefficients, found {}",
                model.distortion_len(),
                self.distortion.len()
            )));
        }
        if self.width == 0 || self.height == 0 {
            return Err(bad("zero image size".into()));
        }
        let scalars = [self.fx, self.fy, self.cx, self.cy, self.rms_error];
        if !scalars.iter().chain(&self.distortion).all(|v| v.is_finite()) {
            return Err(bad("non-finite value".into()));
        }
        if self.fx <= 0.0 || self.fy <= 0.0 {
            return Err(bad("focal lengths must be positive".into()));
        }

        let camera = match model {
            CameraModel::Perspective => {
                let d = &self.distortion;
                CameraIntrinsics::Perspective(
                    PerspectiveIntrinsics::new(self.fx, self.fy, self.cx, self.cy)
                        .with_distortion(BrownConrady5::from_opencv([d[0], d[1], d[2], d[3], d[4]])),
                )
            }
        };
        Ok(Intrinsics {
            camera,
            width: self.width,
            height: self.height,
            rms_error: self.rms_error,
            flags: self.flags,
        })
    }
}

impl PosesDocument {
    fn from_poses(poses: &[Pose]) -> Self {
        Self {
            version: STORE_VERSION,
            frames: poses
                .iter()
                .map(|p| {
                    let r = &p.rotation;
                    FrameRecord {
                        image: p.image_id.clone(),
                        rotation: [
                            [r[(0, 0)], r[(0, 1)], r[(0, 2)]],
                            [r[(1, 0)], r[(1, 1)], r[(1, 2)]],
                            [r[(2, 0)], r[(2, 1)], r[(2, 2)]],
                        ],
                        translation: [p.translation.x, p.translation.y, p.translation.z],
                        error: p.error,
                    }
                })
                .collect(),
        }
    }

    fn into_poses(self) -> Result<Vec<Pose>, PoseStoreError> {
        let bad = |reason: String| PoseStoreError::malformed(POSES_FILE, reason);
        if self.version != STORE_VERSION {
            return Err(bad(format!("unsupported version {}", self.version)));
        }
        let mut seen = HashSet::new();
        let mut poses = Vec::with_capacity(self.frames.len());
        for frame in self.frames {
            if frame.image.is_empty() {
                return Err(bad("empty image name".into()));
            }
            if !seen.insert(frame.image.clone()) {
                return Err(bad(format!("duplicate image {}", frame.image)));
            }
            let values = frame.rotation.iter().flatten().chain(&frame.translation);
            if !values.chain([&frame.error]).all(|v| v.is_finite()) {
                return Err(bad(format!("non-finite value in frame {}", frame.image)));
            }
            let rotation = Matrix3::from_fn(|i, j| frame.rotation[i][j]);
            if !is_rotation(&rotation, ROTATION_TOL) {
                return Err(bad(format!("rotation of {} is not orthonormal", frame.image)));
            }
            poses.push(Pose {
                image_id: frame.image,
                rotation,
                translation: Vector3::from(frame.translation),
                error: frame.error,
            });
        }
        Ok(poses)
    }
}

/// Write `camera.json` and `poses.json` into `dir`.
///
/// Each document is written through a temporary file and renamed into place.
/// An existing `poses.json` is removed first and the new one written last, so
/// a failure part way leaves an incomplete store rather than a mixed one.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "info", skip_all, fields(frames = poses.len()))
)]
pub fn write_pose_store(
    dir: impl AsRef<Path>,
    intrinsics: &Intrinsics,
    poses: &[Pose],
) -> Result<(), PoseStoreError> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir).map_err(|source| PoseStoreError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let poses_path = dir.join(POSES_FILE);
    remove_if_present(&poses_path).map_err(|source| PoseStoreError::Io {
        path: poses_path.clone(),
        source,
    })?;

    let camera_path = dir.join(CAMERA_FILE);
    write_json_atomic(&camera_path, &CameraDocument::from_intrinsics(intrinsics))
        .map_err(|e| PoseStoreError::from_write(&camera_path, CAMERA_FILE, e))?;

    write_json_atomic(&poses_path, &PosesDocument::from_poses(poses))
        .map_err(|e| PoseStoreError::from_write(&poses_path, POSES_FILE, e))?;

    log::debug!("wrote {} poses to {}", poses.len(), dir.display());
    Ok(())
}

/// Delete `camera.json` and `poses.json` from `dir`, where present.
pub fn remove_pose_store(dir: impl AsRef<Path>) -> Result<(), PoseStoreError> {
    let dir = dir.as_ref();
    for file in [POSES_FILE, CAMERA_FILE] {
        let path = dir.join(file);
        if remove_if_present(&path).map_err(|source| PoseStoreError::Io {
            path: path.clone(),
            source,
        })? {
            log::debug!("removed {}", path.display());
        }
    }
    Ok(())
}

fn read_document(path: &Path) -> Result<Option<String>, PoseStoreError> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(PoseStoreError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Read the pose store in `dir`.
///
/// `Ok(None)` when either document is absent; a lone document is logged as
/// an incomplete store. A present document that fails validation is an
/// error; no partial store is returned.
pub fn read_pose_store(dir: impl AsRef<Path>) -> Result<Option<PoseStore>, PoseStoreError> {
    let dir = dir.as_ref();
    let camera_text = read_document(&dir.join(CAMERA_FILE))?;
    let poses_text = read_document(&dir.join(POSES_FILE))?;
    let (camera_text, poses_text) = match (camera_text, poses_text) {
        (Some(camera), Some(poses)) => (camera, poses),
        (None, None) => return Ok(None),
        (present, _) => {
            let (found, missing) = if present.is_some() {
                (CAMERA_FILE, POSES_FILE)
            } else {
                (POSES_FILE, CAMERA_FILE)
            };
            log::warn!(
                "incomplete pose store in {}: {found} without {missing}",
                dir.display()
            );
            return Ok(None);
        }
    };

    let camera: CameraDocument = serde_json::from_str(&camera_text)
        .map_err(|e| PoseStoreError::malformed(CAMERA_FILE, e.to_string()))?;
    let poses: PosesDocument = serde_json::from_str(&poses_text)
        .map_err(|e| PoseStoreError::malformed(POSES_FILE, e.to_string()))?;

    Ok(Some(PoseStore {
        intrinsics: camera.into_intrinsics()?,
        poses: poses.into_poses()?,
    }))
}
