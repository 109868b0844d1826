//! `transforms.json` generation from a pose store.

use crate::atomic::{remove_if_present, write_json_atomic, WriteError};
use crate::convention::{to_rows, Convention};
use crate::store::{read_pose_store, remove_pose_store, PoseStore, PoseStoreError};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};

#[cfg(feature = "tracing")]
use tracing::instrument;

pub const TRANSFORMS_FILE: &str = "transforms.json";

#[derive(thiserror::Error, Debug)]
pub enum TransformError {
    #[error(transparent)]
    Store(#[from] PoseStoreError),
    #[error("i/o error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to serialize transforms.json: {0}")]
    Serialize(#[source] serde_json::Error),
}

impl TransformError {
    fn from_write(path: &Path, err: WriteError) -> Self {
        match err {
            WriteError::Io(source) => Self::Io {
                path: path.to_path_buf(),
                source,
            },
            WriteError::Json(e) => Self::Serialize(e),
        }
    }
}

/// Converter options.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConverterOptions {
    pub convention: Convention,
    /// Image directory relative to the output directory.
    pub images_dir: String,
}

impl Default for ConverterOptions {
    fn default() -> Self {
        Self {
            convention: Convention::OpenGl,
            images_dir: "images".to_string(),
        }
    }
}

/// One manifest frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ManifestFrame {
    /// Relative to the output directory.
    pub file_path: String,
    /// Row-major camera-to-world matrix.
    pub transform_matrix: [[f64; 4]; 4],
}

/// Contents of `transforms.json`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransformManifest {
    pub camera_model: String,
    pub fl_x: f64,
    pub fl_y: f64,
    pub cx: f64,
    pub cy: f64,
    pub w: usize,
    pub h: usize,
    pub k1: f64,
    pub k2: f64,
    pub k3: f64,
    pub p1: f64,
    pub p2: f64,
    pub frames: Vec<ManifestFrame>,
}

impl TransformManifest {
    /// Build the manifest for `store`, keeping only frames whose image exists
    /// under `output_dir/<images_dir>`.
    pub fn from_pose_store(store: &PoseStore, output_dir: &Path, opts: &ConverterOptions) -> Self {
        let intr = &store.intrinsics;
        let k = intr.camera.perspective();
        let remap = opts.convention.remap();

        let frames = store
            .poses
            .iter()
            .filter_map(|pose| {
                let relative = format!("{}/{}", opts.images_dir, pose.image_id);
                if !output_dir.join(&relative).is_file() {
                    warn!("{relative} not found, leaving it out of {TRANSFORMS_FILE}");
                    return None;
                }
                Some(ManifestFrame {
                    file_path: relative,
                    transform_matrix: to_rows(&remap.camera_to_world(pose)),
                })
            })
            .collect();

        Self {
            camera_model: intr.camera.model().manifest_name().to_string(),
            fl_x: k.fx,
            fl_y: k.fy,
            cx: k.cx,
            cy: k.cy,
            w: intr.width,
            h: intr.height,
            k1: k.distortion.k1,
            k2: k.distortion.k2,
            k3: k.distortion.k3,
            p1: k.distortion.p1,
            p2: k.distortion.p2,
            frames,
        }
    }
}

/// Outcome of [`convert_pose_store`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Conversion {
    /// No pose store in the output directory; nothing written.
    Skipped,
    /// `transforms.json` written with this many frames.
    Converted { frames: usize },
}

/// Delete the pose store and `transforms.json` from `output_dir`, where present.
pub fn remove_outputs(output_dir: impl AsRef<Path>) -> Result<(), TransformError> {
    let output_dir = output_dir.as_ref();
    remove_pose_store(output_dir)?;
    let path = output_dir.join(TRANSFORMS_FILE);
    remove_if_present(&path).map_err(|source| TransformError::Io {
        path: path.clone(),
        source,
    })?;
    Ok(())
}

/// Convert `camera.json` + `poses.json` in `output_dir` into `transforms.json`.
///
/// Running it twice on the same inputs produces byte-identical output.
#[cfg_attr(feature = "tracing", instrument(level = "info", skip_all))]
pub fn convert_pose_store(
    output_dir: impl AsRef<Path>,
    opts: &ConverterOptions,
) -> Result<Conversion, TransformError> {
    let output_dir = output_dir.as_ref();
    let Some(store) = read_pose_store(output_dir)? else {
        warn!("could not find existing ChArUco results, not generating {TRANSFORMS_FILE}");
        return Ok(Conversion::Skipped);
    };

    let manifest = TransformManifest::from_pose_store(&store, output_dir, opts);
    let path = output_dir.join(TRANSFORMS_FILE);
    write_json_atomic(&path, &manifest).map_err(|e| TransformError::from_write(&path, e))?;

    let frames = manifest.frames.len();
    info!(
        "wrote {} with {frames} of {} frames ({} convention)",
        path.display(),
        store.poses.len(),
        opts.convention
    );
    Ok(Conversion::Converted { frames })
}
