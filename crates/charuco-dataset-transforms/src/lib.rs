//! Pose store persistence and `transforms.json` export.
//!
//! The calibration result is stored as two JSON documents in the output
//! directory, `camera.json` (shared intrinsics) and `poses.json`
//! (world-to-camera pose per image). [`convert_pose_store`] turns them into a
//! trainer manifest with camera-to-world matrices.

mod atomic;
mod convention;
mod store;
mod transforms;

pub use convention::{to_rows, Convention, ConventionRemap, UnknownConvention};
pub use store::{
    read_pose_store, remove_pose_store, write_pose_store, PoseStore, PoseStoreError, CAMERA_FILE,
    POSES_FILE, STORE_VERSION,
};
pub use transforms::{
    convert_pose_store, remove_outputs, Conversion, ConverterOptions, ManifestFrame,
    TransformError, TransformManifest, TRANSFORMS_FILE,
};
