//! ChArUco capture to NeRF-style dataset.
//!
//! A run copies the capture into `<output>/images`, writes downscaled copies,
//! detects the ChArUco board in every frame, calibrates the camera from the
//! detections and exports `camera.json`, `poses.json` and `transforms.json`.
//!
//! ## Quickstart
//!
//! ```no_run
//! use charuco_dataset::{Pipeline, ProcessConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut cfg = ProcessConfig::default();
//! cfg.data = "capture/".into();
//! cfg.output_dir = "dataset/".into();
//!
//! let summary = Pipeline::new(cfg.validate()?).run()?;
//! print!("{summary}");
//! # Ok(())
//! # }
//! ```
//!
//! ## API map
//! - `charuco_dataset::core`: image views, homographies, camera models.
//! - `charuco_dataset::aruco`: marker dictionaries and decoding.
//! - `charuco_dataset::charuco`: board model, detector, synthetic renderer.
//! - `charuco_dataset::calib`: calibration solver.
//! - `charuco_dataset::transforms`: pose store and `transforms.json`.

pub use charuco_dataset_aruco as aruco;
pub use charuco_dataset_calib as calib;
pub use charuco_dataset_charuco as charuco;
pub use charuco_dataset_core as core;
pub use charuco_dataset_transforms as transforms;

mod config;
mod downscale;
mod error;
mod ingest;
mod pipeline;
mod summary;

pub use config::{ConfigIoError, CropRect, ProcessConfig, ValidatedConfig};
pub use downscale::{downscale_dir, downscale_images};
pub use error::{InputError, PipelineError};
pub use ingest::{copy_images, frame_name, list_images, SUPPORTED_EXTENSIONS};
pub use pipeline::{CancelHandle, FrameDetection, Pipeline};
pub use summary::{DetectionSkip, RunSummary, SkipReason};
