//! Ingestion -> downscaling -> detection -> calibration -> conversion.

use crate::config::ValidatedConfig;
use crate::downscale::downscale_images;
use crate::error::{InputError, PipelineError};
use crate::ingest::{check_input, copy_images, list_images};
use crate::summary::{DetectionSkip, RunSummary, SkipReason};
use charuco_dataset_calib::CalibrationSolver;
use charuco_dataset_charuco::{CharucoDetector, Detection};
use charuco_dataset_core::GrayImageView;
use charuco_dataset_transforms::{
    convert_pose_store, remove_outputs, write_pose_store, Conversion, PoseStoreError,
    TransformError,
};
use log::{debug, info, warn};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Requests early abort of a running pipeline.
///
/// Checked between images during detection and between stages.
#[derive(Clone, Debug, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Outcome of detection on one frame.
pub type FrameDetection = (String, Result<Detection, SkipReason>);

pub struct Pipeline {
    config: ValidatedConfig,
    detector: CharucoDetector,
    cancel: CancelHandle,
}

impl Pipeline {
    pub fn new(config: ValidatedConfig) -> Self {
        let detector = CharucoDetector::new(config.board.clone(), config.detector.clone());
        Self {
            config,
            detector,
            cancel: CancelHandle::default(),
        }
    }

    pub fn config(&self) -> &ValidatedConfig {
        &self.config
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    fn check_cancelled(&self) -> Result<(), PipelineError> {
        if self.cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        Ok(())
    }

    /// Run every stage and return the summary.
    ///
    /// A calibration failure or a malformed pose store does not fail the run;
    /// both are reported in the summary and no `transforms.json` is written.
    #[cfg_attr(feature = "tracing", instrument(level = "info", skip_all))]
    pub fn run(&self) -> Result<RunSummary, PipelineError> {
        let cfg = &self.config;
        let mut summary = RunSummary::default();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(cfg.workers)
            .build()?;

        let image_dir = cfg.image_dir();
        let frames = if cfg.skip_image_processing {
            list_frames(&image_dir)?
        } else {
            check_input(&cfg.data, &image_dir)?;
            let sources = list_frames(&cfg.data)?;
            copy_images(&sources, &image_dir, &cfg.crop)?
        };
        summary.record_start(frames.len());
        self.check_cancelled()?;

        if !cfg.skip_image_processing {
            let line = pool.install(|| downscale_images(&frames, &image_dir, cfg.num_downscales))?;
            summary.push(line);
            self.check_cancelled()?;
        }

        let results = pool.install(|| self.detect_frames(&frames));
        self.check_cancelled()?;

        let mut detections = Vec::with_capacity(results.len());
        let mut skipped = Vec::new();
        for (image_id, result) in results {
            match result {
                Ok(det) => detections.push(det),
                Err(reason) => {
                    debug!("skipping {image_id}: {reason}");
                    skipped.push(DetectionSkip { image_id, reason });
                }
            }
        }
        info!(
            "board detected in {} of {} images",
            detections.len(),
            frames.len()
        );
        summary.record_skips(skipped);

        // Results of an earlier run describe other frames.
        remove_outputs(&cfg.output_dir)?;

        let solver = CalibrationSolver::new(cfg.solver.clone());
        let calibration = match solver.calibrate(&cfg.board, &detections) {
            Ok(calibration) => calibration,
            Err(e) => {
                warn!("calibration failed: {e}; transform generation skipped");
                summary.record_calibration_failure(e);
                return Ok(summary);
            }
        };
        summary.record_calibration(&calibration.intrinsics, calibration.report);

        write_pose_store(&cfg.output_dir, &calibration.intrinsics, &calibration.poses)?;
        match convert_pose_store(&cfg.output_dir, &cfg.converter) {
            Ok(Conversion::Converted { frames }) => summary.record_estimated(frames),
            Ok(Conversion::Skipped) => summary.push(NO_RESULTS),
            Err(TransformError::Store(e @ PoseStoreError::Malformed { .. })) => {
                warn!("{e}");
                summary.push(NO_RESULTS);
            }
            Err(e) => return Err(e.into()),
        }
        Ok(summary)
    }

    /// Detect the board in every frame on the current rayon pool.
    ///
    /// Results keep the order of `frames`. Frames not yet started when the
    /// run is cancelled are left out.
    pub fn detect_frames(&self, frames: &[PathBuf]) -> Vec<FrameDetection> {
        frames
            .par_iter()
            .filter_map(|path| {
                if self.cancel.is_cancelled() {
                    return None;
                }
                let image_id = file_name(path);
                let result = self.detect_one(&image_id, path);
                Some((image_id, result))
            })
            .collect()
    }

    fn detect_one(&self, image_id: &str, path: &Path) -> Result<Detection, SkipReason> {
        let img = image::open(path)
            .map_err(|e| SkipReason::Unreadable(e.to_string()))?
            .to_luma8();
        let view = GrayImageView {
            width: img.width() as usize,
            height: img.height() as usize,
            data: img.as_raw(),
        };
        self.detector
            .detect(image_id, &view)
            .map_err(SkipReason::Detect)
    }
}

const NO_RESULTS: &str = "Could not find existing ChArUco results, not generating transforms.json";

fn list_frames(dir: &Path) -> Result<Vec<PathBuf>, PipelineError> {
    if !dir.is_dir() {
        return Err(InputError::NoImages(dir.to_path_buf()).into());
    }
    let frames = list_images(dir)?;
    if frames.is_empty() {
        return Err(InputError::NoImages(dir.to_path_buf()).into());
    }
    Ok(frames)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
