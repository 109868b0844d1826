//! Run configuration.
//!
//! [`ProcessConfig`] is the serde-facing form (every field has a default, so a
//! JSON file only needs the keys it changes). [`ProcessConfig::validate`]
//! checks it once and produces an immutable [`ValidatedConfig`].

use crate::error::InputError;
use charuco_dataset_aruco::DictionaryId;
use charuco_dataset_calib::SolverOptions;
use charuco_dataset_charuco::{BoardSpec, CharucoBoard, DetectorParams};
use charuco_dataset_core::CameraModel;
use charuco_dataset_transforms::ConverterOptions;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(thiserror::Error, Debug)]
pub enum ConfigIoError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Processing options as read from JSON or the command line.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessConfig {
    /// Directory of input images.
    pub data: PathBuf,
    pub output_dir: PathBuf,
    pub camera_type: String,
    /// Number of 2x downscaling levels (3 gives `images_2`, `images_4`, `images_8`).
    pub num_downscales: u32,
    /// Reuse `<output_dir>/images` as is: no copying, cropping or downscaling.
    pub skip_image_processing: bool,
    /// Fractions cropped from `(top, bottom, left, right)`.
    pub crop_factor: [f64; 4],
    /// Shorthand for `crop_factor = (0, crop_bottom, 0, 0)` when positive.
    pub crop_bottom: f64,
    pub board: BoardSpec,
    pub detector: DetectorParams,
    pub solver: SolverOptions,
    pub converter: ConverterOptions,
    /// Detection threads; 0 lets rayon decide.
    pub workers: usize,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            data: PathBuf::new(),
            output_dir: PathBuf::new(),
            camera_type: CameraModel::default().name().to_string(),
            num_downscales: 3,
            skip_image_processing: false,
            crop_factor: [0.0; 4],
            crop_bottom: 0.0,
            board: BoardSpec {
                squares_x: 7,
                squares_y: 5,
                square_length: 0.04,
                marker_length: 0.03,
                dictionary: DictionaryId::Gen4x4_50,
            },
            detector: DetectorParams::default(),
            solver: SolverOptions::default(),
            converter: ConverterOptions::default(),
            workers: 0,
        }
    }
}

impl ProcessConfig {
    /// Load a JSON config from disk.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, ConfigIoError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Write this config to disk as pretty JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), ConfigIoError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Check every option and build the validated form.
    pub fn validate(&self) -> Result<ValidatedConfig, InputError> {
        let camera_model = self
            .camera_type
            .parse::<CameraModel>()
            .map_err(|_| InputError::UnsupportedCameraType(self.camera_type.clone()))?;

        let crop = CropRect::from_factors(self.crop_factor, self.crop_bottom)?;
        let board = CharucoBoard::new(self.board)?;

        if self.output_dir.as_os_str().is_empty() {
            return Err(InputError::MissingOutputDir);
        }

        Ok(ValidatedConfig {
            data: self.data.clone(),
            output_dir: self.output_dir.clone(),
            camera_model,
            num_downscales: self.num_downscales,
            skip_image_processing: self.skip_image_processing,
            crop,
            board,
            detector: self.detector.clone(),
            solver: self.solver.clone(),
            converter: self.converter.clone(),
            workers: self.workers,
        })
    }
}

/// Checked run configuration. Built only through [`ProcessConfig::validate`].
#[derive(Clone, Debug)]
pub struct ValidatedConfig {
    pub data: PathBuf,
    pub output_dir: PathBuf,
    pub camera_model: CameraModel,
    pub num_downscales: u32,
    pub skip_image_processing: bool,
    pub crop: CropRect,
    pub board: CharucoBoard,
    pub detector: DetectorParams,
    pub solver: SolverOptions,
    pub converter: ConverterOptions,
    pub workers: usize,
}

impl ValidatedConfig {
    /// Full-resolution frames live here.
    pub fn image_dir(&self) -> PathBuf {
        self.output_dir.join(&self.converter.images_dir)
    }
}

/// Crop fractions, each in `[0, 1)`, leaving a non-empty image.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CropRect {
    pub top: f64,
    pub bottom: f64,
    pub left: f64,
    pub right: f64,
}

impl CropRect {
    /// Normalize `(top, bottom, left, right)` and the `crop_bottom` shorthand.
    pub fn from_factors(factors: [f64; 4], crop_bottom: f64) -> Result<Self, InputError> {
        if !(0.0..1.0).contains(&crop_bottom) {
            return Err(InputError::CropOutOfRange {
                name: "crop_bottom",
                value: crop_bottom,
            });
        }
        let [top, bottom, left, right] = if crop_bottom > 0.0 {
            [0.0, crop_bottom, 0.0, 0.0]
        } else {
            factors
        };

        for (name, value) in [
            ("top", top),
            ("bottom", bottom),
            ("left", left),
            ("right", right),
        ] {
            if !(0.0..1.0).contains(&value) {
                return Err(InputError::CropOutOfRange { name, value });
            }
        }
        if top + bottom >= 1.0 || left + right >= 1.0 {
            return Err(InputError::EmptyCrop);
        }
        Ok(Self {
            top,
            bottom,
            left,
            right,
        })
    }

    pub fn is_identity(&self) -> bool {
        self.top == 0.0 && self.bottom == 0.0 && self.left == 0.0 && self.right == 0.0
    }

    /// Pixel rectangle `(x, y, width, height)` kept from a `width x height` image.
    ///
    /// Never empty: at least one pixel survives along each axis.
    pub fn pixels(&self, width: u32, height: u32) -> (u32, u32, u32, u32) {
        let cut = |frac: f64, len: u32| (frac * len as f64).round() as u32;
        let x0 = cut(self.left, width).min(width.saturating_sub(1));
        let y0 = cut(self.top, height).min(height.saturating_sub(1));
        let x1 = width.saturating_sub(cut(self.right, width)).max(x0 + 1);
        let y1 = height.saturating_sub(cut(self.bottom, height)).max(y0 + 1);
        (x0, y0, x1 - x0, y1 - y0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg: ProcessConfig = serde_json::from_str(
            r#"{ "data": "capture", "output_dir": "out", "num_downscales": 1 }"#,
        )
        .unwrap();
        assert_eq!(cfg.num_downscales, 1);
        assert_eq!(cfg.camera_type, "perspective");
        assert_eq!(cfg.board.squares_x, 7);
        assert_eq!(cfg.solver.min_frames, 5);

        let valid = cfg.validate().unwrap();
        assert!(valid.crop.is_identity());
        assert_eq!(valid.image_dir(), PathBuf::from("out/images"));
    }

    #[test]
    fn unsupported_camera_type_is_rejected() {
        let cfg = ProcessConfig {
            output_dir: "out".into(),
            camera_type: "fisheye".into(),
            ..ProcessConfig::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(InputError::UnsupportedCameraType(name)) if name == "fisheye"
        ));
    }

    #[test]
    fn crop_bottom_overrides_crop_factor() {
        let crop = CropRect::from_factors([0.1, 0.1, 0.1, 0.1], 0.25).unwrap();
        assert_eq!(
            crop,
            CropRect {
                top: 0.0,
                bottom: 0.25,
                left: 0.0,
                right: 0.0
            }
        );
        assert_eq!(crop.pixels(640, 480), (0, 0, 640, 360));
    }

    #[test]
    fn crop_ranges_are_checked() {
        assert!(matches!(
            CropRect::from_factors([0.0; 4], 1.0),
            Err(InputError::CropOutOfRange {
                name: "crop_bottom",
                ..
            })
        ));
        assert!(matches!(
            CropRect::from_factors([-0.1, 0.0, 0.0, 0.0], 0.0),
            Err(InputError::CropOutOfRange { name: "top", .. })
        ));
        assert!(matches!(
            CropRect::from_factors([0.0, 0.0, 0.6, 0.5], 0.0),
            Err(InputError::EmptyCrop)
        ));
    }

    #[test]
    fn crop_pixels_cover_all_sides() {
        let crop = CropRect::from_factors([0.1, 0.2, 0.25, 0.05], 0.0).unwrap();
        assert_eq!(crop.pixels(200, 100), (50, 10, 140, 70));
    }

    #[test]
    fn invalid_board_is_rejected() {
        let mut cfg = ProcessConfig {
            output_dir: "out".into(),
            ..ProcessConfig::default()
        };
        cfg.board.marker_length = 0.05;
        assert!(matches!(cfg.validate(), Err(InputError::Board(_))));
    }
}
