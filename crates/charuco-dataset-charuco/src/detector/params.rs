use charuco_dataset_aruco::DecodeConfig;
use serde::{Deserialize, Serialize};

/// Configuration for the ChArUco detector.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorParams {
    /// Adaptive threshold window (odd, pixels). `None` picks one from the image size.
    pub threshold_window: Option<usize>,
    /// A pixel is dark when it is this many gray levels below its window mean.
    pub threshold_offset: f64,
    /// Minimum side length of a marker candidate, in pixels.
    pub min_marker_side_px: f64,
    /// Maximum side length of a marker candidate as a fraction of the larger image side.
    pub max_marker_side_frac: f64,
    /// Candidates closer than this to the image border are discarded.
    pub border_margin_px: f64,
    /// Marker decoding parameters.
    pub decode: DecodeConfig,
    /// A marker whose corners deviate from the board homography by more than this
    /// fraction of its side length is dropped.
    pub marker_outlier_frac: f64,
    /// Upper bound for the corner refinement half-window, in pixels.
    pub corner_max_window_px: f64,
    /// Maximum corner refinement iterations.
    pub corner_max_iters: usize,
    /// A refined corner may move at most this fraction of the local square size.
    pub corner_max_shift_frac: f64,
    /// Minimum gray-level gap between the white and black quadrants around a corner.
    pub corner_min_contrast: f64,
    /// Minimum number of localized chessboard corners for a usable detection.
    pub min_corners: usize,
}

impl Default for DetectorParams {
    fn default() -> Self {
        Self {
            threshold_window: None,
            threshold_offset: 7.0,
            min_marker_side_px: 10.0,
            max_marker_side_frac: 0.5,
            border_margin_px: 2.0,
            decode: DecodeConfig::default(),
            marker_outlier_frac: 0.5,
            corner_max_window_px: 10.0,
            corner_max_iters: 40,
            corner_max_shift_frac: 0.25,
            corner_min_contrast: 30.0,
            min_corners: 4,
        }
    }
}

impl DetectorParams {
    /// Threshold window for an image of the given size.
    pub fn window_for(&self, width: usize, height: usize) -> usize {
        let w = self
            .threshold_window
            .unwrap_or_else(|| (width.min(height) as f64 / 24.0).round() as usize);
        w.clamp(3, 101) | 1
    }
}
