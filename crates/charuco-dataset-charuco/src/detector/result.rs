use charuco_dataset_aruco::MarkerDetection;
use nalgebra::{Point2, Point3};
use serde::{Deserialize, Serialize};

/// One chessboard corner matched between the board and the image.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Correspondence {
    /// ChArUco corner id.
    pub id: u32,
    /// Board-frame position (Z = 0).
    pub board: Point3<f64>,
    /// Sub-pixel image position.
    pub image: Point2<f64>,
}

/// Board observations in one image.
///
/// Correspondences are sorted by corner id with no duplicates.
#[derive(Clone, Debug)]
pub struct Detection {
    pub image_id: String,
    pub width: usize,
    pub height: usize,
    pub correspondences: Vec<Correspondence>,
    /// Decoded board markers that survived the consistency check.
    pub markers: Vec<MarkerDetection>,
}

impl Detection {
    #[inline]
    pub fn corner_count(&self) -> usize {
        self.correspondences.len()
    }

    pub fn board_points(&self) -> Vec<Point3<f64>> {
        self.correspondences.iter().map(|c| c.board).collect()
    }

    pub fn image_points(&self) -> Vec<Point2<f64>> {
        self.correspondences.iter().map(|c| c.image).collect()
    }
}
