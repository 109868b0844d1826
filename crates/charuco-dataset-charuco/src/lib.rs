//! ChArUco board model, detector and synthetic renderer.
//!
//! ## Quickstart
//!
//! ```no_run
//! use charuco_dataset_aruco::DictionaryId;
//! use charuco_dataset_charuco::{BoardSpec, CharucoBoard, CharucoDetector, DetectorParams};
//! use charuco_dataset_core::GrayImageView;
//!
//! let board = CharucoBoard::new(BoardSpec {
//!     squares_x: 7,
//!     squares_y: 5,
//!     square_length: 0.04,
//!     marker_length: 0.03,
//!     dictionary: DictionaryId::Gen4x4_50,
//! })?;
//! let detector = CharucoDetector::new(board, DetectorParams::default());
//!
//! let pixels = vec![0u8; 640 * 480];
//! let view = GrayImageView { width: 640, height: 480, data: &pixels };
//! match detector.detect("frame_00001.png", &view) {
//!     Ok(det) => println!("{} corners", det.corner_count()),
//!     Err(e) => println!("skipped: {e}"),
//! }
//! # Ok::<(), charuco_dataset_charuco::BoardError>(())
//! ```

mod board;
mod detector;
pub mod render;

pub use board::{BoardError, BoardSpec, CharucoBoard};
pub use detector::{CharucoDetector, Correspondence, DetectError, Detection, DetectorParams};
pub use render::{render_view, RenderOptions};
