//! ChArUco detection pipeline.
//!
//! Markers are found first (adaptive threshold, quad fitting, decoding), then
//! each inner chessboard corner next to a decoded marker is predicted from the
//! marker outlines and refined to sub-pixel accuracy.

mod corners;
mod error;
mod params;
mod pipeline;
mod quads;
mod result;

pub use error::DetectError;
pub use params::DetectorParams;
pub use pipeline::CharucoDetector;
pub use result::{Correspondence, Detection};
