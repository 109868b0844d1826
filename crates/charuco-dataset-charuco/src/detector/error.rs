/// Reasons the detector produced no usable detection for an image.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DetectError {
    #[error("invalid grayscale image buffer ({width}x{height}, {len} bytes)")]
    InvalidImage {
        width: usize,
        height: usize,
        len: usize,
    },
    #[error("no board markers decoded")]
    NoMarkers,
    #[error("marker id {id} decoded more than once")]
    AmbiguousMarkers { id: u32 },
    #[error("only {found} chessboard corners localized, {required} required")]
    TooFewCorners { found: usize, required: usize },
}
