use charuco_dataset_charuco::BoardError;
use charuco_dataset_transforms::{PoseStoreError, TransformError};
use std::io;
use std::path::PathBuf;

/// Problems with the configuration or the input data. Always fatal.
#[derive(thiserror::Error, Debug)]
pub enum InputError {
    #[error("camera_type '{0}' not supported for ChArUco board")]
    UnsupportedCameraType(String),
    #[error("crop {name} must be in [0, 1) (got {value})")]
    CropOutOfRange { name: &'static str, value: f64 },
    #[error("crop factors leave an empty image")]
    EmptyCrop,
    #[error(transparent)]
    Board(#[from] BoardError),
    #[error("output_dir is not set")]
    MissingOutputDir,
    #[error("data path '{}' must be a directory of images", .0.display())]
    MissingData(PathBuf),
    #[error("'{}' is a video file; extract its frames into a directory first", .0.display())]
    VideoInput(PathBuf),
    #[error("data path '{}' is the output image directory", .0.display())]
    DataIsImageDir(PathBuf),
    #[error("no usable images in '{}'", .0.display())]
    NoImages(PathBuf),
}

/// Errors that stop a pipeline run.
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Input(#[from] InputError),
    #[error("i/o error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("image error on {}: {source}", path.display())]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error(transparent)]
    Store(#[from] PoseStoreError),
    #[error(transparent)]
    Transform(#[from] TransformError),
    #[error(transparent)]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    #[error("run cancelled")]
    Cancelled,
}

impl PipelineError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> Self {
        let path = path.into();
        move |source| Self::Io { path, source }
    }

    pub(crate) fn image(path: impl Into<PathBuf>) -> impl FnOnce(image::ImageError) -> Self {
        let path = path.into();
        move |source| Self::Image { path, source }
    }
}
