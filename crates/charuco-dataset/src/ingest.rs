//! Image ingestion: list, rename, optionally crop.

use crate::config::CropRect;
use crate::error::{InputError, PipelineError};
use log::{debug, info};
use std::fs;
use std::path::{Path, PathBuf};

/// Extensions accepted as input images (lowercase).
pub const SUPPORTED_EXTENSIONS: [&str; 6] = ["png", "jpg", "jpeg", "tif", "tiff", "bmp"];

fn image_extension(path: &Path) -> Option<String> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    SUPPORTED_EXTENSIONS
        .contains(&ext.as_str())
        .then_some(ext)
}

/// Supported images directly inside `dir`, sorted by file name.
pub fn list_images(dir: &Path) -> Result<Vec<PathBuf>, PipelineError> {
    let entries = fs::read_dir(dir).map_err(PipelineError::io(dir))?;
    let mut images = Vec::new();
    for entry in entries {
        let path = entry.map_err(PipelineError::io(dir))?.path();
        if path.is_file() && image_extension(&path).is_some() {
            images.push(path);
        }
    }
    images.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(images)
}

/// Output name of the `index`-th frame (0-based): `frame_00001.png`, ...
pub fn frame_name(index: usize, ext: &str) -> String {
    format!("frame_{:05}.{ext}", index + 1)
}

/// Check that `data` is a directory of images (video files are not decoded here).
pub fn check_input(data: &Path, image_dir: &Path) -> Result<(), InputError> {
    if data.is_file() {
        return Err(InputError::VideoInput(data.to_path_buf()));
    }
    if !data.is_dir() {
        return Err(InputError::MissingData(data.to_path_buf()));
    }
    if let (Ok(a), Ok(b)) = (data.canonicalize(), image_dir.canonicalize()) {
        if a == b {
            return Err(InputError::DataIsImageDir(data.to_path_buf()));
        }
    }
    Ok(())
}

/// Empty `dir`, creating it if needed.
pub(crate) fn recreate_dir(dir: &Path) -> Result<(), PipelineError> {
    if dir.exists() {
        fs::remove_dir_all(dir).map_err(PipelineError::io(dir))?;
    }
    fs::create_dir_all(dir).map_err(PipelineError::io(dir))
}

/// Copy `sources` into a fresh `image_dir` as `frame_XXXXX.<ext>`, cropping
/// each one when `crop` is not the identity. Returns the new paths in order.
pub fn copy_images(
    sources: &[PathBuf],
    image_dir: &Path,
    crop: &CropRect,
) -> Result<Vec<PathBuf>, PipelineError> {
    recreate_dir(image_dir)?;

    let mut copied = Vec::with_capacity(sources.len());
    for (idx, src) in sources.iter().enumerate() {
        let ext = image_extension(src).unwrap_or_else(|| "png".to_string());
        let dst = image_dir.join(frame_name(idx, &ext));
        if crop.is_identity() {
            fs::copy(src, &dst).map_err(PipelineError::io(src))?;
        } else {
            let img = image::open(src).map_err(PipelineError::image(src))?;
            let (x, y, w, h) = crop.pixels(img.width(), img.height());
            img.crop_imm(x, y, w, h)
                .save(&dst)
                .map_err(PipelineError::image(&dst))?;
        }
        debug!("{} -> {}", src.display(), dst.display());
        copied.push(dst);
    }
    info!("copied {} images into {}", copied.len(), image_dir.display());
    Ok(copied)
}
