//! Multi-resolution copies of the frame images (`images_2`, `images_4`, ...).

use crate::error::PipelineError;
use crate::ingest::recreate_dir;
use image::imageops::FilterType;
use log::info;
use rayon::prelude::*;
use std::path::{Path, PathBuf};

/// Directory holding the `factor`x downscaled copies next to `image_dir`.
pub fn downscale_dir(image_dir: &Path, factor: u32) -> PathBuf {
    let name = image_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "images".to_string());
    image_dir.with_file_name(format!("{name}_{factor}"))
}

/// Write `levels` downscaled copies of every frame, halving the size each level.
///
/// Returns the summary line.
pub fn downscale_images(
    frames: &[PathBuf],
    image_dir: &Path,
    levels: u32,
) -> Result<String, PipelineError> {
    if levels == 0 {
        return Ok("No downscaling performed.".to_string());
    }

    let factors: Vec<u32> = (1..=levels).map(|i| 1u32 << i).collect();
    for &factor in &factors {
        let dir = downscale_dir(image_dir, factor);
        recreate_dir(&dir)?;
        frames
            .par_iter()
            .try_for_each(|src| downscale_one(src, &dir, factor))?;
        info!("wrote {} images into {}", frames.len(), dir.display());
    }
    Ok(summary_line(&factors))
}

fn downscale_one(src: &Path, dir: &Path, factor: u32) -> Result<(), PipelineError> {
    let img = image::open(src).map_err(PipelineError::image(src))?;
    let w = (img.width() / factor).max(1);
    let h = (img.height() / factor).max(1);
    let dst = dir.join(src.file_name().unwrap_or(src.as_os_str()));
    img.resize_exact(w, h, FilterType::Triangle)
        .save(&dst)
        .map_err(PipelineError::image(&dst))
}

fn summary_line(factors: &[u32]) -> String {
    let text: Vec<String> = factors.iter().map(|f| format!("{f}x")).collect();
    let joined = match text.split_last() {
        Some((last, [])) => last.clone(),
        Some((last, rest)) => format!("{} and {last}", rest.join(", ")),
        None => String::new(),
    };
    format!("We downsampled the images by {joined}")
}
