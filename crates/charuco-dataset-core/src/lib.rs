//! Core types shared by the ChArUco dataset pipeline.
//!
//! This crate is purely geometric: grayscale image views, bilinear sampling,
//! homography estimation, the pinhole + Brown-Conrady camera model, rotation
//! helpers and deterministic noise for synthetic data. It does not decode
//! image files and knows nothing about boards or markers.

mod camera;
mod homography;
mod image;
mod logger;
mod rotation;
pub mod synthetic;

pub use camera::{
    BrownConrady5, CameraIntrinsics, CameraModel, PerspectiveIntrinsics, UnknownCameraModel,
};
pub use homography::{estimate_homography, homography_from_4pt, Homography};
pub use image::{sample_bilinear, GrayImage, GrayImageView};
pub use rotation::{
    is_rotation, matrix_to_rodrigues, orthonormalize_rotation, rodrigues_to_matrix,
};

#[cfg(feature = "tracing")]
pub use logger::init_tracing;

pub use logger::init_with_level;
