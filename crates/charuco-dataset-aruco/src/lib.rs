//! Marker dictionaries and decoding utilities.
//!
//! This crate provides:
//! - embedded dictionaries (compiled into the binary from `data/*.json`),
//! - matching observed marker codes against a dictionary with rotation,
//! - decoding a marker from the image quad of its black outline.
//!
//! It does **not** find quads; the ChArUco detector does that.

pub mod builtins;
mod decode;
mod dictionary;
mod matcher;
mod threshold;

pub use decode::{decode_quad, order_quad, DecodeConfig, MarkerDetection};
pub use dictionary::{Dictionary, DictionaryId, UnknownDictionary};
pub use matcher::{rotate_code_u64, Match, Matcher};
