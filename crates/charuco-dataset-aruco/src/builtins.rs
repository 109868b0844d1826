//! Embedded built-in dictionaries.
//!
//! The source-of-truth lives in `charuco-dataset-aruco/data/*_CODES.json`
//! (regenerated by `scripts/gen_dictionaries.py`).

#![allow(clippy::unreadable_literal, non_upper_case_globals)]

use crate::Dictionary;

include!(concat!(env!("OUT_DIR"), "/builtins.rs"));

/// Look up an embedded dictionary by name (e.g. `"GEN_4X4_50"`).
pub fn builtin_dictionary(name: &str) -> Option<Dictionary> {
    ALL.iter().copied().find(|d| d.name == name)
}
