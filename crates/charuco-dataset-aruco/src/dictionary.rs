//! Dictionary metadata and packed marker codes.

use crate::builtins;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A fixed marker dictionary.
#[derive(Clone, Copy, Debug)]
pub struct Dictionary {
    /// Human-readable name (for debugging/logging).
    pub name: &'static str,
    /// Marker side length (number of inner bits per side).
    pub marker_size: usize,
    /// Maximum number of bit errors the dictionary can correct unambiguously.
    pub max_correction_bits: u8,
    /// Minimum rotation-aware Hamming distance between any two codes.
    pub min_distance: u8,
    /// One `u64` per marker id, encoding the inner `marker_size × marker_size` bits.
    ///
    /// Bits are stored in row-major order with **black = 1**.
    pub codes: &'static [u64],
}

impl Dictionary {
    /// Total number of inner bits per marker.
    #[inline]
    pub fn bit_count(&self) -> usize {
        self.marker_size * self.marker_size
    }

    /// Whether inner cell `(x, y)` of marker `id` is black.
    pub fn is_black(&self, id: u32, x: usize, y: usize) -> Option<bool> {
        let code = *self.codes.get(id as usize)?;
        if x >= self.marker_size || y >= self.marker_size {
            return None;
        }
        Some((code >> (y * self.marker_size + x)) & 1 == 1)
    }
}

/// Identifier of an embedded dictionary.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DictionaryId {
    #[serde(rename = "GEN_4X4_50")]
    Gen4x4_50,
    #[serde(rename = "GEN_4X4_100")]
    Gen4x4_100,
    #[serde(rename = "GEN_4X4_250")]
    Gen4x4_250,
    #[serde(rename = "GEN_5X5_100")]
    Gen5x5_100,
    #[serde(rename = "GEN_5X5_250")]
    Gen5x5_250,
    #[serde(rename = "GEN_6X6_250")]
    Gen6x6_250,
    #[serde(rename = "GEN_6X6_1000")]
    Gen6x6_1000,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown marker dictionary {0:?}")]
pub struct UnknownDictionary(pub String);

impl DictionaryId {
    pub const ALL: [DictionaryId; 7] = [
        DictionaryId::Gen4x4_50,
        DictionaryId::Gen4x4_100,
        DictionaryId::Gen4x4_250,
        DictionaryId::Gen5x5_100,
        DictionaryId::Gen5x5_250,
        DictionaryId::Gen6x6_250,
        DictionaryId::Gen6x6_1000,
    ];

    pub fn name(&self) -> &'static str {
        self.dictionary().name
    }

    pub fn dictionary(&self) -> Dictionary {
        match self {
            DictionaryId::Gen4x4_50 => builtins::GEN_4X4_50,
            DictionaryId::Gen4x4_100 => builtins::GEN_4X4_100,
            DictionaryId::Gen4x4_250 => builtins::GEN_4X4_250,
            DictionaryId::Gen5x5_100 => builtins::GEN_5X5_100,
            DictionaryId::Gen5x5_250 => builtins::GEN_5X5_250,
            DictionaryId::Gen6x6_250 => builtins::GEN_6X6_250,
            DictionaryId::Gen6x6_1000 => builtins::GEN_6X6_1000,
        }
    }
}

impl FromStr for DictionaryId {
    type Err = UnknownDictionary;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        DictionaryId::ALL
            .into_iter()
            .find(|id| id.name() == upper)
            .ok_or_else(|| UnknownDictionary(s.to_string()))
    }
}

impl fmt::Display for DictionaryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
