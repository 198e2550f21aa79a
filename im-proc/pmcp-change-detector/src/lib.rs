//! Perceptual-hash change detection.
//!
//! The cost-control heart of the perception loop: a cheap 64-bit average
//! hash of the downsampled grayscale frame, compared against the hash of the
//! previous *analyzed* frame (not merely the previous captured frame). The
//! Hamming distance maps onto four change levels which the frame sampler
//! turns into an analyze/skip decision.

use image::imageops::FilterType;
use serde::{Deserialize, Serialize};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("image decode error: {source}")]
    ImageError {
        #[from]
        source: image::ImageError,
    },
}

const HASH_SIDE: u32 = 8;
const HASH_BITS: u32 = HASH_SIDE * HASH_SIDE;

/// 64-bit average hash of one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHash(pub u64);

impl FrameHash {
    /// Hamming distance to another hash, in bits (0..=64).
    pub fn distance(&self, other: &FrameHash) -> u32 {
        (self.0 ^ other.0).count_ones()
    }
}

/// How much the scene changed between two analyzed frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeLevel {
    None,
    Minor,
    Moderate,
    Major,
}

impl ChangeLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeLevel::None => "NONE",
            ChangeLevel::Minor => "MINOR",
            ChangeLevel::Moderate => "MODERATE",
            ChangeLevel::Major => "MAJOR",
        }
    }
}

/// Distance thresholds, inclusive at the lower level.
///
/// A distance exactly equal to `minor` classifies as NONE, exactly equal to
/// `moderate` as MINOR, exactly equal to `major` as MODERATE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thresholds {
    pub minor: u32,
    pub moderate: u32,
    pub major: u32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            minor: 5,
            moderate: 12,
            major: 25,
        }
    }
}

/// Result of comparing one frame against the last analyzed frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeResult {
    pub distance: u32,
    pub level: ChangeLevel,
    pub description: String,
}

/// Compute the average hash of JPEG bytes.
///
/// Decode, grayscale, downsample to 8x8, then threshold each cell against
/// the mean luma. Runs well under the 5 ms budget for 640x480 input.
pub fn hash_jpeg(jpeg: &[u8]) -> Result<FrameHash> {
    let img = image::load_from_memory_with_format(jpeg, image::ImageFormat::Jpeg)?;
    let small = img
        .resize_exact(HASH_SIDE, HASH_SIDE, FilterType::Triangle)
        .to_luma8();
    Ok(hash_luma_cells(small.as_raw()))
}

/// Hash 64 pre-downsampled luma cells (row-major 8x8).
pub fn hash_luma_cells(cells: &[u8]) -> FrameHash {
    debug_assert_eq!(cells.len(), HASH_BITS as usize);
    let sum: u32 = cells.iter().map(|&v| v as u32).sum();
    let mean = sum / HASH_BITS;
    let mut bits = 0u64;
    for (i, &v) in cells.iter().enumerate() {
        if (v as u32) > mean {
            bits |= 1 << i;
        }
    }
    FrameHash(bits)
}

/// Classify a distance against thresholds.
pub fn classify(distance: u32, thresholds: &Thresholds) -> ChangeLevel {
    if distance <= thresholds.minor {
        ChangeLevel::None
    } else if distance <= thresholds.moderate {
        ChangeLevel::Minor
    } else if distance <= thresholds.major {
        ChangeLevel::Moderate
    } else {
        ChangeLevel::Major
    }
}

fn describe(level: ChangeLevel, distance: u32) -> String {
    match level {
        ChangeLevel::None => format!("no visible change (distance {distance})"),
        ChangeLevel::Minor => format!("minor change (distance {distance})"),
        ChangeLevel::Moderate => format!("moderate scene change (distance {distance})"),
        ChangeLevel::Major => format!("major scene change (distance {distance})"),
    }
}

/// Per-camera detector holding the hash of the last analyzed frame.
///
/// `assess` is read-only; the perception loop calls `commit` only for frames
/// that actually went to analysis, so a long run of skipped frames still
/// compares against the last frame the VLM saw.
#[derive(Debug, Clone)]
pub struct ChangeDetector {
    thresholds: Thresholds,
    last_analyzed: Option<FrameHash>,
}

impl ChangeDetector {
    pub fn new(thresholds: Thresholds) -> Self {
        Self {
            thresholds,
            last_analyzed: None,
        }
    }

    /// Compare `jpeg` to the last analyzed frame.
    ///
    /// With no prior analyzed frame, everything is new: the result is MAJOR
    /// at maximum distance so the first frame always passes the gate.
    pub fn assess(&self, jpeg: &[u8]) -> Result<(FrameHash, ChangeResult)> {
        let hash = hash_jpeg(jpeg)?;
        let result = match &self.last_analyzed {
            Some(prev) => {
                let distance = prev.distance(&hash);
                let level = classify(distance, &self.thresholds);
                ChangeResult {
                    distance,
                    level,
                    description: describe(level, distance),
                }
            }
            None => ChangeResult {
                distance: HASH_BITS,
                level: ChangeLevel::Major,
                description: "initial frame".to_string(),
            },
        };
        Ok((hash, result))
    }

    /// Record `hash` as the last analyzed frame.
    pub fn commit(&mut self, hash: FrameHash) {
        self.last_analyzed = Some(hash);
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }
}
