//! Overlay stage error definitions and failure diagnostics

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::labels::LabelClass;

/// Errors that can occur while decoding a mask payload
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Fetch failed: {0}")]
    Fetch(#[from] reqwest::Error),

    #[error("Invalid fetch URL: {0}")]
    InvalidUrl(String),

    #[error("Failed to decode mask image: {0}")]
    Image(#[from] image::ImageError),

    #[error("Mask payload too large: {size} bytes (max: {max})")]
    PayloadTooLarge { size: u64, max: u64 },

    #[error("Mask shape {shape:?} {reason}")]
    ShapeMismatch { shape: Vec<u32>, reason: &'static str },

    #[error("Decode task failed: {0}")]
    Task(String),
}

/// Errors that can occur while painting an overlay
#[derive(Debug, Error)]
pub enum PaintError {
    #[error("Mask buffer has {actual} bytes, shape requires {expected}")]
    BufferMismatch { expected: usize, actual: usize },

    #[error("Paint target has {actual} bytes, shape requires {expected}")]
    TargetMismatch { expected: usize, actual: usize },

    #[error("Mask shape {0:?} cannot be painted")]
    InvalidShape(Vec<u32>),
}

/// Errors that can occur while building a bitmap
#[derive(Debug, Error)]
pub enum BitmapError {
    #[error("Painted buffer has {actual} bytes, {width}x{height} RGBA requires {expected}")]
    BufferMismatch {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },

    #[error("Bitmap task failed: {0}")]
    Task(String),
}

/// Any per-label stage failure
#[derive(Debug, Error)]
pub enum OverlayError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Paint(#[from] PaintError),

    #[error(transparent)]
    Bitmap(#[from] BitmapError),
}

impl OverlayError {
    pub fn stage(&self) -> Stage {
        match self {
            OverlayError::Decode(_) => Stage::Decode,
            OverlayError::Paint(_) => Stage::Paint,
            OverlayError::Bitmap(_) => Stage::Bitmap,
        }
    }
}

/// Per-label pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Decode,
    Paint,
    Bitmap,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Decode => "decode",
            Stage::Paint => "paint",
            Stage::Bitmap => "bitmap",
        }
    }
}

/// A stage failure surfaced to the caller as a partial-result diagnostic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageFailure {
    pub path: String,
    pub class: String,
    pub stage: Stage,
    pub message: String,
}

impl StageFailure {
    pub fn new(path: &str, class: LabelClass, error: &OverlayError) -> Self {
        Self {
            path: path.to_string(),
            class: class.name().to_string(),
            stage: error.stage(),
            message: error.to_string(),
        }
    }
}
