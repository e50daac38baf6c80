//! Test Utilities Module
//!
//! Provides helper functions and fixtures for testing the dense label worker.
//! This module is only compiled when running tests.

#![cfg(test)]

use flate2::Compression;
use flate2::write::ZlibEncoder;
use image::{ImageBuffer, ImageFormat, Luma};
use serde_json::Value;
use std::collections::HashMap;
use std::io::{Cursor, Write};

use crate::labels::{Label, LabelClass};

// ============================================================================
// Label Fixtures
// ============================================================================

/// Schema stand-in mapping dotted paths straight to classes
pub fn flat_resolver(fields: &[(&str, LabelClass)]) -> HashMap<String, LabelClass> {
    fields
        .iter()
        .map(|(path, class)| (path.to_string(), *class))
        .collect()
}

/// Build a label from its JSON form
pub fn label_from(value: Value) -> Label {
    serde_json::from_value(value).expect("Invalid test label")
}

// ============================================================================
// Mask Payloads
// ============================================================================

/// Encode 8-bit grayscale pixels as a PNG
pub fn encode_png_gray(width: u32, height: u32, pixels: &[u8]) -> Vec<u8> {
    let image: ImageBuffer<Luma<u8>, Vec<u8>> =
        ImageBuffer::from_raw(width, height, pixels.to_vec()).expect("Pixel count mismatch");
    let mut encoded = Cursor::new(Vec::new());
    image
        .write_to(&mut encoded, ImageFormat::Png)
        .expect("Failed to encode PNG");
    encoded.into_inner()
}

/// Encode 16-bit grayscale pixels as a PNG
pub fn encode_png_gray16(width: u32, height: u32, pixels: &[u16]) -> Vec<u8> {
    let image: ImageBuffer<Luma<u16>, Vec<u16>> =
        ImageBuffer::from_raw(width, height, pixels.to_vec()).expect("Pixel count mismatch");
    let mut encoded = Cursor::new(Vec::new());
    image
        .write_to(&mut encoded, ImageFormat::Png)
        .expect("Failed to encode PNG");
    encoded.into_inner()
}

/// zlib-compress a buffer
pub fn zlib(bytes: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes).expect("Failed to compress");
    encoder.finish().expect("Failed to compress")
}

// ============================================================================
// Logging Configuration
// ============================================================================

/// Initialize test logging with detailed output
pub fn init_test_logging() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dense_label_worker=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

// ============================================================================
// Tests for Test Utilities
// ============================================================================
