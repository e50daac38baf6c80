//! Per-class painters
//!
//! A painter writes straight-alpha RGBA pixels into the overlay's `image`
//! target that the decoder allocated. Labels without decoded data or without
//! a target are left as they are.

use std::collections::HashMap;

use crate::labels::{ArrayType, Label, Overlay, OverlayData};

use super::color::{ColorContext, Rgba};
use super::types::PaintError;

/// Paints one label's overlay
pub trait Painter: Send + Sync {
    fn paint(&self, label: &mut Label, path: &str, colors: &ColorContext) -> Result<(), PaintError>;
}

/// Typed read access to a decoded mask buffer
struct MaskView<'a> {
    bytes: &'a [u8],
    array_type: ArrayType,
    channels: usize,
}

impl<'a> MaskView<'a> {
    fn new(data: &'a OverlayData) -> Result<Option<Self>, PaintError> {
        let Some(buffer) = data.buffer.as_ref() else {
            return Ok(None);
        };

        let expected = match data.expected_len() {
            Some(len) if data.channels() > 0 => len,
            _ => return Err(PaintError::InvalidShape(data.shape.clone())),
        };
        if buffer.len() != expected {
            return Err(PaintError::BufferMismatch {
                expected,
                actual: buffer.len(),
            });
        }

        Ok(Some(Self {
            bytes: &buffer.bytes,
            array_type: data.array_type,
            channels: data.channels() as usize,
        }))
    }

    /// First-channel value of `pixel`
    fn value(&self, pixel: usize) -> f64 {
        let i = pixel * self.channels;
        match self.array_type {
            ArrayType::Uint8 => self.bytes[i] as f64,
            ArrayType::Uint16 => u16::from_le_bytes([self.bytes[i * 2], self.bytes[i * 2 + 1]]) as f64,
            ArrayType::Float32 => {
                let o = i * 4;
                f32::from_le_bytes([
                    self.bytes[o],
                    self.bytes[o + 1],
                    self.bytes[o + 2],
                    self.bytes[o + 3],
                ]) as f64
            }
        }
    }

    /// RGB of `pixel` for three-channel uint8 masks
    fn rgb(&self, pixel: usize) -> [u8; 3] {
        let i = pixel * self.channels;
        [self.bytes[i], self.bytes[i + 1], self.bytes[i + 2]]
    }
}

/// Write `color_at(mask, pixel)` into every pixel of the overlay's target
/// where it yields a color
fn paint_overlay(
    overlay: Option<&mut Overlay>,
    mut color_at: impl FnMut(&MaskView<'_>, usize) -> Option<Rgba>,
) -> Result<(), PaintError> {
    let Some(Overlay {
        data: Some(data),
        image: Some(image),
        ..
    }) = overlay
    else {
        return Ok(());
    };
    if data.is_degenerate() {
        return Ok(());
    }
    let Some(mask) = MaskView::new(data)? else {
        return Ok(());
    };

    let expected = data
        .target_len()
        .ok_or_else(|| PaintError::InvalidShape(data.shape.clone()))?;
    if image.len() != expected {
        return Err(PaintError::TargetMismatch {
            expected,
            actual: image.len(),
        });
    }

    for (pixel, out) in image.chunks_exact_mut(4).enumerate() {
        if let Some(color) = color_at(&mask, pixel) {
            out.copy_from_slice(&color);
        }
    }
    Ok(())
}

/// Instance mask: every non-zero pixel gets the label's color
pub struct DetectionPainter;

impl Painter for DetectionPainter {
    fn paint(&self, label: &mut Label, path: &str, colors: &ColorContext) -> Result<(), PaintError> {
        let color = colors.label_color(path, label);
        paint_overlay(label.mask.as_mut(), |mask, pixel| {
            (mask.value(pixel) != 0.0).then_some(color)
        })
    }
}

/// Paints every child detection; the first failure is reported after all
/// children have been attempted
pub struct DetectionsPainter;

impl Painter for DetectionsPainter {
    fn paint(&self, label: &mut Label, path: &str, colors: &ColorContext) -> Result<(), PaintError> {
        let Some(children) = label.detections.as_mut() else {
            return Ok(());
        };

        let mut first_error = None;
        for child in children.iter_mut() {
            if let Err(e) = DetectionPainter.paint(child, path, colors) {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

/// Semantic mask: RGB passes through, integer targets are color-mapped
pub struct SegmentationPainter;

impl Painter for SegmentationPainter {
    fn paint(&self, label: &mut Label, path: &str, colors: &ColorContext) -> Result<(), PaintError> {
        let rgb = label
            .mask
            .as_ref()
            .and_then(|mask| mask.data.as_ref())
            .is_some_and(|data| data.channels() >= 3 && data.array_type == ArrayType::Uint8);

        if rgb {
            return paint_overlay(label.mask.as_mut(), |mask, pixel| {
                let [r, g, b] = mask.rgb(pixel);
                Some([r, g, b, 255])
            });
        }

        let mut cache: HashMap<u32, Rgba> = HashMap::new();
        paint_overlay(label.mask.as_mut(), |mask, pixel| {
            let target = mask.value(pixel);
            if target <= 0.0 {
                return None;
            }
            let target = target as u32;
            Some(
                *cache
                    .entry(target)
                    .or_insert_with(|| colors.mask_target_color(path, target)),
            )
        })
    }
}

/// Scalar map: values are normalized into the label's range and colored by
/// the field's color scale, or by field color with proportional alpha
pub struct HeatmapPainter;

impl Painter for HeatmapPainter {
    fn paint(&self, label: &mut Label, path: &str, colors: &ColorContext) -> Result<(), PaintError> {
        let Some(array_type) = label
            .map
            .as_ref()
            .and_then(|map| map.data.as_ref())
            .map(|data| data.array_type)
        else {
            return Ok(());
        };

        let [min, max] = label.range.unwrap_or(match array_type {
            ArrayType::Float32 => [0.0, 1.0],
            ArrayType::Uint8 | ArrayType::Uint16 => [0.0, 255.0],
        });
        let span = max - min;
        let lut = colors.colorscale(path);
        let [r, g, b, _] = colors.field_color(path);

        paint_overlay(label.map.as_mut(), |map, pixel| {
            let value = map.value(pixel);
            if value <= min || value.is_nan() {
                return None;
            }
            let t = if span > 0.0 {
                ((value - min) / span).clamp(0.0, 1.0)
            } else {
                1.0
            };
            match &lut {
                Some(lut) => Some(lut[(t * 255.0).round() as usize]),
                None => Some([r, g, b, (t * 255.0).round() as u8]),
            }
        })
    }
}

/// Painter for classes without an overlay
pub struct NoopPainter;

impl Painter for NoopPainter {
    fn paint(&self, _label: &mut Label, _path: &str, _colors: &ColorContext) -> Result<(), PaintError> {
        Ok(())
    }
}
