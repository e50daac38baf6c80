//! Bitmap construction from painted overlays
//!
//! Scheduling is synchronous: the painted `image` is moved out of the label
//! and handed to a blocking task, so the label never holds both the painted
//! pixels and the bitmap built from them. Settling awaits the tasks and
//! attaches each bitmap to the overlay it came from.

use tokio::task::JoinHandle;
use tracing::debug;

use crate::labels::{ImageBitmap, Label, LabelClass, OverlayField};

use super::types::BitmapError;

/// A bitmap being built for one overlay of a label
#[derive(Debug)]
pub struct PendingBitmap {
    /// Index into `detections` for collection classes
    child: Option<usize>,
    field: OverlayField,
    task: JoinHandle<Result<ImageBitmap, BitmapError>>,
}

pub struct BitmapCollector;

impl BitmapCollector {
    /// Start bitmap construction for every overlay reachable in `label`.
    ///
    /// Collection classes recurse into each child with the child's class.
    /// Degenerate overlays have their `image` cleared and schedule nothing.
    pub fn schedule(label: &mut Label, class: LabelClass) -> Vec<PendingBitmap> {
        let mut pending = Vec::new();

        if let Some(child_class) = class.child_class() {
            if let Some(children) = label.detections.as_mut() {
                for (index, child) in children.iter_mut().enumerate() {
                    if let Some(field) = child_class.overlay_field() {
                        pending.extend(schedule_overlay(child, field, Some(index)));
                    }
                }
            }
        } else if let Some(field) = class.overlay_field() {
            pending.extend(schedule_overlay(label, field, None));
        }

        pending
    }

    /// Await every pending bitmap of `label`, attaching successes in place
    pub async fn settle(
        label: &mut Label,
        pending: Vec<PendingBitmap>,
    ) -> Vec<Result<ImageBitmap, BitmapError>> {
        let mut results = Vec::with_capacity(pending.len());

        for PendingBitmap { child, field, task } in pending {
            let result = match task.await {
                Ok(result) => result,
                Err(e) => Err(BitmapError::Task(e.to_string())),
            };

            if let Ok(bitmap) = &result {
                let target = match child {
                    Some(index) => label
                        .detections
                        .as_mut()
                        .and_then(|children| children.get_mut(index)),
                    None => Some(&mut *label),
                };
                if let Some(overlay) = target.and_then(|l| l.overlay_mut(field).as_mut()) {
                    overlay.extra.shift_remove("bitmap");
                    overlay.bitmap = Some(bitmap.clone());
                }
            }
            results.push(result);
        }

        results
    }
}

fn schedule_overlay(label: &mut Label, field: OverlayField, child: Option<usize>) -> Option<PendingBitmap> {
    let overlay = label.overlay_mut(field).as_mut()?;

    let Some((width, height)) = overlay.dimensions() else {
        overlay.image = None;
        return None;
    };
    let pixels = overlay.image.take()?;

    debug!("Scheduling {}x{} bitmap for {}", width, height, field.name());
    let task = tokio::task::spawn_blocking(move || build_bitmap(width, height, pixels));

    Some(PendingBitmap { child, field, task })
}

/// Premultiply straight-alpha RGBA pixels into a bitmap
fn build_bitmap(width: u32, height: u32, pixels: Vec<u8>) -> Result<ImageBitmap, BitmapError> {
    let expected = (width as usize)
        .checked_mul(height as usize)
        .and_then(|n| n.checked_mul(4));
    let actual = pixels.len();
    let mismatch = BitmapError::BufferMismatch {
        width,
        height,
        expected: expected.unwrap_or(usize::MAX),
        actual,
    };
    if expected != Some(actual) {
        return Err(mismatch);
    }
    let Some(mut buffer) = image::RgbaImage::from_raw(width, height, pixels) else {
        return Err(mismatch);
    };

    for pixel in buffer.pixels_mut() {
        let alpha = pixel[3] as u16;
        for channel in &mut pixel.0[..3] {
            *channel = ((*channel as u16 * alpha + 127) / 255) as u8;
        }
    }

    Ok(ImageBitmap::new(width, height, buffer.into_raw()))
}
