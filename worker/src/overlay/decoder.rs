//! Overlay decoding: turns on-disk or inline mask payloads into pixel buffers

use async_trait::async_trait;
use bytes::Bytes;
use flate2::read::ZlibDecoder;
use futures_util::future::join_all;
use image::DynamicImage;
use std::io::Read;
use tracing::debug;

use crate::config::DecodeConfig;
use crate::labels::{ArrayType, Label, LabelClass, Overlay, OverlayData, OverlayField, TransferBuffer};

use super::fetch::FetchConfig;
use super::types::DecodeError;

/// Where a label sits and how its mask should be located
#[derive(Debug, Clone, Copy)]
pub struct DecodeTarget<'a> {
    /// Dotted field path of the label
    pub path: &'a str,
    /// Per-request mask location override for this field
    pub source: Option<&'a str>,
    pub fetch: &'a FetchConfig,
}

/// Result of decoding one label.
///
/// Collection labels decode each child independently, so a single label can
/// yield buffers and errors at the same time.
#[derive(Debug, Default)]
pub struct DecodeOutcome {
    /// Mask buffers now held by the label, to be transferred to the caller
    pub buffers: Vec<TransferBuffer>,
    pub errors: Vec<DecodeError>,
}

impl DecodeOutcome {
    fn record(&mut self, result: Result<Option<TransferBuffer>, DecodeError>) {
        match result {
            Ok(Some(buffer)) => self.buffers.push(buffer),
            Ok(None) => {}
            Err(e) => self.errors.push(e),
        }
    }
}

/// Decodes a dense label's mask payload into its overlay field
#[async_trait]
pub trait OverlayDecoder: Send + Sync {
    async fn decode(
        &self,
        class: LabelClass,
        label: &mut Label,
        target: DecodeTarget<'_>,
    ) -> DecodeOutcome;
}

/// Decoder for inline, zlib-compressed, local-file and fetched masks
pub struct MaskDecoder {
    client: reqwest::Client,
    max_mask_bytes: u64,
}

impl MaskDecoder {
    pub fn new(config: &DecodeConfig) -> Result<Self, DecodeError> {
        let client = reqwest::Client::builder()
            .timeout(config.fetch_timeout)
            .build()?;

        Ok(Self {
            client,
            max_mask_bytes: config.max_mask_bytes,
        })
    }

    /// Decode one overlay field of `label`, allocating its paint target.
    ///
    /// Returns the mask buffer the overlay holds afterwards, if any.
    async fn decode_overlay(
        &self,
        label: &mut Label,
        field: OverlayField,
        source: Option<&str>,
        fetch: &FetchConfig,
    ) -> Result<Option<TransferBuffer>, DecodeError> {
        let location = source.or(label.overlay_path(field)).map(str::to_owned);
        let slot = label.overlay_mut(field);

        if slot.as_ref().is_none_or(|overlay| overlay.data.is_none()) {
            let Some(location) = location else {
                return Ok(None);
            };
            let encoded = self.load_encoded(&location, fetch).await?;
            let data = tokio::task::spawn_blocking(move || decode_image(&encoded))
                .await
                .map_err(|e| DecodeError::Task(e.to_string()))??;
            debug!(
                "Decoded {} from {}: shape={:?}, type={:?}",
                field.name(),
                location,
                data.shape,
                data.array_type
            );
            slot.get_or_insert_with(Overlay::default).data = Some(data);
        }

        let Some(overlay) = slot.as_mut() else {
            return Ok(None);
        };
        let Some(data) = overlay.data.as_mut() else {
            return Ok(None);
        };

        // A mask with an unusable shape is dropped along with its paint target
        if let Err(e) = self.check_shape(data) {
            overlay.data = None;
            overlay.image = None;
            return Err(e);
        }

        if data.compressed {
            if let Some(buffer) = data.buffer.take() {
                let max = self.max_mask_bytes;
                let inflated = tokio::task::spawn_blocking(move || inflate(&buffer.bytes, max))
                    .await
                    .map_err(|e| DecodeError::Task(e.to_string()))??;
                data.buffer = Some(TransferBuffer::new(inflated));
            }
            data.compressed = false;
        }

        if overlay.image.is_none() && !data.is_degenerate() {
            // checked by check_shape
            let len = data.target_len().unwrap_or_default();
            overlay.image = Some(vec![0; len]);
        }

        Ok(data.buffer.clone())
    }

    /// Read encoded mask bytes from the configured origin or local disk
    async fn load_encoded(&self, location: &str, fetch: &FetchConfig) -> Result<Bytes, DecodeError> {
        match fetch.media_url(location)? {
            Some(url) => self.fetch_bytes(url, fetch).await,
            None => self.read_file(location).await,
        }
    }

    async fn read_file(&self, path: &str) -> Result<Bytes, DecodeError> {
        let size = tokio::fs::metadata(path).await?.len();
        self.check_size(size)?;
        Ok(Bytes::from(tokio::fs::read(path).await?))
    }

    async fn fetch_bytes(&self, url: reqwest::Url, fetch: &FetchConfig) -> Result<Bytes, DecodeError> {
        let mut request = self.client.get(url);
        for (name, value) in &fetch.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request.send().await?.error_for_status()?;
        if let Some(length) = response.content_length() {
            self.check_size(length)?;
        }

        let bytes = response.bytes().await?;
        self.check_size(bytes.len() as u64)?;
        Ok(bytes)
    }

    /// Reject shapes that cannot be painted or whose paint target would
    /// exceed the mask size limit
    fn check_shape(&self, data: &OverlayData) -> Result<(), DecodeError> {
        let mismatch = |reason| DecodeError::ShapeMismatch {
            shape: data.shape.clone(),
            reason,
        };

        if data.shape.len() > 3 {
            return Err(mismatch("has more than three dimensions"));
        }
        if data.channels() == 0 {
            return Err(mismatch("has no channels"));
        }
        if data.is_degenerate() {
            return Ok(());
        }

        let target = data
            .target_len()
            .ok_or_else(|| mismatch("does not fit in memory"))?;
        self.check_size(target as u64)?;
        if data.expected_len().is_none() {
            return Err(mismatch("does not fit in memory"));
        }
        Ok(())
    }

    fn check_size(&self, size: u64) -> Result<(), DecodeError> {
        if size > self.max_mask_bytes {
            return Err(DecodeError::PayloadTooLarge {
                size,
                max: self.max_mask_bytes,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl OverlayDecoder for MaskDecoder {
    async fn decode(
        &self,
        class: LabelClass,
        label: &mut Label,
        target: DecodeTarget<'_>,
    ) -> DecodeOutcome {
        let mut outcome = DecodeOutcome::default();

        if class == LabelClass::Detections {
            let Some(children) = label.detections.as_mut() else {
                return outcome;
            };
            let results = join_all(
                children
                    .iter_mut()
                    .map(|child| self.decode_overlay(child, OverlayField::Mask, None, target.fetch)),
            )
            .await;
            for result in results {
                outcome.record(result);
            }
        } else if let Some(field) = class.overlay_field() {
            let result = self
                .decode_overlay(label, field, target.source, target.fetch)
                .await;
            outcome.record(result);
        }

        outcome
    }
}

/// Decode an encoded mask image into a typed pixel buffer
fn decode_image(encoded: &[u8]) -> Result<OverlayData, DecodeError> {
    let image = image::load_from_memory(encoded)?;
    let (width, height) = (image.width(), image.height());

    let (channels, array_type, bytes) = match image {
        DynamicImage::ImageLuma8(buffer) => (None, ArrayType::Uint8, buffer.into_raw()),
        DynamicImage::ImageLuma16(buffer) => (
            None,
            ArrayType::Uint16,
            buffer
                .into_raw()
                .into_iter()
                .flat_map(u16::to_le_bytes)
                .collect(),
        ),
        DynamicImage::ImageRgb8(buffer) => (Some(3), ArrayType::Uint8, buffer.into_raw()),
        rgba @ DynamicImage::ImageRgba8(_) => (Some(3), ArrayType::Uint8, rgba.to_rgb8().into_raw()),
        other => (None, ArrayType::Uint8, other.to_luma8().into_raw()),
    };

    let mut shape = vec![height, width];
    shape.extend(channels);

    Ok(OverlayData {
        shape,
        array_type,
        buffer: Some(TransferBuffer::new(bytes)),
        compressed: false,
    })
}

/// Inflate a zlib payload, refusing output larger than `max` bytes
fn inflate(compressed: &[u8], max: u64) -> Result<Vec<u8>, DecodeError> {
    let mut inflated = Vec::new();
    ZlibDecoder::new(compressed)
        .take(max + 1)
        .read_to_end(&mut inflated)?;

    let size = inflated.len() as u64;
    if size > max {
        return Err(DecodeError::PayloadTooLarge { size, max });
    }
    Ok(inflated)
}
