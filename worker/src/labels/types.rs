//! Label-related types and error definitions

use bytes::Bytes;
use indexmap::IndexMap;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use super::class::OverlayField;
use super::ids::id_string;

/// Errors that can occur when reading label input
#[derive(Debug, Error)]
pub enum LabelError {
    #[error("Malformed label input: {0}")]
    Malformed(String),

    #[error("Invalid label JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Pipeline progress of a single label.
///
/// Variants are declared in pipeline order; the derived `Ord` is what
/// [`Label::advance_status`] uses to refuse backward transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderStatus {
    Deferred,
    Decoding,
    Decoded,
    Painting,
    Painted,
    Ready,
}

/// Element type of a decoded mask buffer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArrayType {
    #[default]
    Uint8,
    Uint16,
    Float32,
}

impl ArrayType {
    /// Bytes per element
    pub fn byte_width(self) -> usize {
        match self {
            ArrayType::Uint8 => 1,
            ArrayType::Uint16 => 2,
            ArrayType::Float32 => 4,
        }
    }
}

/// A byte region handed back to the caller by ownership transfer.
///
/// In JSON it is written as a `{"$transfer": id, "byteLength": n}` reference;
/// the bytes themselves travel out of band. On input it is read from a plain
/// array of bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferBuffer {
    pub id: Uuid,
    pub bytes: Bytes,
}

impl TransferBuffer {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self {
            id: Uuid::new_v4(),
            bytes: bytes.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl Serialize for TransferBuffer {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry("$transfer", &self.id)?;
        map.serialize_entry("byteLength", &self.bytes.len())?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for TransferBuffer {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bytes = Vec::<u8>::deserialize(deserializer)?;
        Ok(Self::new(bytes))
    }
}

/// Hardware-ready bitmap built from a painted overlay.
///
/// Pixels are premultiplied RGBA rows. Cloning shares the pixel memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageBitmap {
    pub id: Uuid,
    pub width: u32,
    pub height: u32,
    pub pixels: Bytes,
}

impl ImageBitmap {
    pub fn new(width: u32, height: u32, pixels: impl Into<Bytes>) -> Self {
        Self {
            id: Uuid::new_v4(),
            width,
            height,
            pixels: pixels.into(),
        }
    }
}

impl Serialize for ImageBitmap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(3))?;
        map.serialize_entry("$transfer", &self.id)?;
        map.serialize_entry("width", &self.width)?;
        map.serialize_entry("height", &self.height)?;
        map.end()
    }
}

/// Decoded mask payload of an overlay
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverlayData {
    /// `[height, width]` or `[height, width, channels]`
    #[serde(default)]
    pub shape: Vec<u32>,
    #[serde(default)]
    pub array_type: ArrayType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buffer: Option<TransferBuffer>,
    /// Buffer is zlib-compressed and must be inflated before painting
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub compressed: bool,
}

impl OverlayData {
    pub fn height(&self) -> u32 {
        self.shape.first().copied().unwrap_or(0)
    }

    pub fn width(&self) -> u32 {
        self.shape.get(1).copied().unwrap_or(0)
    }

    pub fn channels(&self) -> u32 {
        self.shape.get(2).copied().unwrap_or(1)
    }

    pub fn is_degenerate(&self) -> bool {
        self.height() == 0 || self.width() == 0
    }

    /// `None` when the count does not fit in `usize`
    pub fn pixel_count(&self) -> Option<usize> {
        (self.height() as usize).checked_mul(self.width() as usize)
    }

    /// Byte length the buffer must have for the declared shape and type
    pub fn expected_len(&self) -> Option<usize> {
        self.pixel_count()?
            .checked_mul(self.channels() as usize)?
            .checked_mul(self.array_type.byte_width())
    }

    /// Byte length of the RGBA paint target for this shape
    pub fn target_len(&self) -> Option<usize> {
        self.pixel_count()?.checked_mul(4)
    }
}

/// Overlay field of a dense label: mask shape, pixel data and render products
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Overlay {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<OverlayData>,
    /// Painted RGBA pixels, released once a bitmap has been derived
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<Vec<u8>>,
    #[serde(default, skip_deserializing, skip_serializing_if = "Option::is_none")]
    pub bitmap: Option<ImageBitmap>,
    #[serde(flatten)]
    pub extra: IndexMap<String, Value>,
}

impl Overlay {
    /// `(width, height)` of the mask, or `None` when either is zero or unknown
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        let data = self.data.as_ref()?;
        if data.is_degenerate() {
            return None;
        }
        Some((data.width(), data.height()))
    }
}

/// A single label object.
///
/// Attributes the pipeline reads or writes are typed; everything else is kept
/// verbatim in `attributes` and written back unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Label {
    #[serde(rename = "_cls", default, skip_serializing_if = "Option::is_none")]
    pub cls: Option<String>,
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub raw_id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(rename = "renderStatus", default, skip_serializing_if = "Option::is_none")]
    pub render_status: Option<RenderStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mask: Option<Overlay>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mask_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub map: Option<Overlay>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub map_path: Option<String>,
    /// Heatmap value range
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<[f64; 2]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detections: Option<Vec<Label>>,
    #[serde(flatten)]
    pub attributes: IndexMap<String, Value>,
}

impl Label {
    /// Move the render status forward. Returns false, leaving the status
    /// untouched, when `next` is not strictly after the current status.
    pub fn advance_status(&mut self, next: RenderStatus) -> bool {
        match self.render_status {
            Some(current) if current >= next => false,
            _ => {
                self.render_status = Some(next);
                true
            }
        }
    }

    pub fn overlay(&self, field: OverlayField) -> Option<&Overlay> {
        match field {
            OverlayField::Mask => self.mask.as_ref(),
            OverlayField::Map => self.map.as_ref(),
        }
    }

    pub fn overlay_mut(&mut self, field: OverlayField) -> &mut Option<Overlay> {
        match field {
            OverlayField::Mask => &mut self.mask,
            OverlayField::Map => &mut self.map,
        }
    }

    /// On-disk location of the encoded overlay, if the label carries one
    pub fn overlay_path(&self, field: OverlayField) -> Option<&str> {
        match field {
            OverlayField::Mask => self.mask_path.as_deref(),
            OverlayField::Map => self.map_path.as_deref(),
        }
    }

    /// Client-facing identifier, read from `_id` until it has been remapped
    pub fn instance_id(&self) -> Option<String> {
        self.id
            .clone()
            .or_else(|| self.raw_id.as_ref().and_then(id_string))
    }

    /// String value of a named attribute, used for color-by-attribute
    pub fn attribute_string(&self, name: &str) -> Option<String> {
        match name {
            "label" => self.label.clone(),
            "id" => self.instance_id(),
            _ => match self.attributes.get(name)? {
                Value::String(s) => Some(s.clone()),
                Value::Null => None,
                other => Some(other.to_string()),
            },
        }
    }
}
