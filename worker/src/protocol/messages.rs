use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use uuid::Uuid;

use crate::labels::{ImageBitmap, Schema, TransferBuffer};
use crate::overlay::{Coloring, Colorscale, CustomizeColor, LabelTagColors, StageFailure};

/// Methods the worker understands; anything else is ignored
pub const KNOWN_METHODS: [&str; 3] = ["init", "processDenseLabels", "resolveColor"];

/// Caller to worker requests
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "method", rename_all = "camelCase")]
pub enum Request {
    /// Set the process-wide fetch configuration
    Init(InitRequest),
    /// Decode, paint and build bitmaps for a label tree
    ProcessDenseLabels(Box<ProcessRequest>),
    /// Resolve a palette color for a key
    ResolveColor(ResolveColorRequest),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitRequest {
    #[serde(default)]
    pub origin: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub path_prefix: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessRequest {
    pub uuid: String,
    pub labels: Value,
    #[serde(default)]
    pub coloring: Option<Coloring>,
    #[serde(default)]
    pub customize_color_setting: Option<Vec<CustomizeColor>>,
    #[serde(default)]
    pub label_tag_colors: Option<LabelTagColors>,
    #[serde(default)]
    pub colorscale: Option<Colorscale>,
    #[serde(default)]
    pub selected_label_tags: Option<HashSet<String>>,
    #[serde(default)]
    pub sources: HashMap<String, String>,
    #[serde(default)]
    pub schema: Schema,
    #[serde(default)]
    pub prefix: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResolveColorRequest {
    /// String or number; numbers are keyed by their JSON text
    pub key: Value,
    #[serde(default)]
    pub seed: i64,
    #[serde(default)]
    pub pool: Vec<String>,
}

/// Worker to caller responses
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "method", rename_all = "camelCase")]
pub enum Response {
    DenseLabelsProcessed {
        uuid: String,
        labels: Value,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        diagnostics: Vec<StageFailure>,
    },
    ColorResolved {
        key: Value,
        seed: i64,
        color: String,
    },
    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        uuid: Option<String>,
        message: String,
    },
}

/// Memory moved back to the caller alongside a response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transferable {
    Bitmap(ImageBitmap),
    Buffer(TransferBuffer),
}

impl Transferable {
    /// Identifier the response JSON refers to through `$transfer`
    pub fn id(&self) -> Uuid {
        match self {
            Transferable::Bitmap(bitmap) => bitmap.id,
            Transferable::Buffer(buffer) => buffer.id,
        }
    }

    pub fn bytes(&self) -> &Bytes {
        match self {
            Transferable::Bitmap(bitmap) => &bitmap.pixels,
            Transferable::Buffer(buffer) => &buffer.bytes,
        }
    }

    /// Binary frame: 16-byte identifier followed by the payload
    pub fn to_frame(&self) -> Vec<u8> {
        let bytes = self.bytes();
        let mut frame = Vec::with_capacity(16 + bytes.len());
        frame.extend_from_slice(self.id().as_bytes());
        frame.extend_from_slice(bytes);
        frame
    }

    /// Split a binary frame back into identifier and payload
    pub fn parse_frame(frame: &[u8]) -> Option<(Uuid, &[u8])> {
        if frame.len() < 16 {
            return None;
        }
        let (id, payload) = frame.split_at(16);
        Some((Uuid::from_slice(id).ok()?, payload))
    }
}

/// A response and the memory that travels with it
#[derive(Debug, Clone)]
pub struct Reply {
    pub response: Response,
    pub transferables: Vec<Transferable>,
}

impl Reply {
    pub fn new(response: Response) -> Self {
        Self {
            response,
            transferables: Vec::new(),
        }
    }

    pub fn error(uuid: Option<String>, message: impl Into<String>) -> Self {
        Self::new(Response::Error {
            uuid,
            message: message.into(),
        })
    }
}
