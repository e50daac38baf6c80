//! Label model
//!
//! Typed label objects, the closed set of label classes, schema resolution
//! and the resolved label tree the pipeline walks.

pub mod class;
pub mod ids;
pub mod schema;
pub mod tree;
pub mod types;

pub use class::{LabelClass, OverlayField};
pub use schema::{ClassResolver, Schema, SchemaField};
pub use tree::{LabelInput, LabelNode, LabelTree, LeafMut};
pub use types::{
    ArrayType, ImageBitmap, Label, LabelError, Overlay, OverlayData, RenderStatus, TransferBuffer,
};
