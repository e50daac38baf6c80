//! Overlay processing module
//!
//! Decoding of mask payloads, painting, bitmap construction and the coloring
//! rules they share.

pub mod bitmap;
pub mod color;
pub mod decoder;
pub mod fetch;
pub mod paint;
pub mod types;

pub use bitmap::{BitmapCollector, PendingBitmap};
pub use color::{ColorContext, Coloring, Colorscale, CustomizeColor, LabelTagColors, resolve_color};
pub use decoder::{DecodeOutcome, DecodeTarget, MaskDecoder, OverlayDecoder};
pub use fetch::{FetchConfig, FetchConfigStore};
pub use paint::Painter;
pub use types::{BitmapError, DecodeError, OverlayError, PaintError, Stage, StageFailure};
