//! Dense Label Worker Library
//!
//! This module exports the worker components for use in integration tests
//! and the server binary.

pub mod config;
pub mod labels;
pub mod overlay;
pub mod pipeline;
pub mod protocol;
pub mod server;
pub mod worker;

mod test_utils;

// Re-export commonly used types
pub use config::Config;
pub use pipeline::{DenseLabelPipeline, ProcessOutcome, RenderContext};
pub use protocol::{Reply, Request, Response, Transferable};
pub use server::{AppState, ws_handler};
pub use worker::{Worker, WorkerError};
