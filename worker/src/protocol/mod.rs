//! Message contract between the caller and the worker

pub mod messages;

pub use messages::{
    InitRequest, KNOWN_METHODS, ProcessRequest, Reply, Request, ResolveColorRequest, Response,
    Transferable,
};
