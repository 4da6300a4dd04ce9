//! Core abstractions for sandboxed code execution.
//!
//! A run is described by a [`RunSpec`] (image, shell command, owner
//! uid/gid, staged workspace, [`ResourceBudget`]) and executed by a
//! [`SandboxBackend`] implementation. The backend's combined attach
//! stream is split into stdout/stderr substreams by [`demux`],
//! delivered to the caller as [`OutputChunk`]s, and every run ends in
//! exactly one [`CompletionOutcome`].

mod backend;
mod config;
pub mod demux;
mod error;
mod types;

pub use backend::{AttachStream, SandboxBackend};
pub use config::ResourceBudget;
pub use error::{Result, SandboxError};
pub use types::{CompletionOutcome, OutputChunk, OutputSink, RunSpec, StreamKind};
