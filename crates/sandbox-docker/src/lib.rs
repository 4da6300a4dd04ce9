//! Docker Engine backend for sandboxed execution.
//!
//! Talks to the daemon over its Unix socket with a minimal HTTP/1.1
//! client ([`client::DockerClient`]), translates a resource budget into
//! HostConfig limits ([`LimitStrategy`]), and drives one locked-down
//! container per run ([`DockerBackend`]).

mod backend;
pub mod client;
mod limits;

pub use backend::{DockerBackend, WORKSPACE_MOUNT};
pub use client::DEFAULT_SOCKET;
pub use limits::LimitStrategy;
