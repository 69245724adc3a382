//! pyimage library.
//!
//! The `pyimage` CLI and the `pyinit` wrapper are thin binaries over these
//! modules; integration tests use them directly.

pub mod cache;
pub mod config;
pub mod image;
pub mod init;
pub mod manifest;
pub mod pipeline;
pub mod preflight;
pub mod process;
pub mod provision;
pub mod report;
pub mod snapshot;
pub mod timing;
pub mod verify;
