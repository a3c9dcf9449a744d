//! Common types and utilities for the virtual router simulator.
//!
//! This crate provides the binary message header codec, the SmartRE shim
//! codec, frame I/O helpers and the shared error/metric types used by the
//! router node and the command-line tools.

pub mod error;
pub mod metrics;
pub mod shim;
pub mod types;
pub mod wire;

/// Reexport of common types
pub use error::Error;
pub type Result<T> = std::result::Result<T, Error>;
