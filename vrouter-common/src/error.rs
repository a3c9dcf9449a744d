//! Error types for the virtual router simulator.

use thiserror::Error;

/// All possible errors that can occur within the simulator core.
#[derive(Error, Debug)]
pub enum Error {
    /// Error related to header/shim encoding/decoding.
    #[error("wire codec error: {0}")]
    Wire(String),

    /// A length-prefixed frame was truncated or carried a bad length.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// Error while parsing a topology description.
    #[error("topology error: {0}")]
    Topology(String),

    /// No next hop is known for a destination.
    #[error("no route to vrid {0}")]
    NoRoute(i32),

    /// Error related to the SmartRE manifest.
    #[error("manifest error: {0}")]
    Manifest(String),

    /// Unknown strategy or replacement-policy name in the configuration.
    #[error("unknown {kind}: {name}")]
    UnknownName { kind: &'static str, name: String },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Other errors
    #[error("{0}")]
    Other(String),
}
