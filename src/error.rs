//! Error type shared by every stage of the pipeline.

use thiserror::Error;

use crate::graph::ResourceId;
use crate::grid::{FieldFormat, GridSize};

/// Errors surfaced by grid validation, graph recording and device execution.
///
/// Device-level failures are fatal to the owning simulation; nothing here is
/// retried internally.
#[derive(Debug, Error)]
pub enum OceanError {
    #[error("invalid grid size {width}x{height}: each axis must be a power of two >= {min}")]
    InvalidSize { width: u32, height: u32, min: u32 },

    #[error("field is {actual}, expected {expected}")]
    SizeMismatch { expected: GridSize, actual: GridSize },

    #[error("field format is {actual}, kernel expects {expected}")]
    FormatMismatch {
        expected: FieldFormat,
        actual: FieldFormat,
    },

    #[error("data length {actual} does not match field length {expected}")]
    DataLength { expected: usize, actual: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("resource {0} is not owned by this backend or has the wrong kind")]
    UnknownResource(ResourceId),

    #[error("command graph hazard: {0}")]
    GraphHazard(String),

    #[error("no suitable GPU adapter found")]
    AdapterUnavailable,

    #[error("failed to request device: {0}")]
    RequestDevice(#[from] wgpu::RequestDeviceError),

    #[error("device rejected '{label}': {reason}")]
    Device { label: String, reason: String },

    #[error("device allocation of '{label}' failed: {reason}")]
    Allocation { label: String, reason: String },

    #[error("buffer readback failed: {0}")]
    Readback(String),

    #[error("debug introspection is disabled for this simulation")]
    IntrospectionDisabled,

    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("failed to write image: {0}")]
    Image(#[from] image::ImageError),
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, OceanError>;
