// SPDX-License-Identifier: MPL-2.0

//! Error types for the relay
//!
//! Errors fall into three tiers:
//!
//! - [`StartupError`]: fatal, surfaced once before any frame is processed
//! - [`AcceleratorError`]: device/program/kernel failures; fatal during shared
//!   init, degrading during worker init, per-frame while running
//! - [`FrameError`] / [`PushError`]: per-frame, only ever observed through
//!   counters and telemetry

use std::path::PathBuf;

/// Result type alias for startup paths
pub type StartupResult<T> = Result<T, StartupError>;

/// Errors that prevent the relay from entering the running state
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("shared accelerator context failed to initialize: {0}")]
    SharedContextInit(String),

    #[error("no worker could initialize its accelerator context ({requested} requested)")]
    NoWorkersStarted { requested: usize },

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("pipeline error: {0}")]
    Pipeline(String),

    #[error("failed to spawn thread '{name}': {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

/// Accelerator device, program and kernel errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AcceleratorError {
    #[error("no accelerator device available: {0}")]
    NoDevice(String),

    #[error("accelerator program build failed: {0}")]
    ProgramBuild(String),

    #[error("worker context creation failed: {0}")]
    ContextCreation(String),

    #[error("device buffer allocation of {size} bytes failed: {reason}")]
    BufferAllocation { size: usize, reason: String },

    #[error("kernel execution failed: {0}")]
    KernelExecution(String),

    #[error("result readback failed: {0}")]
    Readback(String),

    #[error("plane size mismatch: expected {expected} bytes, got {actual}")]
    PlaneSize { expected: usize, actual: usize },
}

impl AcceleratorError {
    /// Whether this error came from (re)allocating device buffers
    pub fn is_allocation(&self) -> bool {
        matches!(self, AcceleratorError::BufferAllocation { .. })
    }
}

/// Per-frame errors raised before or after the accelerator call
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("failed to map frame buffer: {0}")]
    Map(String),

    #[error("frame too small: need {expected} bytes, have {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    #[error("failed to allocate {0} byte output frame")]
    OutputAllocation(usize),

    #[error("invalid frame geometry {width}x{height}")]
    InvalidGeometry { width: u32, height: u32 },
}

/// Failure reported by a frame sink
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PushError {
    #[error("sink refused buffer: {0}")]
    Refused(String),

    #[error("sink is closed")]
    Closed,
}

/// Configuration loading and validation errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("{field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}
