// SPDX-License-Identifier: MPL-2.0

//! Luma Relay - live NV12 relay with accelerated luma enhancement
//!
//! Frames arrive from a capture pipeline, are handed to a pool of workers that
//! each own an accelerator context, have their luma plane histogram-equalized,
//! and are pushed into an encoding pipeline. Telemetry samples shared counters
//! on a fixed tick.
//!
//! # Architecture
//!
//! - [`relay`]: ingest adapter, worker pool, startup and ordered shutdown
//! - [`queue`]: unbounded FIFO between ingest and workers
//! - [`accelerator`]: shared/per-worker accelerator contexts (GPU or CPU)
//! - [`gpu`]: wgpu device creation and readback helpers
//! - [`telemetry`]: counters, rate derivation and health classification
//! - [`backends`]: GStreamer capture and stream pipelines
//! - [`config`]: operator configuration
//!
//! # Example
//!
//! ```ignore
//! use luma_relay::relay::{Relay, RelaySettings};
//!
//! let relay = Relay::start(RelaySettings::from(&config), sink)?;
//! let ingest = relay.ingest();
//! // source callback: ingest.on_frame(frame);
//! let report = relay.shutdown();
//! ```

pub mod accelerator;
pub mod backends;
pub mod config;
pub mod constants;
pub mod errors;
pub mod frame;
pub mod gpu;
pub mod queue;
pub mod relay;
pub mod telemetry;

// Re-export commonly used types
pub use accelerator::BackendKind;
pub use config::RelayConfig;
pub use constants::BitratePreset;
pub use errors::{AcceleratorError, ConfigError, FrameError, PushError, StartupError};
pub use frame::{FrameBuffer, FrameGeometry};
pub use relay::{Relay, RelaySettings, ShutdownReport};
