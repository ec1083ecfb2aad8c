// SPDX-License-Identifier: MPL-2.0

//! Media backends at the edges of the relay
//!
//! ```text
//! ┌──────────────┐   appsink    ┌─────────┐   appsrc    ┌──────────────┐
//! │   Capture    │ ───────────► │  Relay  │ ──────────► │    Stream    │
//! │ (v4l2src)    │  on_frame    │  core   │  FrameSink  │ (enc ! udp)  │
//! └──────────────┘              └─────────┘             └──────────────┘
//! ```

pub mod gstreamer;
