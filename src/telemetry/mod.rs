// SPDX-License-Identifier: GPL-3.0-only

//! Relay counters and periodic status reports

mod collector;
mod counters;

pub use collector::{
    Health, StageRates, TelemetryCollector, TelemetryFormat, TelemetryReport, classify, emit,
    report,
};
pub use counters::{CounterSnapshot, Counters, StageCounter, StageSample};
