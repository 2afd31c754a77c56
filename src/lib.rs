// THEORY:
// This file is the main entry point for the `passthrough_overlay` library crate.
// It exposes the `OverlayPipeline` and its associated data structures
// (`PipelineConfig`, `BatchReport`, `TickReport`, etc.) as the high-level
// interface of the engine. The host application pushes detection batches and
// depth frames in, ticks the pipeline once per rendered frame, and the pipeline
// drives an external asset provider with the resulting overlay transforms.
//
// The internal stages (`core_modules`) stay usable on their own for testing and
// for hosts that want to assemble a different loop, but the pipeline is the
// intended surface.

pub mod config;
pub mod core_modules;
pub mod diagnostics;
pub mod error;
pub mod inbox;
pub mod pipeline;

pub use error::{OverlayError, Result};
pub use pipeline::{BatchReport, OverlayPipeline, PipelineConfig, TickReport};
