// THEORY:
// This file is the main entry point for the `blob_vision` library crate.
// It defines the public API exposed to external consumers such as a camera
// capture loop or the `visual_tester` binary.
//
// The layers, from the bottom up:
// 1.  `core_modules`: the single-pass detector itself. Run scanners, the
//     union-find `BlobForest`, rolling `BlobStats`, plus frame containers, the
//     bounding-box overlay and `.yuv`/image file helpers.
// 2.  `pipeline`: the per-frame detect, purge, publish sequence and its
//     configuration.
// 3.  `parallel_pipeline` and `telemetry`: running many pipelines at once and
//     fanning reports out to consumers.

pub mod core_modules;
pub mod error;
pub mod parallel_pipeline;
pub mod pipeline;
pub mod telemetry;

pub use error::{BlobError, BlobResult};
