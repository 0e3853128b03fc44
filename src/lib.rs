//! Structured Light Scanning Benchmark
//!
//! Runs structured light techniques against physical, rendered or replayed
//! projector/camera pairs and compares the results:
//! - Experiment state machine with phase hooks
//! - Sparse depth grids from column triangulation
//! - Speed, resolution and accuracy comparisons against a reference run
//! - Point cloud export

pub mod benchmark;
pub mod capture;
pub mod config;
pub mod error;
pub mod experiment;
pub mod metric;
pub mod reconstruct;
pub mod session;
pub mod solver;
pub mod triangulation;
