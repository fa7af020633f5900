//! Run orchestration

pub mod pipeline;

pub use pipeline::{Pipeline, PipelineOptions, RunReport};
