//! Shared batch pipeline domain primitives.
//!
//! This crate owns the deterministic parts of the Bedrock batch pipeline:
//! request/response contracts, object key layout, prompt rendering, model
//! request/response shapes, response extraction, the output join, and stage
//! chaining. It intentionally excludes AWS SDK and Lambda runtime concerns,
//! which live in `batch_pipeline_lambda`.

pub mod contract;
pub mod extraction;
pub mod notification;
pub mod postprocess;
pub mod preprocess;
pub mod processor;
pub mod prompts;
pub mod retry;
pub mod storage_keys;
pub mod table;
pub mod transform;
pub mod validation;
