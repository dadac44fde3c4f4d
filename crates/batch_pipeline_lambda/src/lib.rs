//! AWS-oriented adapters and Lambda handlers for the Bedrock batch pipeline.
//!
//! This crate owns runtime integration details (S3, Bedrock and SNS clients,
//! Parquet/CSV codecs, environment configuration) and wires them to the pure
//! pipeline logic in `batch_pipeline_core`. Each handler is a plain function
//! over adapter traits so it can be exercised with in-memory stores.

pub mod adapters;
pub mod catalog;
pub mod config;
pub mod error;
pub mod handlers;
pub mod logging;
pub mod retry;
