use batch_pipeline_core::contract::ContractError;
use batch_pipeline_core::extraction::ExtractionError;
use batch_pipeline_core::preprocess::PreprocessError;
use batch_pipeline_core::processor::ProcessorError;
use batch_pipeline_core::prompts::PromptError;
use batch_pipeline_core::storage_keys::S3UriError;
use batch_pipeline_core::transform::TransformError;
use thiserror::Error;

use crate::adapters::batch_jobs::ClientError;

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("{0} must be configured")]
    MissingConfig(&'static str),
    #[error("Invalid value for {name}: {reason}")]
    InvalidConfig { name: &'static str, reason: String },
    #[error("Malformed event: {0}")]
    MalformedEvent(String),
    #[error("Unsupported input format for '{0}'; expected .csv or .parquet")]
    UnsupportedInputFormat(String),
    #[error("No batch output files found under {0}")]
    NoBatchOutput(String),
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Tabular data error: {0}")]
    Tabular(String),
    #[error("Bedrock error: {0}")]
    Bedrock(ClientError),
    #[error("Notification error: {0}")]
    Notification(String),
    #[error(transparent)]
    Contract(#[from] ContractError),
    #[error(transparent)]
    Preprocess(#[from] PreprocessError),
    #[error(transparent)]
    Processor(#[from] ProcessorError),
    #[error(transparent)]
    Prompt(#[from] PromptError),
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
    #[error(transparent)]
    Transform(#[from] TransformError),
    #[error(transparent)]
    S3Uri(#[from] S3UriError),
}

impl HandlerError {
    pub fn malformed_event(error: serde_json::Error) -> Self {
        Self::MalformedEvent(error.to_string())
    }
}
