use std::fmt;

use batch_pipeline_core::retry::is_retryable_error_code;

/// Everything `CreateModelInvocationJob` needs for one part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchJobRequest {
    pub job_name: String,
    pub model_id: String,
    pub role_arn: String,
    pub input_s3_uri: String,
    pub output_s3_uri: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchJobState {
    pub status: String,
    pub message: Option<String>,
}

/// A failed control-plane call, with the service error code when one was
/// returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientError {
    pub code: Option<String>,
    pub message: String,
}

impl ClientError {
    pub fn new(code: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            code: code.map(str::to_string),
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.code.as_deref().is_some_and(is_retryable_error_code)
    }
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{code}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

pub trait BatchJobClient {
    /// Returns the job ARN.
    fn create_job(&self, request: &BatchJobRequest) -> Result<String, ClientError>;

    fn job_state(&self, job_arn: &str) -> Result<BatchJobState, ClientError>;
}
