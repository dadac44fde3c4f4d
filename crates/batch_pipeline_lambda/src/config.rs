use std::fmt;
use std::str::FromStr;

use batch_pipeline_core::contract::DEFAULT_MAX_RECORDS_PER_JOB;

use crate::error::HandlerError;

pub const BUCKET_NAME_ENV: &str = "BUCKET_NAME";
pub const MAX_RECORDS_PER_JOB_ENV: &str = "MAX_RECORDS_PER_JOB";
pub const BATCH_ROLE_ARN_ENV: &str = "BATCH_ROLE_ARN";
pub const SNS_TOPIC_ARN_ENV: &str = "SNS_TOPIC_ARN";
pub const PROMPT_CATALOG_S3_URI_ENV: &str = "PROMPT_CATALOG_S3_URI";
pub const PIPELINE_HANDLER_ENV: &str = "PIPELINE_HANDLER";

/// Which handler the shared runtime binary serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    Preprocess,
    StartBatchJob,
    CheckBatchJob,
    Postprocess,
    TransformStage,
    ValidatePipeline,
    SendNotification,
}

impl HandlerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Preprocess => "preprocess",
            Self::StartBatchJob => "start_batch_job",
            Self::CheckBatchJob => "check_batch_job",
            Self::Postprocess => "postprocess",
            Self::TransformStage => "transform_stage",
            Self::ValidatePipeline => "validate_pipeline",
            Self::SendNotification => "send_notification",
        }
    }
}

impl fmt::Display for HandlerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HandlerKind {
    type Err = HandlerError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "preprocess" => Ok(Self::Preprocess),
            "start_batch_job" | "start_job" => Ok(Self::StartBatchJob),
            "check_batch_job" | "check_job" => Ok(Self::CheckBatchJob),
            "postprocess" => Ok(Self::Postprocess),
            "transform_stage" => Ok(Self::TransformStage),
            "validate_pipeline" | "validate_pipeline_config" => Ok(Self::ValidatePipeline),
            "send_notification" | "notify" => Ok(Self::SendNotification),
            other => Err(HandlerError::InvalidConfig {
                name: PIPELINE_HANDLER_ENV,
                reason: format!("unknown handler '{other}'"),
            }),
        }
    }
}

/// Environment configuration, read once per invocation. Blank values count
/// as unset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    pub bucket_name: Option<String>,
    pub max_records_per_job: usize,
    pub batch_role_arn: Option<String>,
    pub sns_topic_arn: Option<String>,
    pub prompt_catalog_s3_uri: Option<String>,
    pub handler: Option<HandlerKind>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            bucket_name: None,
            max_records_per_job: DEFAULT_MAX_RECORDS_PER_JOB,
            batch_role_arn: None,
            sns_topic_arn: None,
            prompt_catalog_s3_uri: None,
            handler: None,
        }
    }
}

impl RuntimeConfig {
    pub fn from_env() -> Result<Self, HandlerError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, HandlerError> {
        let read = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let max_records_per_job = match read(MAX_RECORDS_PER_JOB_ENV) {
            None => DEFAULT_MAX_RECORDS_PER_JOB,
            Some(raw) => match raw.parse::<usize>() {
                Ok(value) if value > 0 => value,
                _ => {
                    return Err(HandlerError::InvalidConfig {
                        name: MAX_RECORDS_PER_JOB_ENV,
                        reason: format!("expected a positive integer, got '{raw}'"),
                    })
                }
            },
        };

        Ok(Self {
            bucket_name: read(BUCKET_NAME_ENV),
            max_records_per_job,
            batch_role_arn: read(BATCH_ROLE_ARN_ENV),
            sns_topic_arn: read(SNS_TOPIC_ARN_ENV),
            prompt_catalog_s3_uri: read(PROMPT_CATALOG_S3_URI_ENV),
            handler: read(PIPELINE_HANDLER_ENV)
                .map(|raw| raw.parse())
                .transpose()?,
        })
    }

    pub fn bucket(&self) -> Result<&str, HandlerError> {
        self.bucket_name
            .as_deref()
            .ok_or(HandlerError::MissingConfig(BUCKET_NAME_ENV))
    }

    pub fn batch_role_arn(&self) -> Result<&str, HandlerError> {
        self.batch_role_arn
            .as_deref()
            .ok_or(HandlerError::MissingConfig(BATCH_ROLE_ARN_ENV))
    }

    pub fn sns_topic_arn(&self) -> Result<&str, HandlerError> {
        self.sns_topic_arn
            .as_deref()
            .ok_or(HandlerError::MissingConfig(SNS_TOPIC_ARN_ENV))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> Result<RuntimeConfig, HandlerError> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        RuntimeConfig::from_lookup(|name| env.get(name).cloned())
    }

    #[test]
    fn reads_values_and_defaults() {
        let config = config_from(&[
            ("BUCKET_NAME", "pipeline-bucket"),
            ("PIPELINE_HANDLER", "transform-stage"),
            ("SNS_TOPIC_ARN", "  "),
        ])
        .expect("config should load");

        assert_eq!(config.bucket().expect("bucket"), "pipeline-bucket");
        assert_eq!(config.max_records_per_job, DEFAULT_MAX_RECORDS_PER_JOB);
        assert_eq!(config.handler, Some(HandlerKind::TransformStage));
        assert!(matches!(
            config.sns_topic_arn(),
            Err(HandlerError::MissingConfig("SNS_TOPIC_ARN"))
        ));
    }

    #[test]
    fn max_records_override_must_be_positive() {
        let config = config_from(&[("MAX_RECORDS_PER_JOB", "250")]).expect("config should load");
        assert_eq!(config.max_records_per_job, 250);

        assert!(matches!(
            config_from(&[("MAX_RECORDS_PER_JOB", "0")]),
            Err(HandlerError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn rejects_unknown_handler() {
        assert!(matches!(
            config_from(&[("PIPELINE_HANDLER", "reticulate")]),
            Err(HandlerError::InvalidConfig { .. })
        ));
    }
}
