use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::extraction::OutputSchema;

pub const DEFAULT_MAX_RECORDS_PER_JOB: usize = 1_000;
pub const DEFAULT_MAX_TOKENS: u32 = 1_024;
pub const DEFAULT_PRESIGNED_URL_EXPIRY_DAYS: u64 = 7;

pub const RECORD_ID_COLUMN: &str = "record_id";
pub const RESPONSE_COLUMN: &str = "response";
pub const EMBEDDING_COLUMN: &str = "embedding";
pub const ERROR_COLUMN: &str = "error";
pub const PROMPT_ID_COLUMN: &str = "prompt_id";
pub const CATEGORY_COLUMN: &str = "category";
pub const INPUT_TEXT_COLUMN: &str = "input_text";
pub const EXTRACTION_ERRORS_COLUMN: &str = "extraction_errors";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContractError {
    #[error("Either 'dataset_id' or 's3_uri' must be provided in the event")]
    MissingInputSource,
    #[error("Loading dataset '{0}' is not supported; stage it in S3 and pass s3_uri")]
    DatasetUnsupported(String),
    #[error("Specify either 'prompt_id' or 'prompt_config', not both")]
    ConflictingPromptSelection,
    #[error("Text models require 'prompt_id' or 'prompt_config'")]
    MissingPromptSelection,
    #[error("Invalid prompt_config mode '{0}'")]
    InvalidPromptMode(String),
    #[error("'{field}' is required for {mode} mode")]
    MissingPromptField {
        mode: &'static str,
        field: &'static str,
    },
    #[error("Unknown batch job status '{0}'")]
    UnknownJobStatus(String),
}

/// Event accepted by the preprocess handler.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct JobInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s3_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset_id: Option<String>,
    pub job_name_prefix: String,
    pub model_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_config: Option<PromptConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_num_jobs: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_records_per_job: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_stamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<OutputSchema>,
}

impl JobInput {
    pub fn source_uri(&self) -> Result<&str, ContractError> {
        match (self.s3_uri.as_deref(), self.dataset_id.as_deref()) {
            (Some(uri), _) if !uri.trim().is_empty() => Ok(uri),
            (_, Some(dataset_id)) => Err(ContractError::DatasetUnsupported(dataset_id.to_string())),
            _ => Err(ContractError::MissingInputSource),
        }
    }

    /// Resolves the prompt selection; `Ok(None)` means no prompt was given.
    pub fn prompt_selection(&self) -> Result<Option<PromptSelection>, ContractError> {
        match (&self.prompt_id, &self.prompt_config) {
            (Some(_), Some(_)) => Err(ContractError::ConflictingPromptSelection),
            (Some(prompt_id), None) => Ok(Some(PromptSelection::Single {
                prompt_id: prompt_id.clone(),
            })),
            (None, Some(config)) => config.selection().map(Some),
            (None, None) => Ok(None),
        }
    }
}

/// Prompt configuration as it appears on the wire.
///
/// The mode is kept as a free string so validation can report unknown modes
/// instead of failing deserialization.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PromptConfig {
    pub mode: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_column: Option<String>,
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub expansion_mapping: BTreeMap<String, String>,
}

impl PromptConfig {
    pub fn single(prompt_id: impl Into<String>) -> Self {
        Self {
            mode: "single".to_string(),
            prompt_id: Some(prompt_id.into()),
            ..Self::default()
        }
    }

    pub fn mapped(column_name: impl Into<String>) -> Self {
        Self {
            mode: "mapped".to_string(),
            column_name: Some(column_name.into()),
            ..Self::default()
        }
    }

    pub fn expanded(
        category_column: impl Into<String>,
        expansion_mapping: BTreeMap<String, String>,
    ) -> Self {
        Self {
            mode: "expanded".to_string(),
            category_column: Some(category_column.into()),
            expansion_mapping,
            ..Self::default()
        }
    }

    pub fn selection(&self) -> Result<PromptSelection, ContractError> {
        match self.mode.as_str() {
            "single" => Ok(PromptSelection::Single {
                prompt_id: non_empty(&self.prompt_id).ok_or(ContractError::MissingPromptField {
                    mode: "single",
                    field: "prompt_id",
                })?,
            }),
            "mapped" => Ok(PromptSelection::Mapped {
                column_name: non_empty(&self.column_name).ok_or(
                    ContractError::MissingPromptField {
                        mode: "mapped",
                        field: "column_name",
                    },
                )?,
            }),
            "expanded" => {
                let category_column = non_empty(&self.category_column).ok_or(
                    ContractError::MissingPromptField {
                        mode: "expanded",
                        field: "category_column",
                    },
                )?;
                if self.expansion_mapping.is_empty() {
                    return Err(ContractError::MissingPromptField {
                        mode: "expanded",
                        field: "expansion_mapping",
                    });
                }
                Ok(PromptSelection::Expanded {
                    category_column,
                    expansion_mapping: self.expansion_mapping.clone(),
                })
            }
            other => Err(ContractError::InvalidPromptMode(other.to_string())),
        }
    }
}

/// Treats an explicit JSON `null` the same as an absent field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_ref()
        .map(|text| text.trim())
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

/// A validated prompt configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptSelection {
    Single {
        prompt_id: String,
    },
    Mapped {
        column_name: String,
    },
    Expanded {
        category_column: String,
        expansion_mapping: BTreeMap<String, String>,
    },
}

/// One Bedrock batch job prepared by the preprocess handler.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobConfig {
    pub model_id: String,
    pub job_name: String,
    pub job_name_prefix: String,
    pub part_index: usize,
    pub input_parquet_path: String,
    pub s3_uri_input: String,
    pub s3_uri_output: String,
    pub record_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<OutputSchema>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct JobList {
    pub jobs: Vec<JobConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PipelineConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline_name: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub stages: Vec<PipelineStage>,
}

/// One stage of a multi-stage pipeline.
///
/// Every field is optional on the wire so validation can report all missing
/// fields at once. Unknown fields are carried through `extra` so a stage
/// round-trips through the transform handler unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PipelineStage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_name_prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_config: Option<PromptConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_s3_uri: Option<String>,
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "std::ops::Not::not"
    )]
    pub use_previous_output: bool,
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub column_mappings: BTreeMap<String, String>,
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub category_to_prompt_mapping: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<OutputSchema>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl PipelineStage {
    pub fn display_name(&self, index: usize) -> String {
        self.stage_name
            .clone()
            .unwrap_or_else(|| format!("Stage {}", index + 1))
    }

    pub fn has_input_uri(&self) -> bool {
        self.input_s3_uri
            .as_deref()
            .is_some_and(|uri| !uri.trim().is_empty())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub estimated_records: Option<u64>,
    pub estimated_cost_usd: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_fingerprint: Option<String>,
}

impl ValidationResult {
    pub fn invalid(errors: Vec<String>, warnings: Vec<String>) -> Self {
        Self {
            valid: false,
            errors,
            warnings,
            estimated_records: None,
            estimated_cost_usd: None,
            config_fingerprint: None,
        }
    }
}

/// Lifecycle states reported by `GetModelInvocationJob`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchJobStatus {
    Submitted,
    Validating,
    Scheduled,
    InProgress,
    Completed,
    PartiallyCompleted,
    Failed,
    Stopping,
    Stopped,
    Expired,
}

impl BatchJobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Submitted => "Submitted",
            Self::Validating => "Validating",
            Self::Scheduled => "Scheduled",
            Self::InProgress => "InProgress",
            Self::Completed => "Completed",
            Self::PartiallyCompleted => "PartiallyCompleted",
            Self::Failed => "Failed",
            Self::Stopping => "Stopping",
            Self::Stopped => "Stopped",
            Self::Expired => "Expired",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::PartiallyCompleted | Self::Failed | Self::Stopped | Self::Expired
        )
    }

    /// Partially completed jobs still produce usable output files.
    pub fn is_success(self) -> bool {
        matches!(self, Self::Completed | Self::PartiallyCompleted)
    }
}

impl fmt::Display for BatchJobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BatchJobStatus {
    type Err = ContractError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "Submitted" => Ok(Self::Submitted),
            "Validating" => Ok(Self::Validating),
            "Scheduled" => Ok(Self::Scheduled),
            "InProgress" => Ok(Self::InProgress),
            "Completed" => Ok(Self::Completed),
            "PartiallyCompleted" => Ok(Self::PartiallyCompleted),
            "Failed" => Ok(Self::Failed),
            "Stopping" => Ok(Self::Stopping),
            "Stopped" => Ok(Self::Stopped),
            "Expired" => Ok(Self::Expired),
            other => Err(ContractError::UnknownJobStatus(other.to_string())),
        }
    }
}

pub fn config_fingerprint(value: impl Serialize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(stable_contract_json(value));
    format!("{:x}", hasher.finalize())
}

pub fn stable_contract_json(value: impl Serialize) -> String {
    serde_json::to_string(&value).expect("serialization of contract value should not fail")
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn prompt_id_is_shorthand_for_single_mode() {
        let input = JobInput {
            s3_uri: Some("s3://bucket/topics.csv".to_string()),
            job_name_prefix: "jokes".to_string(),
            model_id: "anthropic.claude-3-haiku-20240307-v1:0".to_string(),
            prompt_id: Some("joke_about_topic".to_string()),
            ..JobInput::default()
        };

        assert_eq!(
            input.prompt_selection().expect("selection should resolve"),
            Some(PromptSelection::Single {
                prompt_id: "joke_about_topic".to_string()
            })
        );
    }

    #[test]
    fn rejects_both_prompt_id_and_prompt_config() {
        let input = JobInput {
            prompt_id: Some("a".to_string()),
            prompt_config: Some(PromptConfig::single("b")),
            ..JobInput::default()
        };

        assert_eq!(
            input.prompt_selection().expect_err("selection should fail"),
            ContractError::ConflictingPromptSelection
        );
    }

    #[test]
    fn dataset_id_is_reported_as_unsupported() {
        let input = JobInput {
            dataset_id: Some("imdb".to_string()),
            ..JobInput::default()
        };

        assert_eq!(
            input.source_uri().expect_err("dataset should be rejected"),
            ContractError::DatasetUnsupported("imdb".to_string())
        );
    }

    #[test]
    fn expanded_mode_requires_mapping() {
        let config: PromptConfig = serde_json::from_value(json!({
            "mode": "expanded",
            "category_column": "category"
        }))
        .expect("config should parse");

        assert_eq!(
            config.selection().expect_err("selection should fail"),
            ContractError::MissingPromptField {
                mode: "expanded",
                field: "expansion_mapping"
            }
        );
    }

    #[test]
    fn stage_round_trips_unknown_fields() {
        let raw = json!({
            "stage_name": "classify",
            "model_id": "amazon.nova-lite-v1:0",
            "job_name_prefix": "classify-job",
            "prompt_config": {"mode": "single", "prompt_id": "classify_ticket"},
            "timeout_hours": 24
        });

        let stage: PipelineStage = serde_json::from_value(raw.clone()).expect("stage should parse");
        assert_eq!(stage.extra.get("timeout_hours"), Some(&json!(24)));
        assert_eq!(serde_json::to_value(&stage).expect("stage should serialize"), raw);
    }

    #[test]
    fn job_status_parses_bedrock_strings() {
        let status: BatchJobStatus = "PartiallyCompleted".parse().expect("status should parse");
        assert!(status.is_terminal());
        assert!(status.is_success());

        let running: BatchJobStatus = "InProgress".parse().expect("status should parse");
        assert!(!running.is_terminal());
        assert!("Bogus".parse::<BatchJobStatus>().is_err());
    }

    #[test]
    fn fingerprint_is_stable_for_identical_configs() {
        let config = PipelineConfig {
            pipeline_name: Some("tickets".to_string()),
            stages: vec![PipelineStage::default()],
        };

        assert_eq!(config_fingerprint(&config), config_fingerprint(config.clone()));
        assert_eq!(config_fingerprint(&config).len(), 64);
    }

    #[test]
    fn explicit_nulls_read_as_defaults() {
        let config: PipelineConfig = serde_json::from_value(json!({
            "pipeline_name": "tickets",
            "stages": [{
                "stage_name": "classify",
                "prompt_config": null,
                "use_previous_output": null,
                "column_mappings": null,
                "category_to_prompt_mapping": null
            }]
        }))
        .expect("nulls should parse as defaults");

        let stage = &config.stages[0];
        assert_eq!(stage.prompt_config, None);
        assert!(!stage.use_previous_output);
        assert!(stage.column_mappings.is_empty());
        assert!(stage.category_to_prompt_mapping.is_empty());
        assert!(stage.extra.is_empty());
    }
}
