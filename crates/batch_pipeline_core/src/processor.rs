//! Per-provider request and response shapes for Bedrock batch inference.
//!
//! To support another provider, implement [`ModelProcessor`] for its
//! request/response body and teach [`processor_for_model_id`] to select it.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use crate::contract::DEFAULT_MAX_TOKENS;

pub const ANTHROPIC_VERSION: &str = "bedrock-2023-05-31";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProcessorError {
    #[error("Unsupported model_id: {0}. Supported: anthropic.*, amazon.nova*, amazon.titan-embed-text-v2:0")]
    UnsupportedModel(String),
    #[error("Batch output record is missing 'recordId'")]
    MissingRecordId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    Text,
    Embedding,
}

/// One line of a Bedrock batch input JSONL file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchInputRecord {
    #[serde(rename = "recordId")]
    pub record_id: String,
    #[serde(rename = "modelInput")]
    pub model_input: Value,
}

/// A batch output line reduced to what the join needs.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedOutput {
    pub record_id: String,
    pub response: Option<String>,
    pub embedding: Option<Value>,
    pub error: Option<String>,
}

pub trait ModelProcessor {
    fn model_kind(&self) -> ModelKind;

    fn build_input(&self, input_text: &str, record_id: &str) -> BatchInputRecord;

    fn extract_output(&self, model_output: &Value) -> (Option<String>, Option<Value>);

    /// Reduces a batch output line. Records Bedrock failed on keep their id
    /// and carry the error message instead of a response.
    fn parse_output(&self, line: &Value) -> Result<ProcessedOutput, ProcessorError> {
        let record_id = line
            .get("recordId")
            .and_then(Value::as_str)
            .ok_or(ProcessorError::MissingRecordId)?
            .to_string();

        if let Some(error) = line.get("error").filter(|error| !error.is_null()) {
            return Ok(ProcessedOutput {
                record_id,
                response: None,
                embedding: None,
                error: Some(error_message(error)),
            });
        }

        let Some(model_output) = line.get("modelOutput") else {
            return Ok(ProcessedOutput {
                record_id,
                response: None,
                embedding: None,
                error: Some("Batch output record has no modelOutput".to_string()),
            });
        };

        let (response, embedding) = self.extract_output(model_output);
        Ok(ProcessedOutput {
            record_id,
            response,
            embedding,
            error: None,
        })
    }
}

fn error_message(error: &Value) -> String {
    match error {
        Value::String(message) => message.clone(),
        Value::Object(fields) => fields
            .get("errorMessage")
            .or_else(|| fields.get("message"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string()),
        other => other.to_string(),
    }
}

/// Anthropic models through the Messages API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnthropicProcessor {
    pub max_tokens: u32,
}

impl Default for AnthropicProcessor {
    fn default() -> Self {
        Self {
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }
}

impl ModelProcessor for AnthropicProcessor {
    fn model_kind(&self) -> ModelKind {
        ModelKind::Text
    }

    fn build_input(&self, input_text: &str, record_id: &str) -> BatchInputRecord {
        BatchInputRecord {
            record_id: record_id.to_string(),
            model_input: json!({
                "anthropic_version": ANTHROPIC_VERSION,
                "max_tokens": self.max_tokens,
                "messages": [
                    {
                        "role": "user",
                        "content": [{"type": "text", "text": input_text}]
                    }
                ]
            }),
        }
    }

    fn extract_output(&self, model_output: &Value) -> (Option<String>, Option<Value>) {
        let text = model_output
            .get("content")
            .and_then(Value::as_array)
            .and_then(|blocks| blocks.last())
            .and_then(|block| block.get("text"))
            .and_then(Value::as_str)
            .map(str::to_string);
        (text, None)
    }
}

/// Amazon Nova models, which take the Converse-style message body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NovaProcessor {
    pub max_tokens: u32,
}

impl Default for NovaProcessor {
    fn default() -> Self {
        Self {
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }
}

impl ModelProcessor for NovaProcessor {
    fn model_kind(&self) -> ModelKind {
        ModelKind::Text
    }

    fn build_input(&self, input_text: &str, record_id: &str) -> BatchInputRecord {
        BatchInputRecord {
            record_id: record_id.to_string(),
            model_input: json!({
                "messages": [
                    {"role": "user", "content": [{"text": input_text}]}
                ],
                "inferenceConfig": {"maxTokens": self.max_tokens}
            }),
        }
    }

    fn extract_output(&self, model_output: &Value) -> (Option<String>, Option<Value>) {
        let text = model_output
            .pointer("/output/message/content")
            .and_then(Value::as_array)
            .and_then(|blocks| blocks.last())
            .and_then(|block| block.get("text"))
            .and_then(Value::as_str)
            .map(str::to_string);
        (text, None)
    }
}

/// Amazon Titan Text Embeddings V2.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TitanEmbedV2Processor;

impl ModelProcessor for TitanEmbedV2Processor {
    fn model_kind(&self) -> ModelKind {
        ModelKind::Embedding
    }

    fn build_input(&self, input_text: &str, record_id: &str) -> BatchInputRecord {
        BatchInputRecord {
            record_id: record_id.to_string(),
            model_input: json!({ "inputText": input_text }),
        }
    }

    fn extract_output(&self, model_output: &Value) -> (Option<String>, Option<Value>) {
        (None, model_output.get("embedding").cloned())
    }
}

pub fn processor_for_model_id(
    model_id: &str,
    max_tokens: Option<u32>,
) -> Result<Box<dyn ModelProcessor + Send + Sync>, ProcessorError> {
    let max_tokens = max_tokens.unwrap_or(DEFAULT_MAX_TOKENS);
    if model_id.contains("anthropic") {
        Ok(Box::new(AnthropicProcessor { max_tokens }))
    } else if model_id.contains("amazon.nova") {
        Ok(Box::new(NovaProcessor { max_tokens }))
    } else if model_id.contains("amazon.titan-embed-text-v2") {
        Ok(Box::new(TitanEmbedV2Processor))
    } else {
        Err(ProcessorError::UnsupportedModel(model_id.to_string()))
    }
}
