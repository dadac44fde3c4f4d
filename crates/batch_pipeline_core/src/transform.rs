//! Stage chaining: reshape one stage's joined output into the next stage's
//! input table.

use std::collections::BTreeMap;

use serde_json::{Map, Value};
use thiserror::Error;

use crate::contract::{PipelineStage, CATEGORY_COLUMN, RESPONSE_COLUMN};
use crate::preprocess::DEFAULT_MAPPING_KEY;
use crate::table::Table;

/// Step Functions Map states may nest the spread stage fields under `$`.
pub const NESTED_STAGE_KEY: &str = "$";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransformError {
    #[error("Stage event must be a JSON object")]
    EventNotObject,
    #[error("Invalid stage fields: {0}")]
    InvalidStage(String),
    #[error("all_stages has no stage at index {0}")]
    MissingPreviousStage(usize),
    #[error("Previous stage missing job_name_prefix")]
    MissingPreviousPrefix,
    #[error("Previous stage output not found: {0}. Previous stage may have failed or not completed.")]
    PreviousOutputNotFound(String),
}

/// Root-level `stage_index` of a transform request, `0` when absent.
pub fn stage_index(event: &Value) -> usize {
    event
        .get("stage_index")
        .and_then(Value::as_u64)
        .unwrap_or(0) as usize
}

/// A transform request as delivered by the state machine.
#[derive(Debug, Clone, PartialEq)]
pub struct StageEvent {
    /// Raw stage fields; returned to the state machine with unknown keys intact.
    pub stage_fields: Map<String, Value>,
    pub stage: PipelineStage,
    pub stage_index: usize,
    pub all_stages: Vec<Value>,
    pub pipeline_name: Value,
}

impl StageEvent {
    /// Stage fields under a `$` key win over root-level fields. `stage_index`,
    /// `all_stages` and `pipeline_name` are always read from the root.
    pub fn from_event(event: &Value) -> Result<Self, TransformError> {
        let root = event.as_object().ok_or(TransformError::EventNotObject)?;
        let stage_fields = match root.get(NESTED_STAGE_KEY) {
            Some(Value::Object(nested)) => nested.clone(),
            Some(_) => return Err(TransformError::EventNotObject),
            None => root.clone(),
        };
        let stage = serde_json::from_value(Value::Object(stage_fields.clone()))
            .map_err(|error| TransformError::InvalidStage(error.to_string()))?;

        Ok(Self {
            stage_fields,
            stage,
            stage_index: stage_index(event),
            all_stages: root
                .get("all_stages")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default(),
            pipeline_name: root.get("pipeline_name").cloned().unwrap_or(Value::Null),
        })
    }

    pub fn previous_job_name_prefix(&self) -> Result<&str, TransformError> {
        let previous_index = self
            .stage_index
            .checked_sub(1)
            .ok_or(TransformError::MissingPreviousStage(0))?;
        let previous = self
            .all_stages
            .get(previous_index)
            .ok_or(TransformError::MissingPreviousStage(previous_index))?;
        previous
            .get("job_name_prefix")
            .and_then(Value::as_str)
            .filter(|prefix| !prefix.is_empty())
            .ok_or(TransformError::MissingPreviousPrefix)
    }

    pub fn current_job_name_prefix(&self) -> &str {
        self.stage.job_name_prefix.as_deref().unwrap_or("unknown")
    }

    /// The flattened stage the next state receives.
    pub fn into_next_stage(self, input_s3_uri: String) -> Value {
        let mut result = self.stage_fields;
        result.insert("input_s3_uri".to_string(), Value::String(input_s3_uri));
        result.insert("stage_index".to_string(), Value::from(self.stage_index));
        result.insert("all_stages".to_string(), Value::Array(self.all_stages));
        result.insert("pipeline_name".to_string(), self.pipeline_name);
        Value::Object(result)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StageTransform {
    pub table: Table,
    pub warnings: Vec<String>,
}

/// Applies category derivation, column mappings and category routing to the
/// previous stage's output.
pub fn transform_previous_output(mut table: Table, stage: &PipelineStage) -> StageTransform {
    let mut warnings = Vec::new();

    if table.has_column(RESPONSE_COLUMN) && !table.has_column(CATEGORY_COLUMN) {
        let categories: Vec<Value> = table
            .rows()
            .iter()
            .map(|row| {
                row.get(RESPONSE_COLUMN)
                    .map(response_category)
                    .unwrap_or(Value::Null)
            })
            .collect();
        if categories.iter().any(|value| !value.is_null()) {
            table.set_column(CATEGORY_COLUMN, categories);
        }
    }

    apply_column_mappings(&mut table, &stage.column_mappings);

    if !stage.category_to_prompt_mapping.is_empty() {
        let column_name = stage
            .prompt_config
            .as_ref()
            .and_then(|config| config.column_name.as_deref());
        match column_name {
            None => warnings.push(
                "category_to_prompt_mapping specified but no column_name in prompt_config"
                    .to_string(),
            ),
            Some(_) if !table.has_column(RESPONSE_COLUMN) => warnings
                .push("'response' column not found for category-to-prompt mapping".to_string()),
            Some(column_name) => {
                let mapping = &stage.category_to_prompt_mapping;
                let mut unmapped: Vec<String> = Vec::new();
                table.map_column(column_name, |row| {
                    let category = row.get(RESPONSE_COLUMN).and_then(response_category_text);
                    let prompt_id = route_category(category.as_deref(), mapping);
                    if prompt_id.is_none() {
                        let label = category.unwrap_or_else(|| "null".to_string());
                        if !unmapped.contains(&label) {
                            unmapped.push(label);
                        }
                    }
                    prompt_id.map(Value::String).unwrap_or(Value::Null)
                });
                warnings.extend(
                    unmapped
                        .into_iter()
                        .map(|category| format!("No mapping found for category '{category}'")),
                );
            }
        }
    }

    StageTransform { table, warnings }
}

/// Target columns are keyed by the name the next prompt expects; sources that
/// do not exist are filled from `response` instead.
fn apply_column_mappings(table: &mut Table, column_mappings: &BTreeMap<String, String>) {
    let mut renames = BTreeMap::new();
    for (target, source) in column_mappings {
        if table.has_column(source) {
            renames.insert(source.clone(), target.clone());
        } else if table.has_column(RESPONSE_COLUMN) {
            let responses = table.column_values(RESPONSE_COLUMN);
            table.set_column(target, responses);
        }
    }
    table.rename_columns(&renames);
}

/// A JSON object response contributes its `category`; any other string is
/// the category itself.
pub fn response_category(response: &Value) -> Value {
    let Value::String(text) = response else {
        return Value::Null;
    };
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(fields)) if fields.contains_key(CATEGORY_COLUMN) => {
            fields[CATEGORY_COLUMN].clone()
        }
        _ => Value::String(text.clone()),
    }
}

fn response_category_text(response: &Value) -> Option<String> {
    match response_category(response) {
        Value::Null => None,
        Value::String(text) => Some(text),
        other => Some(other.to_string()),
    }
}

fn route_category(category: Option<&str>, mapping: &BTreeMap<String, String>) -> Option<String> {
    category
        .map(|category| category.trim().to_lowercase())
        .and_then(|normalized| mapping.get(&normalized))
        .or_else(|| mapping.get(DEFAULT_MAPPING_KEY))
        .cloned()
}
