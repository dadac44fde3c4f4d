use thiserror::Error;
use uuid::Uuid;

use crate::contract::{
    ContractError, JobConfig, JobInput, PromptSelection, INPUT_TEXT_COLUMN, RECORD_ID_COLUMN,
};
use crate::processor::{
    processor_for_model_id, BatchInputRecord, ModelKind, ModelProcessor, ProcessorError,
};
use crate::prompts::{expanded_record_id, PromptCatalog, PromptError};
use crate::storage_keys::{
    input_jsonl_key, input_parquet_key, job_name, output_jsonl_prefix, s3_uri,
};
use crate::table::{value_as_text, Row, Table};

/// Index column pandas leaves behind when a frame is saved with its index.
pub const PANDAS_INDEX_COLUMN: &str = "Unnamed: 0";

/// Category key used when a row's category has no explicit mapping.
pub const DEFAULT_MAPPING_KEY: &str = "default";

#[derive(Debug, Error)]
pub enum PreprocessError {
    #[error(transparent)]
    Contract(#[from] ContractError),
    #[error(transparent)]
    Processor(#[from] ProcessorError),
    #[error("Input has no rows")]
    EmptyInput,
    #[error("Embedding models require an 'input_text' column")]
    MissingInputTextColumn,
    #[error("Record '{record_id}' has no 'input_text' value")]
    MissingInputText { record_id: String },
    #[error("Prompt column '{0}' not found in input")]
    MissingPromptColumn(String),
    #[error("Record '{record_id}' has no prompt id in column '{column}'")]
    MissingPromptId { record_id: String, column: String },
    #[error("Record '{record_id}': no expansion rule for category '{category}' and no default")]
    UnmappedCategory { record_id: String, category: String },
    #[error("Record '{record_id}': {source}")]
    Prompt {
        record_id: String,
        #[source]
        source: PromptError,
    },
}

/// One chunk of input rows and the model records built from it.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedPart {
    pub index: usize,
    pub input_rows: Table,
    pub records: Vec<BatchInputRecord>,
}

pub fn random_record_id() -> String {
    Uuid::new_v4().to_string()
}

/// Splits the input into parts and renders model records for each row.
///
/// Rows without a `record_id` get one from `new_record_id`; the returned
/// `input_rows` carry those ids so outputs can be joined back later.
pub fn prepare_parts(
    input: &JobInput,
    mut table: Table,
    catalog: &PromptCatalog,
    default_max_records: usize,
    new_record_id: &mut dyn FnMut() -> String,
) -> Result<Vec<PreparedPart>, PreprocessError> {
    let processor = processor_for_model_id(&input.model_id, input.max_tokens)?;
    let selection = input.prompt_selection()?;

    table.drop_column(PANDAS_INDEX_COLUMN);
    if table.is_empty() {
        return Err(PreprocessError::EmptyInput);
    }

    let selection = match processor.model_kind() {
        ModelKind::Embedding => {
            if !table.has_column(INPUT_TEXT_COLUMN) {
                return Err(PreprocessError::MissingInputTextColumn);
            }
            None
        }
        ModelKind::Text => {
            let selection = selection.ok_or(ContractError::MissingPromptSelection)?;
            if let Some(column) = selection_column(&selection) {
                if !table.has_column(column) {
                    return Err(PreprocessError::MissingPromptColumn(column.to_string()));
                }
            }
            Some(selection)
        }
    };

    let max_records = input
        .max_records_per_job
        .unwrap_or(default_max_records)
        .max(1);

    let mut parts = Vec::new();
    for (index, chunk) in table.chunks(max_records).into_iter().enumerate() {
        // A zero job limit means no limit.
        if input
            .max_num_jobs
            .filter(|max_jobs| *max_jobs > 0)
            .is_some_and(|max_jobs| index >= max_jobs)
        {
            break;
        }

        let input_rows = assign_record_ids(chunk, new_record_id);
        let mut records = Vec::with_capacity(input_rows.len());
        for row in input_rows.rows() {
            let record_id = row_record_id(row);
            match &selection {
                None => records.push(build_embedding_record(processor.as_ref(), row, record_id)?),
                Some(selection) => records.extend(build_text_records(
                    processor.as_ref(),
                    catalog,
                    selection,
                    row,
                    record_id,
                )?),
            }
        }

        parts.push(PreparedPart {
            index,
            input_rows,
            records,
        });
    }

    Ok(parts)
}

fn selection_column(selection: &PromptSelection) -> Option<&str> {
    match selection {
        PromptSelection::Single { .. } => None,
        PromptSelection::Mapped { column_name } => Some(column_name),
        PromptSelection::Expanded {
            category_column, ..
        } => Some(category_column),
    }
}

fn assign_record_ids(mut chunk: Table, new_record_id: &mut dyn FnMut() -> String) -> Table {
    chunk.map_column(RECORD_ID_COLUMN, |row| {
        let existing = row.get(RECORD_ID_COLUMN).and_then(value_as_text);
        existing
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(&mut *new_record_id)
            .into()
    });
    chunk
}

fn row_record_id(row: &Row) -> String {
    row.get(RECORD_ID_COLUMN)
        .and_then(value_as_text)
        .unwrap_or_default()
}

fn build_embedding_record(
    processor: &dyn ModelProcessor,
    row: &Row,
    record_id: String,
) -> Result<BatchInputRecord, PreprocessError> {
    let text = row
        .get(INPUT_TEXT_COLUMN)
        .and_then(value_as_text)
        .ok_or_else(|| PreprocessError::MissingInputText {
            record_id: record_id.clone(),
        })?;
    Ok(processor.build_input(&text, &record_id))
}

fn build_text_records(
    processor: &dyn ModelProcessor,
    catalog: &PromptCatalog,
    selection: &PromptSelection,
    row: &Row,
    record_id: String,
) -> Result<Vec<BatchInputRecord>, PreprocessError> {
    let render = |prompt_id: &str| {
        catalog
            .render(prompt_id, row)
            .map_err(|source| PreprocessError::Prompt {
                record_id: record_id.clone(),
                source,
            })
    };

    match selection {
        PromptSelection::Single { prompt_id } => {
            Ok(vec![processor.build_input(&render(prompt_id)?, &record_id)])
        }
        PromptSelection::Mapped { column_name } => {
            let prompt_id = row
                .get(column_name)
                .and_then(value_as_text)
                .filter(|id| !id.trim().is_empty())
                .ok_or_else(|| PreprocessError::MissingPromptId {
                    record_id: record_id.clone(),
                    column: column_name.clone(),
                })?;
            Ok(vec![processor.build_input(&render(prompt_id.trim())?, &record_id)])
        }
        PromptSelection::Expanded {
            category_column,
            expansion_mapping,
        } => {
            let category = row
                .get(category_column)
                .and_then(value_as_text)
                .unwrap_or_default();
            let normalized = category.trim().to_lowercase();
            let rule_name = expansion_mapping
                .get(&category)
                .or_else(|| expansion_mapping.get(&normalized))
                .or_else(|| expansion_mapping.get(DEFAULT_MAPPING_KEY))
                .ok_or_else(|| PreprocessError::UnmappedCategory {
                    record_id: record_id.clone(),
                    category: category.clone(),
                })?;
            let prompt_ids =
                catalog
                    .expansion_rule(rule_name)
                    .map_err(|source| PreprocessError::Prompt {
                        record_id: record_id.clone(),
                        source,
                    })?;

            prompt_ids
                .iter()
                .map(|prompt_id| -> Result<BatchInputRecord, PreprocessError> {
                    Ok(processor.build_input(
                        &render(prompt_id)?,
                        &expanded_record_id(&record_id, prompt_id),
                    ))
                })
                .collect()
        }
    }
}

/// Describes where a part lives in S3 and how its Bedrock job is named.
pub fn build_job_config(
    input: &JobInput,
    part: &PreparedPart,
    bucket: &str,
    run_stamp: &str,
) -> JobConfig {
    JobConfig {
        model_id: input.model_id.clone(),
        job_name: job_name(&input.job_name_prefix, part.index, run_stamp),
        job_name_prefix: input.job_name_prefix.clone(),
        part_index: part.index,
        input_parquet_path: s3_uri(
            bucket,
            &input_parquet_key(&input.job_name_prefix, part.index),
        ),
        s3_uri_input: s3_uri(bucket, &input_jsonl_key(&input.job_name_prefix, part.index)),
        s3_uri_output: s3_uri(
            bucket,
            &output_jsonl_prefix(&input.job_name_prefix, part.index),
        ),
        record_count: part.records.len(),
        output_schema: input.output_schema.clone(),
    }
}

pub fn to_jsonl(records: &[BatchInputRecord]) -> String {
    records
        .iter()
        .map(|record| {
            serde_json::to_string(record).expect("batch input record should serialize")
        })
        .collect::<Vec<_>>()
        .join("\n")
}
