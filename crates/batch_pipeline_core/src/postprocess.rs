use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::contract::{
    EMBEDDING_COLUMN, ERROR_COLUMN, EXTRACTION_ERRORS_COLUMN, PROMPT_ID_COLUMN, RECORD_ID_COLUMN,
    RESPONSE_COLUMN,
};
use crate::extraction::CompiledSchema;
use crate::processor::{ModelKind, ModelProcessor, ProcessedOutput};
use crate::prompts::split_expanded_record_id;
use crate::table::{value_as_text, Row, Table};

/// Unmatched ids kept in the summary; the count is always exact.
pub const MAX_REPORTED_UNMATCHED_IDS: usize = 50;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct JoinSummary {
    pub rows: usize,
    pub outputs: usize,
    pub error_count: usize,
    pub malformed_lines: usize,
    pub missing_outputs: usize,
    pub unmatched_count: usize,
    pub unmatched_record_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JoinedOutput {
    pub table: Table,
    pub summary: JoinSummary,
}

/// Parses one `*.jsonl.out` body. Returns the number of lines skipped
/// because they were not JSON or lacked a record id.
pub fn parse_output_lines(
    processor: &dyn ModelProcessor,
    body: &str,
    outputs: &mut Vec<ProcessedOutput>,
) -> usize {
    let mut malformed = 0;
    for line in body.lines().map(str::trim).filter(|line| !line.is_empty()) {
        let parsed = serde_json::from_str::<Value>(line)
            .ok()
            .and_then(|value| processor.parse_output(&value).ok());
        match parsed {
            Some(output) => outputs.push(output),
            None => malformed += 1,
        }
    }
    malformed
}

/// Joins model outputs back onto the saved input rows by record id.
///
/// An output id either matches an input `record_id` exactly or has the
/// expanded form `record_id::prompt_id`, in which case the input row is
/// repeated once per output with `prompt_id` set. Inputs without outputs
/// are kept with null result columns.
pub fn join_outputs(
    inputs: Table,
    outputs: Vec<ProcessedOutput>,
    model_kind: ModelKind,
    schema: Option<&CompiledSchema>,
) -> JoinedOutput {
    let mut summary = JoinSummary {
        outputs: outputs.len(),
        ..JoinSummary::default()
    };

    let mut index_by_id: HashMap<String, usize> = HashMap::with_capacity(inputs.len());
    for (index, row) in inputs.rows().iter().enumerate() {
        if let Some(id) = row.get(RECORD_ID_COLUMN).and_then(value_as_text) {
            index_by_id.entry(id).or_insert(index);
        }
    }

    let mut matched: Vec<Vec<(Option<String>, ProcessedOutput)>> = vec![Vec::new(); inputs.len()];
    let mut has_expanded = false;
    for output in outputs {
        if output.error.is_some() {
            summary.error_count += 1;
        }
        if let Some(&index) = index_by_id.get(&output.record_id) {
            matched[index].push((None, output));
            continue;
        }
        let expanded = split_expanded_record_id(&output.record_id).and_then(|(base, prompt_id)| {
            index_by_id
                .get(base)
                .map(|&index| (index, prompt_id.to_string()))
        });
        match expanded {
            Some((index, prompt_id)) => {
                has_expanded = true;
                matched[index].push((Some(prompt_id), output));
            }
            None => {
                summary.unmatched_count += 1;
                if summary.unmatched_record_ids.len() < MAX_REPORTED_UNMATCHED_IDS {
                    summary.unmatched_record_ids.push(output.record_id);
                }
            }
        }
    }

    let result_column = match model_kind {
        ModelKind::Text => RESPONSE_COLUMN,
        ModelKind::Embedding => EMBEDDING_COLUMN,
    };
    let mut columns: Vec<String> = inputs.columns().to_vec();
    let mut add_column = |name: &str| {
        if !columns.iter().any(|column| column == name) {
            columns.push(name.to_string());
        }
    };
    add_column(result_column);
    add_column(ERROR_COLUMN);
    if has_expanded {
        add_column(PROMPT_ID_COLUMN);
    }
    if let Some(schema) = schema {
        schema.field_names().for_each(&mut add_column);
        add_column(EXTRACTION_ERRORS_COLUMN);
    }

    let mut table = Table::new(columns);
    for (row, row_outputs) in inputs.into_rows().into_iter().zip(matched) {
        if row_outputs.is_empty() {
            summary.missing_outputs += 1;
            table.push_row(result_row(
                row,
                None,
                None,
                result_column,
                has_expanded,
                schema,
            ));
            continue;
        }
        for (prompt_id, output) in row_outputs {
            table.push_row(result_row(
                row.clone(),
                Some(output),
                prompt_id,
                result_column,
                has_expanded,
                schema,
            ));
        }
    }

    summary.rows = table.len();
    JoinedOutput { table, summary }
}

fn result_row(
    mut row: Row,
    output: Option<ProcessedOutput>,
    prompt_id: Option<String>,
    result_column: &str,
    has_expanded: bool,
    schema: Option<&CompiledSchema>,
) -> Row {
    let (response, embedding, error) = match output {
        Some(output) => (output.response, output.embedding, output.error),
        None => (None, None, None),
    };

    let result = match result_column {
        EMBEDDING_COLUMN => embedding.unwrap_or(Value::Null),
        _ => response.clone().map(Value::String).unwrap_or(Value::Null),
    };
    row.insert(result_column.to_string(), result);
    row.insert(
        ERROR_COLUMN.to_string(),
        error.map(Value::String).unwrap_or(Value::Null),
    );
    if has_expanded {
        row.insert(
            PROMPT_ID_COLUMN.to_string(),
            prompt_id.map(Value::String).unwrap_or(Value::Null),
        );
    }

    if let Some(schema) = schema {
        let extraction = schema.extract(response.as_deref());
        for (name, value) in extraction.values {
            row.insert(name, value);
        }
        let errors = if extraction.errors.is_empty() {
            Value::Null
        } else {
            Value::String(extraction.errors.join("; "))
        };
        row.insert(EXTRACTION_ERRORS_COLUMN.to_string(), errors);
    }
    row
}
