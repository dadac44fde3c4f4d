use batch_pipeline_core::contract::JobConfig;
use batch_pipeline_core::postprocess::{join_outputs, parse_output_lines, JoinSummary};
use batch_pipeline_core::processor::processor_for_model_id;
use batch_pipeline_core::storage_keys::{output_parquet_key, s3_uri, split_s3_uri, BATCH_OUTPUT_SUFFIX};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::adapters::object_store::ObjectStore;
use crate::adapters::tabular::{read_parquet, write_parquet};
use crate::error::HandlerError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PostprocessResult {
    pub output_path: String,
    pub job_name_prefix: String,
    pub part_index: usize,
    #[serde(flatten)]
    pub summary: JoinSummary,
}

/// Joins one job's `*.jsonl.out` files back onto its saved input rows and
/// writes the result as Parquet next to the other parts of the stage.
pub fn handle_postprocess(
    event: Value,
    store: &impl ObjectStore,
) -> Result<PostprocessResult, HandlerError> {
    let job: JobConfig = serde_json::from_value(event).map_err(HandlerError::malformed_event)?;
    let processor = processor_for_model_id(&job.model_id, None)?;
    let schema = job
        .output_schema
        .as_ref()
        .map(|schema| schema.compile())
        .transpose()?;

    let (output_bucket, output_prefix) = split_s3_uri(&job.s3_uri_output)?;
    let output_keys: Vec<String> = store
        .list_keys(&output_bucket, &output_prefix)
        .map_err(HandlerError::Storage)?
        .into_iter()
        .filter(|key| key.ends_with(BATCH_OUTPUT_SUFFIX))
        .collect();
    if output_keys.is_empty() {
        return Err(HandlerError::NoBatchOutput(job.s3_uri_output.clone()));
    }

    let mut outputs = Vec::new();
    let mut malformed_lines = 0;
    for key in &output_keys {
        let body = store
            .get_object(&output_bucket, key)
            .map_err(HandlerError::Storage)?;
        let text = String::from_utf8_lossy(&body);
        malformed_lines += parse_output_lines(processor.as_ref(), &text, &mut outputs);
    }
    if malformed_lines > 0 {
        warn!(
            component = "postprocess",
            event = "malformed_lines_skipped",
            job_name = %job.job_name,
            malformed_lines,
            "skipped unparseable batch output lines"
        );
    }

    let (input_bucket, input_key) = split_s3_uri(&job.input_parquet_path)?;
    let inputs = read_parquet(
        store
            .get_object(&input_bucket, &input_key)
            .map_err(HandlerError::Storage)?,
    )
    .map_err(HandlerError::Tabular)?;

    let mut joined = join_outputs(inputs, outputs, processor.model_kind(), schema.as_ref());
    joined.summary.malformed_lines = malformed_lines;
    if joined.summary.unmatched_count > 0 {
        warn!(
            component = "postprocess",
            event = "unmatched_outputs",
            job_name = %job.job_name,
            unmatched_count = joined.summary.unmatched_count,
            "dropped outputs with no matching input record"
        );
    }

    let key = output_parquet_key(&job.job_name_prefix, job.part_index);
    let parquet = write_parquet(&joined.table).map_err(HandlerError::Tabular)?;
    store
        .put_object(&output_bucket, &key, &parquet)
        .map_err(HandlerError::Storage)?;

    let output_path = s3_uri(&output_bucket, &key);
    info!(
        component = "postprocess",
        event = "postprocess_completed",
        job_name = %job.job_name,
        output_path = %output_path,
        rows = joined.summary.rows,
        error_count = joined.summary.error_count,
        missing_outputs = joined.summary.missing_outputs,
        "wrote joined output"
    );

    Ok(PostprocessResult {
        output_path,
        job_name_prefix: job.job_name_prefix,
        part_index: job.part_index,
        summary: joined.summary,
    })
}

#[cfg(test)]
mod tests {
    use batch_pipeline_core::table::{Row, Table};
    use serde_json::json;

    use super::*;
    use crate::adapters::object_store::MemoryObjectStore;

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.clone()))
            .collect()
    }

    fn seed_inputs(store: &MemoryObjectStore, rows: Vec<Row>) {
        let parquet = write_parquet(&Table::from_rows(rows)).expect("parquet should encode");
        store
            .put_object(
                "pipeline",
                "batch_inputs_parquet/tickets/0000.snappy.parquet",
                &parquet,
            )
            .expect("put should succeed");
    }

    fn claude_line(record_id: &str, text: &str) -> String {
        json!({
            "recordId": record_id,
            "modelInput": {},
            "modelOutput": {"content": [{"type": "text", "text": text}]}
        })
        .to_string()
    }

    fn job_event(output_schema: Option<Value>) -> Value {
        let mut event = json!({
            "model_id": "anthropic.claude-3-haiku-20240307-v1:0",
            "job_name": "tickets-0000-run",
            "job_name_prefix": "tickets",
            "part_index": 0,
            "input_parquet_path": "s3://pipeline/batch_inputs_parquet/tickets/0000.snappy.parquet",
            "s3_uri_input": "s3://pipeline/batch_inputs_json/tickets/0000.jsonl",
            "s3_uri_output": "s3://pipeline/batch_outputs_json/tickets/0000/",
            "record_count": 2,
            "job_arn": "arn:job/1",
            "status": "Completed"
        });
        if let Some(schema) = output_schema {
            event["output_schema"] = schema;
        }
        event
    }

    #[test]
    fn joins_outputs_extracts_fields_and_writes_parquet() {
        let store = MemoryObjectStore::new();
        seed_inputs(
            &store,
            vec![
                row(&[("record_id", json!("a")), ("ticket_text", json!("refund please"))]),
                row(&[("record_id", json!("b")), ("ticket_text", json!("app crashes"))]),
                row(&[("record_id", json!("c")), ("ticket_text", json!("never answered"))]),
            ],
        );
        let body = [
            claude_line("a", "{\"category\": \"billing\"}"),
            "not json".to_string(),
            claude_line("b", "The category is technical"),
            json!({"recordId": "zzz", "modelOutput": {"content": []}}).to_string(),
        ]
        .join("\n");
        store
            .put_object(
                "pipeline",
                "batch_outputs_json/tickets/0000/job-id/0000.jsonl.out",
                body.as_bytes(),
            )
            .expect("put should succeed");
        store
            .put_object(
                "pipeline",
                "batch_outputs_json/tickets/0000/job-id/manifest.json.out",
                b"{}",
            )
            .expect("put should succeed");

        let result = handle_postprocess(
            job_event(Some(json!({"fields": [
                {"name": "category", "source": {"type": "json_path", "path": "$.category"}, "required": true}
            ]}))),
            &store,
        )
        .expect("postprocess should succeed");

        assert_eq!(
            result.output_path,
            "s3://pipeline/batch_output_parquet/tickets/0000.snappy.parquet"
        );
        assert_eq!(result.summary.rows, 3);
        assert_eq!(result.summary.outputs, 3);
        assert_eq!(result.summary.malformed_lines, 1);
        assert_eq!(result.summary.missing_outputs, 1);
        assert_eq!(result.summary.unmatched_record_ids, vec!["zzz".to_string()]);

        let written = read_parquet(
            store
                .get_object("pipeline", "batch_output_parquet/tickets/0000.snappy.parquet")
                .expect("output should be written"),
        )
        .expect("output should decode");
        assert_eq!(
            written.column_values("category"),
            vec![json!("billing"), Value::Null, Value::Null]
        );
        assert_eq!(
            written.column_values("response"),
            vec![
                json!("{\"category\": \"billing\"}"),
                json!("The category is technical"),
                Value::Null
            ]
        );
        assert!(written.value(1, "extraction_errors").is_string());
    }

    #[test]
    fn missing_output_files_is_an_error() {
        let store = MemoryObjectStore::new();
        seed_inputs(&store, vec![row(&[("record_id", json!("a"))])]);

        let error = handle_postprocess(job_event(None), &store)
            .expect_err("no output files should fail");

        assert!(matches!(error, HandlerError::NoBatchOutput(_)));
    }

    #[test]
    fn invalid_output_schema_is_rejected_before_reading() {
        let store = MemoryObjectStore::new();

        let error = handle_postprocess(
            job_event(Some(json!({"fields": [
                {"name": "n", "source": {"type": "regex", "pattern": "("}}
            ]}))),
            &store,
        )
        .expect_err("bad regex should fail");

        assert!(matches!(error, HandlerError::Extraction(_)));
    }
}
