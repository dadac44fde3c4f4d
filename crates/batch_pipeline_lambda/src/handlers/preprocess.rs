use batch_pipeline_core::contract::{JobInput, JobList};
use batch_pipeline_core::preprocess::{build_job_config, prepare_parts, to_jsonl};
use batch_pipeline_core::prompts::PromptCatalog;
use batch_pipeline_core::storage_keys::{input_jsonl_key, input_parquet_key, split_s3_uri};
use batch_pipeline_core::table::Table;
use serde_json::Value;
use tracing::info;

use crate::adapters::object_store::ObjectStore;
use crate::adapters::tabular::{read_csv, read_parquet, write_parquet};
use crate::error::HandlerError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreprocessConfig {
    pub bucket: String,
    pub default_max_records_per_job: usize,
    /// Used in job names when the event does not carry its own `run_stamp`.
    pub run_stamp: String,
}

pub fn handle_preprocess(
    event: Value,
    config: &PreprocessConfig,
    store: &impl ObjectStore,
    catalog: &PromptCatalog,
    new_record_id: &mut dyn FnMut() -> String,
) -> Result<JobList, HandlerError> {
    let input: JobInput = serde_json::from_value(event).map_err(HandlerError::malformed_event)?;
    let source_uri = input.source_uri()?;
    info!(
        component = "preprocess",
        event = "preprocess_started",
        source_uri,
        model_id = %input.model_id,
        job_name_prefix = %input.job_name_prefix,
        "preparing batch inputs"
    );

    let table = load_input_table(store, source_uri)?;
    let parts = prepare_parts(
        &input,
        table,
        catalog,
        config.default_max_records_per_job,
        new_record_id,
    )?;

    let run_stamp = input.run_stamp.as_deref().unwrap_or(&config.run_stamp);
    let mut jobs = Vec::with_capacity(parts.len());
    for part in &parts {
        let parquet = write_parquet(&part.input_rows).map_err(HandlerError::Tabular)?;
        store
            .put_object(
                &config.bucket,
                &input_parquet_key(&input.job_name_prefix, part.index),
                &parquet,
            )
            .map_err(HandlerError::Storage)?;
        store
            .put_object(
                &config.bucket,
                &input_jsonl_key(&input.job_name_prefix, part.index),
                to_jsonl(&part.records).as_bytes(),
            )
            .map_err(HandlerError::Storage)?;

        let job = build_job_config(&input, part, &config.bucket, run_stamp);
        info!(
            component = "preprocess",
            event = "part_written",
            job_name = %job.job_name,
            part_index = part.index,
            input_rows = part.input_rows.len(),
            record_count = job.record_count,
            "wrote batch input part"
        );
        jobs.push(job);
    }

    info!(
        component = "preprocess",
        event = "preprocess_completed",
        job_count = jobs.len(),
        "batch inputs ready"
    );
    Ok(JobList { jobs })
}

/// Reads a `.csv` or `.parquet` object into a table.
pub fn load_input_table(store: &impl ObjectStore, uri: &str) -> Result<Table, HandlerError> {
    let (bucket, key) = split_s3_uri(uri)?;
    let extension = key
        .rsplit_once('.')
        .map(|(_, extension)| extension.to_ascii_lowercase())
        .unwrap_or_default();
    if extension != "csv" && extension != "parquet" {
        return Err(HandlerError::UnsupportedInputFormat(uri.to_string()));
    }

    let body = store
        .get_object(&bucket, &key)
        .map_err(HandlerError::Storage)?;
    if extension == "csv" {
        read_csv(&body).map_err(HandlerError::Tabular)
    } else {
        read_parquet(body).map_err(HandlerError::Tabular)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use batch_pipeline_core::contract::RECORD_ID_COLUMN;
    use batch_pipeline_core::preprocess::PreprocessError;
    use batch_pipeline_core::table::Row;

    use super::*;
    use crate::adapters::object_store::MemoryObjectStore;

    fn config() -> PreprocessConfig {
        PreprocessConfig {
            bucket: "pipeline".to_string(),
            default_max_records_per_job: 1_000,
            run_stamp: "20261016T120000".to_string(),
        }
    }

    fn counter_ids() -> impl FnMut() -> String {
        let mut next = 0;
        move || {
            next += 1;
            format!("rec-{next}")
        }
    }

    fn catalog() -> PromptCatalog {
        PromptCatalog::bundled().expect("bundled catalog should load")
    }

    #[test]
    fn splits_csv_into_parts_and_writes_both_formats() {
        let store = MemoryObjectStore::new();
        store
            .put_object("pipeline", "inputs/jokes/topics.csv", b"topic\ncats\ndogs\nbirds\n")
            .expect("put should succeed");

        let jobs = handle_preprocess(
            json!({
                "s3_uri": "s3://pipeline/inputs/jokes/topics.csv",
                "job_name_prefix": "jokes",
                "model_id": "us.anthropic.claude-3-5-haiku-20241022-v1:0",
                "prompt_id": "joke_about_topic",
                "max_records_per_job": 2
            }),
            &config(),
            &store,
            &catalog(),
            &mut counter_ids(),
        )
        .expect("preprocess should succeed");

        assert_eq!(jobs.jobs.len(), 2);
        assert_eq!(jobs.jobs[0].job_name, "jokes-0000-20261016T120000");
        assert_eq!(jobs.jobs[1].record_count, 1);
        assert_eq!(
            jobs.jobs[1].s3_uri_input,
            "s3://pipeline/batch_inputs_json/jokes/0001.jsonl"
        );
        assert_eq!(
            jobs.jobs[0].s3_uri_output,
            "s3://pipeline/batch_outputs_json/jokes/0000/"
        );

        let jsonl = store
            .get_object("pipeline", "batch_inputs_json/jokes/0000.jsonl")
            .expect("jsonl should be written");
        let lines: Vec<Value> = String::from_utf8(jsonl)
            .expect("jsonl should be utf-8")
            .lines()
            .map(|line| serde_json::from_str(line).expect("line should be json"))
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["recordId"], "rec-1");
        let prompt = lines[1]["modelInput"]["messages"][0]["content"][0]["text"]
            .as_str()
            .expect("prompt text should be present");
        assert!(prompt.contains("dogs"));

        let saved = read_parquet(
            store
                .get_object("pipeline", "batch_inputs_parquet/jokes/0000.snappy.parquet")
                .expect("input parquet should be written"),
        )
        .expect("input parquet should decode");
        assert_eq!(
            saved.column_values(RECORD_ID_COLUMN),
            vec![json!("rec-1"), json!("rec-2")]
        );
    }

    #[test]
    fn event_run_stamp_and_max_num_jobs_are_honored() {
        let store = MemoryObjectStore::new();
        let rows: Vec<Row> = (0..5)
            .map(|index| {
                Row::from([
                    ("record_id".to_string(), json!(format!("r{index}"))),
                    ("input_text".to_string(), json!(format!("text {index}"))),
                ])
            })
            .collect();
        let parquet = write_parquet(&Table::from_rows(rows)).expect("parquet should encode");
        store
            .put_object("pipeline", "inputs/docs.parquet", &parquet)
            .expect("put should succeed");

        let jobs = handle_preprocess(
            json!({
                "s3_uri": "s3://pipeline/inputs/docs.parquet",
                "job_name_prefix": "embed",
                "model_id": "amazon.titan-embed-text-v2:0",
                "max_records_per_job": 2,
                "max_num_jobs": 2,
                "run_stamp": "manual"
            }),
            &config(),
            &store,
            &catalog(),
            &mut counter_ids(),
        )
        .expect("preprocess should succeed");

        assert_eq!(jobs.jobs.len(), 2);
        assert_eq!(jobs.jobs[1].job_name, "embed-0001-manual");
        assert!(store
            .get_object("pipeline", "batch_inputs_json/embed/0002.jsonl")
            .is_err());
    }

    #[test]
    fn rejects_unsupported_extension() {
        let store = MemoryObjectStore::new();
        let error = handle_preprocess(
            json!({
                "s3_uri": "s3://pipeline/inputs/topics.txt",
                "job_name_prefix": "jokes",
                "model_id": "anthropic.claude-v2",
                "prompt_id": "joke_about_topic"
            }),
            &config(),
            &store,
            &catalog(),
            &mut counter_ids(),
        )
        .expect_err("txt input should be rejected");

        assert!(matches!(error, HandlerError::UnsupportedInputFormat(_)));
    }

    #[test]
    fn embedding_input_without_text_column_fails() {
        let store = MemoryObjectStore::new();
        store
            .put_object("pipeline", "inputs/docs.csv", b"body\nhello\n")
            .expect("put should succeed");

        let error = handle_preprocess(
            json!({
                "s3_uri": "s3://pipeline/inputs/docs.csv",
                "job_name_prefix": "embed",
                "model_id": "amazon.titan-embed-text-v2:0"
            }),
            &config(),
            &store,
            &catalog(),
            &mut counter_ids(),
        )
        .expect_err("missing input_text should fail");

        assert!(matches!(
            error,
            HandlerError::Preprocess(PreprocessError::MissingInputTextColumn)
        ));
    }

    #[test]
    fn dataset_ids_are_rejected() {
        let store = MemoryObjectStore::new();
        let error = handle_preprocess(
            json!({
                "dataset_id": "imdb",
                "job_name_prefix": "reviews",
                "model_id": "anthropic.claude-v2",
                "prompt_id": "summarize_text"
            }),
            &config(),
            &store,
            &catalog(),
            &mut counter_ids(),
        )
        .expect_err("dataset ids are not supported");

        assert!(matches!(error, HandlerError::Contract(_)));
    }
}
