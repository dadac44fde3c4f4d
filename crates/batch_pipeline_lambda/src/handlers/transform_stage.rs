use batch_pipeline_core::storage_keys::{output_parquet_prefix, s3_uri, transformed_input_key};
use batch_pipeline_core::table::Table;
use batch_pipeline_core::transform::{
    stage_index, transform_previous_output, StageEvent, TransformError,
};
use serde_json::Value;
use tracing::{info, warn};

use crate::adapters::object_store::ObjectStore;
use crate::adapters::tabular::{read_parquet, write_parquet};
use crate::error::HandlerError;

const PARQUET_SUFFIX: &str = ".parquet";

/// Prepares the input for the stage at `stage_index` from the previous
/// stage's joined output. The first stage passes through untouched.
pub fn handle_transform_stage(
    event: Value,
    bucket: &str,
    store: &impl ObjectStore,
) -> Result<Value, HandlerError> {
    if stage_index(&event) == 0 {
        info!(
            component = "transform_stage",
            event = "first_stage_passthrough",
            "first stage needs no transformation"
        );
        return Ok(event);
    }

    let stage_event = StageEvent::from_event(&event)?;

    let previous_prefix = stage_event.previous_job_name_prefix()?.to_string();
    let current_prefix = stage_event.current_job_name_prefix().to_string();
    info!(
        component = "transform_stage",
        event = "transform_started",
        stage_index = stage_event.stage_index,
        previous_prefix = %previous_prefix,
        current_prefix = %current_prefix,
        "transforming previous stage output"
    );

    let parts_prefix = output_parquet_prefix(&previous_prefix);
    let part_keys: Vec<String> = store
        .list_keys(bucket, &parts_prefix)
        .map_err(HandlerError::Storage)?
        .into_iter()
        .filter(|key| key.ends_with(PARQUET_SUFFIX))
        .collect();
    if part_keys.is_empty() {
        return Err(TransformError::PreviousOutputNotFound(s3_uri(bucket, &parts_prefix)).into());
    }

    let mut table = Table::default();
    for key in &part_keys {
        let body = store.get_object(bucket, key).map_err(HandlerError::Storage)?;
        table.concat(read_parquet(body).map_err(HandlerError::Tabular)?);
    }
    let input_rows = table.len();

    let transformed = transform_previous_output(table, &stage_event.stage);
    for message in &transformed.warnings {
        warn!(
            component = "transform_stage",
            event = "transform_warning",
            message = %message,
            "stage transform warning"
        );
    }

    let key = transformed_input_key(&previous_prefix, &current_prefix);
    let parquet = write_parquet(&transformed.table).map_err(HandlerError::Tabular)?;
    store
        .put_object(bucket, &key, &parquet)
        .map_err(HandlerError::Storage)?;

    let input_s3_uri = s3_uri(bucket, &key);
    info!(
        component = "transform_stage",
        event = "transform_completed",
        parts = part_keys.len(),
        input_rows,
        output_rows = transformed.table.len(),
        input_s3_uri = %input_s3_uri,
        "wrote transformed stage input"
    );
    Ok(stage_event.into_next_stage(input_s3_uri))
}

#[cfg(test)]
mod tests {
    use batch_pipeline_core::table::Row;
    use serde_json::json;

    use super::*;
    use crate::adapters::object_store::MemoryObjectStore;

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.clone()))
            .collect()
    }

    fn seed_part(store: &MemoryObjectStore, key: &str, rows: Vec<Row>) {
        let parquet = write_parquet(&Table::from_rows(rows)).expect("parquet should encode");
        store
            .put_object("pipeline", key, &parquet)
            .expect("put should succeed");
    }

    fn all_stages() -> Value {
        json!([
            {"stage_name": "classify", "job_name_prefix": "classify"},
            {"stage_name": "respond", "job_name_prefix": "respond"}
        ])
    }

    #[test]
    fn first_stage_is_returned_unchanged() {
        let store = MemoryObjectStore::new();
        let event = json!({"stage_index": 0, "job_name_prefix": "classify", "all_stages": all_stages()});

        let result =
            handle_transform_stage(event.clone(), "pipeline", &store).expect("passthrough");

        assert_eq!(result, event);
        assert!(store.keys("pipeline").is_empty());
    }

    #[test]
    fn first_stage_passes_through_without_parsing_stage_fields() {
        let store = MemoryObjectStore::new();
        let event = json!({
            "stage_index": 0,
            "job_name_prefix": "classify",
            "column_mappings": null,
            "prompt_config": "classify_ticket",
            "all_stages": all_stages()
        });

        let result =
            handle_transform_stage(event.clone(), "pipeline", &store).expect("passthrough");

        assert_eq!(result, event);
    }

    #[test]
    fn concatenates_parts_and_routes_categories() {
        let store = MemoryObjectStore::new();
        seed_part(
            &store,
            "batch_output_parquet/classify/0000.snappy.parquet",
            vec![row(&[
                ("record_id", json!("a")),
                ("ticket_text", json!("refund")),
                ("response", json!("{\"category\": \"Billing\"}")),
            ])],
        );
        seed_part(
            &store,
            "batch_output_parquet/classify/0001.snappy.parquet",
            vec![row(&[
                ("record_id", json!("b")),
                ("ticket_text", json!("hello")),
                ("response", json!(" Spam ")),
            ])],
        );

        let event = json!({
            "$": {
                "stage_name": "respond",
                "job_name_prefix": "respond",
                "model_id": "anthropic.claude-3-haiku-20240307-v1:0",
                "use_previous_output": true,
                "prompt_config": {"mode": "mapped", "column_name": "prompt_template"},
                "category_to_prompt_mapping": {"billing": "billing_response"},
                "column_mappings": {"classification": "missing_column"}
            },
            "job_name_prefix": "ignored",
            "stage_index": 1,
            "all_stages": all_stages(),
            "pipeline_name": "support"
        });

        let result = handle_transform_stage(event, "pipeline", &store).expect("transform should succeed");

        let key = "batch_inputs_parquet/classify_to_respond/transformed.snappy.parquet";
        assert_eq!(result["input_s3_uri"], format!("s3://pipeline/{key}"));
        assert_eq!(result["job_name_prefix"], "respond");
        assert_eq!(result["stage_index"], 1);
        assert_eq!(result["pipeline_name"], "support");
        assert_eq!(result["all_stages"], all_stages());

        let table = read_parquet(store.get_object("pipeline", key).expect("written"))
            .expect("transformed parquet should decode");
        assert_eq!(table.len(), 2);
        assert_eq!(
            table.column_values("category"),
            vec![json!("Billing"), json!(" Spam ")]
        );
        assert_eq!(
            table.column_values("prompt_template"),
            vec![json!("billing_response"), Value::Null]
        );
        assert_eq!(
            table.column_values("classification"),
            table.column_values("response")
        );
    }

    #[test]
    fn missing_previous_output_is_reported() {
        let store = MemoryObjectStore::new();
        let event = json!({
            "stage_name": "respond",
            "job_name_prefix": "respond",
            "stage_index": 1,
            "all_stages": all_stages()
        });

        let error = handle_transform_stage(event, "pipeline", &store)
            .expect_err("missing output should fail");

        assert!(error
            .to_string()
            .starts_with("Previous stage output not found: s3://pipeline/batch_output_parquet/classify/"));
    }

    #[test]
    fn previous_stage_without_prefix_is_an_error() {
        let store = MemoryObjectStore::new();
        let event = json!({
            "job_name_prefix": "respond",
            "stage_index": 1,
            "all_stages": [{"stage_name": "classify"}, {"stage_name": "respond"}]
        });

        assert!(matches!(
            handle_transform_stage(event, "pipeline", &store),
            Err(HandlerError::Transform(TransformError::MissingPreviousPrefix))
        ));
    }
}
