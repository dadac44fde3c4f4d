use batch_pipeline_core::contract::{PipelineConfig, ValidationResult};
use batch_pipeline_core::prompts::PromptCatalog;
use batch_pipeline_core::storage_keys::split_s3_uri;
use batch_pipeline_core::validation::validate_pipeline;
use serde_json::Value;
use tracing::{error, info};

use crate::adapters::object_store::ObjectStore;
use crate::error::HandlerError;

pub const CONFIG_URI_FIELD: &str = "pipeline_config_s3_uri";

/// Validates a pipeline config given inline or by `pipeline_config_s3_uri`.
/// Failures to load or parse the config are reported as an invalid result.
pub fn handle_validate_pipeline(
    event: Value,
    store: &impl ObjectStore,
    catalog: &PromptCatalog,
) -> ValidationResult {
    let config = match load_pipeline_config(event, store) {
        Ok(config) => config,
        Err(load_error) => {
            error!(
                component = "validate_pipeline",
                event = "config_load_failed",
                error = %load_error,
                "could not load pipeline config"
            );
            return ValidationResult::invalid(
                vec![format!("Validation failed with exception: {load_error}")],
                Vec::new(),
            );
        }
    };

    let result = validate_pipeline(&config, catalog);
    info!(
        component = "validate_pipeline",
        event = "validation_completed",
        valid = result.valid,
        errors = result.errors.len(),
        warnings = result.warnings.len(),
        stages = config.stages.len(),
        "validated pipeline config"
    );
    result
}

fn load_pipeline_config(
    event: Value,
    store: &impl ObjectStore,
) -> Result<PipelineConfig, HandlerError> {
    let config = match event.get(CONFIG_URI_FIELD).and_then(Value::as_str) {
        Some(uri) => {
            let (bucket, key) = split_s3_uri(uri)?;
            let body = store
                .get_object(&bucket, &key)
                .map_err(HandlerError::Storage)?;
            serde_json::from_slice::<Value>(&body).map_err(HandlerError::malformed_event)?
        }
        None => event,
    };
    serde_json::from_value(config).map_err(HandlerError::malformed_event)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::adapters::object_store::MemoryObjectStore;

    fn catalog() -> PromptCatalog {
        PromptCatalog::bundled().expect("bundled catalog should load")
    }

    fn pipeline() -> Value {
        json!({
            "pipeline_name": "jokes",
            "stages": [{
                "stage_name": "tell",
                "model_id": "anthropic.claude-3-haiku-20240307-v1:0",
                "job_name_prefix": "tell",
                "input_s3_uri": "s3://pipeline/inputs/topics.csv",
                "prompt_config": {"mode": "single", "prompt_id": "joke_about_topic"}
            }]
        })
    }

    #[test]
    fn validates_inline_config() {
        let store = MemoryObjectStore::new();

        let result = handle_validate_pipeline(pipeline(), &store, &catalog());

        assert!(result.valid, "unexpected errors: {:?}", result.errors);
        assert!(result.config_fingerprint.is_some());
        assert!(result.estimated_records.is_none());
    }

    #[test]
    fn null_stage_fields_are_treated_as_unset() {
        let store = MemoryObjectStore::new();
        let mut config = pipeline();
        config["stages"][0]["category_to_prompt_mapping"] = Value::Null;
        config["stages"][0]["column_mappings"] = Value::Null;
        config["stages"][0]["use_previous_output"] = Value::Null;

        let result = handle_validate_pipeline(config, &store, &catalog());

        assert!(result.valid, "unexpected errors: {:?}", result.errors);
    }

    #[test]
    fn loads_config_from_store() {
        let store = MemoryObjectStore::new();
        let mut config = pipeline();
        config["stages"][0]["model_id"] = json!("meta.llama3-8b-instruct-v1:0");
        store
            .put_object("pipeline", "configs/jokes.json", config.to_string().as_bytes())
            .expect("put should succeed");

        let result = handle_validate_pipeline(
            json!({"pipeline_config_s3_uri": "s3://pipeline/configs/jokes.json"}),
            &store,
            &catalog(),
        );

        assert!(!result.valid);
        assert!(result.errors[0].contains("meta.llama3-8b-instruct-v1:0"));
    }

    #[test]
    fn load_failures_become_invalid_results() {
        let store = MemoryObjectStore::new();

        let missing = handle_validate_pipeline(
            json!({"pipeline_config_s3_uri": "s3://pipeline/configs/missing.json"}),
            &store,
            &catalog(),
        );
        let malformed = handle_validate_pipeline(
            json!({"pipeline_name": "x", "stages": "not-a-list"}),
            &store,
            &catalog(),
        );

        for result in [missing, malformed] {
            assert!(!result.valid);
            assert_eq!(result.errors.len(), 1);
            assert!(result.errors[0].starts_with("Validation failed with exception: "));
        }
    }
}
