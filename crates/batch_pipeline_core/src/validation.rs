//! Pre-flight checks for a multi-stage pipeline configuration.
//!
//! Every rule appends to an error or warning list instead of stopping at the
//! first problem, so a single validation run reports everything wrong with a
//! config.

use std::collections::BTreeSet;

use crate::contract::{config_fingerprint, PipelineConfig, PipelineStage, PromptConfig, ValidationResult};
use crate::prompts::PromptCatalog;

pub const SUPPORTED_MODEL_PREFIXES: [&str; 3] = ["anthropic.", "amazon.nova", "amazon.titan"];

/// Expansion multipliers above this produce a warning.
pub const HIGH_EXPANSION_MULTIPLIER: f64 = 5.0;

pub fn validate_pipeline(config: &PipelineConfig, catalog: &PromptCatalog) -> ValidationResult {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if config.pipeline_name.is_none() {
        errors.push("Pipeline configuration missing 'pipeline_name' field".to_string());
    }
    if config.stages.is_empty() {
        errors.push(
            "Pipeline configuration missing 'stages' field or stages list is empty".to_string(),
        );
        return ValidationResult::invalid(errors, warnings);
    }

    errors.extend(validate_stage_dependencies(&config.stages));
    errors.extend(validate_unique_stage_fields(&config.stages));

    for (index, stage) in config.stages.iter().enumerate() {
        let stage_name = stage.display_name(index);

        if stage.stage_name.is_none() {
            errors.push(format!("Stage {}: Missing 'stage_name' field", index + 1));
        }
        match stage.model_id.as_deref() {
            None => errors.push(format!("Stage '{stage_name}': Missing 'model_id' field")),
            Some(model_id) => errors.extend(validate_model_id(model_id, &stage_name)),
        }
        if stage.job_name_prefix.is_none() {
            errors.push(format!("Stage '{stage_name}': Missing 'job_name_prefix' field"));
        }
        match &stage.prompt_config {
            None => errors.push(format!("Stage '{stage_name}': Missing 'prompt_config' field")),
            Some(prompt_config) => {
                errors.extend(validate_prompt_references(prompt_config, &stage_name, catalog));
                let multiplier = expansion_multiplier(prompt_config, catalog);
                if multiplier > HIGH_EXPANSION_MULTIPLIER {
                    warnings.push(format!(
                        "Stage '{stage_name}': High expansion multiplier ({multiplier:.1}x) may significantly increase processing time and cost"
                    ));
                }
            }
        }
        if let Some(schema) = &stage.output_schema {
            if let Err(error) = schema.compile() {
                errors.push(format!("Stage '{stage_name}': Invalid output_schema: {error}"));
            }
        }
    }

    if !errors.is_empty() {
        return ValidationResult::invalid(errors, warnings);
    }

    // Record and cost estimates need the input data, which validation never reads.
    ValidationResult {
        valid: true,
        errors,
        warnings,
        estimated_records: None,
        estimated_cost_usd: None,
        config_fingerprint: Some(config_fingerprint(config)),
    }
}

pub fn validate_prompt_references(
    prompt_config: &PromptConfig,
    stage_name: &str,
    catalog: &PromptCatalog,
) -> Vec<String> {
    let mut errors = Vec::new();
    match prompt_config.mode.as_str() {
        "single" => match prompt_config.prompt_id.as_deref() {
            None => errors.push(format!(
                "Stage '{stage_name}': 'prompt_id' is required for single mode"
            )),
            Some(prompt_id) if !catalog.contains(prompt_id) => errors.push(format!(
                "Stage '{stage_name}': Prompt '{prompt_id}' not found in prompt catalog"
            )),
            Some(prompt_id) if catalog.is_expansion_rule(prompt_id) => errors.push(format!(
                "Stage '{stage_name}': '{prompt_id}' is an expansion rule, not a prompt template"
            )),
            Some(_) => {}
        },
        "mapped" => {
            if is_blank(prompt_config.column_name.as_deref()) {
                errors.push(format!(
                    "Stage '{stage_name}': 'column_name' is required for mapped mode"
                ));
            }
        }
        "expanded" => {
            if is_blank(prompt_config.category_column.as_deref()) {
                errors.push(format!(
                    "Stage '{stage_name}': 'category_column' is required for expanded mode"
                ));
            }
            if prompt_config.expansion_mapping.is_empty() {
                errors.push(format!(
                    "Stage '{stage_name}': 'expansion_mapping' is required for expanded mode"
                ));
            }
            for rule_name in prompt_config.expansion_mapping.values() {
                if !catalog.contains(rule_name) {
                    errors.push(format!(
                        "Stage '{stage_name}': Expansion rule '{rule_name}' not found in prompt catalog"
                    ));
                } else if !catalog.is_expansion_rule(rule_name) {
                    errors.push(format!(
                        "Stage '{stage_name}': '{rule_name}' is not an expansion rule"
                    ));
                } else {
                    errors.extend(
                        catalog
                            .validate_expansion_rule(rule_name)
                            .into_iter()
                            .map(|error| format!("Stage '{stage_name}': {error}")),
                    );
                }
            }
        }
        mode => errors.push(format!(
            "Stage '{stage_name}': Invalid prompt_config mode '{mode}'"
        )),
    }
    errors
}

pub fn validate_model_id(model_id: &str, stage_name: &str) -> Vec<String> {
    if SUPPORTED_MODEL_PREFIXES
        .iter()
        .any(|prefix| model_id.starts_with(prefix))
    {
        return Vec::new();
    }
    vec![format!(
        "Stage '{stage_name}': Model ID '{model_id}' does not match supported providers (anthropic, amazon.nova, amazon.titan)"
    )]
}

pub fn validate_stage_dependencies(stages: &[PipelineStage]) -> Vec<String> {
    let mut errors = Vec::new();
    for (index, stage) in stages.iter().enumerate() {
        let stage_name = stage.display_name(index);
        if index == 0 {
            if stage.use_previous_output {
                errors.push(format!(
                    "Stage '{stage_name}': First stage cannot use 'use_previous_output'"
                ));
            }
            continue;
        }

        match (stage.has_input_uri(), stage.use_previous_output) {
            (false, false) => errors.push(format!(
                "Stage '{stage_name}': Must specify either 'input_s3_uri' or 'use_previous_output'"
            )),
            (true, true) => errors.push(format!(
                "Stage '{stage_name}': Cannot specify both 'input_s3_uri' and 'use_previous_output'"
            )),
            _ => {}
        }
    }
    errors
}

/// Stage names and job prefixes key output locations, so they must be unique.
fn validate_unique_stage_fields(stages: &[PipelineStage]) -> Vec<String> {
    let mut errors = Vec::new();
    let mut names = BTreeSet::new();
    let mut prefixes = BTreeSet::new();
    for stage in stages {
        if let Some(name) = stage.stage_name.as_deref() {
            if !names.insert(name) {
                errors.push(format!("Duplicate stage_name '{name}'"));
            }
        }
        if let Some(prefix) = stage.job_name_prefix.as_deref() {
            if !prefixes.insert(prefix) {
                errors.push(format!("Duplicate job_name_prefix '{prefix}'"));
            }
        }
    }
    errors
}

/// Mean number of prompts per valid expansion rule; 1.0 for other modes.
pub fn expansion_multiplier(prompt_config: &PromptConfig, catalog: &PromptCatalog) -> f64 {
    if prompt_config.mode != "expanded" {
        return 1.0;
    }
    let sizes: Vec<usize> = prompt_config
        .expansion_mapping
        .values()
        .filter_map(|rule_name| catalog.expansion_rule(rule_name).ok())
        .map(<[String]>::len)
        .collect();
    if sizes.is_empty() {
        return 1.0;
    }
    sizes.iter().sum::<usize>() as f64 / sizes.len() as f64
}

fn is_blank(value: Option<&str>) -> bool {
    value.map_or(true, |value| value.trim().is_empty())
}
