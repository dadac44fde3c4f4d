use batch_pipeline_core::prompts::PromptCatalog;
use batch_pipeline_core::storage_keys::split_s3_uri;
use tracing::info;

use crate::adapters::object_store::ObjectStore;
use crate::error::HandlerError;

/// Loads the prompt catalog from `catalog_uri` when set, otherwise the copy
/// compiled into the binary.
pub fn load_prompt_catalog(
    store: &impl ObjectStore,
    catalog_uri: Option<&str>,
) -> Result<PromptCatalog, HandlerError> {
    let Some(uri) = catalog_uri else {
        return Ok(PromptCatalog::bundled()?);
    };

    let (bucket, key) = split_s3_uri(uri)?;
    let body = store
        .get_object(&bucket, &key)
        .map_err(HandlerError::Storage)?;
    let text = String::from_utf8(body)
        .map_err(|error| HandlerError::Storage(format!("prompt catalog {uri} is not UTF-8: {error}")))?;
    let catalog = PromptCatalog::from_json(&text)?;
    info!(component = "catalog", event = "catalog_loaded", uri, "loaded prompt catalog");
    Ok(catalog)
}
