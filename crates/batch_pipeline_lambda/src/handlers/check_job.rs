use std::time::Duration;

use batch_pipeline_core::contract::BatchJobStatus;
use batch_pipeline_core::retry::BackoffPolicy;
use serde_json::{Map, Value};
use tracing::info;

use crate::adapters::batch_jobs::BatchJobClient;
use crate::error::HandlerError;
use crate::retry::retry_with_backoff;

/// Polls one job and returns the event with `status`, `is_terminal`,
/// `is_success` and `message` merged in, for a Step Functions choice state.
pub fn handle_check_job(
    event: Value,
    client: &impl BatchJobClient,
    policy: &BackoffPolicy,
    sleep: &mut dyn FnMut(Duration),
) -> Result<Value, HandlerError> {
    let Value::Object(mut fields) = event else {
        return Err(HandlerError::MalformedEvent(
            "event must be a JSON object".to_string(),
        ));
    };
    let job_arn = fields
        .get("job_arn")
        .and_then(Value::as_str)
        .filter(|arn| !arn.is_empty())
        .ok_or_else(|| HandlerError::MalformedEvent("missing 'job_arn'".to_string()))?
        .to_string();

    let state = retry_with_backoff(policy, sleep, || client.job_state(&job_arn))
        .map_err(HandlerError::Bedrock)?;
    let status: BatchJobStatus = state.status.parse()?;

    info!(
        component = "check_batch_job",
        event = "job_status",
        job_arn = %job_arn,
        status = %status,
        "polled batch job"
    );

    merge_status(&mut fields, status, state.message);
    Ok(Value::Object(fields))
}

fn merge_status(fields: &mut Map<String, Value>, status: BatchJobStatus, message: Option<String>) {
    fields.insert("status".to_string(), Value::from(status.as_str()));
    fields.insert("is_terminal".to_string(), Value::Bool(status.is_terminal()));
    fields.insert("is_success".to_string(), Value::Bool(status.is_success()));
    fields.insert(
        "message".to_string(),
        message.map_or(Value::Null, Value::String),
    );
}
