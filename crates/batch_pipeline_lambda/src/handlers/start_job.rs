use std::time::Duration;

use batch_pipeline_core::contract::JobConfig;
use batch_pipeline_core::retry::BackoffPolicy;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info};

use crate::adapters::batch_jobs::{BatchJobClient, BatchJobRequest};
use crate::error::HandlerError;
use crate::retry::retry_with_backoff;

/// The job config handed back to the state machine with the new job's ARN.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StartedJob {
    #[serde(flatten)]
    pub job: JobConfig,
    pub job_arn: String,
}

pub fn handle_start_job(
    event: Value,
    role_arn: &str,
    client: &impl BatchJobClient,
    policy: &BackoffPolicy,
    sleep: &mut dyn FnMut(Duration),
) -> Result<StartedJob, HandlerError> {
    let job: JobConfig = serde_json::from_value(event).map_err(HandlerError::malformed_event)?;
    let request = BatchJobRequest {
        job_name: job.job_name.clone(),
        model_id: job.model_id.clone(),
        role_arn: role_arn.to_string(),
        input_s3_uri: job.s3_uri_input.clone(),
        output_s3_uri: job.s3_uri_output.clone(),
    };

    let job_arn = retry_with_backoff(policy, sleep, || client.create_job(&request)).map_err(
        |client_error| {
            error!(
                component = "start_batch_job",
                event = "create_job_failed",
                job_name = %request.job_name,
                error = %client_error,
                "failed to create batch job"
            );
            HandlerError::Bedrock(client_error)
        },
    )?;

    info!(
        component = "start_batch_job",
        event = "job_created",
        job_name = %request.job_name,
        job_arn = %job_arn,
        record_count = job.record_count,
        "created batch inference job"
    );
    Ok(StartedJob { job, job_arn })
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Mutex;

    use serde_json::json;

    use super::*;
    use crate::adapters::batch_jobs::{BatchJobState, ClientError};

    /// Fails with each queued error in turn, then succeeds.
    pub(crate) struct ScriptedJobClient {
        pub failures: Mutex<Vec<ClientError>>,
        pub requests: Mutex<Vec<BatchJobRequest>>,
        pub states: Mutex<Vec<BatchJobState>>,
    }

    impl ScriptedJobClient {
        pub(crate) fn new(failures: Vec<ClientError>) -> Self {
            Self {
                failures: Mutex::new(failures),
                requests: Mutex::new(Vec::new()),
                states: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn with_state(status: &str, message: Option<&str>) -> Self {
            let client = Self::new(Vec::new());
            client
                .states
                .lock()
                .expect("states lock should not be poisoned")
                .push(BatchJobState {
                    status: status.to_string(),
                    message: message.map(str::to_string),
                });
            client
        }

        fn next_failure(&self) -> Option<ClientError> {
            let mut failures = self
                .failures
                .lock()
                .expect("failures lock should not be poisoned");
            (!failures.is_empty()).then(|| failures.remove(0))
        }
    }

    impl BatchJobClient for ScriptedJobClient {
        fn create_job(&self, request: &BatchJobRequest) -> Result<String, ClientError> {
            self.requests
                .lock()
                .expect("requests lock should not be poisoned")
                .push(request.clone());
            match self.next_failure() {
                Some(error) => Err(error),
                None => Ok(format!(
                    "arn:aws:bedrock:us-east-1:123456789012:model-invocation-job/{}",
                    request.job_name
                )),
            }
        }

        fn job_state(&self, _job_arn: &str) -> Result<BatchJobState, ClientError> {
            if let Some(error) = self.next_failure() {
                return Err(error);
            }
            self.states
                .lock()
                .expect("states lock should not be poisoned")
                .first()
                .cloned()
                .ok_or_else(|| ClientError::new(Some("ResourceNotFoundException"), "no such job"))
        }
    }

    fn job_event() -> Value {
        json!({
            "model_id": "anthropic.claude-3-haiku-20240307-v1:0",
            "job_name": "jokes-0000-20261016T120000",
            "job_name_prefix": "jokes",
            "part_index": 0,
            "input_parquet_path": "s3://pipeline/batch_inputs_parquet/jokes/0000.snappy.parquet",
            "s3_uri_input": "s3://pipeline/batch_inputs_json/jokes/0000.jsonl",
            "s3_uri_output": "s3://pipeline/batch_outputs_json/jokes/0000/",
            "record_count": 3
        })
    }

    fn policy() -> BackoffPolicy {
        BackoffPolicy {
            max_attempts: 4,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
        }
    }

    #[test]
    fn builds_request_and_returns_arn_with_job_fields() {
        let client = ScriptedJobClient::new(Vec::new());

        let started = handle_start_job(job_event(), "arn:role", &client, &policy(), &mut |_| {})
            .expect("start should succeed");

        let requests = client.requests.lock().expect("requests lock");
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].role_arn, "arn:role");
        assert_eq!(
            requests[0].input_s3_uri,
            "s3://pipeline/batch_inputs_json/jokes/0000.jsonl"
        );
        assert!(started.job_arn.ends_with("/jokes-0000-20261016T120000"));

        let wire = serde_json::to_value(&started).expect("started job should serialize");
        assert_eq!(wire["part_index"], 0);
        assert_eq!(wire["job_arn"], json!(started.job_arn));
    }

    #[test]
    fn throttled_create_is_retried() {
        let client = ScriptedJobClient::new(vec![
            ClientError::new(Some("ThrottlingException"), "rate exceeded"),
            ClientError::new(Some("ServiceQuotaExceededException"), "too many jobs"),
        ]);
        let mut slept = Vec::new();

        handle_start_job(
            job_event(),
            "arn:role",
            &client,
            &policy(),
            &mut |delay| slept.push(delay),
        )
        .expect("third attempt should succeed");

        assert_eq!(client.requests.lock().expect("requests lock").len(), 3);
        assert_eq!(
            slept,
            vec![Duration::from_millis(10), Duration::from_millis(20)]
        );
    }

    #[test]
    fn validation_errors_propagate_without_retry() {
        let client = ScriptedJobClient::new(vec![ClientError::new(
            Some("ValidationException"),
            "role cannot be assumed",
        )]);

        let error = handle_start_job(job_event(), "arn:role", &client, &policy(), &mut |_| {})
            .expect_err("validation error should propagate");

        assert!(matches!(error, HandlerError::Bedrock(_)));
        assert_eq!(client.requests.lock().expect("requests lock").len(), 1);
    }
}
