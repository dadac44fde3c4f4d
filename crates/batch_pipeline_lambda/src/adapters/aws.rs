//! AWS SDK implementations of the adapter traits.
//!
//! Handlers are synchronous, so each call blocks the current worker on the
//! async SDK future. The runtime must be multi-threaded for `block_in_place`.

use std::future::Future;
use std::time::Duration;

use aws_sdk_bedrock::error::{DisplayErrorContext, ProvideErrorMetadata};
use aws_sdk_bedrock::types::{
    ModelInvocationJobInputDataConfig, ModelInvocationJobOutputDataConfig,
    ModelInvocationJobS3InputDataConfig, ModelInvocationJobS3OutputDataConfig,
};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;

use crate::adapters::batch_jobs::{BatchJobClient, BatchJobRequest, BatchJobState, ClientError};
use crate::adapters::notifier::Notifier;
use crate::adapters::object_store::ObjectStore;

fn block_on<F: Future>(future: F) -> F::Output {
    tokio::task::block_in_place(|| tokio::runtime::Handle::current().block_on(future))
}

fn client_error<E>(error: &E) -> ClientError
where
    E: ProvideErrorMetadata + std::error::Error,
{
    ClientError::new(error.code(), DisplayErrorContext(error).to_string())
}

#[derive(Debug, Clone)]
pub struct S3ObjectStore {
    client: aws_sdk_s3::Client,
}

impl S3ObjectStore {
    pub fn new(client: aws_sdk_s3::Client) -> Self {
        Self { client }
    }
}

impl ObjectStore for S3ObjectStore {
    fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>, String> {
        block_on(async {
            let output = self
                .client
                .get_object()
                .bucket(bucket)
                .key(key)
                .send()
                .await
                .map_err(|error| {
                    format!(
                        "failed to read s3://{bucket}/{key}: {}",
                        DisplayErrorContext(&error)
                    )
                })?;
            let data = output
                .body
                .collect()
                .await
                .map_err(|error| format!("failed to read body of s3://{bucket}/{key}: {error}"))?;
            Ok(data.into_bytes().to_vec())
        })
    }

    fn put_object(&self, bucket: &str, key: &str, body: &[u8]) -> Result<(), String> {
        let body = ByteStream::from(body.to_vec());
        block_on(async {
            self.client
                .put_object()
                .bucket(bucket)
                .key(key)
                .body(body)
                .send()
                .await
                .map(|_| ())
                .map_err(|error| {
                    format!(
                        "failed to write s3://{bucket}/{key}: {}",
                        DisplayErrorContext(&error)
                    )
                })
        })
    }

    fn list_keys(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, String> {
        block_on(async {
            let mut keys = Vec::new();
            let mut pages = self
                .client
                .list_objects_v2()
                .bucket(bucket)
                .prefix(prefix)
                .into_paginator()
                .send();
            while let Some(page) = pages.next().await {
                let page = page.map_err(|error| {
                    format!(
                        "failed to list s3://{bucket}/{prefix}: {}",
                        DisplayErrorContext(&error)
                    )
                })?;
                keys.extend(
                    page.contents()
                        .iter()
                        .filter_map(|object| object.key().map(str::to_string)),
                );
            }
            keys.sort();
            Ok(keys)
        })
    }

    fn presign_get(
        &self,
        bucket: &str,
        key: &str,
        expires_in: Duration,
    ) -> Result<String, String> {
        let config = PresigningConfig::expires_in(expires_in)
            .map_err(|error| format!("invalid presign expiry: {error}"))?;
        block_on(async {
            self.client
                .get_object()
                .bucket(bucket)
                .key(key)
                .presigned(config)
                .await
                .map(|request| request.uri().to_string())
                .map_err(|error| {
                    format!(
                        "failed to presign s3://{bucket}/{key}: {}",
                        DisplayErrorContext(&error)
                    )
                })
        })
    }
}

#[derive(Debug, Clone)]
pub struct BedrockBatchJobClient {
    client: aws_sdk_bedrock::Client,
}

impl BedrockBatchJobClient {
    pub fn new(client: aws_sdk_bedrock::Client) -> Self {
        Self { client }
    }
}

impl BatchJobClient for BedrockBatchJobClient {
    fn create_job(&self, request: &BatchJobRequest) -> Result<String, ClientError> {
        let input = ModelInvocationJobS3InputDataConfig::builder()
            .s3_uri(&request.input_s3_uri)
            .build()
            .map_err(|error| ClientError::new(None, error.to_string()))?;
        let output = ModelInvocationJobS3OutputDataConfig::builder()
            .s3_uri(&request.output_s3_uri)
            .build()
            .map_err(|error| ClientError::new(None, error.to_string()))?;

        block_on(async {
            self.client
                .create_model_invocation_job()
                .job_name(&request.job_name)
                .role_arn(&request.role_arn)
                .model_id(&request.model_id)
                .input_data_config(ModelInvocationJobInputDataConfig::S3InputDataConfig(input))
                .output_data_config(ModelInvocationJobOutputDataConfig::S3OutputDataConfig(
                    output,
                ))
                .send()
                .await
                .map(|output| output.job_arn().to_string())
                .map_err(|error| client_error(&error))
        })
    }

    fn job_state(&self, job_arn: &str) -> Result<BatchJobState, ClientError> {
        block_on(async {
            let output = self
                .client
                .get_model_invocation_job()
                .job_identifier(job_arn)
                .send()
                .await
                .map_err(|error| client_error(&error))?;
            Ok(BatchJobState {
                status: output
                    .status()
                    .map(|status| status.as_str().to_string())
                    .unwrap_or_default(),
                message: output.message().map(str::to_string),
            })
        })
    }
}

#[derive(Debug, Clone)]
pub struct SnsNotifier {
    client: aws_sdk_sns::Client,
}

impl SnsNotifier {
    pub fn new(client: aws_sdk_sns::Client) -> Self {
        Self { client }
    }
}

impl Notifier for SnsNotifier {
    fn publish(&self, topic_arn: &str, subject: &str, message: &str) -> Result<String, String> {
        block_on(async {
            self.client
                .publish()
                .topic_arn(topic_arn)
                .subject(subject)
                .message(message)
                .send()
                .await
                .map(|output| output.message_id().unwrap_or_default().to_string())
                .map_err(|error| {
                    format!(
                        "failed to publish to {topic_arn}: {}",
                        aws_sdk_sns::error::DisplayErrorContext(&error)
                    )
                })
        })
    }
}
