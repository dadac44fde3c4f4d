use batch_pipeline_core::preprocess::random_record_id;
use batch_pipeline_core::retry::BackoffPolicy;
use batch_pipeline_lambda::adapters::aws::{BedrockBatchJobClient, S3ObjectStore, SnsNotifier};
use batch_pipeline_lambda::catalog::load_prompt_catalog;
use batch_pipeline_lambda::config::{HandlerKind, RuntimeConfig, PIPELINE_HANDLER_ENV};
use batch_pipeline_lambda::error::HandlerError;
use batch_pipeline_lambda::handlers::check_job::handle_check_job;
use batch_pipeline_lambda::handlers::notify::handle_notify;
use batch_pipeline_lambda::handlers::postprocess::handle_postprocess;
use batch_pipeline_lambda::handlers::preprocess::{handle_preprocess, PreprocessConfig};
use batch_pipeline_lambda::handlers::start_job::handle_start_job;
use batch_pipeline_lambda::handlers::transform_stage::handle_transform_stage;
use batch_pipeline_lambda::handlers::validate_pipeline::handle_validate_pipeline;
use batch_pipeline_lambda::logging::init_logging;
use batch_pipeline_lambda::retry::blocking_sleep;
use chrono::Utc;
use lambda_runtime::{service_fn, Error, LambdaEvent};
use serde::Serialize;
use serde_json::Value;
use tracing::error;

const RUN_STAMP_FORMAT: &str = "%Y%m%dT%H%M%S";

async fn handle_request(event: LambdaEvent<Value>) -> Result<Value, Error> {
    let config = RuntimeConfig::from_env()?;
    let handler = config
        .handler
        .ok_or(HandlerError::MissingConfig(PIPELINE_HANDLER_ENV))?;

    let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
    let store = S3ObjectStore::new(aws_sdk_s3::Client::new(&aws_config));

    dispatch(handler, event.payload, &config, &store, &aws_config).map_err(|handler_error| {
        error!(
            component = "pipeline_runtime",
            event = "handler_failed",
            handler = %handler,
            error = %handler_error,
            "handler failed"
        );
        Error::from(handler_error)
    })
}

fn dispatch(
    handler: HandlerKind,
    payload: Value,
    config: &RuntimeConfig,
    store: &S3ObjectStore,
    aws_config: &aws_config::SdkConfig,
) -> Result<Value, HandlerError> {
    let policy = BackoffPolicy::default();
    match handler {
        HandlerKind::Preprocess => {
            let catalog = load_prompt_catalog(store, config.prompt_catalog_s3_uri.as_deref())?;
            let preprocess_config = PreprocessConfig {
                bucket: config.bucket()?.to_string(),
                default_max_records_per_job: config.max_records_per_job,
                run_stamp: Utc::now().format(RUN_STAMP_FORMAT).to_string(),
            };
            let mut new_record_id = random_record_id;
            to_value(handle_preprocess(
                payload,
                &preprocess_config,
                store,
                &catalog,
                &mut new_record_id,
            )?)
        }
        HandlerKind::StartBatchJob => {
            let client = BedrockBatchJobClient::new(aws_sdk_bedrock::Client::new(aws_config));
            to_value(handle_start_job(
                payload,
                config.batch_role_arn()?,
                &client,
                &policy,
                &mut blocking_sleep,
            )?)
        }
        HandlerKind::CheckBatchJob => {
            let client = BedrockBatchJobClient::new(aws_sdk_bedrock::Client::new(aws_config));
            handle_check_job(payload, &client, &policy, &mut blocking_sleep)
        }
        HandlerKind::Postprocess => to_value(handle_postprocess(payload, store)?),
        HandlerKind::TransformStage => handle_transform_stage(payload, config.bucket()?, store),
        HandlerKind::ValidatePipeline => {
            let catalog = load_prompt_catalog(store, config.prompt_catalog_s3_uri.as_deref())?;
            to_value(handle_validate_pipeline(payload, store, &catalog))
        }
        HandlerKind::SendNotification => {
            let notifier = SnsNotifier::new(aws_sdk_sns::Client::new(aws_config));
            to_value(handle_notify(
                payload,
                config.sns_topic_arn.as_deref(),
                Utc::now(),
                store,
                &notifier,
            )?)
        }
    }
}

fn to_value(response: impl Serialize) -> Result<Value, HandlerError> {
    serde_json::to_value(response)
        .map_err(|error| HandlerError::MalformedEvent(format!("failed to serialize response: {error}")))
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    init_logging();
    lambda_runtime::run(service_fn(handle_request)).await
}
