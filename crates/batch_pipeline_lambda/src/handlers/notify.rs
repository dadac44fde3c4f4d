use std::time::Duration;

use batch_pipeline_core::notification::{
    format_notification, NotificationEvent, NotificationResult, PresignedUrl,
};
use batch_pipeline_core::storage_keys::split_s3_uri;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{error, info};

use crate::adapters::notifier::Notifier;
use crate::adapters::object_store::ObjectStore;
use crate::config::SNS_TOPIC_ARN_ENV;
use crate::error::HandlerError;

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

pub fn handle_notify(
    event: Value,
    topic_arn: Option<&str>,
    now: DateTime<Utc>,
    store: &impl ObjectStore,
    notifier: &impl Notifier,
) -> Result<NotificationResult, HandlerError> {
    let event: NotificationEvent =
        serde_json::from_value(event).map_err(HandlerError::malformed_event)?;
    let output_paths = event.output_paths();
    info!(
        component = "send_notification",
        event = "notification_started",
        pipeline_name = %event.pipeline_name,
        status = %event.status,
        output_count = output_paths.len(),
        "sending pipeline notification"
    );

    let presigned_urls = if event.is_success() {
        presign_outputs(&output_paths, event.presigned_url_expiry_days, now, store)
    } else {
        Vec::new()
    };
    let (subject, message) = format_notification(&event, &presigned_urls);

    let topic_arn = topic_arn.ok_or(HandlerError::MissingConfig(SNS_TOPIC_ARN_ENV))?;
    let message_id = notifier
        .publish(topic_arn, &subject, &message)
        .map_err(HandlerError::Notification)?;

    info!(
        component = "send_notification",
        event = "notification_sent",
        message_id = %message_id,
        "published pipeline notification"
    );
    Ok(NotificationResult {
        notification_sent: true,
        message_id,
        output_count: output_paths.len(),
    })
}

/// Signs a download link per output. A path that cannot be signed gets an
/// entry carrying the error so the message still lists it.
pub fn presign_outputs(
    paths: &[String],
    expiry_days: u64,
    now: DateTime<Utc>,
    store: &impl ObjectStore,
) -> Vec<PresignedUrl> {
    let expires_in = Duration::from_secs(expiry_days.saturating_mul(SECONDS_PER_DAY));
    let expires = chrono::Duration::from_std(expires_in)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .map(|at| at.to_rfc3339())
        .unwrap_or_else(|| "unknown".to_string());

    paths
        .iter()
        .map(|path| {
            let signed = split_s3_uri(path)
                .map_err(|uri_error| uri_error.to_string())
                .and_then(|(bucket, key)| store.presign_get(&bucket, &key, expires_in));
            match signed {
                Ok(url) => PresignedUrl::signed(path.as_str(), url, expires.clone()),
                Err(presign_error) => {
                    error!(
                        component = "send_notification",
                        event = "presign_failed",
                        path = %path,
                        error = %presign_error,
                        "could not presign output"
                    );
                    PresignedUrl::failed(path.as_str(), presign_error)
                }
            }
        })
        .collect()
}
