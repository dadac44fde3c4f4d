//! Pipeline completion notice: event shape and message formatting.

use serde::{Deserialize, Serialize};

use crate::contract::DEFAULT_PRESIGNED_URL_EXPIRY_DAYS;

pub const STATUS_SUCCESS: &str = "SUCCESS";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotificationEvent {
    #[serde(default = "default_pipeline_name")]
    pub pipeline_name: String,
    #[serde(default)]
    pub stage_results: Vec<StageResult>,
    #[serde(default)]
    pub validation: Option<ValidationSummary>,
    #[serde(default = "default_expiry_days")]
    pub presigned_url_expiry_days: u64,
    #[serde(default = "default_status")]
    pub status: String,
    #[serde(default)]
    pub error_message: Option<String>,
}

fn default_pipeline_name() -> String {
    "Unnamed Pipeline".to_string()
}

fn default_expiry_days() -> u64 {
    DEFAULT_PRESIGNED_URL_EXPIRY_DAYS
}

fn default_status() -> String {
    STATUS_SUCCESS.to_string()
}

impl NotificationEvent {
    pub fn is_success(&self) -> bool {
        self.status == STATUS_SUCCESS
    }

    /// Output paths across every stage, in stage order.
    pub fn output_paths(&self) -> Vec<String> {
        self.stage_results
            .iter()
            .flat_map(|stage| stage.output_paths.iter().cloned())
            .collect()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StageResult {
    #[serde(default)]
    pub stage_name: Option<String>,
    #[serde(default)]
    pub output_paths: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ValidationSummary {
    #[serde(default)]
    pub estimated_records: Option<u64>,
    #[serde(default)]
    pub estimated_cost_usd: Option<f64>,
}

impl ValidationSummary {
    /// No estimates at all; formatted like a missing summary.
    pub fn is_empty(&self) -> bool {
        self.estimated_records.is_none() && self.estimated_cost_usd.is_none()
    }
}

/// A download link for one output, or the reason it could not be signed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PresignedUrl {
    pub path: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PresignedUrl {
    pub fn signed(path: impl Into<String>, url: String, expires: String) -> Self {
        Self {
            path: path.into(),
            url: Some(url),
            expires: Some(expires),
            error: None,
        }
    }

    pub fn failed(path: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            url: None,
            expires: None,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct NotificationResult {
    pub notification_sent: bool,
    pub message_id: String,
    pub output_count: usize,
}

/// Returns `(subject, message)`.
pub fn format_notification(
    event: &NotificationEvent,
    presigned_urls: &[PresignedUrl],
) -> (String, String) {
    let name = &event.pipeline_name;
    let success = event.is_success();
    let subject = if success {
        format!("✅ Pipeline Complete: {name}")
    } else {
        format!("❌ Pipeline Failed: {name}")
    };

    let mut lines: Vec<String> = Vec::new();
    if success {
        lines.push(format!("Pipeline '{name}' completed successfully!"));
    } else {
        lines.push(format!("Pipeline '{name}' failed."));
        if let Some(error) = &event.error_message {
            lines.push(format!("\nError: {error}"));
        }
    }
    lines.push(String::new());

    lines.push("Summary:".to_string());
    lines.push(format!("- Total Stages: {}", event.stage_results.len()));
    if let Some(validation) = event
        .validation
        .as_ref()
        .filter(|validation| !validation.is_empty())
    {
        let records = validation
            .estimated_records
            .map_or_else(|| "N/A".to_string(), |records| records.to_string());
        let cost = validation
            .estimated_cost_usd
            .map_or_else(|| "N/A".to_string(), |cost| format!("{cost:.2}"));
        lines.push(format!("- Estimated Records Processed: {records}"));
        lines.push(format!("- Estimated Cost: ${cost}"));
    }
    lines.push(String::new());

    if !event.stage_results.is_empty() {
        lines.push("Stage Results:".to_string());
        for (index, stage) in event.stage_results.iter().enumerate() {
            let number = index + 1;
            let stage_name = stage
                .stage_name
                .clone()
                .unwrap_or_else(|| format!("Stage {number}"));
            lines.push(format!("\n{number}. {stage_name}"));
            if !stage.output_paths.is_empty() {
                lines.push(format!("   Outputs: {} file(s)", stage.output_paths.len()));
            }
        }
    }
    lines.push(String::new());

    if success && !presigned_urls.is_empty() {
        lines.push("Output Files:".to_string());
        lines.push(String::new());
        for (index, entry) in presigned_urls.iter().enumerate() {
            lines.push(format!("{}. {}", index + 1, entry.path));
            match (&entry.url, &entry.error) {
                (Some(url), _) => {
                    lines.push(format!("   Download: {url}"));
                    lines.push(format!(
                        "   Expires: {}",
                        entry.expires.as_deref().unwrap_or("unknown")
                    ));
                }
                (None, Some(error)) => lines.push(format!("   Error: {error}")),
                (None, None) => {}
            }
            lines.push(String::new());
        }
    }

    (subject, lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn event(status: &str) -> NotificationEvent {
        serde_json::from_value(json!({
            "pipeline_name": "support-tickets",
            "status": status,
            "stage_results": [
                {"stage_name": "classify", "output_paths": ["s3://b/batch_output_parquet/classify/0000.snappy.parquet"]},
                {"output_paths": ["s3://b/batch_output_parquet/respond/0000.snappy.parquet",
                                  "s3://b/batch_output_parquet/respond/0001.snappy.parquet"]}
            ],
            "validation": {"estimated_records": null, "estimated_cost_usd": 0.5}
        }))
        .expect("event should deserialize")
    }

    #[test]
    fn event_defaults_apply() {
        let event: NotificationEvent =
            serde_json::from_value(json!({})).expect("empty event should deserialize");

        assert_eq!(event.pipeline_name, "Unnamed Pipeline");
        assert_eq!(event.presigned_url_expiry_days, 7);
        assert!(event.is_success());
        assert!(event.output_paths().is_empty());
    }

    #[test]
    fn success_message_lists_downloads_and_failures() {
        let event = event("SUCCESS");
        let urls = vec![
            PresignedUrl::signed(
                "s3://b/batch_output_parquet/classify/0000.snappy.parquet",
                "https://b.s3.amazonaws.com/signed".to_string(),
                "2026-10-23T00:00:00Z".to_string(),
            ),
            PresignedUrl::failed("s3://b/bad", "AccessDenied"),
        ];

        let (subject, message) = format_notification(&event, &urls);

        assert_eq!(subject, "✅ Pipeline Complete: support-tickets");
        assert_eq!(event.output_paths().len(), 3);
        assert!(message.starts_with("Pipeline 'support-tickets' completed successfully!\n"));
        assert!(message.contains("- Total Stages: 2"));
        assert!(message.contains("- Estimated Records Processed: N/A"));
        assert!(message.contains("- Estimated Cost: $0.50"));
        assert!(message.contains("\n1. classify\n   Outputs: 1 file(s)"));
        assert!(message.contains("\n2. Stage 2\n   Outputs: 2 file(s)"));
        assert!(message.contains("   Download: https://b.s3.amazonaws.com/signed"));
        assert!(message.contains("   Expires: 2026-10-23T00:00:00Z"));
        assert!(message.contains("2. s3://b/bad\n   Error: AccessDenied"));
    }

    #[test]
    fn empty_validation_summary_omits_estimates() {
        let mut event = event("SUCCESS");
        event.validation =
            serde_json::from_value(json!({})).expect("empty summary should deserialize");

        let (_, message) = format_notification(&event, &[]);

        assert!(message.contains("- Total Stages: 2

"));
        assert!(!message.contains("Estimated"));
    }

    #[test]
    fn failure_message_carries_error_and_skips_downloads() {
        let mut event = event("FAILED");
        event.error_message = Some("Stage respond failed".to_string());

        let (subject, message) = format_notification(&event, &[]);

        assert_eq!(subject, "❌ Pipeline Failed: support-tickets");
        assert!(message.starts_with("Pipeline 'support-tickets' failed.\n\nError: Stage respond failed"));
        assert!(!message.contains("Output Files:"));
    }
}
