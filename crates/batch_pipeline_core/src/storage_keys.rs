use thiserror::Error;

pub const INPUT_PARQUET_ROOT: &str = "batch_inputs_parquet";
pub const INPUT_JSONL_ROOT: &str = "batch_inputs_json";
pub const OUTPUT_JSONL_ROOT: &str = "batch_outputs_json";
pub const OUTPUT_PARQUET_ROOT: &str = "batch_output_parquet";

/// Suffix Bedrock appends to each input file name in the output prefix.
pub const BATCH_OUTPUT_SUFFIX: &str = ".jsonl.out";

/// Bedrock job names are capped at 63 characters.
pub const MAX_JOB_NAME_LEN: usize = 63;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid S3 URI '{uri}': {reason}")]
pub struct S3UriError {
    pub uri: String,
    pub reason: &'static str,
}

pub fn split_s3_uri(uri: &str) -> Result<(String, String), S3UriError> {
    let error = |reason| S3UriError {
        uri: uri.to_string(),
        reason,
    };
    let rest = uri
        .strip_prefix("s3://")
        .ok_or_else(|| error("expected s3:// scheme"))?;
    let (bucket, key) = rest
        .split_once('/')
        .ok_or_else(|| error("missing object key"))?;
    if bucket.is_empty() {
        return Err(error("missing bucket"));
    }
    if key.is_empty() {
        return Err(error("missing object key"));
    }
    Ok((bucket.to_string(), key.to_string()))
}

pub fn s3_uri(bucket: &str, key: &str) -> String {
    format!("s3://{bucket}/{}", key.trim_start_matches('/'))
}

fn part_name(index: usize) -> String {
    format!("{index:04}")
}

pub fn input_parquet_key(job_name_prefix: &str, index: usize) -> String {
    format!(
        "{INPUT_PARQUET_ROOT}/{job_name_prefix}/{}.snappy.parquet",
        part_name(index)
    )
}

pub fn input_jsonl_key(job_name_prefix: &str, index: usize) -> String {
    format!(
        "{INPUT_JSONL_ROOT}/{job_name_prefix}/{}.jsonl",
        part_name(index)
    )
}

/// Prefix Bedrock writes `*.jsonl.out` files under. Always ends with `/`.
pub fn output_jsonl_prefix(job_name_prefix: &str, index: usize) -> String {
    format!(
        "{OUTPUT_JSONL_ROOT}/{job_name_prefix}/{}/",
        part_name(index)
    )
}

pub fn output_parquet_prefix(job_name_prefix: &str) -> String {
    format!("{OUTPUT_PARQUET_ROOT}/{job_name_prefix}/")
}

pub fn output_parquet_key(job_name_prefix: &str, index: usize) -> String {
    format!(
        "{}{}.snappy.parquet",
        output_parquet_prefix(job_name_prefix),
        part_name(index)
    )
}

pub fn transformed_input_key(previous_prefix: &str, current_prefix: &str) -> String {
    format!("{INPUT_PARQUET_ROOT}/{previous_prefix}_to_{current_prefix}/transformed.snappy.parquet")
}

/// Builds a Bedrock-safe job name from the prefix, part index and run stamp.
pub fn job_name(job_name_prefix: &str, index: usize, run_stamp: &str) -> String {
    let raw = if run_stamp.is_empty() {
        format!("{job_name_prefix}-{}", part_name(index))
    } else {
        format!("{job_name_prefix}-{}-{run_stamp}", part_name(index))
    };

    let mut sanitized: String = raw
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() || ch == '-' { ch } else { '-' })
        .collect();
    sanitized.truncate(MAX_JOB_NAME_LEN);
    let trimmed = sanitized.trim_matches('-');
    if trimmed.is_empty() {
        format!("job-{}", part_name(index))
    } else {
        trimmed.to_string()
    }
}
