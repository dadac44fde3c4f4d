pub mod check_job;
pub mod notify;
pub mod postprocess;
pub mod preprocess;
pub mod start_job;
pub mod transform_stage;
pub mod validate_pipeline;
