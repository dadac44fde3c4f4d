pub mod aws;
pub mod batch_jobs;
pub mod notifier;
pub mod object_store;
pub mod tabular;
