//! Event type names published on the generation event bus.
//!
//! Used by the orchestrator, the aggregator and the reference cache when
//! announcing lifecycle transitions to in-process subscribers.

/// A batch left `pending` and its jobs are being submitted.
pub const EVENT_BATCH_STARTED: &str = "generation.batch.started";

/// Every job finished and at least one image was produced.
pub const EVENT_BATCH_COMPLETED: &str = "generation.batch.completed";

/// Every job finished without an image, or submission failed.
pub const EVENT_BATCH_FAILED: &str = "generation.batch.failed";

/// The user cancelled the batch.
pub const EVENT_BATCH_CANCELED: &str = "generation.batch.canceled";

/// A job was accepted by the prediction service.
pub const EVENT_JOB_SUBMITTED: &str = "generation.job.submitted";

/// The prediction service rejected a job submission.
pub const EVENT_JOB_SUBMIT_FAILED: &str = "generation.job.submit_failed";

/// A job reached a terminal status. The status is in the payload.
pub const EVENT_JOB_FINISHED: &str = "generation.job.finished";

/// A reference image was (re-)uploaded to the provider.
pub const EVENT_REFERENCE_REFRESHED: &str = "generation.reference.refreshed";
