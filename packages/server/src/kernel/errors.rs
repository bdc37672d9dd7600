//! Error kinds surfaced by the CORE (spec §7).

use thiserror::Error;

/// Errors the Orchestrator, Queue, and Upsert Engine can produce.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Caller tried to run a job or sequence that is already in progress.
    #[error("already running: {0}")]
    AlreadyRunning(String),

    /// The queue already holds the maximum number of pending items.
    #[error("queue is full")]
    QueueFull,

    /// Upstream refused repeatedly; surfaces only after exhausting
    /// `max_attempts` retries.
    #[error("rate limited after {attempts} attempts")]
    RateLimited { attempts: u32 },

    /// Any non-429, non-2xx upstream response. Aborts the current job;
    /// `sync_successful` stays false and orphan deletion is skipped.
    #[error("upstream fetch failed: {0}")]
    UpstreamFetch(String),

    /// The per-job mapping rejected an upstream record (missing required
    /// id, malformed shape). The record is skipped, the job continues.
    #[error("transform rejected record: {0}")]
    TransformInvalid(String),

    /// Save failed for one record. The job continues.
    #[error("storage write failed: {0}")]
    StorageWrite(String),

    /// Context cancellation. The current job terminates at the next
    /// suspension point.
    #[error("cancelled")]
    Cancelled,

    /// A requested job, phase, or queue item does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A request parameter failed validation (e.g. year out of range).
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl CoreError {
    /// Coarse HTTP status mapping for the illustrative endpoints in spec §6.1.
    pub fn status_code(&self) -> u16 {
        match self {
            CoreError::AlreadyRunning(_) | CoreError::QueueFull => 409,
            CoreError::InvalidRequest(_) => 400,
            CoreError::NotFound(_) => 404,
            CoreError::Cancelled => 499,
            CoreError::RateLimited { .. }
            | CoreError::UpstreamFetch(_)
            | CoreError::TransformInvalid(_)
            | CoreError::StorageWrite(_) => 502,
        }
    }
}
