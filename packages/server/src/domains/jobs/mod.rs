//! Job Implementations: the pluggable half of the Base Sync Pattern
//! (spec §4, "Job Implementations"). Each submodule is one job's `SyncJob`
//! impl; `registry()` wires the three demonstration jobs into the
//! Orchestrator's name → job map.

pub mod accessors;
pub mod attendees;
pub mod persons;
pub mod sessions;

use std::sync::Arc;

use crate::kernel::record_store::RecordStore;
use crate::kernel::upsert::SyncJob;

/// Builds the full set of jobs this deployment knows about, in no
/// particular order (the Phase Table in `kernel::phase` is what fixes
/// execution order).
pub fn registry(store: Arc<dyn RecordStore>) -> Vec<Arc<dyn SyncJob>> {
    vec![
        Arc::new(sessions::SessionsJob::new()),
        Arc::new(persons::PersonsJob::new()),
        Arc::new(attendees::AttendeesJob::new(store)),
    ]
}
