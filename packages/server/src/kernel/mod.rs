//! The CORE: Rate Limiter, Upstream Client, Record Store Adapter, Base
//! Sync Pattern, Phase Table, Orchestrator, Queue, Scheduler, and Session
//! Resolver (spec §2). Everything outside `kernel` is ambient
//! infrastructure (`server`) or pluggable job mappings (`domains::jobs`).

pub mod composite_key;
pub mod errors;
pub mod field_eq;
pub mod orchestrator;
pub mod phase;
pub mod queue;
pub mod rate_limiter;
pub mod record_store;
pub mod scheduler;
pub mod session_resolver;
pub mod stats;
pub mod upsert;
pub mod upstream_client;

pub use errors::CoreError;
pub use orchestrator::Orchestrator;
pub use stats::Stats;
