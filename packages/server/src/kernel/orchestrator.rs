//! The Orchestrator and Job Runner (spec §4.5).
//!
//! Holds per-job running flags, four global sequence flags, an
//! "active cancel" slot for the currently executing sequence, and an
//! embedded Queue. `RunSingleSync` compare-and-sets the named job's flag;
//! `RunSyncWithOptions`/`RunPhase` drive a sequence of jobs in declared
//! order with per-job failure isolation. A job's mapping panic is caught at
//! the `tokio::spawn` boundary (the idiomatic substitute for the source
//! system's deferred-recover goroutine wrapper) and always clears flags —
//! the same guarantee the spec's "panic safety" note requires.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::kernel::errors::CoreError;
use crate::kernel::phase::{jobs_in_phase, Phase};
use crate::kernel::queue::{Queue, QueueKey};
use crate::kernel::record_store::RecordStore;
use crate::kernel::stats::Stats;
use crate::kernel::upsert::{run_sync, SyncJob};
use crate::kernel::upstream_client::UpstreamClient;

const RUN_HISTORY_CAPACITY: usize = 10;
const RUN_HISTORY_RETENTION_DAYS: i64 = 7;

/// Timeouts per spec §5: "30 minutes for a single-job run, 60 minutes for a
/// sequence, 2 hours for a phase. A timed-out context behaves exactly like
/// an explicit cancel." The drain loop always uses its own fresh 60-minute
/// window regardless of what kind of request it's replaying (§4.6 "runs it
/// with a fresh 60-minute timeout context").
const JOB_TIMEOUT: Duration = Duration::from_secs(30 * 60);
const SEQUENCE_TIMEOUT: Duration = Duration::from_secs(60 * 60);
const PHASE_TIMEOUT: Duration = Duration::from_secs(2 * 60 * 60);
const DRAIN_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Which of the four global flags a sequence run occupies (spec §4.5:
/// "four global flags {dailyRunning, weeklyRunning, historicalRunning,
/// customValuesRunning}"). The spec names the flags but only pins down two
/// of the selection rules explicitly (year>0 → historical, else → daily);
/// `weekly` and `custom_values` selection is this repo's resolution of
/// that gap, recorded in the grounding ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceFlag {
    Daily,
    Weekly,
    Historical,
    CustomValues,
}

#[derive(Debug, Default)]
struct SequenceFlags {
    daily: AtomicBool,
    weekly: AtomicBool,
    historical: AtomicBool,
    custom_values: AtomicBool,
}

impl SequenceFlags {
    fn flag(&self, which: SequenceFlag) -> &AtomicBool {
        match which {
            SequenceFlag::Daily => &self.daily,
            SequenceFlag::Weekly => &self.weekly,
            SequenceFlag::Historical => &self.historical,
            SequenceFlag::CustomValues => &self.custom_values,
        }
    }

    fn any_set(&self) -> bool {
        self.daily.load(Ordering::SeqCst)
            || self.weekly.load(Ordering::SeqCst)
            || self.historical.load(Ordering::SeqCst)
            || self.custom_values.load(Ordering::SeqCst)
    }

    fn clear_all(&self) {
        self.daily.store(false, Ordering::SeqCst);
        self.weekly.store(false, Ordering::SeqCst);
        self.historical.store(false, Ordering::SeqCst);
        self.custom_values.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Ok,
    Failed(String),
    Panicked,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct JobRunSummary {
    pub job: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: RunOutcome,
    pub stats: Stats,
}

/// Options for a unified or service-scoped sequence run (spec §4.5
/// `RunSyncWithOptions`).
#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    pub year: Option<i32>,
    pub services: Option<Vec<String>>,
    pub include_custom_values: bool,
}

/// What a queued item will actually run once it reaches the head of the
/// Queue. The Queue itself only tracks admission order and idempotency
/// (spec §4.6); this is the payload the drain loop replays.
/// Whether a dispatch call ran its work immediately or admitted it to the
/// Queue behind an in-progress sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Started,
    Queued(uuid::Uuid),
}

#[derive(Debug, Clone)]
pub enum DispatchRequest {
    Single { name: String, year: Option<i32> },
    Sequence(SyncOptions),
    Phase { phase: Phase, year: Option<i32>, cadence: SequenceFlag },
}

/// Spawns a watcher that cancels `token` after `timeout` unless it is
/// already cancelled for some other reason first (spec §5: "a timed-out
/// context behaves exactly like an explicit cancel"). Never touches the
/// future doing the actual work, so a guarded job/sequence/phase always
/// gets to run its own cleanup rather than being dropped mid-await. Callers
/// abort the returned handle once the guarded work finishes on its own.
fn spawn_timeout_guard(token: CancellationToken, timeout: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(timeout) => {
                tracing::warn!(timeout_secs = timeout.as_secs(), "run timed out, cancelling");
                token.cancel();
            }
            _ = token.cancelled() => {}
        }
    })
}

pub struct Orchestrator {
    jobs: HashMap<String, Arc<dyn SyncJob>>,
    store: Arc<dyn RecordStore>,
    client: UpstreamClient,

    job_running: Mutex<HashMap<String, bool>>,
    sequence_flags: SequenceFlags,
    active_cancel: Mutex<Option<CancellationToken>>,
    historical_year: Mutex<Option<i32>>,
    queue: Mutex<Queue>,
    pending_requests: Mutex<HashMap<uuid::Uuid, DispatchRequest>>,
    run_history: Mutex<HashMap<String, VecDeque<JobRunSummary>>>,
}

impl Orchestrator {
    pub fn new(
        jobs: Vec<Arc<dyn SyncJob>>,
        store: Arc<dyn RecordStore>,
        client: UpstreamClient,
    ) -> Self {
        let jobs = jobs.into_iter().map(|j| (j.name().to_string(), j)).collect();
        Self {
            jobs,
            store,
            client,
            job_running: Mutex::new(HashMap::new()),
            sequence_flags: SequenceFlags::default(),
            active_cancel: Mutex::new(None),
            historical_year: Mutex::new(None),
            queue: Mutex::new(Queue::new()),
            pending_requests: Mutex::new(HashMap::new()),
            run_history: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.job_running
            .lock()
            .expect("job_running lock poisoned")
            .get(name)
            .copied()
            .unwrap_or(false)
    }

    pub fn is_daily_sync_running(&self) -> bool {
        self.sequence_flags.daily.load(Ordering::SeqCst)
    }

    pub fn is_weekly_sync_running(&self) -> bool {
        self.sequence_flags.weekly.load(Ordering::SeqCst)
    }

    pub fn is_historical_sync_running(&self) -> bool {
        self.sequence_flags.historical.load(Ordering::SeqCst)
    }

    pub fn is_custom_values_sync_running(&self) -> bool {
        self.sequence_flags.custom_values.load(Ordering::SeqCst)
    }

    /// The year a currently-running historical sequence is scoped to, if
    /// one is in progress.
    pub fn historical_year(&self) -> Option<i32> {
        *self.historical_year.lock().expect("historical_year lock poisoned")
    }

    pub fn is_any_sequence_running(&self) -> bool {
        self.sequence_flags.any_set()
    }

    /// Clears all four global flags. Called from the panic-recovery path
    /// and exposed as an operator escape hatch so the system never stays
    /// wedged if something clears the per-job flag but not the sequence
    /// flag (spec §4.5 `ClearSyncFlags`).
    pub fn clear_sync_flags(&self) {
        self.sequence_flags.clear_all();
    }

    pub fn set_active_sync_cancel(&self, token: CancellationToken) {
        *self.active_cancel.lock().expect("active_cancel lock poisoned") = Some(token);
    }

    pub fn clear_active_sync_cancel(&self) {
        *self.active_cancel.lock().expect("active_cancel lock poisoned") = None;
    }

    /// Cancels the currently executing sequence, if any. No-op if nothing
    /// is running.
    pub fn cancel_running_sync(&self) -> bool {
        if let Some(token) = self.active_cancel.lock().expect("active_cancel lock poisoned").as_ref() {
            token.cancel();
            true
        } else {
            false
        }
    }

    pub fn queue_cancel(&self, id: uuid::Uuid) -> bool {
        let removed = self.queue.lock().expect("queue lock poisoned").cancel(id);
        if removed {
            self.pending_requests.lock().expect("pending_requests lock poisoned").remove(&id);
        }
        removed
    }

    pub fn queue_snapshot(&self) -> Vec<crate::kernel::queue::QueueItem> {
        self.queue.lock().expect("queue lock poisoned").snapshot()
    }

    pub fn queue_position(&self, id: uuid::Uuid) -> Option<usize> {
        self.queue.lock().expect("queue lock poisoned").position_by_id(id)
    }

    fn enqueue_request(&self, key: QueueKey, request: DispatchRequest) -> Result<uuid::Uuid, CoreError> {
        let (id, is_new) = self.queue.lock().expect("queue lock poisoned").enqueue(key)?;
        if is_new {
            self.pending_requests
                .lock()
                .expect("pending_requests lock poisoned")
                .insert(id, request);
        }
        Ok(id)
    }

    /// Either runs `name` immediately in the background (nothing queued,
    /// no sequence in progress) or admits it to the Queue when a sequence
    /// already occupies one of the four global flags (spec §4.5 "Cross-job
    /// during sequence"). Returns `Dispatch::Started` or `Dispatch::Queued`.
    ///
    /// The per-job compare-and-set happens synchronously here, before the
    /// background task is spawned, so a collision with an already-running
    /// instance of the same job surfaces to the caller as `AlreadyRunning`
    /// (spec §5, §6.1, §7) instead of being logged and swallowed inside the
    /// detached task.
    pub fn dispatch_single(self: &Arc<Self>, name: String, year: Option<i32>) -> Result<Dispatch, CoreError> {
        if !self.jobs.contains_key(&name) {
            return Err(CoreError::NotFound(name));
        }

        if self.is_any_sequence_running() {
            let key = QueueKey { year, service: name.clone(), include_custom_values: false };
            let id = self.enqueue_request(key, DispatchRequest::Single { name, year })?;
            return Ok(Dispatch::Queued(id));
        }

        self.try_set_job_flag(&name)?;

        let orchestrator = self.clone();
        tokio::spawn(async move {
            if let Err(e) = orchestrator
                .run_single_sync_assuming_flag_held(&name, year, CancellationToken::new())
                .await
            {
                tracing::warn!(job = %name, error = %e, "background single-job run failed");
            }
        });
        Ok(Dispatch::Started)
    }

    pub fn dispatch_sequence(self: &Arc<Self>, opts: SyncOptions) -> Result<Dispatch, CoreError> {
        if self.is_any_sequence_running() {
            let key = QueueKey {
                year: opts.year,
                service: "__sequence__".to_string(),
                include_custom_values: opts.include_custom_values,
            };
            let id = self.enqueue_request(key, DispatchRequest::Sequence(opts))?;
            return Ok(Dispatch::Queued(id));
        }

        let orchestrator = self.clone();
        tokio::spawn(async move {
            if let Err(e) = orchestrator.run_sync_with_options(opts).await {
                tracing::warn!(error = %e, "background sequence run failed");
            }
            orchestrator.drain_queue().await;
        });
        Ok(Dispatch::Started)
    }

    pub fn dispatch_phase(self: &Arc<Self>, phase: Phase, year: Option<i32>) -> Result<Dispatch, CoreError> {
        if self.is_any_sequence_running() {
            let key = QueueKey {
                year,
                service: format!("__phase__:{}", phase.as_str()),
                include_custom_values: false,
            };
            let id = self.enqueue_request(
                key,
                DispatchRequest::Phase { phase, year, cadence: SequenceFlag::Daily },
            )?;
            return Ok(Dispatch::Queued(id));
        }

        let orchestrator = self.clone();
        tokio::spawn(async move {
            if let Err(e) = orchestrator.run_phase(phase, year, SequenceFlag::Daily).await {
                tracing::warn!(error = %e, phase = phase.as_str(), "background phase run failed");
            }
            orchestrator.drain_queue().await;
        });
        Ok(Dispatch::Started)
    }

    /// Repeatedly dequeues the head and runs it, bounded by the queue
    /// length observed when draining started — items enqueued mid-drain
    /// wait for the *next* completion (spec §4.6 drain protocol). Every
    /// drained item gets its own fresh 60-minute timeout context regardless
    /// of which runner its type tag selects (spec §4.6), overriding the
    /// type's usual timeout (30m/60m/2h) for the duration of the drain.
    pub async fn drain_queue(self: &Arc<Self>) {
        let to_drain = self.queue.lock().expect("queue lock poisoned").len();
        for _ in 0..to_drain {
            let item = { self.queue.lock().expect("queue lock poisoned").dequeue() };
            let Some(item) = item else { break };
            let request = self
                .pending_requests
                .lock()
                .expect("pending_requests lock poisoned")
                .remove(&item.id);

            let Some(request) = request else { continue };

            let cancel = CancellationToken::new();
            let guard = spawn_timeout_guard(cancel.clone(), DRAIN_TIMEOUT);

            match request {
                DispatchRequest::Single { name, year } => {
                    if let Err(e) = self.run_single_sync_with_cancel(&name, year, cancel).await {
                        tracing::warn!(job = %name, error = %e, "drained single-job run failed");
                    }
                }
                DispatchRequest::Sequence(opts) => {
                    if let Err(e) = self.run_sync_with_options_and_cancel(opts, cancel).await {
                        tracing::warn!(error = %e, "drained sequence run failed");
                    }
                }
                DispatchRequest::Phase { phase, year, cadence } => {
                    if let Err(e) = self.run_phase_and_cancel(phase, year, cadence, cancel).await {
                        tracing::warn!(error = %e, phase = phase.as_str(), "drained phase run failed");
                    }
                }
            }

            guard.abort();
        }
    }

    /// Distinct years present in the local store, scanned across every
    /// registered job's collection (spec §6.1 `GET /sync/years`).
    pub async fn distinct_years(&self) -> Result<Vec<i32>, CoreError> {
        use crate::kernel::record_store::Filter;
        use std::collections::BTreeSet;

        let mut years = BTreeSet::new();
        for job in self.jobs.values() {
            let mut offset = 0;
            loop {
                let page = self.store.find(job.collection(), &Filter::All, 500, offset).await?;
                let page_len = page.len() as u32;
                for record in &page {
                    if let Some(year) = record.field("year").as_i64() {
                        years.insert(year as i32);
                    }
                }
                if page_len < 500 {
                    break;
                }
                offset += page_len;
            }
        }
        Ok(years.into_iter().collect())
    }

    pub fn run_history_for(&self, job: &str) -> Vec<JobRunSummary> {
        self.run_history
            .lock()
            .expect("run_history lock poisoned")
            .get(job)
            .map(|ring| ring.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Drops run-history entries older than the retention window, returning
    /// the number of entries removed. The scheduler's weekly log-prune tick
    /// calls this; it is also safe to call on demand.
    pub fn prune_run_history(&self) -> usize {
        let cutoff = Utc::now() - chrono::Duration::days(RUN_HISTORY_RETENTION_DAYS);
        let mut guard = self.run_history.lock().expect("run_history lock poisoned");
        let mut pruned = 0;
        for ring in guard.values_mut() {
            let before = ring.len();
            ring.retain(|summary| summary.finished_at >= cutoff);
            pruned += before - ring.len();
        }
        pruned
    }

    fn try_set_job_flag(&self, name: &str) -> Result<(), CoreError> {
        let mut guard = self.job_running.lock().expect("job_running lock poisoned");
        if guard.get(name).copied().unwrap_or(false) {
            return Err(CoreError::AlreadyRunning(name.to_string()));
        }
        guard.insert(name.to_string(), true);
        Ok(())
    }

    fn clear_job_flag(&self, name: &str) {
        self.job_running
            .lock()
            .expect("job_running lock poisoned")
            .insert(name.to_string(), false);
    }

    fn record_run(&self, summary: JobRunSummary) {
        let mut guard = self.run_history.lock().expect("run_history lock poisoned");
        let ring = guard.entry(summary.job.clone()).or_default();
        if ring.len() >= RUN_HISTORY_CAPACITY {
            ring.pop_front();
        }
        ring.push_back(summary);
    }

    /// Runs `name`'s `Sync` under per-job mutual exclusion, clearing the
    /// flag on every exit path including a caught panic (spec §4.5
    /// `RunSingleSync`). Not cancellable through the public surface — a
    /// standalone single-job run gets its own token that nothing external
    /// ever cancels (spec §5: "Running non-sequence single job: not
    /// directly cancellable"). Sequence drivers use
    /// `run_single_sync_with_cancel` instead, passing down a child of the
    /// sequence's stored cancel handle.
    pub async fn run_single_sync(&self, name: &str, year: Option<i32>) -> Result<Stats, CoreError> {
        self.run_single_sync_with_cancel(name, year, CancellationToken::new()).await
    }

    /// Same as `run_single_sync`, but runs under a caller-supplied
    /// cancellation token instead of an unreachable fresh one. The
    /// sequence/phase drivers pass a child token of the active sequence's
    /// cancel handle here so `cancel_running_sync` actually reaches the
    /// job's per-record suspension points (spec §5: "cancels the context
    /// passed to every child job"). A `spawn_timeout_guard` backs `cancel`
    /// with the 30-minute job timeout (§5); once it fires, the run winds
    /// down the same way an explicit cancel does, through `run_sync`'s own
    /// per-record check.
    async fn run_single_sync_with_cancel(
        &self,
        name: &str,
        year: Option<i32>,
        cancel: CancellationToken,
    ) -> Result<Stats, CoreError> {
        if !self.jobs.contains_key(name) {
            return Err(CoreError::NotFound(name.to_string()));
        }
        self.try_set_job_flag(name)?;
        self.run_single_sync_assuming_flag_held(name, year, cancel).await
    }

    /// Same as `run_single_sync_with_cancel`, but assumes the caller has
    /// already compare-and-set the per-job running flag via
    /// `try_set_job_flag` — `dispatch_single` does this synchronously on the
    /// calling thread before spawning, so an `AlreadyRunning` collision is
    /// returned to the HTTP caller instead of surfacing only inside the
    /// detached background task. Clears the flag on every exit path,
    /// including a caught panic.
    async fn run_single_sync_assuming_flag_held(
        &self,
        name: &str,
        year: Option<i32>,
        cancel: CancellationToken,
    ) -> Result<Stats, CoreError> {
        let job = self
            .jobs
            .get(name)
            .ok_or_else(|| CoreError::NotFound(name.to_string()))?
            .clone();

        let started_at = Utc::now();

        let client = match year {
            Some(y) => self.client.clone_with_year(y),
            None => self.client.clone(),
        };
        let store = self.store.clone();
        let cancel_for_job = cancel.clone();
        let guard = spawn_timeout_guard(cancel, JOB_TIMEOUT);

        let join_result = tokio::spawn(async move { run_sync(job.as_ref(), store.as_ref(), &client, year, &cancel_for_job).await }).await;
        guard.abort();

        self.clear_job_flag(name);

        let (outcome, stats) = match join_result {
            Ok(Ok(stats)) => (RunOutcome::Ok, stats),
            Ok(Err(CoreError::Cancelled)) => (RunOutcome::Cancelled, Stats::new()),
            Ok(Err(e)) => (RunOutcome::Failed(e.to_string()), Stats::new()),
            Err(join_err) if join_err.is_panic() => {
                tracing::error!(job = name, "job panicked, flags cleared");
                (RunOutcome::Panicked, Stats::new())
            }
            Err(join_err) => (RunOutcome::Cancelled, {
                tracing::warn!(job = name, error = %join_err, "job task aborted");
                Stats::new()
            }),
        };

        self.record_run(JobRunSummary {
            job: name.to_string(),
            started_at,
            finished_at: Utc::now(),
            outcome: outcome.clone(),
            stats: stats.clone(),
        });

        match outcome {
            RunOutcome::Ok => Ok(stats),
            RunOutcome::Cancelled => Err(CoreError::Cancelled),
            RunOutcome::Failed(msg) => Err(CoreError::UpstreamFetch(msg)),
            RunOutcome::Panicked => Err(CoreError::UpstreamFetch(format!("job {name} panicked"))),
        }
    }

    fn set_sequence_flag(&self, which: SequenceFlag) -> Result<(), CoreError> {
        self.sequence_flags
            .flag(which)
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| ())
            .map_err(|_| CoreError::AlreadyRunning(format!("{which:?}")))
    }

    fn clear_sequence_flag(&self, which: SequenceFlag) {
        self.sequence_flags.flag(which).store(false, Ordering::SeqCst);
    }

    /// Runs a unified or service-scoped sequence under the spec's 60-minute
    /// sequence timeout (§5). Jobs run sequentially in declared order; one
    /// job's failure does not abort the sequence (spec §4.5).
    pub async fn run_sync_with_options(&self, opts: SyncOptions) -> Result<HashMap<String, Stats>, CoreError> {
        let cancel = CancellationToken::new();
        let guard = spawn_timeout_guard(cancel.clone(), SEQUENCE_TIMEOUT);
        let result = self.run_sync_with_options_and_cancel(opts, cancel).await;
        guard.abort();
        result
    }

    /// Same as `run_sync_with_options`, but runs under a caller-supplied
    /// cancellation token instead of creating its own — the drain loop uses
    /// this to impose its own fresh 60-minute window on a replayed sequence
    /// request (spec §4.6) in place of the type's usual timeout.
    async fn run_sync_with_options_and_cancel(
        &self,
        opts: SyncOptions,
        cancel: CancellationToken,
    ) -> Result<HashMap<String, Stats>, CoreError> {
        let flag = if opts.year.is_some() {
            SequenceFlag::Historical
        } else if opts.include_custom_values {
            SequenceFlag::CustomValues
        } else {
            SequenceFlag::Daily
        };

        self.set_sequence_flag(flag)?;
        if let Some(year) = opts.year {
            *self.historical_year.lock().expect("historical_year lock poisoned") = Some(year);
        }
        self.set_active_sync_cancel(cancel.clone());

        // Spec §4.5 `RunSyncWithOptions`: "Iterate the source-phase job list
        // (or opts.Services if provided)" — the unified run's default scope
        // is the source phase, not every job across every phase.
        let names = opts.services.clone().unwrap_or_else(|| {
            jobs_in_phase(Phase::Source).into_iter().map(str::to_string).collect()
        });

        let mut results = HashMap::new();
        for name in names {
            if cancel.is_cancelled() {
                tracing::info!("sequence cancelled, stopping before next job");
                break;
            }
            match self.run_single_sync_with_cancel(&name, opts.year, cancel.child_token()).await {
                Ok(stats) => {
                    results.insert(name, stats);
                }
                Err(e) => {
                    tracing::warn!(job = %name, error = %e, "sequence job failed, continuing to next job");
                }
            }
        }

        self.clear_active_sync_cancel();
        *self.historical_year.lock().expect("historical_year lock poisoned") = None;
        self.clear_sequence_flag(flag);
        Ok(results)
    }

    /// Runs every job in `phase`, in declared order, under `cadence`'s
    /// global flag and the spec's 2-hour phase timeout (§5) (the Scheduler
    /// passes `Weekly` for its weekly trigger; ad hoc HTTP-driven phase runs
    /// default to `Daily`).
    pub async fn run_phase(
        &self,
        phase: Phase,
        year: Option<i32>,
        cadence: SequenceFlag,
    ) -> Result<HashMap<String, Stats>, CoreError> {
        let cancel = CancellationToken::new();
        let guard = spawn_timeout_guard(cancel.clone(), PHASE_TIMEOUT);
        let result = self.run_phase_and_cancel(phase, year, cadence, cancel).await;
        guard.abort();
        result
    }

    /// Same as `run_phase`, but runs under a caller-supplied cancellation
    /// token — the drain loop's replay path (spec §4.6).
    async fn run_phase_and_cancel(
        &self,
        phase: Phase,
        year: Option<i32>,
        cadence: SequenceFlag,
        cancel: CancellationToken,
    ) -> Result<HashMap<String, Stats>, CoreError> {
        self.set_sequence_flag(cadence)?;
        self.set_active_sync_cancel(cancel.clone());

        let mut results = HashMap::new();
        for name in jobs_in_phase(phase) {
            if cancel.is_cancelled() {
                tracing::info!(phase = phase.as_str(), "phase cancelled, stopping before next job");
                break;
            }
            match self.run_single_sync_with_cancel(name, year, cancel.child_token()).await {
                Ok(stats) => {
                    results.insert(name.to_string(), stats);
                }
                Err(e) => {
                    tracing::warn!(job = name, error = %e, "phase job failed, continuing to next job");
                }
            }
        }

        self.clear_active_sync_cancel();
        self.clear_sequence_flag(cadence);
        Ok(results)
    }
}
