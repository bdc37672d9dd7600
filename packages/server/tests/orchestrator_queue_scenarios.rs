//! Cross-module Orchestrator + Queue scenarios from spec §8 (S1 queue-then-
//! cancel, S2 dedup): these exercise `dispatch_sequence`'s admission path,
//! not just the `Queue` type in isolation, so they live here rather than in
//! `kernel::queue`'s own unit tests.

use std::sync::Arc;

use async_trait::async_trait;
use campsync_core::kernel::errors::CoreError;
use campsync_core::kernel::orchestrator::{Dispatch, Orchestrator, SyncOptions};
use campsync_core::kernel::record_store::{Filter, InMemoryRecordStore};
use campsync_core::kernel::upsert::SyncJob;
use campsync_core::kernel::upstream_client::UpstreamClient;
use serde_json::{json, Value};

/// A job whose fetch blocks until the test releases it, so a sequence
/// built from it stays "running" for as long as the test needs to submit
/// further requests against the Queue. Signals `started` the instant it's
/// entered so the test can deterministically wait for the sequence flag to
/// be set instead of guessing how many scheduler ticks that takes.
struct BlockingJob {
    started: Arc<tokio::sync::Notify>,
    gate: Arc<tokio::sync::Notify>,
}

#[async_trait]
impl SyncJob for BlockingJob {
    fn name(&self) -> &'static str {
        "slow"
    }

    fn collection(&self) -> &'static str {
        "slow"
    }

    async fn fetch(&self, _client: &UpstreamClient, _year: Option<i32>) -> Result<Vec<Value>, CoreError> {
        self.started.notify_one();
        self.gate.notified().await;
        Ok(vec![json!({"id": "a"})])
    }

    fn map(&self, raw: &Value, _year: Option<i32>) -> Result<(campsync_core::kernel::composite_key::CompositeKey, Value), CoreError> {
        let id = raw.get("id").and_then(|v| v.as_str()).unwrap();
        Ok((
            campsync_core::kernel::composite_key::CompositeKey::single(id.to_string(), None),
            json!({"_key": id}),
        ))
    }

    fn scope_filter(&self, _year: Option<i32>) -> Filter {
        Filter::All
    }
}

fn orchestrator_with_blocking_job(started: Arc<tokio::sync::Notify>, gate: Arc<tokio::sync::Notify>) -> Arc<Orchestrator> {
    let job: Arc<dyn SyncJob> = Arc::new(BlockingJob { started, gate });
    Arc::new(Orchestrator::new(
        vec![job],
        Arc::new(InMemoryRecordStore::new()),
        UpstreamClient::new("k".into(), "s".into(), "c".into(), 2024),
    ))
}

#[tokio::test]
async fn s1_queue_then_cancel_preserves_fifo_positions() {
    let started_notify = Arc::new(tokio::sync::Notify::new());
    let gate = Arc::new(tokio::sync::Notify::new());
    let orch = orchestrator_with_blocking_job(started_notify.clone(), gate.clone());

    // Occupy the sequence flag so subsequent submissions queue instead of
    // running immediately.
    let started = orch
        .dispatch_sequence(SyncOptions {
            year: Some(2025),
            services: Some(vec!["slow".to_string()]),
            include_custom_values: false,
        })
        .unwrap();
    assert_eq!(started, Dispatch::Started);

    // Wait for the job to actually be inside its fetch before issuing the
    // next three submissions, so they deterministically observe the
    // sequence flag as set.
    started_notify.notified().await;

    let d2024 = orch
        .dispatch_sequence(SyncOptions { year: Some(2024), services: None, include_custom_values: false })
        .unwrap();
    let d2023 = orch
        .dispatch_sequence(SyncOptions { year: Some(2023), services: None, include_custom_values: false })
        .unwrap();
    let d2022 = orch
        .dispatch_sequence(SyncOptions { year: Some(2022), services: None, include_custom_values: false })
        .unwrap();

    let (Dispatch::Queued(id_2024), Dispatch::Queued(id_2023), Dispatch::Queued(id_2022)) = (d2024, d2023, d2022) else {
        panic!("expected all three submissions to queue while a sequence is running");
    };

    assert_eq!(orch.queue_position(id_2024), Some(1));
    assert_eq!(orch.queue_position(id_2023), Some(2));
    assert_eq!(orch.queue_position(id_2022), Some(3));

    assert!(orch.queue_cancel(id_2023));

    assert_eq!(orch.queue_position(id_2024), Some(1));
    assert_eq!(orch.queue_position(id_2022), Some(2));

    gate.notify_waiters();
}

#[tokio::test]
async fn s2_dedup_returns_existing_id_then_admits_distinct_custom_values_request() {
    let started_notify = Arc::new(tokio::sync::Notify::new());
    let gate = Arc::new(tokio::sync::Notify::new());
    let orch = orchestrator_with_blocking_job(started_notify.clone(), gate.clone());

    orch.dispatch_sequence(SyncOptions { year: None, services: Some(vec!["slow".to_string()]), include_custom_values: false })
        .unwrap();
    started_notify.notified().await;

    let first = orch
        .dispatch_sequence(SyncOptions { year: Some(2025), services: None, include_custom_values: false })
        .unwrap();
    let second = orch
        .dispatch_sequence(SyncOptions { year: Some(2025), services: None, include_custom_values: false })
        .unwrap();

    let (Dispatch::Queued(id_a), Dispatch::Queued(id_b)) = (first, second) else {
        panic!("expected both submissions to queue");
    };
    assert_eq!(id_a, id_b);
    assert_eq!(orch.queue_snapshot().len(), 1);

    let third = orch
        .dispatch_sequence(SyncOptions { year: Some(2025), services: None, include_custom_values: true })
        .unwrap();
    let Dispatch::Queued(id_c) = third else {
        panic!("expected third submission to queue");
    };
    assert_ne!(id_c, id_a);
    assert_eq!(orch.queue_snapshot().len(), 2);

    gate.notify_waiters();
}
