//! End-to-end scenarios across scope, envelope, reducer and engine.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde_json::json;
use tokio::sync::broadcast;
use tokio::time::{sleep, timeout};

use crate::action::{Action, ActionKind, FetchLaborStats, Phase, RequestId};
use crate::config::Config;
use crate::engine::{Engine, EngineHandle};
use crate::envelope::RunOptions;
use crate::model::{LaborStats, LaborStatsKey, Profile};
use crate::revision::Revision;
use crate::testing::ScriptedTransport;

fn engine(transport: ScriptedTransport, config: Config) -> EngineHandle {
    Engine::builder(transport)
        .with_config(config)
        .build()
        .unwrap()
        .start()
}

fn received(rx: &mut broadcast::Receiver<Arc<Action>>) -> Vec<Arc<Action>> {
    let mut actions = Vec::new();
    while let Ok(action) = rx.try_recv() {
        actions.push(action);
    }
    actions
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Let spawned tasks run up to their next real suspension point.
async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

// =============================================================================
// Ledger and cache around one fetch
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_fetch_marks_ledger_then_fills_cache() {
    init_tracing();
    let handle = engine(
        ScriptedTransport::new()
            .respond(ActionKind::FetchLaborStats, json!({ "count": 42 }))
            .delay(ActionKind::FetchLaborStats, Duration::from_millis(200)),
        Config::default(),
    );
    let scope = Arc::new(handle.scope());
    let api = handle.api().clone();

    let task = scope.spawn({
        let scope = scope.clone();
        async move { api.fetch_labor_stats(&scope, "75", "job1").await }
    });
    settle().await;

    assert!(handle.snapshot().ledger.is_fetching("stats:75:job1"));

    let stats = task.await.unwrap().unwrap().unwrap();
    assert_eq!(stats.map(|s| s.count), Some(42));

    let snapshot = handle.snapshot();
    assert!(!snapshot.ledger.is_fetching("stats:75:job1"));
    assert_eq!(snapshot.caches.labor_stats.get("75:job1").map(|s| s.count), Some(42));
}

// =============================================================================
// Drain before the request settles
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_drain_suppresses_completion_and_leaves_ledger() {
    init_tracing();
    let handle = engine(
        ScriptedTransport::new()
            .respond(ActionKind::FetchLaborStats, json!({ "count": 1 }))
            .delay(ActionKind::FetchLaborStats, Duration::from_secs(1)),
        Config::default(),
    );
    let mut actions = handle.store().subscribe();
    let scope = Arc::new(handle.scope());
    let api = handle.api().clone();

    let task = scope.spawn({
        let scope = scope.clone();
        async move { api.fetch_labor_stats(&scope, "75", "job1").await }
    });
    settle().await;

    scope.drain();
    sleep(Duration::from_secs(2)).await;

    // The consumer chain was dropped, not resumed
    assert!(task.await.unwrap().is_none());

    let seen = received(&mut actions);
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].phase(), Phase::Pending);

    let snapshot = handle.snapshot();
    assert!(snapshot.ledger.is_fetching("stats:75:job1"));
    assert!(snapshot.caches.labor_stats.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_drain_releases_ledger_when_configured() {
    init_tracing();
    let handle = engine(
        ScriptedTransport::new()
            .respond(ActionKind::FetchLaborStats, json!({ "count": 1 }))
            .delay(ActionKind::FetchLaborStats, Duration::from_secs(1)),
        Config {
            release_on_drain: true,
            ..Config::default()
        },
    );
    let mut actions = handle.store().subscribe();
    let scope = Arc::new(handle.scope());
    let api = handle.api().clone();

    let _task = scope.spawn({
        let scope = scope.clone();
        async move { api.fetch_labor_stats(&scope, "75", "job1").await }
    });
    settle().await;
    assert!(handle.snapshot().ledger.is_fetching("stats:75:job1"));

    scope.drain();
    sleep(Duration::from_secs(2)).await;

    let kinds: Vec<ActionKind> = received(&mut actions).iter().map(|a| a.kind()).collect();
    assert_eq!(kinds, vec![ActionKind::FetchLaborStats, ActionKind::FetchAbandoned]);
    assert_eq!(handle.snapshot().ledger.entry("stats:75:job1"), Some(false));
}

#[tokio::test(start_paused = true)]
async fn test_fetch_on_drained_scope_never_marks_ledger() {
    let handle = engine(
        ScriptedTransport::new().respond(ActionKind::FetchLaborStats, json!({ "count": 1 })),
        Config {
            release_on_drain: true,
            ..Config::default()
        },
    );
    let scope = handle.scope();
    scope.drain();

    let late = handle.api().fetch_labor_stats(&scope, "75", "job1");
    assert!(timeout(Duration::from_secs(5), late).await.is_err());

    let snapshot = handle.snapshot();
    assert!(!snapshot.ledger.is_fetching("stats:75:job1"));
    assert_eq!(snapshot.ledger.entry("stats:75:job1"), None);
}

// =============================================================================
// Stale server response after a local edit
// =============================================================================

#[tokio::test]
async fn test_stale_fetch_does_not_clobber_local_edit() {
    let handle = engine(
        ScriptedTransport::new().respond(
            ActionKind::FetchUser,
            json!({ "userId": "u1", "revision": 1, "profile": { "name": "Server" } }),
        ),
        Config::default(),
    );
    handle.session().login("t0k3n", "u1").unwrap();
    let scope = handle.scope();

    handle.api().update_profile(Profile {
        name: "First".into(),
        ..Profile::default()
    });
    handle.api().update_profile(Profile {
        name: "Second".into(),
        ..Profile::default()
    });
    assert_eq!(handle.snapshot().user.revision, Revision::new(2));

    handle.api().fetch_user(&scope, "u1").await.unwrap();

    let user = handle.snapshot().user.clone();
    assert_eq!(user.revision, Revision::new(2));
    assert_eq!(user.profile.name, "Second");
}

// =============================================================================
// Phase ordering under concurrency
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_concurrent_requests_keep_phase_order() {
    let handle = engine(ScriptedTransport::new(), Config::default());
    let mut actions = handle.store().subscribe();
    let scope = handle.scope();

    let requests = (0..20).map(|i| {
        let fail = i % 5 == 0;
        // Failures settle after every success, so the last error survives
        let delay = if fail {
            Duration::from_millis(600 + i)
        } else {
            Duration::from_millis(fastrand::u64(1..500))
        };
        let key = LaborStatsKey::new("75", format!("job{}", i));
        let options = RunOptions::new().dedup_key(format!("stats:75:job{}", i));
        scope.run_async::<FetchLaborStats, _, _>(key, options, move || async move {
            sleep(delay).await;
            if fail {
                anyhow::bail!("job{} unavailable", i);
            }
            Ok(LaborStats {
                count: i,
                unemployment_days: None,
            })
        })
    });
    let results = join_all(requests).await;

    assert_eq!(results.iter().filter(|r| r.is_some()).count(), 16);

    let seen = received(&mut actions);
    let mut phases: HashMap<RequestId, Vec<Phase>> = HashMap::new();
    for action in &seen {
        let action = action.as_async().unwrap();
        phases.entry(action.request_id()).or_default().push(action.phase());
    }
    assert_eq!(phases.len(), 20);
    let failures = seen.iter().filter(|a| a.phase() == Phase::Error).count();
    assert_eq!(failures, 4);
    for sequence in phases.values() {
        assert_eq!(sequence.len(), 2);
        assert_eq!(sequence[0], Phase::Pending);
        assert!(sequence[1].is_terminal());
    }

    let snapshot = handle.snapshot();
    assert!(!snapshot.ledger.any_fetching());
    assert_eq!(snapshot.caches.labor_stats.len(), 16);
    assert_eq!(snapshot.ledger.last_error_message(), Some("job15 unavailable"));
}
