use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use serde_json::json;
use strand_projector::{Effects, ProjectionStatus, Projector, SubscriptionMode};
use strand_store_core::{EventRecord, Timestamp};

//──────────────────────────────────────────────────────────────────────────────
//  Helpers
//──────────────────────────────────────────────────────────────────────────────

fn record(id: &str, stream: &str, kind: &str, created: Timestamp) -> EventRecord {
    EventRecord {
        id: id.to_owned(),
        stream: stream.to_owned(),
        kind: kind.to_owned(),
        data: Some(json!({ "id": id })),
        meta: None,
        created,
        recorded: created,
    }
}

fn collector() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) + Clone) {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    (log, move |entry: &str| sink.lock().unwrap().push(entry.to_owned()))
}

//──────────────────────────────────────────────────────────────────────────────
//  Mode filtering
//──────────────────────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn modes_filter_by_delivery_status() -> Result<()> {
    let projector = Projector::new();
    let (log, push_entry) = collector();

    let once_log = push_entry.clone();
    let _once = projector.once(
        "user:created",
        move |_record| {
            once_log("once");
            async { Ok(None) }
        },
        Effects::default(),
    );
    let on_log = push_entry.clone();
    let _on = projector.on("user:created", move |_record| {
        on_log("on");
        async { Ok(None) }
    });
    let all_log = push_entry.clone();
    let _all = projector.all("user:created", move |_record| {
        all_log("all");
        async { Ok(None) }
    });

    // First delivery: everybody runs.
    let fresh = record("e1", "s1", "user:created", Timestamp::new(10, 0));
    assert!(projector.push(fresh.clone(), ProjectionStatus::first_delivery()).await?);
    let mut seen = log.lock().unwrap().clone();
    seen.sort();
    assert_eq!(seen, vec!["all", "on", "once"]);

    // Replay: once is skipped.
    log.lock().unwrap().clear();
    assert!(projector.push(fresh.clone(), ProjectionStatus::new(true, false)).await?);
    let mut seen = log.lock().unwrap().clone();
    seen.sort();
    assert_eq!(seen, vec!["all", "on"]);

    // Outdated: only all runs.
    log.lock().unwrap().clear();
    assert!(projector.push(fresh, ProjectionStatus::new(true, true)).await?);
    assert_eq!(log.lock().unwrap().clone(), vec!["all"]);

    Ok(())
}

#[test]
fn acceptance_matrix_is_exact() {
    use SubscriptionMode::*;
    for (mode, hydrated, outdated, expected) in [
        (Once, false, false, true),
        (Once, true, false, false),
        (Once, false, true, false),
        (Once, true, true, false),
        (On, false, false, true),
        (On, true, false, true),
        (On, false, true, false),
        (On, true, true, false),
        (All, false, false, true),
        (All, true, false, true),
        (All, false, true, true),
        (All, true, true, true),
    ] {
        assert_eq!(
            mode.accepts(ProjectionStatus::new(hydrated, outdated)),
            expected,
            "{mode:?} hydrated={hydrated} outdated={outdated}"
        );
    }
}

//──────────────────────────────────────────────────────────────────────────────
//  Ordering
//──────────────────────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn same_stream_records_never_interleave() -> Result<()> {
    let projector = Projector::new();
    let log: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

    let handler_log = Arc::clone(&log);
    let _sub = projector.on("user:created", move |record: EventRecord| {
        let handler_log = Arc::clone(&handler_log);
        async move {
            handler_log.lock().unwrap().push(format!("start:{}", record.id));
            tokio::time::sleep(Duration::from_millis(10)).await;
            handler_log.lock().unwrap().push(format!("end:{}", record.id));
            Ok(None)
        }
    });

    let first = projector.push(
        record("e1", "s1", "user:created", Timestamp::new(10, 0)),
        ProjectionStatus::first_delivery(),
    );
    let second = projector.push(
        record("e2", "s1", "user:created", Timestamp::new(11, 0)),
        ProjectionStatus::first_delivery(),
    );
    let (a, b) = tokio::join!(first, second);
    assert!(a? && b?);

    assert_eq!(
        log.lock().unwrap().clone(),
        vec!["start:e1", "end:e1", "start:e2", "end:e2"]
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn different_streams_dispatch_in_parallel() -> Result<()> {
    let projector = Projector::new();

    // Both handlers must be in flight at once to pass the barrier; serialized
    // dispatch would deadlock and trip the timeout.
    let barrier = Arc::new(tokio::sync::Barrier::new(2));
    let gate = Arc::clone(&barrier);
    let _sub = projector.on("user:created", move |_record| {
        let gate = Arc::clone(&gate);
        async move {
            gate.wait().await;
            Ok(None)
        }
    });

    let first = projector.push(
        record("e1", "s1", "user:created", Timestamp::new(1, 0)),
        ProjectionStatus::first_delivery(),
    );
    let second = projector.push(
        record("e2", "s2", "user:created", Timestamp::new(2, 0)),
        ProjectionStatus::first_delivery(),
    );
    let (a, b) = tokio::time::timeout(Duration::from_secs(5), async {
        tokio::join!(first, second)
    })
    .await?;
    assert!(a? && b?);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn listeners_of_one_record_run_concurrently() -> Result<()> {
    let projector = Projector::new();
    let concurrent = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    for _ in 0..3 {
        let concurrent = Arc::clone(&concurrent);
        let peak = Arc::clone(&peak);
        let _sub = projector.on("user:created", move |_record| {
            let concurrent = Arc::clone(&concurrent);
            let peak = Arc::clone(&peak);
            async move {
                let now = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                concurrent.fetch_sub(1, Ordering::SeqCst);
                Ok(None)
            }
        });
    }

    projector
        .push(
            record("e1", "s1", "user:created", Timestamp::new(10, 0)),
            ProjectionStatus::first_delivery(),
        )
        .await?;
    assert_eq!(peak.load(Ordering::SeqCst), 3, "listeners joined in one slot");
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn drained_streams_get_fresh_queues() -> Result<()> {
    let projector = Projector::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let _sub = projector.on("user:created", move |_record| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        }
    });

    projector
        .push(
            record("e1", "s1", "user:created", Timestamp::new(10, 0)),
            ProjectionStatus::first_delivery(),
        )
        .await?;

    // Let the drain handshake retire the first queue instance.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(projector.active_queues(), 0);

    projector
        .push(
            record("e2", "s1", "user:created", Timestamp::new(11, 0)),
            ProjectionStatus::first_delivery(),
        )
        .await?;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    Ok(())
}

//──────────────────────────────────────────────────────────────────────────────
//  Effects and failures
//──────────────────────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn once_effects_route_success_and_error() -> Result<()> {
    let projector = Projector::new();
    let (log, push_entry) = collector();

    let success_log = push_entry.clone();
    let error_log = push_entry.clone();
    let _mail = projector.once(
        "mail:send",
        |record: EventRecord| async move {
            if record.stream == "bad" {
                anyhow::bail!("smtp unreachable");
            }
            Ok(Some(json!({ "delivered": true })))
        },
        Effects::default()
            .and_success(move |data, record| {
                success_log(&format!(
                    "ok:{}:{}",
                    record.stream,
                    data.unwrap_or_default()["delivered"]
                ));
            })
            .and_error(move |error, record| {
                error_log(&format!("err:{}:{error}", record.stream));
            }),
    );

    assert!(
        projector
            .push(record("e1", "good", "mail:send", Timestamp::new(1, 0)), ProjectionStatus::first_delivery())
            .await?
    );
    assert!(
        projector
            .push(record("e2", "bad", "mail:send", Timestamp::new(2, 0)), ProjectionStatus::first_delivery())
            .await?,
        "a failing once handler never rejects the slot"
    );

    let seen = log.lock().unwrap().clone();
    assert_eq!(seen, vec!["ok:good:true", "err:bad:smtp unreachable"]);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn on_handler_failure_rejects_the_push() -> Result<()> {
    let projector = Projector::new();
    let _sub = projector.on("user:created", |_record| async {
        anyhow::bail!("read model update failed")
    });

    let error = projector
        .push(
            record("e1", "s1", "user:created", Timestamp::new(1, 0)),
            ProjectionStatus::first_delivery(),
        )
        .await
        .unwrap_err();
    assert_eq!(error.to_string(), "read model update failed");

    // The stream's queue survives the failure and keeps dispatching.
    let _sub2 = projector.all("user:created", |_record| async { Ok(None) });
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn unsubscribe_removes_the_handler() -> Result<()> {
    let projector = Projector::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let subscription = projector.on("user:created", move |_record| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        }
    });

    projector
        .push(
            record("e1", "s1", "user:created", Timestamp::new(1, 0)),
            ProjectionStatus::first_delivery(),
        )
        .await?;
    subscription.unsubscribe();
    projector
        .push(
            record("e2", "s1", "user:created", Timestamp::new(2, 0)),
            ProjectionStatus::first_delivery(),
        )
        .await?;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    Ok(())
}

//──────────────────────────────────────────────────────────────────────────────
//  Batched listeners
//──────────────────────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn push_many_hands_the_full_batch_to_every_handler() -> Result<()> {
    let projector = Projector::new();
    let sizes = Arc::new(Mutex::new(Vec::new()));

    for _ in 0..2 {
        let sizes = Arc::clone(&sizes);
        let _sub = projector.subscribe_batch("import", move |records: Vec<EventRecord>| {
            let sizes = Arc::clone(&sizes);
            async move {
                sizes.lock().unwrap().push(records.len());
                Ok(())
            }
        });
    }

    let batch = vec![
        record("e1", "s1", "user:created", Timestamp::new(1, 0)),
        record("e2", "s2", "user:created", Timestamp::new(2, 0)),
    ];
    projector.push_many("import", batch).await?;
    projector.push_many("other", Vec::new()).await?;

    assert_eq!(sizes.lock().unwrap().clone(), vec![2, 2]);
    Ok(())
}
