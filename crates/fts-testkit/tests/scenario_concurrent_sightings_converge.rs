//! Scenario: concurrent reconciliations of the same transfer converge.
//!
//! # Invariants under test (in-process, no DB required)
//!
//! 1. Two first-sightings that both observe "absent" end with one aggregate
//!    holding both events. The loser's `AlreadyExists` never escapes.
//! 2. Two appends that both read the same version end with both events
//!    appended. The loser's `VersionMismatch` never escapes.
//! 3. First sightings from different principals still converge on one
//!    aggregate, owned by whichever principal created it.
//! 4. Many concurrent tasks on a multi-threaded runtime lose nothing.
//!
//! `GatedStore` parks every participant after its lookup until all have read,
//! so the race happens on every run instead of by chance.

use std::collections::HashSet;
use std::sync::Arc;

use fts_reconcile::{Disposition, EventReconciler, InMemoryStore, RetryPolicy};
use fts_testkit::{at, error_event, started_event, transfer_id, GatedStore, ALICE, BOB};

#[tokio::test]
async fn two_first_sightings_both_land() {
    let mem = Arc::new(InMemoryStore::new());
    let r = EventReconciler::new(GatedStore::new(mem.clone(), 2))
        .with_policy(RetryPolicy::no_backoff(5));
    let tid = transfer_id(10);

    let a = started_event(tid, ALICE, "upload");
    let b = started_event(tid, ALICE, "scan");
    let (ra, rb) = tokio::join!(r.reconcile(&a), r.reconcile(&b));
    let (ra, rb) = (ra.expect("a commits"), rb.expect("b commits"));

    let mut dispositions = vec![ra.disposition, rb.disposition];
    dispositions.sort_by_key(|d| d.as_str());
    assert_eq!(dispositions, vec![Disposition::Appended, Disposition::Created]);
    assert_eq!(ra.attempts + rb.attempts, 3, "exactly one side retried once");

    assert_eq!(mem.len(), 1);
    let agg = mem.get(ALICE, &tid.to_string()).unwrap();
    assert_eq!(agg.event_count(), 2);
    let ids: HashSet<_> = agg.events.iter().map(|e| e.id).collect();
    assert_eq!(ids, HashSet::from([ra.event_id, rb.event_id]));
}

#[tokio::test]
async fn first_sightings_from_two_principals_share_one_aggregate() {
    let mem = Arc::new(InMemoryStore::new());
    let r = EventReconciler::new(GatedStore::new(mem.clone(), 2))
        .with_policy(RetryPolicy::no_backoff(5));
    let tid = transfer_id(15);

    let a = started_event(tid, ALICE, "upload");
    let b = error_event(tid, BOB, at(30));
    let (ra, rb) = tokio::join!(r.reconcile(&a), r.reconcile(&b));
    let (ra, rb) = (ra.expect("a commits"), rb.expect("b commits"));

    assert_eq!(mem.len(), 1, "no second aggregate in the other partition");
    let agg = mem.get_by_id(&tid.to_string()).unwrap();
    assert_eq!(agg.event_count(), 2);
    assert!(agg.contains_event(ra.event_id));
    assert!(agg.contains_event(rb.event_id));

    let winner = if ra.disposition == Disposition::Created { &ra } else { &rb };
    assert_eq!(winner.disposition, Disposition::Created);
    assert_eq!(agg.originating_principal, winner.partition_key);
    assert_eq!(ra.partition_key, rb.partition_key);
}

#[tokio::test]
async fn two_concurrent_appends_both_land() {
    let mem = Arc::new(InMemoryStore::new());
    let tid = transfer_id(11);

    // Seed outside the gate so the gate only sees the two appenders.
    EventReconciler::new(mem.clone())
        .reconcile(&started_event(tid, ALICE, "upload"))
        .await
        .unwrap();
    let before = mem.get(ALICE, &tid.to_string()).unwrap().event_count();

    let r = EventReconciler::new(GatedStore::new(mem.clone(), 2))
        .with_policy(RetryPolicy::no_backoff(5));
    let a = started_event(tid, ALICE, "scan");
    let b = started_event(tid, ALICE, "publish");
    let (ra, rb) = tokio::join!(r.reconcile(&a), r.reconcile(&b));
    let (ra, rb) = (ra.unwrap(), rb.unwrap());

    assert_eq!(ra.disposition, Disposition::Appended);
    assert_eq!(rb.disposition, Disposition::Appended);
    assert_eq!(ra.attempts.max(rb.attempts), 2);

    let agg = mem.get(ALICE, &tid.to_string()).unwrap();
    assert_eq!(agg.event_count(), before + 2);
    assert!(agg.contains_event(ra.event_id));
    assert!(agg.contains_event(rb.event_id));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn many_concurrent_writers_lose_nothing() {
    const WRITERS: usize = 16;

    let mem = Arc::new(InMemoryStore::new());
    // A writer can lose at most once to each of the others.
    let r = Arc::new(
        EventReconciler::new(GatedStore::new(mem.clone(), WRITERS))
            .with_policy(RetryPolicy::no_backoff(WRITERS as u32)),
    );
    let tid = transfer_id(12);

    let mut handles = Vec::with_capacity(WRITERS);
    for i in 0..WRITERS {
        let r = r.clone();
        let ev = started_event(tid, ALICE, &format!("step-{i}"));
        handles.push(tokio::spawn(async move { r.reconcile(&ev).await }));
    }

    let mut created = 0;
    let mut committed = HashSet::new();
    for h in handles {
        let out = h.await.unwrap().expect("no conflict escapes");
        if out.disposition == Disposition::Created {
            created += 1;
        }
        committed.insert(out.event_id);
    }
    assert_eq!(created, 1);

    let agg = mem.get(ALICE, &tid.to_string()).unwrap();
    assert_eq!(agg.event_count(), WRITERS);
    let stored: HashSet<_> = agg.events.iter().map(|e| e.id).collect();
    assert_eq!(stored, committed);
}

#[tokio::test]
async fn different_transfers_do_not_contend() {
    let mem = Arc::new(InMemoryStore::new());
    let r = EventReconciler::new(GatedStore::new(mem.clone(), 2))
        .with_policy(RetryPolicy::no_backoff(1));

    let a = started_event(transfer_id(13), ALICE, "upload");
    let b = started_event(transfer_id(14), ALICE, "upload");
    let (ra, rb) = tokio::join!(r.reconcile(&a), r.reconcile(&b));

    // A single attempt each is enough: there is nothing to race on.
    assert_eq!(ra.unwrap().disposition, Disposition::Created);
    assert_eq!(rb.unwrap().disposition, Disposition::Created);
    assert_eq!(mem.len(), 2);
}
