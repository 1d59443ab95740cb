//! Scenario: first sighting creates, later sightings append.
//!
//! # Invariants under test (in-process, no DB required)
//!
//! 1. The first event for a transfer creates exactly one aggregate holding
//!    exactly that event.
//! 2. A second event appends exactly one entry and leaves the identity fields
//!    untouched.
//! 3. Identity fields are first-writer-wins even when a later payload
//!    disagrees, including the originating principal.
//! 4. A transfer id names one aggregate whichever principal reports it.

use fts_reconcile::{Disposition, EventReconciler, InMemoryStore, RetryPolicy};
use fts_testkit::{at, error_event, failed, started, transfer_id, ALICE, BOB};

fn reconciler() -> EventReconciler<InMemoryStore> {
    EventReconciler::new(InMemoryStore::new()).with_policy(RetryPolicy::no_backoff(3))
}

#[tokio::test]
async fn first_event_creates_single_event_aggregate() {
    let r = reconciler();
    let tid = transfer_id(1);
    let n = started(tid, ALICE);

    let out = r.handle(&n).await.expect("reconcile");
    assert_eq!(out.disposition, Disposition::Created);
    assert_eq!(out.attempts, 1);
    assert_eq!(out.partition_key, ALICE);

    assert_eq!(r.store().len(), 1, "exactly one aggregate");
    let agg = r.store().get(ALICE, &tid.to_string()).expect("aggregate");
    assert_eq!(agg.transfer_id, tid);
    assert_eq!(agg.originating_principal, ALICE);
    assert_eq!(agg.origination_time, at(-2));
    assert_eq!(agg.event_count(), 1);

    let ev = &agg.events[0];
    assert_eq!(ev.id, out.event_id);
    assert_eq!(ev.subject, n.subject);
    assert_eq!(ev.event_type, n.event_type);
    assert_eq!(ev.event_time, n.event_time);
    assert_eq!(agg.version_token, Some(out.version));
}

#[tokio::test]
async fn second_event_appends_and_keeps_identity() {
    let r = reconciler();
    let tid = transfer_id(2);

    let first = r.handle(&started(tid, ALICE)).await.unwrap();
    let before = r.store().get(ALICE, &tid.to_string()).unwrap();

    let second = r
        .handle(&failed(tid, ALICE, "checksum mismatch"))
        .await
        .unwrap();
    assert_eq!(second.disposition, Disposition::Appended);
    assert_eq!(second.attempts, 1);

    let after = r.store().get(ALICE, &tid.to_string()).unwrap();
    assert_eq!(after.event_count(), before.event_count() + 1);
    assert_eq!(after.id, before.id);
    assert_eq!(after.originating_principal, before.originating_principal);
    assert_eq!(after.origination_time, before.origination_time);
    assert_eq!(after.events[0], before.events[0], "existing entries untouched");
    assert_eq!(after.events[0].id, first.event_id);
    assert_eq!(after.events[1].id, second.event_id);
    assert!(after.events[1].payload.is_error());
    assert_eq!(r.store().len(), 1);
}

#[tokio::test]
async fn identity_fields_are_first_writer_wins() {
    let r = reconciler();
    let tid = transfer_id(3);

    // The error event arrives first and carries its own origination time.
    r.reconcile(&error_event(tid, ALICE, at(600))).await.unwrap();
    r.handle(&started(tid, ALICE)).await.unwrap();

    let agg = r.store().get(ALICE, &tid.to_string()).unwrap();
    assert_eq!(agg.event_count(), 2);
    assert_eq!(
        agg.origination_time,
        at(600),
        "origination time comes from whichever event seeded the aggregate"
    );
    assert!(agg.events[0].payload.is_error());
}

#[tokio::test]
async fn later_principal_appends_to_first_principals_aggregate() {
    let r = reconciler();
    let tid = transfer_id(4);

    let a = r.handle(&started(tid, ALICE)).await.unwrap();
    let b = r
        .handle(&failed(tid, BOB, "quarantined by scanner"))
        .await
        .unwrap();
    assert_eq!(a.disposition, Disposition::Created);
    assert_eq!(b.disposition, Disposition::Appended);
    assert_eq!(b.partition_key, ALICE, "write goes to the owning partition");

    assert_eq!(r.store().len(), 1, "one aggregate per transfer id");
    assert!(r.store().get(BOB, &tid.to_string()).is_none());

    let agg = r.store().get_by_id(&tid.to_string()).unwrap();
    assert_eq!(agg.originating_principal, ALICE);
    assert_eq!(agg.event_count(), 2);
    assert_eq!(agg.events[1].id, b.event_id);
    assert_eq!(agg.events[1].payload.originating_principal(), BOB);
}
