//! Realtime ingestion: replay protection, buffering behind pending
//! mutations, transport wiring.

use std::sync::Arc;

use mithas_sync::config::StoreOptions;
use mithas_sync::domain::reels::{ReelStats, Reels, ReelsIntent};
use mithas_sync::error::RemoteError;
use mithas_sync::reactive::ChangeCause;
use mithas_sync::sync::RealtimeOutcome;
use mithas_sync::types::{Confirmation, Origin, RemoteEvent};
use mithas_sync::SyncStore;

use crate::support::{record_events, remote_of, ManualTransport, ScriptedRemote};

fn stats(likes: u64, liked: bool) -> ReelStats {
    ReelStats {
        likes_count: likes,
        is_liked: liked,
        ..ReelStats::default()
    }
}

fn like(reel_id: &str) -> ReelsIntent {
    ReelsIntent::Like {
        reel_id: reel_id.to_string(),
    }
}

fn reels_store(remote: &Arc<ScriptedRemote<Reels>>) -> SyncStore<Reels> {
    let store = SyncStore::new(remote_of(remote), StoreOptions::default(), None);
    store.apply_realtime(RemoteEvent::put("R1", stats(10, false), 4));
    store
}

#[tokio::test]
async fn replayed_event_is_applied_once() {
    let remote = ScriptedRemote::<Reels>::new();
    let store = reels_store(&remote);
    let (events, _unsubscribe) = record_events(&store);

    let event = RemoteEvent::put("R1", stats(12, false), 5);
    assert_eq!(store.apply_realtime(event.clone()), RealtimeOutcome::Applied);
    let after_first = store.state();

    assert_eq!(store.apply_realtime(event), RealtimeOutcome::Stale);
    assert_eq!(store.state(), after_first);
    assert_eq!(events.lock().len(), 1);
    assert_eq!(events.lock()[0].cause, ChangeCause::Realtime);
}

#[tokio::test]
async fn out_of_order_older_event_is_dropped() {
    let remote = ScriptedRemote::<Reels>::new();
    let store = reels_store(&remote);

    store.apply_realtime(RemoteEvent::put("R1", stats(20, false), 9));
    assert_eq!(
        store.apply_realtime(RemoteEvent::put("R1", stats(15, false), 7)),
        RealtimeOutcome::Stale
    );

    let record = store.get("R1").unwrap();
    assert_eq!(record.payload.likes_count, 20);
    assert_eq!(record.sequence, 9);
}

#[tokio::test]
async fn event_for_pending_entity_waits_for_confirmation() {
    let remote = ScriptedRemote::<Reels>::new();
    remote.on_commit(|_| Ok(Confirmation::of(RemoteEvent::put("R1", stats(11, true), 5))));
    let gate = remote.hold("R1");
    let store = reels_store(&remote);

    let handle = store.dispatch(like("R1")).unwrap();

    // Another user liked the reel after our like reached the server.
    let outcome = store.apply_realtime(RemoteEvent::put("R1", stats(12, true), 6));
    assert_eq!(outcome, RealtimeOutcome::Buffered);
    let optimistic = store.get("R1").unwrap();
    assert_eq!(optimistic.origin, Origin::LocalOptimistic);
    assert_eq!(optimistic.payload.likes_count, 11);

    gate.release();
    handle.await.unwrap();

    let record = store.get("R1").unwrap();
    assert_eq!(record.payload.likes_count, 12);
    assert_eq!(record.sequence, 6);
    assert_eq!(record.origin, Origin::Confirmed);
}

#[tokio::test]
async fn buffered_event_applies_after_rollback() {
    let remote = ScriptedRemote::<Reels>::new();
    remote.on_commit(|_| Err(RemoteError::network("connection reset")));
    let gate = remote.hold("R1");
    let store = reels_store(&remote);

    let handle = store.dispatch(like("R1")).unwrap();
    store.apply_realtime(RemoteEvent::put("R1", stats(30, false), 8));

    gate.release();
    assert!(handle.await.is_err());

    let record = store.get("R1").unwrap();
    assert_eq!(record.payload, stats(30, false));
    assert_eq!(record.sequence, 8);
}

#[tokio::test]
async fn delete_event_removes_the_record() {
    let remote = ScriptedRemote::<Reels>::new();
    let store = reels_store(&remote);

    assert_eq!(
        store.apply_realtime(RemoteEvent::delete("R1", 5)),
        RealtimeOutcome::Applied
    );
    assert!(store.get("R1").is_none());
    assert_eq!(store.aggregates().reel_count, 0);
}

#[tokio::test]
async fn transport_events_reach_the_store_until_unsubscribed() {
    let remote = ScriptedRemote::<Reels>::new();
    let store = reels_store(&remote);
    let transport = ManualTransport::<ReelStats>::new();

    let unsubscribe = store.subscribe_realtime(&transport, "reels");
    assert_eq!(transport.subscriber_count("reels"), 1);

    transport.push("reels", RemoteEvent::put("R2", stats(1, false), 1));
    assert!(store.get("R2").is_some());

    unsubscribe();
    assert_eq!(transport.subscriber_count("reels"), 0);
    transport.push("reels", RemoteEvent::put("R3", stats(1, false), 1));
    assert!(store.get("R3").is_none());
}

#[tokio::test]
async fn transport_does_not_keep_the_store_alive() {
    let remote = ScriptedRemote::<Reels>::new();
    let transport = ManualTransport::<ReelStats>::new();
    let store = reels_store(&remote);
    let _unsubscribe = store.subscribe_realtime(&transport, "reels");

    drop(store);

    // Delivered to a dropped store: ignored.
    transport.push("reels", RemoteEvent::put("R1", stats(99, false), 50));
    assert_eq!(transport.subscriber_count("reels"), 1);
}
