//! Test doubles shared by the integration suites: a scripted remote
//! authority and an in-process realtime transport.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use mithas_sync::domain::Domain;
use mithas_sync::error::RemoteError;
use mithas_sync::reactive::{StoreEvent, Unsubscribe};
use mithas_sync::sync::{EventCallback, RealtimeTransport, RemoteCall, RemoteResult};
use mithas_sync::types::{Confirmation, EntityId, RemoteEvent, ServerRecord};
use mithas_sync::SyncStore;

// ============================================================================
// ScriptedRemote
// ============================================================================

type CommitFn<D> = Box<
    dyn Fn(&<D as Domain>::Intent) -> RemoteResult<Confirmation<<D as Domain>::Payload>>
        + Send
        + Sync,
>;

type FetchFn<D> = Box<dyn Fn() -> RemoteResult<Vec<ServerRecord<<D as Domain>::Payload>>> + Send + Sync>;

struct ScriptedInner<D: Domain> {
    commits: Vec<EntityId>,
    fetches: usize,
    gates: HashMap<EntityId, VecDeque<oneshot::Receiver<()>>>,
    fetch_gates: VecDeque<oneshot::Receiver<()>>,
    on_commit: Option<CommitFn<D>>,
    on_fetch: Option<FetchFn<D>>,
}

/// Remote authority whose replies are scripted per test.
///
/// Replies are computed by the `on_commit` closure. A reply can be held back
/// with [`ScriptedRemote::hold`]: the next commit targeting that entity waits
/// until the returned gate is released (or dropped).
pub struct ScriptedRemote<D: Domain> {
    inner: Mutex<ScriptedInner<D>>,
}

pub struct Gate(oneshot::Sender<()>);

impl Gate {
    pub fn release(self) {
        let _ = self.0.send(());
    }
}

impl<D: Domain> ScriptedRemote<D> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(ScriptedInner {
                commits: Vec::new(),
                fetches: 0,
                gates: HashMap::new(),
                fetch_gates: VecDeque::new(),
                on_commit: None,
                on_fetch: None,
            }),
        })
    }

    pub fn on_commit(
        &self,
        f: impl Fn(&D::Intent) -> RemoteResult<Confirmation<D::Payload>> + Send + Sync + 'static,
    ) {
        self.inner.lock().on_commit = Some(Box::new(f));
    }

    pub fn on_fetch(
        &self,
        f: impl Fn() -> RemoteResult<Vec<ServerRecord<D::Payload>>> + Send + Sync + 'static,
    ) {
        self.inner.lock().on_fetch = Some(Box::new(f));
    }

    /// Hold the next commit for `entity_id` until the gate is released.
    pub fn hold(&self, entity_id: &str) -> Gate {
        let (tx, rx) = oneshot::channel();
        self.inner
            .lock()
            .gates
            .entry(entity_id.to_string())
            .or_default()
            .push_back(rx);
        Gate(tx)
    }

    /// Hold the next fetch until the gate is released. The reply is
    /// computed after the gate opens.
    pub fn hold_fetch(&self) -> Gate {
        let (tx, rx) = oneshot::channel();
        self.inner.lock().fetch_gates.push_back(rx);
        Gate(tx)
    }

    /// Entities of every commit received, in arrival order.
    pub fn commits(&self) -> Vec<EntityId> {
        self.inner.lock().commits.clone()
    }

    pub fn fetches(&self) -> usize {
        self.inner.lock().fetches
    }
}

#[async_trait]
impl<D: Domain> RemoteCall<D> for ScriptedRemote<D> {
    async fn commit(&self, intent: &D::Intent) -> RemoteResult<Confirmation<D::Payload>> {
        let entity_id = D::target(intent);
        let gate = {
            let mut inner = self.inner.lock();
            inner.commits.push(entity_id.clone());
            inner.gates.get_mut(&entity_id).and_then(VecDeque::pop_front)
        };
        if let Some(gate) = gate {
            let _ = gate.await;
        }

        let inner = self.inner.lock();
        match &inner.on_commit {
            Some(f) => f(intent),
            None => Err(RemoteError::network("no reply scripted")),
        }
    }

    async fn fetch(&self) -> RemoteResult<Vec<ServerRecord<D::Payload>>> {
        let gate = {
            let mut inner = self.inner.lock();
            inner.fetches += 1;
            inner.fetch_gates.pop_front()
        };
        if let Some(gate) = gate {
            let _ = gate.await;
        }

        let inner = self.inner.lock();
        match &inner.on_fetch {
            Some(f) => f(),
            None => Ok(Vec::new()),
        }
    }
}

pub fn remote_of<D: Domain>(remote: &Arc<ScriptedRemote<D>>) -> Arc<dyn RemoteCall<D>> {
    remote.clone()
}

// ============================================================================
// ManualTransport
// ============================================================================

type Subscribers<P> = Arc<Mutex<HashMap<String, Vec<(u64, EventCallback<P>)>>>>;

/// Realtime transport driven by the test: `push` delivers an event to every
/// subscriber of a channel.
pub struct ManualTransport<P> {
    subscribers: Subscribers<P>,
    next_id: Mutex<u64>,
}

impl<P: Send + Sync + 'static> ManualTransport<P> {
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(HashMap::new())),
            next_id: Mutex::new(0),
        }
    }

    pub fn push(&self, channel_key: &str, event: RemoteEvent<P>)
    where
        P: Clone,
    {
        let callbacks: Vec<EventCallback<P>> = self
            .subscribers
            .lock()
            .get(channel_key)
            .map(|subs| subs.iter().map(|(_, cb)| Arc::clone(cb)).collect())
            .unwrap_or_default();
        for cb in callbacks {
            cb(event.clone());
        }
    }

    pub fn subscriber_count(&self, channel_key: &str) -> usize {
        self.subscribers
            .lock()
            .get(channel_key)
            .map_or(0, Vec::len)
    }
}

impl<P: Send + Sync + 'static> RealtimeTransport<P> for ManualTransport<P> {
    fn subscribe(&self, channel_key: &str, on_event: EventCallback<P>) -> Unsubscribe {
        let id = {
            let mut next = self.next_id.lock();
            *next += 1;
            *next
        };
        self.subscribers
            .lock()
            .entry(channel_key.to_string())
            .or_default()
            .push((id, on_event));

        let subscribers = Arc::clone(&self.subscribers);
        let channel = channel_key.to_string();
        Box::new(move || {
            if let Some(subs) = subscribers.lock().get_mut(&channel) {
                subs.retain(|(sid, _)| *sid != id);
            }
        })
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Record every event a store emits.
pub fn record_events<D: Domain>(store: &SyncStore<D>) -> (Arc<Mutex<Vec<StoreEvent>>>, Unsubscribe) {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    let unsubscribe = store.subscribe(move |event| sink.lock().push(event.clone()));
    (log, unsubscribe)
}
