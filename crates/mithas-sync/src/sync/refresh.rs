//! RefreshScheduler: coalescing and cooldown for full refreshes.
//!
//! The first caller runs a refresh immediately. Callers arriving while it
//! runs, or during the cooldown that follows, are queued and all share one
//! follow-up refresh started when the cooldown ends.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::{Result, SyncError};

use super::types::RefreshReport;

type Waiter = oneshot::Sender<Result<RefreshReport>>;

type RefreshFn =
    Arc<dyn Fn() -> Pin<Box<dyn Future<Output = Result<RefreshReport>> + Send>> + Send + Sync>;

pub(crate) struct RefreshScheduler {
    store: &'static str,
    throttle: Duration,
    slot: Arc<Mutex<Slot>>,
}

#[derive(Default)]
struct Slot {
    running: bool,
    cooldown_active: bool,
    /// Queued waiters, all answered by the next refresh.
    queued: Vec<Waiter>,
}

/// What the caller should do after checking the slot.
enum Action {
    Run,
    Wait(oneshot::Receiver<Result<RefreshReport>>),
}

impl RefreshScheduler {
    pub(crate) fn new(store: &'static str, throttle: Duration) -> Self {
        Self {
            store,
            throttle,
            slot: Arc::new(Mutex::new(Slot::default())),
        }
    }

    fn check_slot(&self) -> Action {
        let mut slot = self.slot.lock();
        if slot.running || slot.cooldown_active {
            let (tx, rx) = oneshot::channel();
            slot.queued.push(tx);
            Action::Wait(rx)
        } else {
            slot.running = true;
            Action::Run
        }
    }

    pub(crate) async fn schedule<F, Fut>(&self, make_future: F) -> Result<RefreshReport>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<RefreshReport>> + Send + 'static,
    {
        if let Action::Wait(rx) = self.check_slot() {
            return rx.await.map_err(|_| SyncError::Disposed(self.store))?;
        }

        let result = make_future().await;

        // Waiters that arrived during this run get the follow-up.
        let queued = {
            let mut slot = self.slot.lock();
            slot.running = false;
            slot.cooldown_active = true;
            std::mem::take(&mut slot.queued)
        };

        let run: RefreshFn = Arc::new(
            move || -> Pin<Box<dyn Future<Output = Result<RefreshReport>> + Send>> {
                Box::pin(make_future())
            },
        );
        tokio::spawn(cooldown_loop(Arc::clone(&self.slot), self.throttle, run, queued));

        result
    }
}

async fn cooldown_loop(slot: Arc<Mutex<Slot>>, throttle: Duration, run: RefreshFn, queued: Vec<Waiter>) {
    let mut carried = queued;

    loop {
        tokio::time::sleep(throttle).await;

        let mut waiters = std::mem::take(&mut carried);
        {
            let mut slot = slot.lock();
            slot.cooldown_active = false;
            waiters.append(&mut slot.queued);
            if waiters.is_empty() {
                break;
            }
            slot.running = true;
        }

        let result = run().await;

        let arrived_during_run = {
            let mut slot = slot.lock();
            slot.running = false;
            slot.cooldown_active = true;
            std::mem::take(&mut slot.queued)
        };

        for waiter in waiters {
            let _ = waiter.send(result.clone());
        }

        if arrived_during_run.is_empty() {
            slot.lock().cooldown_active = false;
            break;
        }
        carried = arrived_during_run;
    }
}
