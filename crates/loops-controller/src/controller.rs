//! Per-kind control loop: list, watch, queue, reconcile, back off.

use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::FutureExt;
use indexmap::IndexSet;
use loops_core::{ObjectKey, Resource};
use loops_storage::DynStore;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::ReconcileError;

/// Outcome of a successful reconcile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Done,
    /// Run again after the base backoff delay.
    Requeue,
    RequeueAfter(Duration),
}

#[async_trait]
pub trait Reconciler: Send + Sync + 'static {
    type Resource: Resource;

    /// Name used in logs.
    fn name(&self) -> &'static str;

    async fn reconcile(&self, key: &ObjectKey) -> Result<Action, ReconcileError>;
}

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub workers: usize,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            backoff_base: Duration::from_millis(500),
            backoff_max: Duration::from_secs(300),
        }
    }
}

impl ControllerConfig {
    /// `base * 2^(failures - 1)`, capped at `backoff_max`.
    pub fn backoff(&self, failures: u32) -> Duration {
        let factor = 2u32.saturating_pow(failures.saturating_sub(1));
        self.backoff_base
            .saturating_mul(factor)
            .min(self.backoff_max)
    }
}

#[derive(Default)]
struct QueueState {
    queued: IndexSet<ObjectKey>,
    active: HashSet<ObjectKey>,
    dirty: HashSet<ObjectKey>,
    failures: HashMap<ObjectKey, u32>,
}

/// Deduplicating work queue. A key is never handed out while it is active;
/// changes that arrive in the meantime re-queue it once it is done.
#[derive(Default)]
struct WorkQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl WorkQueue {
    fn add(&self, key: ObjectKey) {
        {
            let mut state = self.state.lock();
            if state.active.contains(&key) {
                state.dirty.insert(key);
                return;
            }
            state.queued.insert(key);
        }
        self.notify.notify_one();
    }

    fn pop(&self) -> Option<ObjectKey> {
        let mut state = self.state.lock();
        let key = state.queued.shift_remove_index(0)?;
        state.active.insert(key.clone());
        Some(key)
    }

    async fn next(&self) -> ObjectKey {
        loop {
            let notified = self.notify.notified();
            if let Some(key) = self.pop() {
                return key;
            }
            notified.await;
        }
    }

    fn done(&self, key: &ObjectKey) {
        let requeue = {
            let mut state = self.state.lock();
            state.active.remove(key);
            if state.dirty.remove(key) {
                state.queued.insert(key.clone());
                true
            } else {
                false
            }
        };
        if requeue {
            self.notify.notify_one();
        }
    }

    fn record_failure(&self, key: &ObjectKey) -> u32 {
        let mut state = self.state.lock();
        let count = state.failures.entry(key.clone()).or_insert(0);
        *count = count.saturating_add(1);
        *count
    }

    fn forget(&self, key: &ObjectKey) {
        self.state.lock().failures.remove(key);
    }

    fn len(&self) -> usize {
        self.state.lock().queued.len()
    }
}

/// Drives one [`Reconciler`] from store change events.
pub struct Controller<Rc: Reconciler> {
    store: DynStore,
    reconciler: Arc<Rc>,
    config: ControllerConfig,
    queue: Arc<WorkQueue>,
}

impl<Rc: Reconciler> Controller<Rc> {
    pub fn new(store: DynStore, reconciler: Rc, config: ControllerConfig) -> Self {
        Self {
            store,
            reconciler: Arc::new(reconciler),
            config,
            queue: Arc::new(WorkQueue::default()),
        }
    }

    /// Run until `shutdown` is cancelled. Fails only if the initial list fails.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), ReconcileError> {
        let kind = Rc::Resource::KIND;
        let name = self.reconciler.name();

        // Subscribe before listing so nothing written in between is missed.
        let mut events = self.store.subscribe();
        self.enqueue_all().await?;
        info!(controller = name, kind, queued = self.queue.len(), workers = self.config.workers, "controller started");

        let stop = shutdown.child_token();
        let mut workers = JoinSet::new();
        for _ in 0..self.config.workers.max(1) {
            workers.spawn(worker(
                self.reconciler.clone(),
                self.queue.clone(),
                self.config.clone(),
                stop.clone(),
            ));
        }

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                event = events.recv() => match event {
                    Ok(event) if event.kind == kind => self.queue.add(event.key),
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(controller = name, kind, skipped, "event stream lagged, re-listing");
                        if let Err(err) = self.enqueue_all().await {
                            error!(controller = name, kind, error = %err, "re-list failed");
                        }
                    }
                    Err(RecvError::Closed) => {
                        warn!(controller = name, kind, "event stream closed");
                        break;
                    }
                },
            }
        }

        stop.cancel();
        while workers.join_next().await.is_some() {}
        info!(controller = name, kind, "controller stopped");
        Ok(())
    }

    async fn enqueue_all(&self) -> Result<(), ReconcileError> {
        for stored in self.store.list(Rc::Resource::KIND, None).await? {
            self.queue.add(stored.key);
        }
        Ok(())
    }
}

async fn worker<Rc: Reconciler>(
    reconciler: Arc<Rc>,
    queue: Arc<WorkQueue>,
    config: ControllerConfig,
    shutdown: CancellationToken,
) {
    loop {
        let key = tokio::select! {
            _ = shutdown.cancelled() => return,
            key = queue.next() => key,
        };
        process(&*reconciler, &queue, &config, &shutdown, &key).await;
        queue.done(&key);
    }
}

async fn process<Rc: Reconciler>(
    reconciler: &Rc,
    queue: &Arc<WorkQueue>,
    config: &ControllerConfig,
    shutdown: &CancellationToken,
    key: &ObjectKey,
) {
    let name = reconciler.name();
    let outcome = AssertUnwindSafe(reconciler.reconcile(key))
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| Err(ReconcileError::Panicked(panic_message(panic.as_ref()))));

    match outcome {
        Ok(Action::Done) => {
            queue.forget(key);
            debug!(controller = name, key = %key, "reconciled");
        }
        Ok(Action::Requeue) => {
            queue.forget(key);
            requeue_after(queue, shutdown, key.clone(), config.backoff_base);
        }
        Ok(Action::RequeueAfter(delay)) => {
            queue.forget(key);
            requeue_after(queue, shutdown, key.clone(), delay);
        }
        Err(err) => {
            let failures = queue.record_failure(key);
            let delay = config.backoff(failures);
            error!(controller = name, key = %key, failures, retry_in = ?delay, error = %err, "reconcile failed");
            requeue_after(queue, shutdown, key.clone(), delay);
        }
    }
}

fn requeue_after(
    queue: &Arc<WorkQueue>,
    shutdown: &CancellationToken,
    key: ObjectKey,
    delay: Duration,
) {
    let queue = queue.clone();
    let shutdown = shutdown.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = shutdown.cancelled() => {}
            _ = tokio::time::sleep(delay) => queue.add(key),
        }
    });
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
