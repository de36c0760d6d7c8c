//! # Event Bus
//!
//! Informer layer over the member cluster's local resources. Each watched
//! kind gets its own dispatcher task that keeps a cache of the kind's
//! resources, turns raw watch events into add/update/delete callbacks, and
//! periodically replays the cache so observers see every resource at least
//! once per resync period.
//!
//! ## Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                            Event Bus                                    │
//! │                                                                         │
//! │   SimulatedCluster / API watch                                         │
//! │        │ apply(r) / delete(r)                                          │
//! │        ▼                                                                │
//! │   ┌──────────────┐   unbounded   ┌─────────────────────────────────┐   │
//! │   │ EventSink<R> │──────────────►│ dispatcher task (one per kind)  │   │
//! │   └──────────────┘    FIFO       │                                 │   │
//! │                                  │  label selector ── drop (debug) │   │
//! │                                  │  cache: key → R                 │   │
//! │                                  │   Applied, new key → on_add     │   │
//! │                                  │   Applied, known   → on_update  │   │
//! │                                  │   Deleted          → on_delete  │   │
//! │                                  │  resync tick → on_update(r, r)  │   │
//! │                                  └───────────────┬─────────────────┘   │
//! │                                                  ▼                      │
//! │                                        ResourceObserver<R>             │
//! │                                                                         │
//! │  Guarantees: in-order per resource, no ordering across kinds,          │
//! │  at-least-once via resync, stop() drains queued events.                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Observers run on the dispatcher task and must not block.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use fleet_core::{ManagedWorkload, WorkloadDeployment, MANAGED_BY_LABEL, MANAGED_BY_VALUE};

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Resource Contract
// =============================================================================

/// A local resource kind the bus can watch.
pub trait Resource: Clone + Send + Sync + 'static {
    /// Kind name used in logs.
    const KIND: &'static str;

    /// Identity of the resource within its kind.
    fn key(&self) -> String;

    fn labels(&self) -> &BTreeMap<String, String>;
}

impl Resource for ManagedWorkload {
    const KIND: &'static str = "ManagedWorkload";

    fn key(&self) -> String {
        self.id.clone()
    }

    fn labels(&self) -> &BTreeMap<String, String> {
        &self.labels
    }
}

impl Resource for WorkloadDeployment {
    const KIND: &'static str = "Deployment";

    fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    fn labels(&self) -> &BTreeMap<String, String> {
        &self.labels
    }
}

/// Receives notifications for one resource kind.
pub trait ResourceObserver<R: Resource>: Send + Sync + 'static {
    fn on_add(&self, resource: &R);

    fn on_update(&self, old: &R, new: &R);

    fn on_delete(&self, resource: &R);
}

/// Raw change reported by a watch.
#[derive(Debug, Clone)]
pub enum WatchEvent<R> {
    /// Created or modified.
    Applied(R),
    Deleted(R),
}

// =============================================================================
// Label Selector
// =============================================================================

/// Equality selector on a single label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelSelector {
    pub key: String,
    pub value: String,
}

impl LabelSelector {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// `app.kubernetes.io/managed-by=fleet-agent`
    pub fn managed_by_agent() -> Self {
        Self::new(MANAGED_BY_LABEL, MANAGED_BY_VALUE)
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        labels.get(&self.key).is_some_and(|v| *v == self.value)
    }
}

// =============================================================================
// Event Sink
// =============================================================================

/// Producer side of one watched kind. Sending never blocks.
pub struct EventSink<R> {
    tx: mpsc::UnboundedSender<WatchEvent<R>>,
}

impl<R> Clone for EventSink<R> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<R: Resource> EventSink<R> {
    /// Reports a created or modified resource. Returns false once the bus
    /// has stopped.
    pub fn apply(&self, resource: R) -> bool {
        self.send(WatchEvent::Applied(resource))
    }

    /// Reports a deleted resource.
    pub fn delete(&self, resource: R) -> bool {
        self.send(WatchEvent::Deleted(resource))
    }

    pub fn send(&self, event: WatchEvent<R>) -> bool {
        match self.tx.send(event) {
            Ok(()) => true,
            Err(_) => {
                trace!(kind = R::KIND, "Event bus stopped, dropping watch event");
                false
            }
        }
    }

    /// A sink whose events go nowhere.
    pub fn detached() -> Self {
        let (tx, _rx) = mpsc::unbounded_channel();
        Self { tx }
    }
}

// =============================================================================
// Per-kind Informer
// =============================================================================

trait Informer: Send {
    fn spawn(
        self: Box<Self>,
        resync_period: Duration,
        selector: Option<LabelSelector>,
        shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()>;
}

struct KindInformer<R: Resource> {
    rx: mpsc::UnboundedReceiver<WatchEvent<R>>,
    observer: Arc<dyn ResourceObserver<R>>,
    cache: BTreeMap<String, R>,
    selector: Option<LabelSelector>,
}

impl<R: Resource> Informer for KindInformer<R> {
    fn spawn(
        mut self: Box<Self>,
        resync_period: Duration,
        selector: Option<LabelSelector>,
        shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        self.selector = selector;
        tokio::spawn(self.run(resync_period, shutdown))
    }
}

impl<R: Resource> KindInformer<R> {
    async fn run(mut self: Box<Self>, resync_period: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(kind = R::KIND, "Informer starting");

        // First replay happens one full period after start
        let mut resync = interval_at(Instant::now() + resync_period, resync_period);
        resync.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut senders_open = true;

        loop {
            tokio::select! {
                biased;

                _ = shutdown.changed() => {
                    debug!(kind = R::KIND, "Informer received shutdown");
                    break;
                }

                event = self.rx.recv(), if senders_open => {
                    match event {
                        Some(event) => self.dispatch(event),
                        None => senders_open = false,
                    }
                }

                _ = resync.tick() => {
                    self.resync();
                }
            }
        }

        // Drain whatever was queued before stop
        self.rx.close();
        let mut drained = 0usize;
        while let Some(event) = self.rx.recv().await {
            self.dispatch(event);
            drained += 1;
        }

        info!(kind = R::KIND, drained, "Informer stopped");
    }

    fn dispatch(&mut self, event: WatchEvent<R>) {
        match event {
            WatchEvent::Applied(resource) => {
                let key = resource.key();

                if !self.selected(&resource) {
                    debug!(kind = R::KIND, key = %key, "Ignoring resource outside label selector");
                    // A resource that lost its label leaves the watched set
                    if let Some(previous) = self.cache.remove(&key) {
                        self.observer.on_delete(&previous);
                    }
                    return;
                }

                match self.cache.insert(key, resource.clone()) {
                    Some(old) => self.observer.on_update(&old, &resource),
                    None => self.observer.on_add(&resource),
                }
            }

            WatchEvent::Deleted(resource) => {
                let key = resource.key();
                match self.cache.remove(&key) {
                    Some(_) => self.observer.on_delete(&resource),
                    None => {
                        debug!(kind = R::KIND, key = %key, "Delete for resource never seen, ignoring");
                    }
                }
            }
        }
    }

    fn resync(&self) {
        trace!(kind = R::KIND, count = self.cache.len(), "Resync");
        for resource in self.cache.values() {
            self.observer.on_update(resource, resource);
        }
    }

    fn selected(&self, resource: &R) -> bool {
        self.selector
            .as_ref()
            .map_or(true, |s| s.matches(resource.labels()))
    }
}

// =============================================================================
// Event Bus
// =============================================================================

/// Owns the informers of every watched kind.
pub struct EventBus {
    resync_period: Duration,
    selector: Option<LabelSelector>,
    pending: Vec<Box<dyn Informer>>,
    tasks: Vec<JoinHandle<()>>,
    shutdown_tx: watch::Sender<bool>,
    running: bool,
    stopped: bool,
}

impl EventBus {
    /// Creates a bus that only delivers agent-managed resources.
    pub fn new(resync_period: Duration) -> Self {
        Self::with_selector(resync_period, Some(LabelSelector::managed_by_agent()))
    }

    pub fn with_selector(resync_period: Duration, selector: Option<LabelSelector>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        EventBus {
            resync_period,
            selector,
            pending: Vec::new(),
            tasks: Vec::new(),
            shutdown_tx,
            running: false,
            stopped: false,
        }
    }

    /// Registers an observer for kind `R` and returns the sink its watch
    /// events are fed into. Must be called before [`EventBus::start`].
    pub fn watch<R, O>(&mut self, observer: O) -> SyncResult<EventSink<R>>
    where
        R: Resource,
        O: ResourceObserver<R>,
    {
        if self.running || self.stopped {
            return Err(SyncError::StateConflict(format!(
                "cannot watch {} after the event bus has started",
                R::KIND
            )));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.pending.push(Box::new(KindInformer {
            rx,
            observer: Arc::new(observer),
            cache: BTreeMap::new(),
            selector: None,
        }));

        debug!(kind = R::KIND, "Registered informer");
        Ok(EventSink { tx })
    }

    /// Spawns one dispatcher task per registered kind.
    pub fn start(&mut self) -> SyncResult<()> {
        if self.stopped {
            return Err(SyncError::ShuttingDown);
        }
        if self.running {
            debug!("Event bus already running");
            return Ok(());
        }

        info!(
            informers = self.pending.len(),
            resync_secs = self.resync_period.as_secs(),
            "Event bus starting"
        );

        for informer in self.pending.drain(..) {
            let handle = informer.spawn(
                self.resync_period,
                self.selector.clone(),
                self.shutdown_tx.subscribe(),
            );
            self.tasks.push(handle);
        }

        self.running = true;
        Ok(())
    }

    /// Stops every informer. Returns after queued callbacks have run.
    pub async fn stop(&mut self) {
        if !self.running {
            self.stopped = true;
            return;
        }

        info!("Event bus stopping");
        self.shutdown_tx.send_replace(true);

        for result in join_all(self.tasks.drain(..)).await {
            if let Err(e) = result {
                warn!(?e, "Informer task ended abnormally");
            }
        }

        self.running = false;
        self.stopped = true;
        info!("Event bus stopped");
    }
}
