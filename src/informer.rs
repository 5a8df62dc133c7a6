//! Shared, indexed informer
//!
//! A [`SharedIndexInformer`] mirrors one resource collection into an
//! [`Indexer`] and notifies registered handlers of every change:
//!
//! - the [`Reflector`] lists and watches, producing deltas;
//! - a processing task applies each delta to the cache and enqueues the
//!   resulting notifications for every handler under one lock, so handlers
//!   see per-object changes in the order they were applied;
//! - each handler drains its own queue on its own task;
//! - a resync task periodically asks for every cached object to be
//!   re-delivered as a `Sync` notification.

use crate::config::InformerConfig;
use crate::indexer::{Indexer, Indexers};
use crate::list_watch::ListerWatcher;
use crate::lister::GenericLister;
use crate::object::{is_stale, object_key, short_type_name};
use crate::options::ListOptions;
use crate::processor::{HandlerRegistration, Notification, Processor, ResourceEventHandler};
use crate::reflector::{Delta, Reflector};
use crate::{Error, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use kube::{Resource, ResourceExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Source of change notifications for one resource type.
pub trait EventSource<K>: Send + Sync {
    /// Register a handler. Objects already cached are delivered to it as
    /// `Add` notifications before any later change.
    ///
    /// Handlers may be added before a Tokio runtime exists; delivery then
    /// begins when the source starts. A handler added after the source has
    /// stopped receives only the cached objects.
    fn add_event_handler(&self, handler: Arc<dyn ResourceEventHandler<K>>) -> HandlerRegistration;

    /// Unregister a handler; returns false if it was not registered.
    fn remove_event_handler(&self, registration: &HandlerRegistration) -> bool;
}

/// Type-erased view of an informer, used by the factory.
pub trait InformerHandle: Send + Sync {
    fn name(&self) -> &str;
    fn has_synced(&self) -> bool;
    fn is_started(&self) -> bool;
    fn is_stopped(&self) -> bool;
    fn last_sync_resource_version(&self) -> String;
    /// Number of cached objects.
    fn cached_len(&self) -> usize;
    fn start(self: Arc<Self>, token: CancellationToken) -> BoxFuture<'static, Result<()>>;
    fn wait_for_cache_sync<'a>(&'a self, token: &'a CancellationToken) -> BoxFuture<'a, bool>;
}

pub struct SharedIndexInformer<K: Send + 'static> {
    name: String,
    lister_watcher: Arc<dyn ListerWatcher<K>>,
    options: ListOptions,
    config: InformerConfig,
    indexer: Arc<Indexer<K>>,
    processor: Processor<K>,
    /// Held while a delta is applied and distributed, and while a handler
    /// is registered, so a new handler never misses or doubles a change.
    emit_lock: Mutex<()>,
    synced: watch::Sender<bool>,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl<K> SharedIndexInformer<K>
where
    K: Resource + Clone + Send + Sync + 'static,
{
    pub fn new<L>(lister_watcher: L, config: InformerConfig) -> Self
    where
        L: ListerWatcher<K> + 'static,
    {
        Self::from_arc(Arc::new(lister_watcher), config)
    }

    pub fn from_arc(lister_watcher: Arc<dyn ListerWatcher<K>>, config: InformerConfig) -> Self {
        let (synced, _) = watch::channel(false);
        Self {
            name: short_type_name::<K>().to_string(),
            lister_watcher,
            options: ListOptions::default(),
            config,
            indexer: Arc::new(Indexer::new()),
            processor: Processor::new(),
            emit_lock: Mutex::new(()),
            synced,
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        }
    }

    /// Base selectors applied to both List and Watch.
    pub fn with_options(mut self, options: ListOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_indexers(self, indexers: Indexers<K>) -> Result<Self> {
        self.indexer.add_indexers(indexers)?;
        Ok(self)
    }

    /// Register additional indices. Only allowed before the informer starts.
    pub fn add_indexers(&self, indexers: Indexers<K>) -> Result<()> {
        if self.is_started() {
            return Err(Error::AlreadyStarted(self.name.clone()));
        }
        self.indexer.add_indexers(indexers)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &InformerConfig {
        &self.config
    }

    pub fn indexer(&self) -> Arc<Indexer<K>> {
        Arc::clone(&self.indexer)
    }

    pub fn lister(&self) -> GenericLister<K> {
        GenericLister::new(Arc::clone(&self.indexer))
    }

    /// Register a handler by value.
    pub fn add_handler<H>(&self, handler: H) -> HandlerRegistration
    where
        H: ResourceEventHandler<K> + 'static,
    {
        self.add_event_handler(Arc::new(handler))
    }

    /// True once the first List has been applied to the cache.
    pub fn has_synced(&self) -> bool {
        *self.synced.borrow()
    }

    /// Wait until the cache has synced; false if `token` fired first.
    pub async fn wait_for_cache_sync(&self, token: &CancellationToken) -> bool {
        let mut rx = self.synced.subscribe();
        tokio::select! {
            _ = token.cancelled() => false,
            res = rx.wait_for(|synced| *synced) => res.is_ok(),
        }
    }

    pub fn last_sync_resource_version(&self) -> String {
        self.indexer.resource_version()
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Run the informer until `token` is cancelled. May be called once.
    ///
    /// On return every handler has been handed the notifications queued for
    /// it and unregistered.
    pub async fn run(self: Arc<Self>, token: CancellationToken) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyStarted(self.name.clone()));
        }
        info!(informer = %self.name, "Starting informer");
        self.processor.start(Handle::current());

        let (deltas, rx) = mpsc::unbounded_channel();
        let processing = tokio::spawn(Arc::clone(&self).process_deltas(rx));

        let resync = (!self.config.resync_period.is_zero()).then(|| {
            tokio::spawn(resync_loop(
                self.name.clone(),
                deltas.clone(),
                self.config.resync_period,
                self.synced.subscribe(),
                token.clone(),
            ))
        });

        let reflector = Reflector::new(
            self.name.clone(),
            Arc::clone(&self.lister_watcher),
            self.options.clone(),
            self.config.clone(),
            deltas,
        );
        reflector.run(&token).await;
        // Dropping the reflector closes the delta queue once resync exits too.
        drop(reflector);

        if let Some(resync) = resync {
            if let Err(e) = resync.await {
                warn!(informer = %self.name, error = %e, "Resync task failed");
            }
        }
        if let Err(e) = processing.await {
            warn!(informer = %self.name, error = %e, "Processing task failed");
        }
        self.processor.close().await;

        self.stopped.store(true, Ordering::SeqCst);
        info!(informer = %self.name, "Informer stopped");
        Ok(())
    }

    async fn process_deltas(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<Delta<K>>) {
        while let Some(delta) = rx.recv().await {
            self.apply(delta);
        }
        debug!(informer = %self.name, "Delta queue closed");
    }

    fn emit(&self, notification: Notification<K>) {
        self.processor.distribute(&notification);
    }

    fn advance_resource_version(&self, resource_version: Option<String>) {
        if let Some(rv) = resource_version {
            if !is_stale(&rv, &self.indexer.resource_version()) {
                self.indexer.set_resource_version(rv);
            }
        }
    }

    /// Apply one delta to the cache and notify handlers.
    pub(crate) fn apply(&self, delta: Delta<K>) {
        let _guard = self.emit_lock.lock().unwrap_or_else(PoisonError::into_inner);

        match delta {
            Delta::Replace {
                items,
                resource_version,
            } => {
                let items: Vec<Arc<K>> = items.into_iter().map(Arc::new).collect();
                // The cache version never moves backwards, even on relist.
                let current = self.indexer.resource_version();
                let resource_version = if is_stale(&resource_version, &current) {
                    current
                } else {
                    resource_version
                };
                let mut previous = self.indexer.replace(items.clone(), resource_version);

                let mut added = 0usize;
                let mut updated = 0usize;
                for obj in items {
                    match previous.remove(&object_key(obj.as_ref())) {
                        None => {
                            added += 1;
                            self.emit(Notification::Add(obj));
                        }
                        Some(old) if old.resource_version() != obj.resource_version() => {
                            updated += 1;
                            self.emit(Notification::Update { old, new: obj });
                        }
                        Some(_) => {}
                    }
                }
                let deleted = previous.len();
                for (_, old) in previous {
                    self.emit(Notification::Delete(old));
                }
                debug!(
                    informer = %self.name,
                    added, updated, deleted,
                    "Replaced cache contents"
                );

                if !self.synced.send_replace(true) {
                    info!(informer = %self.name, objects = self.indexer.len(), "Cache synced");
                }
            }
            Delta::Upsert(obj) => {
                let obj = Arc::new(obj);
                let rv = obj.resource_version();
                match self.indexer.insert(Arc::clone(&obj)) {
                    Some(old) => self.emit(Notification::Update { old, new: obj }),
                    None => self.emit(Notification::Add(obj)),
                }
                self.advance_resource_version(rv);
            }
            Delta::Delete(obj) => {
                let key = object_key(&obj);
                let rv = obj.resource_version();
                match self.indexer.remove(&key) {
                    Some(_) => self.emit(Notification::Delete(Arc::new(obj))),
                    None => trace!(informer = %self.name, key = %key, "Delete for uncached object"),
                }
                self.advance_resource_version(rv);
            }
            Delta::Progress(rv) => self.advance_resource_version(Some(rv)),
            Delta::Resync => {
                let objects = self.indexer.list();
                trace!(informer = %self.name, objects = objects.len(), "Resyncing");
                for obj in objects {
                    self.emit(Notification::Sync(obj));
                }
            }
        }
    }
}

async fn resync_loop<K>(
    name: String,
    deltas: mpsc::UnboundedSender<Delta<K>>,
    period: Duration,
    mut synced: watch::Receiver<bool>,
    token: CancellationToken,
) {
    tokio::select! {
        _ = token.cancelled() => return,
        res = synced.wait_for(|s| *s) => {
            if res.is_err() {
                return;
            }
        }
    }

    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                if deltas.send(Delta::Resync).is_err() {
                    break;
                }
            }
        }
    }
    debug!(informer = %name, "Resync loop stopped");
}

impl<K> EventSource<K> for SharedIndexInformer<K>
where
    K: Resource + Clone + Send + Sync + 'static,
{
    fn add_event_handler(&self, handler: Arc<dyn ResourceEventHandler<K>>) -> HandlerRegistration {
        let _guard = self.emit_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let initial = self
            .indexer
            .list()
            .into_iter()
            .map(Notification::Add)
            .collect();
        let registration = self.processor.add_listener(handler, initial);
        debug!(informer = %self.name, handler = registration.id(), "Added event handler");
        registration
    }

    fn remove_event_handler(&self, registration: &HandlerRegistration) -> bool {
        let _guard = self.emit_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.processor.remove_listener(registration)
    }
}

impl<K> InformerHandle for SharedIndexInformer<K>
where
    K: Resource + Clone + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn has_synced(&self) -> bool {
        SharedIndexInformer::has_synced(self)
    }

    fn is_started(&self) -> bool {
        SharedIndexInformer::is_started(self)
    }

    fn is_stopped(&self) -> bool {
        SharedIndexInformer::is_stopped(self)
    }

    fn last_sync_resource_version(&self) -> String {
        SharedIndexInformer::last_sync_resource_version(self)
    }

    fn cached_len(&self) -> usize {
        self.indexer.len()
    }

    fn start(self: Arc<Self>, token: CancellationToken) -> BoxFuture<'static, Result<()>> {
        self.run(token).boxed()
    }

    fn wait_for_cache_sync<'a>(&'a self, token: &'a CancellationToken) -> BoxFuture<'a, bool> {
        SharedIndexInformer::wait_for_cache_sync(self, token).boxed()
    }
}
