//! Subscriber registry and per-subscriber notification delivery
//!
//! Each registered handler owns an unbounded queue drained by its own task,
//! so a slow or failing handler never delays the others. Notifications for a
//! handler are delivered strictly in the order they were enqueued.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Change notification delivered to handlers.
#[derive(Debug)]
pub enum Notification<K> {
    Add(Arc<K>),
    Update { old: Arc<K>, new: Arc<K> },
    Delete(Arc<K>),
    /// Periodic re-delivery of a cached object; the cache did not change.
    Sync(Arc<K>),
}

impl<K> Clone for Notification<K> {
    fn clone(&self) -> Self {
        match self {
            Notification::Add(obj) => Notification::Add(Arc::clone(obj)),
            Notification::Update { old, new } => Notification::Update {
                old: Arc::clone(old),
                new: Arc::clone(new),
            },
            Notification::Delete(obj) => Notification::Delete(Arc::clone(obj)),
            Notification::Sync(obj) => Notification::Sync(Arc::clone(obj)),
        }
    }
}

impl<K> Notification<K> {
    pub fn kind(&self) -> &'static str {
        match self {
            Notification::Add(_) => "add",
            Notification::Update { .. } => "update",
            Notification::Delete(_) => "delete",
            Notification::Sync(_) => "sync",
        }
    }

    /// The object as it is now (the last known state for deletes).
    pub fn object(&self) -> &Arc<K> {
        match self {
            Notification::Add(obj) | Notification::Delete(obj) | Notification::Sync(obj) => obj,
            Notification::Update { new, .. } => new,
        }
    }
}

pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;
pub type HandlerResult = std::result::Result<(), HandlerError>;

/// Receives change notifications from an informer.
///
/// Methods run on the handler's own delivery task; a returned error or a
/// panic is logged and does not affect other handlers.
pub trait ResourceEventHandler<K>: Send + Sync {
    fn on_add(&self, _obj: &Arc<K>) -> HandlerResult {
        Ok(())
    }

    fn on_update(&self, _old: &Arc<K>, _new: &Arc<K>) -> HandlerResult {
        Ok(())
    }

    fn on_delete(&self, _obj: &Arc<K>) -> HandlerResult {
        Ok(())
    }

    fn on_sync(&self, _obj: &Arc<K>) -> HandlerResult {
        Ok(())
    }
}

type ObjFn<K> = Box<dyn Fn(&Arc<K>) -> HandlerResult + Send + Sync>;
type UpdateFn<K> = Box<dyn Fn(&Arc<K>, &Arc<K>) -> HandlerResult + Send + Sync>;

/// Handler assembled from closures; unset callbacks ignore their notifications.
pub struct HandlerFuncs<K> {
    add: Option<ObjFn<K>>,
    update: Option<UpdateFn<K>>,
    delete: Option<ObjFn<K>>,
    sync: Option<ObjFn<K>>,
}

impl<K> Default for HandlerFuncs<K> {
    fn default() -> Self {
        Self {
            add: None,
            update: None,
            delete: None,
            sync: None,
        }
    }
}

impl<K> HandlerFuncs<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_add<F>(mut self, f: F) -> Self
    where
        F: Fn(&Arc<K>) -> HandlerResult + Send + Sync + 'static,
    {
        self.add = Some(Box::new(f));
        self
    }

    pub fn on_update<F>(mut self, f: F) -> Self
    where
        F: Fn(&Arc<K>, &Arc<K>) -> HandlerResult + Send + Sync + 'static,
    {
        self.update = Some(Box::new(f));
        self
    }

    pub fn on_delete<F>(mut self, f: F) -> Self
    where
        F: Fn(&Arc<K>) -> HandlerResult + Send + Sync + 'static,
    {
        self.delete = Some(Box::new(f));
        self
    }

    pub fn on_sync<F>(mut self, f: F) -> Self
    where
        F: Fn(&Arc<K>) -> HandlerResult + Send + Sync + 'static,
    {
        self.sync = Some(Box::new(f));
        self
    }
}

impl<K: Send + Sync> ResourceEventHandler<K> for HandlerFuncs<K> {
    fn on_add(&self, obj: &Arc<K>) -> HandlerResult {
        self.add.as_ref().map_or(Ok(()), |f| f(obj))
    }

    fn on_update(&self, old: &Arc<K>, new: &Arc<K>) -> HandlerResult {
        self.update.as_ref().map_or(Ok(()), |f| f(old, new))
    }

    fn on_delete(&self, obj: &Arc<K>) -> HandlerResult {
        self.delete.as_ref().map_or(Ok(()), |f| f(obj))
    }

    fn on_sync(&self, obj: &Arc<K>) -> HandlerResult {
        self.sync.as_ref().map_or(Ok(()), |f| f(obj))
    }
}

/// Handle returned when a handler is registered; pass it back to remove it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HandlerRegistration {
    id: u64,
}

impl HandlerRegistration {
    pub fn id(&self) -> u64 {
        self.id
    }
}

type PendingDelivery<K> = (
    Arc<dyn ResourceEventHandler<K>>,
    mpsc::UnboundedReceiver<Notification<K>>,
);

struct Listener<K> {
    id: u64,
    queue: mpsc::UnboundedSender<Notification<K>>,
    task: Option<JoinHandle<()>>,
    /// Handler and queue waiting for a runtime to run on.
    pending: Option<PendingDelivery<K>>,
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

fn deliver<K>(handler: &dyn ResourceEventHandler<K>, notification: &Notification<K>) {
    let outcome = catch_unwind(AssertUnwindSafe(|| match notification {
        Notification::Add(obj) => handler.on_add(obj),
        Notification::Update { old, new } => handler.on_update(old, new),
        Notification::Delete(obj) => handler.on_delete(obj),
        Notification::Sync(obj) => handler.on_sync(obj),
    }));

    match outcome {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(kind = notification.kind(), error = %e, "Event handler failed"),
        Err(payload) => error!(
            kind = notification.kind(),
            panic = %panic_message(payload.as_ref()),
            "Event handler panicked"
        ),
    }
}

async fn drain_queue<K>(
    id: u64,
    handler: Arc<dyn ResourceEventHandler<K>>,
    mut rx: mpsc::UnboundedReceiver<Notification<K>>,
) {
    while let Some(notification) = rx.recv().await {
        deliver(handler.as_ref(), &notification);
    }
    debug!(listener = id, "Event handler queue closed");
}

struct Listeners<K> {
    entries: Vec<Listener<K>>,
    runtime: Option<Handle>,
    closed: bool,
}

/// Fans notifications out to registered handlers.
///
/// Handlers may be registered before a Tokio runtime exists; their delivery
/// tasks are spawned by [`Processor::start`].
pub struct Processor<K> {
    listeners: Mutex<Listeners<K>>,
    next_id: AtomicU64,
}

impl<K> Processor<K>
where
    K: Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(Listeners {
                entries: Vec::new(),
                runtime: None,
                closed: false,
            }),
            next_id: AtomicU64::new(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Listeners<K>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a handler, queueing `initial` notifications ahead of any
    /// later ones.
    ///
    /// Delivery starts right away when called inside a Tokio runtime or
    /// after [`Processor::start`], otherwise at the next `start`. Once the
    /// processor is closed the handler only receives `initial`.
    pub fn add_listener(
        &self,
        handler: Arc<dyn ResourceEventHandler<K>>,
        initial: Vec<Notification<K>>,
    ) -> HandlerRegistration {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (queue, rx) = mpsc::unbounded_channel::<Notification<K>>();
        for notification in initial {
            // The receiver is alive, so this cannot fail.
            let _ = queue.send(notification);
        }

        let mut listeners = self.lock();
        let runtime = Handle::try_current().ok().or_else(|| listeners.runtime.clone());
        if listeners.closed {
            drop(queue);
            match runtime {
                Some(runtime) => {
                    runtime.spawn(drain_queue(id, handler, rx));
                }
                None => debug!(listener = id, "Processor closed; dropping handler"),
            }
            return HandlerRegistration { id };
        }

        let (task, pending) = match runtime {
            Some(runtime) => (Some(runtime.spawn(drain_queue(id, handler, rx))), None),
            None => (None, Some((handler, rx))),
        };
        listeners.entries.push(Listener {
            id,
            queue,
            task,
            pending,
        });
        HandlerRegistration { id }
    }

    /// Spawn delivery for handlers registered before a runtime was available,
    /// and use `runtime` for later registrations made outside of one.
    pub fn start(&self, runtime: Handle) {
        let mut listeners = self.lock();
        for listener in listeners.entries.iter_mut() {
            if let Some((handler, rx)) = listener.pending.take() {
                listener.task = Some(runtime.spawn(drain_queue(listener.id, handler, rx)));
            }
        }
        listeners.runtime = Some(runtime);
    }

    /// Unregister a handler. Notifications already queued for it are still
    /// delivered. Returns false if it was not registered.
    pub fn remove_listener(&self, registration: &HandlerRegistration) -> bool {
        let mut listeners = self.lock();
        let before = listeners.entries.len();
        listeners.entries.retain(|l| l.id != registration.id);
        before != listeners.entries.len()
    }

    pub fn distribute(&self, notification: &Notification<K>) {
        let listeners = self.lock();
        for listener in listeners.entries.iter() {
            if listener.queue.send(notification.clone()).is_err() {
                warn!(listener = listener.id, "Dropping notification for stopped handler");
            }
        }
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Unregister every handler and wait until each has been handed the
    /// notifications already queued for it. Handlers that never got a
    /// delivery task are dropped with their queues.
    pub async fn close(&self) {
        let entries = {
            let mut listeners = self.lock();
            listeners.closed = true;
            std::mem::take(&mut listeners.entries)
        };

        for Listener { id, queue, task, .. } in entries {
            drop(queue);
            if let Some(task) = task {
                if let Err(e) = task.await {
                    warn!(listener = id, error = %e, "Event handler task failed");
                }
            }
        }
    }
}

impl<K> Default for Processor<K>
where
    K: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
