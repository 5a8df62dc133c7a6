//! In-memory List/Watch source
//!
//! [`MemoryListWatch`] keeps a keyed object store with a global, strictly
//! increasing resource version and a bounded history of change events. It
//! serves List and Watch the way the API server does, which makes informer
//! behavior testable without a cluster:
//!
//! - List returns the objects matching the request's selectors together with
//!   the store's current resource version.
//! - Watch replays the recorded events after the requested resource version,
//!   then streams live changes. A version older than the retained history, or
//!   a subscriber that falls behind, gets a `410 Expired` error event.
//!
//! Interceptors ([`Funcs`]) override or fail individual calls.

use crate::event::{WatchEvent, WatchStatus};
use crate::field_selectors::FieldSelector;
use crate::interceptor::{Funcs, ListContext, WatchContext};
use crate::label_selector::{object_matches, parse_label_selector};
use crate::list_watch::{EventStream, ListerWatcher, ObjectList};
use crate::object::{make_key, object_key, parse_resource_version, short_type_name};
use crate::options::ListOptions;
use crate::{Error, Result};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::core::Selector;
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, trace};

/// Number of change events retained for watch replay.
pub const DEFAULT_HISTORY_LIMIT: usize = 1000;

/// Buffered live events per watcher before it is considered lagging.
const LIVE_BUFFER: usize = 1024;

#[derive(Debug, Clone)]
enum Broadcast<K> {
    Event(WatchEvent<K>),
    Close,
}

struct State<K> {
    objects: BTreeMap<String, K>,
    resource_version: u64,
    history: VecDeque<(u64, WatchEvent<K>)>,
    /// Watches must start at or after this version to be served from history.
    compacted: u64,
}

/// Selectors of one request, evaluated against objects.
struct Filter {
    labels: Selector,
    fields: FieldSelector,
    bookmarks: bool,
}

impl Filter {
    fn new(options: &ListOptions) -> Result<Self> {
        Ok(Self {
            labels: parse_label_selector(options.label_selector.as_deref().unwrap_or_default())?,
            fields: FieldSelector::parse(options.field_selector.as_deref().unwrap_or_default())?,
            bookmarks: options.allow_bookmarks,
        })
    }

    fn matches<K: Resource + Serialize>(&self, obj: &K) -> bool {
        if !object_matches(obj, &self.labels) {
            return false;
        }
        if self.fields.is_empty() {
            return true;
        }
        serde_json::to_value(obj)
            .map(|value| self.fields.matches(&value))
            .unwrap_or(false)
    }

    fn admits<K: Resource + Serialize>(&self, event: &WatchEvent<K>) -> bool {
        match event {
            WatchEvent::Bookmark { .. } => self.bookmarks,
            WatchEvent::Error(_) => true,
            _ => event.object().is_some_and(|obj| self.matches(obj)),
        }
    }
}

/// In-memory [`ListerWatcher`] for tests and local tooling.
pub struct MemoryListWatch<K> {
    state: Mutex<State<K>>,
    events: broadcast::Sender<Broadcast<K>>,
    funcs: Funcs<K>,
    history_limit: usize,
    list_calls: AtomicUsize,
    watch_calls: AtomicUsize,
}

impl<K> MemoryListWatch<K>
where
    K: Resource + Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(LIVE_BUFFER);
        Self {
            state: Mutex::new(State {
                objects: BTreeMap::new(),
                resource_version: 0,
                history: VecDeque::new(),
                compacted: 0,
            }),
            events,
            funcs: Funcs::default(),
            history_limit: DEFAULT_HISTORY_LIMIT,
            list_calls: AtomicUsize::new(0),
            watch_calls: AtomicUsize::new(0),
        }
    }

    /// Seed the store with objects, in order.
    pub fn with_objects(self, objects: impl IntoIterator<Item = K>) -> Result<Self> {
        for obj in objects {
            self.add(obj)?;
        }
        Ok(self)
    }

    pub fn with_interceptor_funcs(mut self, funcs: Funcs<K>) -> Self {
        self.funcs = funcs;
        self
    }

    /// Number of change events kept for replay; older watches get `410`.
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    fn lock(&self) -> MutexGuard<'_, State<K>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current resource version of the store.
    pub fn resource_version(&self) -> String {
        self.lock().resource_version.to_string()
    }

    pub fn get(&self, namespace: Option<&str>, name: &str) -> Option<K> {
        self.lock().objects.get(&make_key(namespace, name)).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of List calls served so far, intercepted ones included.
    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Number of Watch calls served so far, intercepted ones included.
    pub fn watch_calls(&self) -> usize {
        self.watch_calls.load(Ordering::SeqCst)
    }

    fn record(&self, state: &mut State<K>, resource_version: u64, event: WatchEvent<K>) {
        state.history.push_back((resource_version, event.clone()));
        while state.history.len() > self.history_limit {
            if let Some((rv, _)) = state.history.pop_front() {
                state.compacted = rv;
            }
        }
        // No receivers is fine.
        let _ = self.events.send(Broadcast::Event(event));
    }

    fn require_name(obj: &K) -> Result<String> {
        obj.meta()
            .name
            .clone()
            .filter(|name| !name.is_empty())
            .ok_or_else(|| Error::InvalidRequest("Object name is required".to_string()))
    }

    fn not_found(obj: &K, name: String) -> Error {
        Error::NotFound {
            kind: short_type_name::<K>().to_string(),
            name,
            namespace: obj.namespace().unwrap_or_default(),
        }
    }

    /// Insert or replace an object as-is. An empty resource version is
    /// assigned the next one; a set one is kept and advances the store, so
    /// it must be newer than the store's current version.
    pub fn add(&self, mut obj: K) -> Result<K> {
        Self::require_name(&obj)?;
        let key = object_key(&obj);

        let mut state = self.lock();
        let rv = match obj.resource_version().filter(|rv| !rv.is_empty()) {
            Some(rv) => parse_resource_version(&rv)?,
            None => state.resource_version + 1,
        };
        if rv <= state.resource_version {
            return Err(Error::Conflict(format!(
                "Resource version {} is not newer than the store's {}",
                rv, state.resource_version
            )));
        }
        state.resource_version = rv;
        obj.meta_mut().resource_version = Some(rv.to_string());

        let event = match state.objects.insert(key.clone(), obj.clone()) {
            Some(_) => WatchEvent::Modified(obj.clone()),
            None => WatchEvent::Added(obj.clone()),
        };
        self.record(&mut state, rv, event);

        trace!(key = %key, resource_version = rv, "Added object");
        Ok(obj)
    }

    /// Create a new object, like a POST to the API server.
    pub fn create(&self, mut obj: K) -> Result<K> {
        let name = Self::require_name(&obj)?;
        if obj.resource_version().is_some_and(|rv| !rv.is_empty()) {
            return Err(Error::InvalidRequest(
                "resourceVersion can not be set for Create requests".to_string(),
            ));
        }
        let key = object_key(&obj);

        let mut state = self.lock();
        if state.objects.contains_key(&key) {
            return Err(Error::AlreadyExists {
                kind: short_type_name::<K>().to_string(),
                name,
                namespace: obj.namespace().unwrap_or_default(),
            });
        }

        state.resource_version += 1;
        let rv = state.resource_version;
        let meta = obj.meta_mut();
        meta.resource_version = Some(rv.to_string());
        if meta.uid.is_none() {
            meta.uid = Some(uuid::Uuid::new_v4().to_string());
        }
        if meta.creation_timestamp.is_none() {
            meta.creation_timestamp = Some(Time(chrono::Utc::now()));
        }

        state.objects.insert(key.clone(), obj.clone());
        self.record(&mut state, rv, WatchEvent::Added(obj.clone()));

        debug!(key = %key, resource_version = rv, "Created object");
        Ok(obj)
    }

    /// Replace an existing object. A non-empty resource version on `obj`
    /// must match the stored one.
    pub fn update(&self, mut obj: K) -> Result<K> {
        let name = Self::require_name(&obj)?;
        let key = object_key(&obj);

        let mut state = self.lock();
        let existing = state
            .objects
            .get(&key)
            .ok_or_else(|| Self::not_found(&obj, name))?;

        if let (Some(provided), Some(current)) =
            (obj.resource_version(), existing.resource_version())
        {
            if !provided.is_empty() && provided != current {
                return Err(Error::Conflict(format!(
                    "Resource version mismatch: expected {}, got {}",
                    current, provided
                )));
            }
        }

        let uid = existing.meta().uid.clone();
        let created = existing.meta().creation_timestamp.clone();
        state.resource_version += 1;
        let rv = state.resource_version;
        let meta = obj.meta_mut();
        meta.resource_version = Some(rv.to_string());
        meta.uid = uid;
        meta.creation_timestamp = created;

        state.objects.insert(key.clone(), obj.clone());
        self.record(&mut state, rv, WatchEvent::Modified(obj.clone()));

        debug!(key = %key, resource_version = rv, "Updated object");
        Ok(obj)
    }

    /// Delete an object. The returned final state carries the deletion's
    /// resource version.
    pub fn delete(&self, namespace: Option<&str>, name: &str) -> Result<K> {
        let key = make_key(namespace, name);

        let mut state = self.lock();
        let mut obj = state.objects.remove(&key).ok_or_else(|| Error::NotFound {
            kind: short_type_name::<K>().to_string(),
            name: name.to_string(),
            namespace: namespace.unwrap_or_default().to_string(),
        })?;

        state.resource_version += 1;
        let rv = state.resource_version;
        obj.meta_mut().resource_version = Some(rv.to_string());
        self.record(&mut state, rv, WatchEvent::Deleted(obj.clone()));

        debug!(key = %key, resource_version = rv, "Deleted object");
        Ok(obj)
    }

    /// Send a bookmark at the current resource version to live watchers.
    pub fn bookmark(&self) {
        let state = self.lock();
        let _ = self.events.send(Broadcast::Event(WatchEvent::Bookmark {
            resource_version: state.resource_version.to_string(),
        }));
    }

    /// End every open watch cleanly, as a server-side timeout would.
    pub fn close_watches(&self) {
        let _state = self.lock();
        let _ = self.events.send(Broadcast::Close);
    }

    /// Load objects from a YAML file, one object per document, and add them.
    pub fn load_fixture(&self, path: impl AsRef<Path>) -> Result<Vec<K>> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read fixture file {:?}: {}", path, e))
        })?;
        self.load_fixture_str(&content)
    }

    /// Like [`MemoryListWatch::load_fixture`], from a string.
    pub fn load_fixture_str(&self, yaml: &str) -> Result<Vec<K>> {
        let mut added = Vec::new();
        for document in serde_yaml::Deserializer::from_str(yaml) {
            let value = Value::deserialize(document)
                .map_err(|e| Error::Config(format!("Failed to parse fixture YAML: {}", e)))?;
            if value.is_null() {
                continue;
            }
            let obj: K = serde_json::from_value(value)?;
            added.push(self.add(obj)?);
        }
        Ok(added)
    }

    fn serve_list(&self, options: &ListOptions) -> Result<ObjectList<K>> {
        let filter = Filter::new(options)?;
        let state = self.lock();
        let items: Vec<K> = state
            .objects
            .values()
            .filter(|obj| filter.matches(*obj))
            .cloned()
            .collect();
        trace!(items = items.len(), resource_version = state.resource_version, "Served list");
        Ok(ObjectList {
            items,
            resource_version: state.resource_version.to_string(),
        })
    }

    fn serve_watch(&self, options: &ListOptions) -> Result<EventStream<K>> {
        let filter = Filter::new(options)?;
        let start = match options.resource_version.as_deref() {
            None | Some("") | Some("0") => None,
            Some(rv) => Some(parse_resource_version(rv)?),
        };

        // Subscribing under the state lock means no change falls between the
        // replayed history and the live stream.
        let state = self.lock();
        if let Some(start) = start {
            if start < state.compacted {
                debug!(
                    requested = start,
                    oldest = state.compacted,
                    "Watch requested a compacted resource version"
                );
                let expired = WatchStatus::expired(format!(
                    "too old resource version: {} ({})",
                    start, state.compacted
                ));
                return Ok(stream::iter([Ok(WatchEvent::Error(expired))]).boxed());
            }
        }
        let replay: VecDeque<WatchEvent<K>> = match start {
            Some(start) => state
                .history
                .iter()
                .filter(|(rv, event)| *rv > start && filter.admits(event))
                .map(|(_, event)| event.clone())
                .collect(),
            None => VecDeque::new(),
        };
        let live = self.events.subscribe();
        drop(state);

        let watch = WatchState {
            replay,
            live,
            filter,
            done: false,
        };
        let events = stream::unfold(watch, |mut watch| async move {
            if watch.done {
                return None;
            }
            if let Some(event) = watch.replay.pop_front() {
                return Some((Ok(event), watch));
            }
            loop {
                match watch.live.recv().await {
                    Ok(Broadcast::Event(event)) => {
                        if watch.filter.admits(&event) {
                            return Some((Ok(event), watch));
                        }
                    }
                    Ok(Broadcast::Close) | Err(RecvError::Closed) => return None,
                    Err(RecvError::Lagged(missed)) => {
                        watch.done = true;
                        let expired = WatchStatus::expired(format!(
                            "watcher fell behind by {} events",
                            missed
                        ));
                        return Some((Ok(WatchEvent::Error(expired)), watch));
                    }
                }
            }
        });

        Ok(match options.timeout {
            Some(timeout) => events.take_until(tokio::time::sleep(timeout)).boxed(),
            None => events.boxed(),
        })
    }
}

struct WatchState<K> {
    replay: VecDeque<WatchEvent<K>>,
    live: broadcast::Receiver<Broadcast<K>>,
    filter: Filter,
    done: bool,
}

impl<K> Default for MemoryListWatch<K>
where
    K: Resource + Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<K> ListerWatcher<K> for MemoryListWatch<K>
where
    K: Resource + Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn list(&self, options: &ListOptions) -> Result<ObjectList<K>> {
        let call = self.list_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(intercept) = &self.funcs.list {
            if let Some(list) = intercept(ListContext { options, call })? {
                return Ok(list);
            }
        }
        self.serve_list(options)
    }

    async fn watch(&self, options: &ListOptions) -> Result<EventStream<K>> {
        let call = self.watch_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(intercept) = &self.funcs.watch {
            if let Some(events) = intercept(WatchContext { options, call })? {
                return Ok(stream::iter(events.into_iter().map(Ok)).boxed());
            }
        }
        self.serve_watch(options)
    }
}
