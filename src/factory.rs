//! Shared informer factory
//!
//! Hands out one informer per object type so that every consumer of a type
//! shares a single watch connection and a single cache.
//!
//! # Example
//!
//! ```rust,no_run
//! use k8s_openapi::api::core::v1::Pod;
//! use kube_shared_informer::SharedInformerFactory;
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let client = kube::Client::try_default().await?;
//! let factory = SharedInformerFactory::new(Duration::from_secs(300)).with_client(client);
//!
//! let pods = factory.informer::<Pod>()?;
//! let token = CancellationToken::new();
//! factory.start(&token);
//! factory.wait_for_cache_sync(&token).await;
//!
//! let running = pods.lister().namespaced("default").list_matching("app=web")?;
//! # Ok(())
//! # }
//! ```

use crate::client::ResourceClient;
use crate::config::InformerConfig;
use crate::informer::{InformerHandle, SharedIndexInformer};
use crate::list_watch::ListWatch;
use crate::options::{ListOptions, TweakListOptions};
use crate::{Error, Result};
use kube::Resource;
use serde::de::DeserializeOwned;
use std::any::{Any, TypeId};
use std::collections::{BTreeMap, HashMap};
use std::fmt::Debug;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

struct Entry {
    /// `Arc<SharedIndexInformer<K>>` for the entry's type.
    typed: Arc<dyn Any + Send + Sync>,
    handle: Arc<dyn InformerHandle>,
    /// `plural.group/version`, e.g. `deployments.apps/v1` or `pods/v1`.
    resource: String,
}

/// Settings handed to informer constructors.
#[derive(Clone)]
pub struct FactoryOptions {
    pub config: InformerConfig,
    pub tweak: Option<TweakListOptions>,
}

impl FactoryOptions {
    /// Base list options with the factory tweak applied.
    pub fn list_options(&self) -> ListOptions {
        let mut options = ListOptions::default();
        if let Some(tweak) = &self.tweak {
            tweak(&mut options);
        }
        options
    }
}

/// Memoizes one [`SharedIndexInformer`] per object type.
pub struct SharedInformerFactory {
    client: Option<kube::Client>,
    options: FactoryOptions,
    informers: RwLock<HashMap<TypeId, Entry>>,
    /// Per-informer stop token and task, for informers this factory started.
    running: Mutex<HashMap<TypeId, (CancellationToken, JoinHandle<Result<()>>)>>,
}

fn resource_id<K: Resource<DynamicType = ()>>() -> String {
    let plural = K::plural(&());
    let group = K::group(&());
    let version = K::version(&());
    if group.is_empty() {
        format!("{}/{}", plural, version)
    } else {
        format!("{}.{}/{}", plural, group, version)
    }
}

impl SharedInformerFactory {
    pub fn new(default_resync: Duration) -> Self {
        Self::with_config(InformerConfig::default().with_resync_period(default_resync))
    }

    pub fn with_config(config: InformerConfig) -> Self {
        Self {
            client: None,
            options: FactoryOptions {
                config,
                tweak: None,
            },
            informers: RwLock::new(HashMap::new()),
            running: Mutex::new(HashMap::new()),
        }
    }

    /// Client used by [`SharedInformerFactory::informer`].
    pub fn with_client(mut self, client: kube::Client) -> Self {
        self.client = Some(client);
        self
    }

    /// Tweak applied to the list/watch options of every informer this
    /// factory builds, e.g. to restrict them by label.
    pub fn with_tweak_list_options<F>(mut self, tweak: F) -> Self
    where
        F: Fn(&mut ListOptions) + Send + Sync + 'static,
    {
        self.options.tweak = Some(Arc::new(tweak));
        self
    }

    pub fn options(&self) -> &FactoryOptions {
        &self.options
    }

    /// Return the informer for `K`, building it with `new_fn` on first use.
    ///
    /// Concurrent first calls for the same type all receive the same
    /// instance; `new_fn` runs at most once per type.
    pub fn informer_for<K, F>(&self, new_fn: F) -> Arc<SharedIndexInformer<K>>
    where
        K: Resource<DynamicType = ()> + Clone + Send + Sync + 'static,
        F: FnOnce(&FactoryOptions) -> SharedIndexInformer<K>,
    {
        let type_id = TypeId::of::<K>();

        if let Some(existing) = self.lookup::<K>(&type_id) {
            return existing;
        }

        let mut informers = self.informers.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = informers.get(&type_id) {
            if let Ok(existing) = Arc::clone(&entry.typed).downcast::<SharedIndexInformer<K>>() {
                return existing;
            }
        }

        let informer = Arc::new(new_fn(&self.options));
        let resource = resource_id::<K>();
        debug!(resource = %resource, "Created shared informer");
        informers.insert(
            type_id,
            Entry {
                typed: Arc::clone(&informer) as Arc<dyn Any + Send + Sync>,
                handle: Arc::clone(&informer) as Arc<dyn InformerHandle>,
                resource,
            },
        );
        informer
    }

    fn lookup<K>(&self, type_id: &TypeId) -> Option<Arc<SharedIndexInformer<K>>>
    where
        K: Send + Sync + 'static,
    {
        let informers = self.informers.read().unwrap_or_else(PoisonError::into_inner);
        let entry = informers.get(type_id)?;
        Arc::clone(&entry.typed)
            .downcast::<SharedIndexInformer<K>>()
            .ok()
    }

    /// Informer for `K` backed by the factory's kube client, watching all
    /// namespaces.
    pub fn informer<K>(&self) -> Result<Arc<SharedIndexInformer<K>>>
    where
        K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    {
        let type_id = TypeId::of::<K>();
        if let Some(existing) = self.lookup::<K>(&type_id) {
            return Ok(existing);
        }

        let client = self.client.clone().ok_or(Error::NoClient)?;
        Ok(self.informer_for(move |options| {
            SharedIndexInformer::new(
                ListWatch::from_source(ResourceClient::<K>::all(client)),
                options.config.clone(),
            )
            .with_options(options.list_options())
        }))
    }

    /// Look up an already requested informer by `plural.group/version`
    /// (`pods/v1` for the core group).
    pub fn for_resource(&self, resource: &str) -> Result<Arc<dyn InformerHandle>> {
        let informers = self.informers.read().unwrap_or_else(PoisonError::into_inner);
        informers
            .values()
            .find(|entry| entry.resource == resource)
            .map(|entry| Arc::clone(&entry.handle))
            .ok_or_else(|| Error::UnknownResource(resource.to_string()))
    }

    /// Start every requested informer that is not running yet. Safe to call
    /// repeatedly, e.g. after requesting more informers.
    pub fn start(&self, token: &CancellationToken) {
        let informers = self.informers.read().unwrap_or_else(PoisonError::into_inner);
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        for (type_id, entry) in informers.iter() {
            if running.contains_key(type_id) || entry.handle.is_started() {
                continue;
            }
            info!(resource = %entry.resource, "Starting shared informer");
            let stop = token.child_token();
            let task = tokio::spawn(Arc::clone(&entry.handle).start(stop.clone()));
            running.insert(*type_id, (stop, task));
        }
    }

    /// Wait for every started informer's cache to sync. Returns the sync
    /// state per resource; entries are false if `token` fired first.
    pub async fn wait_for_cache_sync(&self, token: &CancellationToken) -> BTreeMap<String, bool> {
        let handles: Vec<(String, Arc<dyn InformerHandle>)> = {
            let informers = self.informers.read().unwrap_or_else(PoisonError::into_inner);
            let running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
            informers
                .iter()
                .filter(|(type_id, _)| running.contains_key(*type_id))
                .map(|(_, entry)| (entry.resource.clone(), Arc::clone(&entry.handle)))
                .collect()
        };

        let mut result = BTreeMap::new();
        for (resource, handle) in handles {
            let synced = handle.wait_for_cache_sync(token).await;
            result.insert(resource, synced);
        }
        result
    }

    /// Stop every informer this factory started and wait for them to exit.
    /// The token passed to [`SharedInformerFactory::start`] is left alone.
    pub async fn shutdown(&self) {
        let running: Vec<(CancellationToken, JoinHandle<Result<()>>)> = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, running)| running)
            .collect();
        for (stop, _) in &running {
            stop.cancel();
        }
        for (_, task) in running {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "Informer exited with error"),
                Err(e) => warn!(error = %e, "Informer task failed"),
            }
        }
    }
}
