//! List/Watch sources and the adapter that binds them together

use crate::event::WatchEvent;
use crate::options::{ListOptions, TweakListOptions};
use crate::Result;
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::FutureExt;
use std::future::Future;
use std::sync::Arc;

/// Stream of watch events; ends when the server closes the watch.
pub type EventStream<K> = BoxStream<'static, Result<WatchEvent<K>>>;

/// Result of a List call: the items plus the collection's resource version,
/// which is where the following Watch must start.
#[derive(Debug, Clone)]
pub struct ObjectList<K> {
    pub items: Vec<K>,
    pub resource_version: String,
}

/// Anything that can enumerate a collection and stream its changes.
#[async_trait]
pub trait ListerWatcher<K: Send + 'static>: Send + Sync {
    async fn list(&self, options: &ListOptions) -> Result<ObjectList<K>>;

    /// Watch for changes after `options.resource_version`.
    async fn watch(&self, options: &ListOptions) -> Result<EventStream<K>>;
}

#[async_trait]
impl<K, T> ListerWatcher<K> for Arc<T>
where
    K: Send + 'static,
    T: ListerWatcher<K> + ?Sized,
{
    async fn list(&self, options: &ListOptions) -> Result<ObjectList<K>> {
        (**self).list(options).await
    }

    async fn watch(&self, options: &ListOptions) -> Result<EventStream<K>> {
        (**self).watch(options).await
    }
}

type ListFn<K> = Arc<dyn Fn(ListOptions) -> BoxFuture<'static, Result<ObjectList<K>>> + Send + Sync>;
type WatchFn<K> =
    Arc<dyn Fn(ListOptions) -> BoxFuture<'static, Result<EventStream<K>>> + Send + Sync>;

/// Binds a list function and a watch function into one [`ListerWatcher`],
/// applying the same option tweak to both so their filtering agrees.
pub struct ListWatch<K> {
    list_fn: ListFn<K>,
    watch_fn: WatchFn<K>,
    tweak: Option<TweakListOptions>,
}

impl<K: Send + 'static> ListWatch<K> {
    pub fn new<LF, LFut, WF, WFut>(list: LF, watch: WF) -> Self
    where
        LF: Fn(ListOptions) -> LFut + Send + Sync + 'static,
        LFut: Future<Output = Result<ObjectList<K>>> + Send + 'static,
        WF: Fn(ListOptions) -> WFut + Send + Sync + 'static,
        WFut: Future<Output = Result<EventStream<K>>> + Send + 'static,
    {
        Self {
            list_fn: Arc::new(move |opts| list(opts).boxed()),
            watch_fn: Arc::new(move |opts| watch(opts).boxed()),
            tweak: None,
        }
    }

    /// Wrap an existing source, e.g. to add a tweak on top of it.
    pub fn from_source<S>(source: S) -> Self
    where
        S: ListerWatcher<K> + 'static,
    {
        let source = Arc::new(source);
        let watcher = Arc::clone(&source);
        Self::new(
            move |opts| {
                let source = Arc::clone(&source);
                async move { source.list(&opts).await }
            },
            move |opts| {
                let watcher = Arc::clone(&watcher);
                async move { watcher.watch(&opts).await }
            },
        )
    }

    pub fn with_tweak(mut self, tweak: TweakListOptions) -> Self {
        self.tweak = Some(tweak);
        self
    }

    fn prepare(&self, options: &ListOptions) -> ListOptions {
        let mut options = options.clone();
        if let Some(tweak) = &self.tweak {
            tweak(&mut options);
        }
        options
    }
}

#[async_trait]
impl<K: Send + 'static> ListerWatcher<K> for ListWatch<K> {
    async fn list(&self, options: &ListOptions) -> Result<ObjectList<K>> {
        let options = self.prepare(options);
        (self.list_fn)(options).await
    }

    async fn watch(&self, options: &ListOptions) -> Result<EventStream<K>> {
        let options = self.prepare(options);
        (self.watch_fn)(options).await
    }
}
