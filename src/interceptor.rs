//! Interceptors for scripting List/Watch behavior during testing

use crate::event::WatchEvent;
use crate::list_watch::ObjectList;
use crate::options::ListOptions;
use crate::Result;
use std::sync::Arc;

/// Interceptor functions for [`MemoryListWatch`](crate::memory::MemoryListWatch)
///
/// Return `Ok(Some(value))` to override, `Ok(None)` to continue, or `Err(e)` to inject an error.
///
/// # Example
/// ```
/// use k8s_openapi::api::core::v1::Pod;
/// use kube_shared_informer::{interceptor, Error};
///
/// let funcs = interceptor::Funcs::<Pod>::new()
///     .list(|ctx| {
///         // Fail the first List, serve the store afterwards
///         if ctx.call == 1 {
///             return Err(Error::Transport("connection refused".into()));
///         }
///         Ok(None)
///     })
///     .watch(|_ctx| Ok(None));
/// ```
pub struct Funcs<K> {
    /// Intercept List operations
    pub(crate) list: Option<ListInterceptor<K>>,
    /// Intercept Watch operations
    pub(crate) watch: Option<WatchInterceptor<K>>,
}

impl<K> Default for Funcs<K> {
    fn default() -> Self {
        Self {
            list: None,
            watch: None,
        }
    }
}

impl<K> Clone for Funcs<K> {
    fn clone(&self) -> Self {
        Self {
            list: self.list.clone(),
            watch: self.watch.clone(),
        }
    }
}

/// Context passed to List interceptors
pub struct ListContext<'a> {
    pub options: &'a ListOptions,
    /// 1-based number of this List call
    pub call: usize,
}

/// Context passed to Watch interceptors
pub struct WatchContext<'a> {
    /// Watch options; `resource_version` is where the watch starts
    pub options: &'a ListOptions,
    /// 1-based number of this Watch call
    pub call: usize,
}

/// A returned list replaces the store's contents for this call.
pub type ListInterceptor<K> =
    Arc<dyn Fn(ListContext) -> Result<Option<ObjectList<K>>> + Send + Sync>;

/// Returned events are streamed in order, then the watch closes cleanly.
pub type WatchInterceptor<K> =
    Arc<dyn Fn(WatchContext) -> Result<Option<Vec<WatchEvent<K>>>> + Send + Sync>;

impl<K> Funcs<K> {
    /// Create a new empty set of interceptors
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a List interceptor
    pub fn list<F>(mut self, f: F) -> Self
    where
        F: Fn(ListContext) -> Result<Option<ObjectList<K>>> + Send + Sync + 'static,
    {
        self.list = Some(Arc::new(f));
        self
    }

    /// Add a Watch interceptor
    pub fn watch<F>(mut self, f: F) -> Self
    where
        F: Fn(WatchContext) -> Result<Option<Vec<WatchEvent<K>>>> + Send + Sync + 'static,
    {
        self.watch = Some(Arc::new(f));
        self
    }
}
