//! Read-only queries over an informer's cache

use crate::indexer::Indexer;
use crate::label_selector::{object_matches, parse_label_selector};
use crate::object::{make_key, short_type_name, split_key, NAMESPACE_INDEX};
use crate::{Error, Result};
use kube::core::Selector;
use kube::{Resource, ResourceExt};
use std::sync::Arc;

/// Read API served entirely from a local cache.
pub trait Lister<K>: Send + Sync {
    /// Objects whose labels match `selector`.
    fn list(&self, selector: &Selector) -> Vec<Arc<K>>;

    /// Object by key (`namespace/name` or `name`), `NotFound` if absent.
    fn get(&self, key: &str) -> Result<Arc<K>>;
}

fn not_found<K>(namespace: Option<&str>, name: &str) -> Error {
    Error::NotFound {
        kind: short_type_name::<K>().to_string(),
        name: name.to_string(),
        namespace: namespace.unwrap_or_default().to_string(),
    }
}

/// Lister over every object in an [`Indexer`].
pub struct GenericLister<K> {
    indexer: Arc<Indexer<K>>,
}

impl<K> Clone for GenericLister<K> {
    fn clone(&self) -> Self {
        Self {
            indexer: Arc::clone(&self.indexer),
        }
    }
}

impl<K> GenericLister<K>
where
    K: Resource + Send + Sync + 'static,
{
    pub fn new(indexer: Arc<Indexer<K>>) -> Self {
        Self { indexer }
    }

    /// List with a label selector given as a string.
    pub fn list_matching(&self, selector: &str) -> Result<Vec<Arc<K>>> {
        let selector = parse_label_selector(selector)?;
        Ok(Lister::list(self, &selector))
    }

    /// Restrict queries to one namespace.
    pub fn namespaced(&self, namespace: &str) -> NamespaceLister<K> {
        NamespaceLister {
            indexer: Arc::clone(&self.indexer),
            namespace: namespace.to_string(),
        }
    }
}

impl<K> Lister<K> for GenericLister<K>
where
    K: Resource + Send + Sync + 'static,
{
    fn list(&self, selector: &Selector) -> Vec<Arc<K>> {
        self.indexer
            .list()
            .into_iter()
            .filter(|obj| object_matches(obj.as_ref(), selector))
            .collect()
    }

    fn get(&self, key: &str) -> Result<Arc<K>> {
        let (namespace, name) = split_key(key)?;
        self.indexer
            .get(key)
            .ok_or_else(|| not_found::<K>(namespace, name))
    }
}

/// Lister restricted to a single namespace bucket.
pub struct NamespaceLister<K> {
    indexer: Arc<Indexer<K>>,
    namespace: String,
}

impl<K> NamespaceLister<K>
where
    K: Resource + Send + Sync + 'static,
{
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn list_matching(&self, selector: &str) -> Result<Vec<Arc<K>>> {
        let selector = parse_label_selector(selector)?;
        Ok(Lister::list(self, &selector))
    }
}

impl<K> Lister<K> for NamespaceLister<K>
where
    K: Resource + Send + Sync + 'static,
{
    fn list(&self, selector: &Selector) -> Vec<Arc<K>> {
        // Fall back to a full scan if the namespace index was not registered.
        let candidates = self
            .indexer
            .by_index(NAMESPACE_INDEX, &self.namespace)
            .unwrap_or_else(|_| {
                self.indexer
                    .list()
                    .into_iter()
                    .filter(|obj| obj.namespace().as_deref() == Some(self.namespace.as_str()))
                    .collect()
            });

        candidates
            .into_iter()
            .filter(|obj| object_matches(obj.as_ref(), selector))
            .collect()
    }

    /// Get by object name within the namespace.
    fn get(&self, name: &str) -> Result<Arc<K>> {
        self.indexer
            .get(&make_key(Some(&self.namespace), name))
            .ok_or_else(|| not_found::<K>(Some(&self.namespace), name))
    }
}
