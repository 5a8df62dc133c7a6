//! Thread-safe object store with secondary indices

use crate::object::{namespace_index_func, object_key, short_type_name, NAMESPACE_INDEX};
use crate::{Error, Result};
use kube::Resource;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::trace;

/// Computes the index values of an object.
pub type IndexFunc<K> = Arc<dyn Fn(&K) -> Vec<String> + Send + Sync>;

/// Index name -> index function.
pub type Indexers<K> = HashMap<String, IndexFunc<K>>;

/// Index value -> object keys.
type Index = HashMap<String, BTreeSet<String>>;

struct Inner<K> {
    items: HashMap<String, Arc<K>>,
    indexers: Indexers<K>,
    indices: HashMap<String, Index>,
    resource_version: String,
}

impl<K> Inner<K> {
    fn index_object(&mut self, key: &str, obj: &K) {
        for (name, func) in &self.indexers {
            let index = self.indices.entry(name.clone()).or_default();
            for value in func(obj) {
                index.entry(value).or_default().insert(key.to_string());
            }
        }
    }

    fn unindex_object(&mut self, key: &str, obj: &K) {
        for (name, func) in &self.indexers {
            let Some(index) = self.indices.get_mut(name) else {
                continue;
            };
            for value in func(obj) {
                if let Some(keys) = index.get_mut(&value) {
                    keys.remove(key);
                    if keys.is_empty() {
                        index.remove(&value);
                    }
                }
            }
        }
    }

    fn index_for(&self, name: &str) -> Result<(&IndexFunc<K>, Option<&Index>)> {
        let func = self.indexers.get(name).ok_or_else(|| Error::IndexNotFound {
            kind: short_type_name::<K>().to_string(),
            index: name.to_string(),
        })?;
        Ok((func, self.indices.get(name)))
    }
}

/// Keyed object cache maintained by an informer.
///
/// Every operation takes the lock for exactly one read or one mutation, so
/// readers never observe a partially applied object: objects are swapped as
/// whole `Arc`s.
pub struct Indexer<K> {
    inner: RwLock<Inner<K>>,
}

impl<K> Indexer<K>
where
    K: Resource + Send + Sync + 'static,
{
    /// Create an indexer with the namespace index registered.
    pub fn new() -> Self {
        let mut indexers: Indexers<K> = HashMap::new();
        indexers.insert(
            NAMESPACE_INDEX.to_string(),
            Arc::new(|obj: &K| namespace_index_func(obj)),
        );
        Self::with_indexers(indexers)
    }

    pub fn with_indexers(indexers: Indexers<K>) -> Self {
        Self {
            inner: RwLock::new(Inner {
                items: HashMap::new(),
                indexers,
                indices: HashMap::new(),
                resource_version: String::new(),
            }),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner<K>> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner<K>> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register additional indices, back-filling them for cached objects.
    pub fn add_indexers(&self, indexers: Indexers<K>) -> Result<()> {
        let mut inner = self.write();
        if let Some(name) = indexers.keys().find(|n| inner.indexers.contains_key(*n)) {
            return Err(Error::IndexConflict(name.clone()));
        }

        for (name, func) in indexers {
            let mut index = Index::new();
            for (key, obj) in &inner.items {
                for value in func(obj) {
                    index.entry(value).or_default().insert(key.clone());
                }
            }
            inner.indices.insert(name.clone(), index);
            inner.indexers.insert(name, func);
        }
        Ok(())
    }

    /// Insert or replace an object, returning the previous version.
    pub fn insert(&self, obj: Arc<K>) -> Option<Arc<K>> {
        let key = object_key(obj.as_ref());
        let mut inner = self.write();
        let old = inner.items.remove(&key);
        if let Some(old) = &old {
            inner.unindex_object(&key, old);
        }
        inner.index_object(&key, &obj);
        inner.items.insert(key.clone(), obj);
        trace!("Stored {} {}", short_type_name::<K>(), key);
        old
    }

    /// Remove an object by key, returning it if it was cached.
    pub fn remove(&self, key: &str) -> Option<Arc<K>> {
        let mut inner = self.write();
        let old = inner.items.remove(key)?;
        inner.unindex_object(key, &old);
        trace!("Removed {} {}", short_type_name::<K>(), key);
        Some(old)
    }

    /// Replace the whole contents, returning the previous items by key.
    pub fn replace(
        &self,
        items: Vec<Arc<K>>,
        resource_version: impl Into<String>,
    ) -> HashMap<String, Arc<K>> {
        let mut inner = self.write();
        let previous = std::mem::take(&mut inner.items);
        inner.indices.clear();
        for obj in items {
            let key = object_key(obj.as_ref());
            inner.index_object(&key, &obj);
            inner.items.insert(key, obj);
        }
        inner.resource_version = resource_version.into();
        previous
    }

    pub fn get(&self, key: &str) -> Option<Arc<K>> {
        self.read().items.get(key).cloned()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.read().items.contains_key(key)
    }

    pub fn list(&self) -> Vec<Arc<K>> {
        self.read().items.values().cloned().collect()
    }

    pub fn list_keys(&self) -> Vec<String> {
        self.read().items.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().items.is_empty()
    }

    /// Objects whose `index_name` values include `value`.
    pub fn by_index(&self, index_name: &str, value: &str) -> Result<Vec<Arc<K>>> {
        let inner = self.read();
        let (_, index) = inner.index_for(index_name)?;
        Ok(index
            .and_then(|idx| idx.get(value))
            .map(|keys| {
                keys.iter()
                    .filter_map(|k| inner.items.get(k).cloned())
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Keys of the objects whose `index_name` values include `value`.
    pub fn index_keys(&self, index_name: &str, value: &str) -> Result<Vec<String>> {
        let inner = self.read();
        let (_, index) = inner.index_for(index_name)?;
        Ok(index
            .and_then(|idx| idx.get(value))
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default())
    }

    /// Every value currently present in `index_name`.
    pub fn list_index_values(&self, index_name: &str) -> Vec<String> {
        let inner = self.read();
        let mut values: Vec<String> = inner
            .indices
            .get(index_name)
            .map(|idx| idx.keys().cloned().collect())
            .unwrap_or_default();
        values.sort();
        values
    }

    /// Objects sharing at least one `index_name` value with `obj`.
    pub fn index(&self, index_name: &str, obj: &K) -> Result<Vec<Arc<K>>> {
        let inner = self.read();
        let (func, index) = inner.index_for(index_name)?;
        let Some(index) = index else {
            return Ok(Vec::new());
        };

        let keys: BTreeSet<&String> = func(obj)
            .iter()
            .filter_map(|value| index.get(value))
            .flatten()
            .collect();
        Ok(keys
            .into_iter()
            .filter_map(|k| inner.items.get(k).cloned())
            .collect())
    }

    pub fn index_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().indexers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Resource version of the last list or applied event.
    pub fn resource_version(&self) -> String {
        self.read().resource_version.clone()
    }

    pub fn set_resource_version(&self, resource_version: impl Into<String>) {
        self.write().resource_version = resource_version.into();
    }
}

impl<K> Default for Indexer<K>
where
    K: Resource + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
