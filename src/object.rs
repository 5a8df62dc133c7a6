//! Object keys and resource version helpers

use crate::{Error, Result};
use kube::{Resource, ResourceExt};
use std::cmp::Ordering;

/// Name of the index every informer registers by default.
pub const NAMESPACE_INDEX: &str = "namespace";

/// Cache key for an object: `namespace/name`, or `name` for cluster-scoped objects.
pub fn object_key<K: Resource>(obj: &K) -> String {
    let name = obj.name_any();
    match obj.namespace() {
        Some(ns) if !ns.is_empty() => format!("{}/{}", ns, name),
        _ => name,
    }
}

/// Build a cache key from its parts.
pub fn make_key(namespace: Option<&str>, name: &str) -> String {
    match namespace {
        Some(ns) if !ns.is_empty() => format!("{}/{}", ns, name),
        _ => name.to_string(),
    }
}

/// Split a cache key into `(namespace, name)`.
pub fn split_key(key: &str) -> Result<(Option<&str>, &str)> {
    let mut parts = key.split('/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(name), None, None) if !name.is_empty() => Ok((None, name)),
        (Some(ns), Some(name), None) if !name.is_empty() => Ok((Some(ns), name)),
        _ => Err(Error::InvalidRequest(format!("unexpected key format: {:?}", key))),
    }
}

/// Index function returning the object's namespace, if any.
pub fn namespace_index_func<K: Resource>(obj: &K) -> Vec<String> {
    obj.namespace().into_iter().filter(|ns| !ns.is_empty()).collect()
}

/// Compare two resource versions.
///
/// Resource versions are opaque, so only values that both parse as integers
/// are ordered; anything else is `None`.
pub fn compare_resource_versions(a: &str, b: &str) -> Option<Ordering> {
    let a: u64 = a.parse().ok()?;
    let b: u64 = b.parse().ok()?;
    Some(a.cmp(&b))
}

/// True when `candidate` is known to be no newer than `current`.
pub fn is_stale(candidate: &str, current: &str) -> bool {
    matches!(
        compare_resource_versions(candidate, current),
        Some(Ordering::Less | Ordering::Equal)
    )
}

pub fn parse_resource_version(rv: &str) -> Result<u64> {
    rv.parse()
        .map_err(|_| Error::InvalidRequest(format!("Invalid resource version: {}", rv)))
}

/// Short type name used in logs and errors, e.g. `Pod`.
pub fn short_type_name<K>() -> &'static str {
    let full = std::any::type_name::<K>();
    full.rsplit("::").next().unwrap_or(full)
}
