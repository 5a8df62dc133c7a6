//! List and Watch against the API server through `kube::Api`

use crate::event::WatchEvent;
use crate::list_watch::{EventStream, ListerWatcher, ObjectList};
use crate::object::short_type_name;
use crate::options::ListOptions;
use crate::{Error, Result};
use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use http::StatusCode;
use kube::core::NamespaceResourceScope;
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use tracing::debug;

/// Typed List/Watch client for one resource type.
///
/// Does not retry; callers decide how to recover from failures.
#[derive(Clone)]
pub struct ResourceClient<K> {
    api: Api<K>,
}

impl<K> ResourceClient<K>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    pub fn new(api: Api<K>) -> Self {
        Self { api }
    }

    /// Client over every namespace (or a cluster-scoped resource).
    pub fn all(client: Client) -> Self
    where
        K::DynamicType: Default,
    {
        Self::new(Api::all(client))
    }

    /// Client restricted to one namespace.
    pub fn namespaced(client: Client, namespace: &str) -> Self
    where
        K: Resource<Scope = NamespaceResourceScope>,
        K::DynamicType: Default,
    {
        Self::new(Api::namespaced(client, namespace))
    }

    pub fn api(&self) -> &Api<K> {
        &self.api
    }

    pub async fn list(&self, options: &ListOptions) -> Result<ObjectList<K>> {
        debug!(
            "Listing {} ({})",
            short_type_name::<K>(),
            options.to_query()
        );
        let list = self
            .api
            .list(&options.to_list_params())
            .await
            .map_err(map_kube_error::<K>)?;

        Ok(ObjectList {
            resource_version: list.metadata.resource_version.unwrap_or_default(),
            items: list.items,
        })
    }

    pub async fn watch(&self, options: &ListOptions) -> Result<EventStream<K>> {
        let version = options.resource_version.as_deref().unwrap_or("0");
        debug!(
            "Watching {} ({})",
            short_type_name::<K>(),
            options.to_query()
        );
        let stream = self
            .api
            .watch(&options.to_watch_params(), version)
            .await
            .map_err(map_kube_error::<K>)?;

        Ok(stream
            .map_ok(WatchEvent::from)
            .map_err(map_kube_error::<K>)
            .boxed())
    }
}

#[async_trait]
impl<K> ListerWatcher<K> for ResourceClient<K>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    async fn list(&self, options: &ListOptions) -> Result<ObjectList<K>> {
        ResourceClient::list(self, options).await
    }

    async fn watch(&self, options: &ListOptions) -> Result<EventStream<K>> {
        ResourceClient::watch(self, options).await
    }
}

/// Translate a kube client error into this crate's taxonomy.
pub fn map_kube_error<K>(err: kube::Error) -> Error {
    match err {
        kube::Error::Api(resp) => match StatusCode::from_u16(resp.code) {
            Ok(StatusCode::NOT_FOUND) => Error::NotFound {
                kind: short_type_name::<K>().to_string(),
                name: resp.message,
                namespace: String::new(),
            },
            Ok(StatusCode::CONFLICT) => Error::Conflict(resp.message),
            Ok(StatusCode::GONE) => Error::Expired(resp.message),
            Ok(StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT) => {
                Error::Timeout(resp.message)
            }
            _ => Error::Api {
                code: resp.code,
                message: resp.message,
            },
        },
        kube::Error::SerdeError(e) => Error::Decode(e.to_string()),
        other => Error::Transport(other.to_string()),
    }
}
