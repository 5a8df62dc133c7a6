//! Mock tower service that serves List/Watch requests from a [`MemoryListWatch`]
//!
//! Lets a real `kube::Client` (and therefore [`ResourceClient`] and
//! [`SharedInformerFactory::informer`]) run against an in-memory collection:
//!
//! ```rust
//! use k8s_openapi::api::core::v1::Pod;
//! use kube_shared_informer::{mock_service, MemoryListWatch, ResourceClient};
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let source = Arc::new(MemoryListWatch::<Pod>::new());
//! let client = mock_service::client(Arc::clone(&source));
//!
//! let pods = ResourceClient::<Pod>::all(client);
//! let list = pods.list(&Default::default()).await?;
//! assert!(list.items.is_empty());
//! # Ok(())
//! # }
//! ```
//!
//! Only collection GETs are served; every other request gets `405`.
//!
//! [`ResourceClient`]: crate::ResourceClient
//! [`SharedInformerFactory::informer`]: crate::SharedInformerFactory::informer

use crate::event::WatchEvent;
use crate::list_watch::ListerWatcher;
use crate::memory::MemoryListWatch;
use crate::options::ListOptions;
use crate::Error;
use bytes::Bytes;
use futures::future::{BoxFuture, FutureExt};
use futures::StreamExt;
use http::{Method, Request, Response, StatusCode};
use http_body::Frame;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full, StreamBody};
use kube::client::Body as KubeBody;
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::Service;
use tracing::{debug, trace};

type BoxError = Box<dyn std::error::Error + Send + Sync>;
type MockBody = UnsyncBoxBody<Bytes, BoxError>;

/// Build a `kube::Client` whose requests are served by `source`.
///
/// Must be called from within a Tokio runtime.
pub fn client<K>(source: Arc<MemoryListWatch<K>>) -> kube::Client
where
    K: Resource<DynamicType = ()> + Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    kube::Client::new(MockApiServer::new(source), "default")
}

/// Mock HTTP service answering List and Watch for one resource type
pub struct MockApiServer<K> {
    source: Arc<MemoryListWatch<K>>,
}

impl<K> Clone for MockApiServer<K> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
        }
    }
}

/// Namespace segment of a collection path, `None` for cluster-wide paths.
/// Errors if the path names a single object or a subresource.
fn collection_namespace(path: &str) -> Result<Option<String>, String> {
    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
    // api/v1/<plural> or apis/<group>/<version>/<plural>
    let prefix = match segments.first() {
        Some(&"api") => 2,
        Some(&"apis") => 3,
        _ => return Err(format!("unexpected path {:?}", path)),
    };

    match &segments[prefix.min(segments.len())..] {
        [_plural] => Ok(None),
        ["namespaces", namespace, _plural] => Ok(Some(namespace.to_string())),
        _ => Err(format!("only collection requests are served, got {:?}", path)),
    }
}

fn status_body(code: u16, reason: &str, message: &str) -> Value {
    json!({
        "kind": "Status",
        "apiVersion": "v1",
        "status": "Failure",
        "message": message,
        "reason": reason,
        "code": code
    })
}

fn full(status: StatusCode, body: Value) -> Response<MockBody> {
    let body = Full::new(Bytes::from(body.to_string()))
        .map_err(|never| match never {})
        .boxed_unsync();
    let mut response = Response::new(body);
    *response.status_mut() = status;
    response.headers_mut().insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("application/json"),
    );
    response
}

fn error_to_response(err: &Error) -> Response<MockBody> {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    full(
        status,
        status_body(err.status_code(), err.reason(), &err.to_string()),
    )
}

/// Encode one watch event as a line of the watch protocol.
fn encode_event<K>(event: &WatchEvent<K>) -> Result<Bytes, serde_json::Error>
where
    K: Resource<DynamicType = ()> + Serialize,
{
    let (kind, object) = match event {
        WatchEvent::Added(obj) => ("ADDED", serde_json::to_value(obj)?),
        WatchEvent::Modified(obj) => ("MODIFIED", serde_json::to_value(obj)?),
        WatchEvent::Deleted(obj) => ("DELETED", serde_json::to_value(obj)?),
        WatchEvent::Bookmark { resource_version } => (
            "BOOKMARK",
            json!({
                "apiVersion": K::api_version(&()),
                "kind": K::kind(&()),
                "metadata": { "resourceVersion": resource_version }
            }),
        ),
        WatchEvent::Error(status) => (
            "ERROR",
            status_body(status.code, &status.reason, &status.message),
        ),
    };

    let mut line = serde_json::to_vec(&json!({ "type": kind, "object": object }))?;
    line.push(b'\n');
    Ok(Bytes::from(line))
}

impl<K> MockApiServer<K>
where
    K: Resource<DynamicType = ()> + Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn new(source: Arc<MemoryListWatch<K>>) -> Self {
        Self { source }
    }

    async fn handle_request(&self, req: Request<KubeBody>) -> Response<MockBody> {
        if req.method() != Method::GET {
            return full(
                StatusCode::METHOD_NOT_ALLOWED,
                status_body(405, "MethodNotAllowed", "only GET is supported"),
            );
        }

        let path = req.uri().path().to_string();
        let mut options = ListOptions::from_query(req.uri().query().unwrap_or_default());
        trace!(path = %path, watch = options.watch, "Mock API request");

        let namespace = match collection_namespace(&path) {
            Ok(namespace) => namespace,
            Err(message) => {
                return full(
                    StatusCode::METHOD_NOT_ALLOWED,
                    status_body(405, "MethodNotAllowed", &message),
                )
            }
        };
        if let Some(namespace) = namespace {
            let scoped = format!("metadata.namespace={}", namespace);
            options.field_selector = Some(match options.field_selector.take() {
                Some(fields) if !fields.is_empty() => format!("{},{}", fields, scoped),
                _ => scoped,
            });
        }

        if options.watch {
            self.handle_watch(&options).await
        } else {
            self.handle_list(&options).await
        }
    }

    async fn handle_list(&self, options: &ListOptions) -> Response<MockBody> {
        let list = match self.source.list(options).await {
            Ok(list) => list,
            Err(e) => return error_to_response(&e),
        };

        let items: Result<Vec<Value>, _> = list.items.iter().map(serde_json::to_value).collect();
        match items {
            Ok(items) => full(
                StatusCode::OK,
                json!({
                    "apiVersion": K::api_version(&()),
                    "kind": format!("{}List", K::kind(&())),
                    "metadata": { "resourceVersion": list.resource_version },
                    "items": items
                }),
            ),
            Err(e) => error_to_response(&Error::Serialization(e)),
        }
    }

    async fn handle_watch(&self, options: &ListOptions) -> Response<MockBody> {
        let events = match self.source.watch(options).await {
            Ok(events) => events,
            Err(e) => return error_to_response(&e),
        };
        debug!(
            resource_version = options.resource_version.as_deref().unwrap_or_default(),
            "Mock API watch opened"
        );

        let frames = events.map(|event| {
            let event = event.map_err(|e| Box::new(e) as BoxError)?;
            encode_event(&event)
                .map(Frame::data)
                .map_err(|e| Box::new(e) as BoxError)
        });
        let mut response = Response::new(StreamBody::new(frames).boxed_unsync());
        response.headers_mut().insert(
            http::header::CONTENT_TYPE,
            http::HeaderValue::from_static("application/json"),
        );
        response
    }
}

impl<K> Service<Request<KubeBody>> for MockApiServer<K>
where
    K: Resource<DynamicType = ()> + Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    type Response = Response<MockBody>;
    type Error = BoxError;
    type Future = BoxFuture<'static, std::result::Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<std::result::Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<KubeBody>) -> Self::Future {
        let this = self.clone();
        async move { Ok(this.handle_request(req).await) }.boxed()
    }
}
