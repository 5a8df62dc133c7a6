//! Shared, indexed watch caches for Kubernetes resources.
//!
//! Modeled on client-go's shared informers: one List/Watch connection per
//! resource type feeds an in-memory [`Indexer`], any number of handlers are
//! notified of changes, and [`Lister`]s answer reads from the cache without
//! touching the API server.
//!
//! # Examples
//!
//! ## Watching a cluster
//!
//! ```rust,no_run
//! use k8s_openapi::api::core::v1::Pod;
//! use kube_shared_informer::{HandlerFuncs, Lister, SharedInformerFactory};
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let client = kube::Client::try_default().await?;
//! let factory = SharedInformerFactory::new(Duration::from_secs(300)).with_client(client);
//!
//! let pods = factory.informer::<Pod>()?;
//! pods.add_handler(HandlerFuncs::new().on_add(|pod: &std::sync::Arc<Pod>| {
//!     println!("added {:?}", pod.metadata.name);
//!     Ok(())
//! }));
//!
//! let token = CancellationToken::new();
//! factory.start(&token);
//! factory.wait_for_cache_sync(&token).await;
//!
//! let pod = pods.lister().get("default/web-0")?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Without a cluster
//!
//! ```rust
//! use k8s_openapi::api::core::v1::ConfigMap;
//! use kube_shared_informer::{InformerConfig, MemoryListWatch, SharedIndexInformer};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let source = Arc::new(MemoryListWatch::<ConfigMap>::new());
//! let mut cm = ConfigMap::default();
//! cm.metadata.name = Some("settings".to_string());
//! cm.metadata.namespace = Some("default".to_string());
//! source.create(cm)?;
//!
//! let informer = Arc::new(SharedIndexInformer::<ConfigMap>::new(
//!     Arc::clone(&source),
//!     InformerConfig::default(),
//! ));
//! let token = CancellationToken::new();
//! let running = tokio::spawn(Arc::clone(&informer).run(token.clone()));
//!
//! assert!(informer.wait_for_cache_sync(&token).await);
//! assert!(informer.indexer().get("default/settings").is_some());
//!
//! token.cancel();
//! running.await??;
//! # Ok(())
//! # }
//! ```

mod backoff;
mod client;
mod config;
mod error;
mod event;
mod factory;
pub mod field_selectors;
mod indexer;
mod informer;
pub mod interceptor;
pub mod label_selector;
mod list_watch;
mod lister;
mod memory;
pub mod mock_service;
pub mod object;
mod options;
mod processor;
mod reflector;

#[cfg(test)]
mod backoff_test;
#[cfg(test)]
mod config_test;
#[cfg(test)]
mod event_test;
#[cfg(test)]
mod mock_service_test;
#[cfg(test)]
mod processor_test;

pub use backoff::{Backoff, BackoffConfig};
pub use client::{map_kube_error, ResourceClient};
pub use config::InformerConfig;
pub use error::{Error, Result};
pub use event::{WatchEvent, WatchStatus};
pub use factory::{FactoryOptions, SharedInformerFactory};
pub use indexer::{IndexFunc, Indexer, Indexers};
pub use informer::{EventSource, InformerHandle, SharedIndexInformer};
pub use kube::core::Selector;
pub use list_watch::{EventStream, ListWatch, ListerWatcher, ObjectList};
pub use lister::{GenericLister, Lister, NamespaceLister};
pub use memory::MemoryListWatch;
pub use options::{ListOptions, TweakListOptions};
pub use processor::{
    HandlerError, HandlerFuncs, HandlerRegistration, HandlerResult, Notification,
    ResourceEventHandler,
};
pub use reflector::{Delta, Reflector};
