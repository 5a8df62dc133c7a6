//! The list/watch loop feeding an informer
//!
//! ```text
//!            +--------------+   list ok    +----------+
//!  start --> | Initializing | -----------> | Watching |
//!            +--------------+              +----------+
//!                  ^   ^                     |      |
//!                  |   +---- stream closed --+      |
//!                  +------ backoff <--- error ------+
//! ```
//!
//! The reflector never touches the cache itself. It turns list results and
//! watch events into [`Delta`]s queued for the informer's processing loop,
//! dropping events that are not newer than what it has already queued.

use crate::backoff::Backoff;
use crate::config::InformerConfig;
use crate::event::WatchEvent;
use crate::list_watch::ListerWatcher;
use crate::object::is_stale;
use crate::options::ListOptions;
use crate::{Error, Result};
use futures::StreamExt;
use kube::Resource;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Unit of work handed from the reflector to the informer.
#[derive(Debug)]
pub enum Delta<K> {
    /// Result of a full List: the cache must become exactly `items`.
    Replace {
        items: Vec<K>,
        resource_version: String,
    },
    /// Object added or modified.
    Upsert(K),
    Delete(K),
    /// Resource version advanced without an object change.
    Progress(String),
    /// Re-deliver every cached object to handlers.
    Resync,
}

#[derive(Debug, PartialEq, Eq)]
enum WatchOutcome {
    /// The server ended the watch; relist.
    Closed,
    Cancelled,
}

pub struct Reflector<K: Send + 'static> {
    name: String,
    lister_watcher: Arc<dyn ListerWatcher<K>>,
    options: ListOptions,
    config: InformerConfig,
    deltas: mpsc::UnboundedSender<Delta<K>>,
}

impl<K> Reflector<K>
where
    K: Resource + Clone + Send + Sync + 'static,
{
    pub fn new(
        name: impl Into<String>,
        lister_watcher: Arc<dyn ListerWatcher<K>>,
        options: ListOptions,
        config: InformerConfig,
        deltas: mpsc::UnboundedSender<Delta<K>>,
    ) -> Self {
        Self {
            name: name.into(),
            lister_watcher,
            options,
            config,
            deltas,
        }
    }

    /// Run until `token` is cancelled or the delta consumer goes away.
    pub async fn run(&self, token: &CancellationToken) {
        info!(informer = %self.name, "Starting reflector");
        let mut backoff = Backoff::new(self.config.backoff.clone());

        while !token.is_cancelled() {
            match self.list_and_watch(token, &mut backoff).await {
                Ok(WatchOutcome::Cancelled) => break,
                Ok(WatchOutcome::Closed) => {
                    debug!(informer = %self.name, "Watch closed by server, relisting");
                }
                Err(Error::Internal(msg)) if self.deltas.is_closed() => {
                    debug!(informer = %self.name, "{}", msg);
                    break;
                }
                Err(e) => {
                    let delay = backoff.next_delay();
                    if e.is_retryable() {
                        warn!(
                            informer = %self.name,
                            error = %e,
                            attempt = backoff.attempts(),
                            delay_ms = delay.as_millis() as u64,
                            "List/watch failed, retrying"
                        );
                    } else {
                        error!(
                            informer = %self.name,
                            error = %e,
                            attempt = backoff.attempts(),
                            delay_ms = delay.as_millis() as u64,
                            "List/watch failed with a non-transient error, retrying"
                        );
                    }
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        info!(informer = %self.name, "Reflector stopped");
    }

    fn send(&self, delta: Delta<K>) -> Result<()> {
        self.deltas
            .send(delta)
            .map_err(|_| Error::Internal("delta queue closed".to_string()))
    }

    async fn list_and_watch(
        &self,
        token: &CancellationToken,
        backoff: &mut Backoff,
    ) -> Result<WatchOutcome> {
        let mut list_options = self.options.clone();
        list_options.timeout = Some(self.config.list_timeout);

        let list = tokio::select! {
            _ = token.cancelled() => return Ok(WatchOutcome::Cancelled),
            res = tokio::time::timeout(
                self.config.list_timeout,
                self.lister_watcher.list(&list_options),
            ) => res.map_err(|_| {
                Error::Timeout(format!("list did not complete within {:?}", self.config.list_timeout))
            })??,
        };

        let mut last_rv = list.resource_version.clone();
        debug!(
            informer = %self.name,
            items = list.items.len(),
            resource_version = %last_rv,
            "Listed"
        );
        self.send(Delta::Replace {
            items: list.items,
            resource_version: list.resource_version,
        })?;
        backoff.reset();

        let mut watch_options = self.options.for_watch(&last_rv);
        watch_options.timeout = Some(self.config.watch_timeout);
        watch_options.allow_bookmarks = self.config.allow_bookmarks;

        let mut stream = tokio::select! {
            _ = token.cancelled() => return Ok(WatchOutcome::Cancelled),
            res = self.lister_watcher.watch(&watch_options) => res?,
        };

        loop {
            let next = tokio::select! {
                _ = token.cancelled() => return Ok(WatchOutcome::Cancelled),
                next = stream.next() => next,
            };

            let event = match next {
                None => return Ok(WatchOutcome::Closed),
                Some(Err(e)) => return Err(e),
                Some(Ok(event)) => event,
            };

            if let WatchEvent::Error(status) = &event {
                return Err(if status.is_expired() {
                    Error::Expired(status.message.clone())
                } else {
                    Error::Api {
                        code: status.code,
                        message: status.message.clone(),
                    }
                });
            }

            if let Some(rv) = event.resource_version() {
                if is_stale(&rv, &last_rv) {
                    trace!(
                        informer = %self.name,
                        resource_version = %rv,
                        last = %last_rv,
                        "Skipping already delivered {} event",
                        event.type_name()
                    );
                    continue;
                }
                last_rv = rv;
            }

            let delta = match event {
                WatchEvent::Added(obj) | WatchEvent::Modified(obj) => Delta::Upsert(obj),
                WatchEvent::Deleted(obj) => Delta::Delete(obj),
                WatchEvent::Bookmark { resource_version } => Delta::Progress(resource_version),
                WatchEvent::Error(_) => continue,
            };
            self.send(delta)?;
        }
    }
}
