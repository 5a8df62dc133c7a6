//! Watch events

use kube::core::{ErrorResponse, WatchEvent as KubeWatchEvent};
use kube::{Resource, ResourceExt};
use std::fmt;

/// Status attached to a watch `ERROR` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchStatus {
    pub code: u16,
    pub reason: String,
    pub message: String,
}

impl WatchStatus {
    pub fn expired(message: impl Into<String>) -> Self {
        Self {
            code: 410,
            reason: "Expired".to_string(),
            message: message.into(),
        }
    }

    /// The requested resource version is older than the server's history.
    pub fn is_expired(&self) -> bool {
        self.code == 410 || self.reason == "Expired" || self.reason == "Gone"
    }
}

impl fmt::Display for WatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.code, self.reason, self.message)
    }
}

impl From<ErrorResponse> for WatchStatus {
    fn from(resp: ErrorResponse) -> Self {
        Self {
            code: resp.code,
            reason: resp.reason,
            message: resp.message,
        }
    }
}

/// One entry of a watch stream.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent<K> {
    Added(K),
    Modified(K),
    Deleted(K),
    /// Progress marker: everything up to this version has been delivered.
    Bookmark { resource_version: String },
    Error(WatchStatus),
}

impl<K: Resource> WatchEvent<K> {
    pub fn object(&self) -> Option<&K> {
        match self {
            WatchEvent::Added(obj) | WatchEvent::Modified(obj) | WatchEvent::Deleted(obj) => {
                Some(obj)
            }
            WatchEvent::Bookmark { .. } | WatchEvent::Error(_) => None,
        }
    }

    /// The resource version this event corresponds to, if it carries one.
    pub fn resource_version(&self) -> Option<String> {
        match self {
            WatchEvent::Bookmark { resource_version } => Some(resource_version.clone()),
            WatchEvent::Error(_) => None,
            _ => self.object().and_then(|obj| obj.resource_version()),
        }
    }

    /// Wire name of the event type.
    pub fn type_name(&self) -> &'static str {
        match self {
            WatchEvent::Added(_) => "ADDED",
            WatchEvent::Modified(_) => "MODIFIED",
            WatchEvent::Deleted(_) => "DELETED",
            WatchEvent::Bookmark { .. } => "BOOKMARK",
            WatchEvent::Error(_) => "ERROR",
        }
    }
}

impl<K> From<KubeWatchEvent<K>> for WatchEvent<K> {
    fn from(event: KubeWatchEvent<K>) -> Self {
        match event {
            KubeWatchEvent::Added(obj) => WatchEvent::Added(obj),
            KubeWatchEvent::Modified(obj) => WatchEvent::Modified(obj),
            KubeWatchEvent::Deleted(obj) => WatchEvent::Deleted(obj),
            KubeWatchEvent::Bookmark(bookmark) => WatchEvent::Bookmark {
                resource_version: bookmark.metadata.resource_version,
            },
            KubeWatchEvent::Error(resp) => WatchEvent::Error(resp.into()),
        }
    }
}
