//! List and watch request options

use kube::api::{ListParams, WatchParams};
use std::sync::Arc;
use std::time::Duration;

/// The API server rejects watch timeouts at or above 295 seconds.
pub const MAX_WATCH_TIMEOUT_SECS: u64 = 290;

/// Options shared by List and Watch requests.
///
/// The same selectors must be used for both halves of a list/watch cycle,
/// otherwise the watch would report objects the list never returned.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListOptions {
    pub label_selector: Option<String>,
    pub field_selector: Option<String>,
    /// List: minimum resource version to serve. Watch: version to start after.
    pub resource_version: Option<String>,
    pub timeout: Option<Duration>,
    pub watch: bool,
    pub allow_bookmarks: bool,
}

/// Hook applied to every request an informer issues, e.g. to add selectors.
pub type TweakListOptions = Arc<dyn Fn(&mut ListOptions) + Send + Sync>;

impl ListOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn labels(mut self, selector: impl Into<String>) -> Self {
        self.label_selector = Some(selector.into());
        self
    }

    pub fn fields(mut self, selector: impl Into<String>) -> Self {
        self.field_selector = Some(selector.into());
        self
    }

    pub fn at(mut self, resource_version: impl Into<String>) -> Self {
        self.resource_version = Some(resource_version.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Derive the options for the watch that follows a list returning
    /// `resource_version`.
    pub fn for_watch(&self, resource_version: &str) -> Self {
        Self {
            resource_version: Some(resource_version.to_string()),
            watch: true,
            ..self.clone()
        }
    }

    pub fn to_list_params(&self) -> ListParams {
        let mut params = ListParams::default();
        params.label_selector = self.label_selector.clone();
        params.field_selector = self.field_selector.clone();
        params.resource_version = self.resource_version.clone();
        params.timeout = self.timeout.map(|t| t.as_secs() as u32);
        params
    }

    pub fn to_watch_params(&self) -> WatchParams {
        let mut params = WatchParams::default();
        params.label_selector = self.label_selector.clone();
        params.field_selector = self.field_selector.clone();
        params.bookmarks = self.allow_bookmarks;
        params.timeout = self
            .timeout
            .map(|t| t.as_secs().clamp(1, MAX_WATCH_TIMEOUT_SECS) as u32);
        params
    }

    /// Parse a request query string. Unknown parameters are ignored.
    pub fn from_query(query: &str) -> Self {
        let mut options = Self::default();
        for pair in query.split('&') {
            let Some((key, value)) = pair.split_once('=') else {
                continue;
            };
            // Form encoding turns spaces into '+'.
            let value = value.replace('+', " ");
            let value = urlencoding::decode(&value)
                .map(|v| v.into_owned())
                .unwrap_or(value.clone());

            match key {
                "labelSelector" => options.label_selector = Some(value),
                "fieldSelector" => options.field_selector = Some(value),
                "resourceVersion" => options.resource_version = Some(value),
                "timeoutSeconds" => {
                    if let Ok(secs) = value.parse::<u64>() {
                        options.timeout = Some(Duration::from_secs(secs));
                    }
                }
                "watch" => options.watch = value == "true" || value == "1",
                "allowWatchBookmarks" => options.allow_bookmarks = value == "true",
                _ => {}
            }
        }
        options
    }

    /// Render the options as the query string the API server expects.
    pub fn to_query(&self) -> String {
        let mut pairs: Vec<(&str, String)> = Vec::new();
        if let Some(labels) = &self.label_selector {
            pairs.push(("labelSelector", labels.clone()));
        }
        if let Some(fields) = &self.field_selector {
            pairs.push(("fieldSelector", fields.clone()));
        }
        if let Some(rv) = &self.resource_version {
            pairs.push(("resourceVersion", rv.clone()));
        }
        if let Some(timeout) = self.timeout {
            pairs.push(("timeoutSeconds", timeout.as_secs().to_string()));
        }
        if self.watch {
            pairs.push(("watch", "true".to_string()));
            if self.allow_bookmarks {
                pairs.push(("allowWatchBookmarks", "true".to_string()));
            }
        }

        pairs
            .into_iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(&v)))
            .collect::<Vec<_>>()
            .join("&")
    }
}
