#[cfg(test)]
mod tests {
    use crate::event::*;
    use k8s_openapi::api::core::v1::Pod;
    use kube::core::{ErrorResponse, WatchEvent as KubeWatchEvent};
    use serde_json::json;

    fn pod(name: &str, rv: &str) -> Pod {
        let mut pod = Pod::default();
        pod.metadata.name = Some(name.to_string());
        pod.metadata.namespace = Some("default".to_string());
        pod.metadata.resource_version = Some(rv.to_string());
        pod
    }

    #[test]
    fn test_resource_version_and_type_name() {
        let added = WatchEvent::Added(pod("a", "3"));
        assert_eq!(added.resource_version().as_deref(), Some("3"));
        assert_eq!(added.type_name(), "ADDED");
        assert!(added.object().is_some());

        let bookmark: WatchEvent<Pod> = WatchEvent::Bookmark {
            resource_version: "9".to_string(),
        };
        assert_eq!(bookmark.resource_version().as_deref(), Some("9"));
        assert!(bookmark.object().is_none());

        let error: WatchEvent<Pod> = WatchEvent::Error(WatchStatus::expired("too old"));
        assert_eq!(error.resource_version(), None);
        assert_eq!(error.type_name(), "ERROR");
    }

    #[test]
    fn test_expired_status() {
        let status = WatchStatus::expired("too old resource version");
        assert!(status.is_expired());
        assert_eq!(status.to_string(), "410 Expired: too old resource version");

        let gone = WatchStatus {
            code: 500,
            reason: "Gone".to_string(),
            message: String::new(),
        };
        assert!(gone.is_expired());

        let internal = WatchStatus {
            code: 500,
            reason: "InternalError".to_string(),
            message: "boom".to_string(),
        };
        assert!(!internal.is_expired());
    }

    #[test]
    fn test_from_kube_watch_event() {
        let event: WatchEvent<Pod> = KubeWatchEvent::Modified(pod("a", "4")).into();
        assert!(matches!(&event, WatchEvent::Modified(p) if p.metadata.name.as_deref() == Some("a")));

        let event: WatchEvent<Pod> = KubeWatchEvent::Deleted(pod("a", "5")).into();
        assert_eq!(event.type_name(), "DELETED");

        let resp: ErrorResponse = serde_json::from_value(json!({
            "status": "Failure",
            "message": "too old resource version: 1 (5)",
            "reason": "Expired",
            "code": 410
        }))
        .unwrap();
        let event: WatchEvent<Pod> = KubeWatchEvent::Error(resp).into();
        match event {
            WatchEvent::Error(status) => {
                assert!(status.is_expired());
                assert_eq!(status.message, "too old resource version: 1 (5)");
            }
            other => panic!("expected error event, got {}", other.type_name()),
        }
    }

    #[test]
    fn test_from_kube_bookmark() {
        let event: KubeWatchEvent<Pod> = serde_json::from_value(json!({
            "type": "BOOKMARK",
            "object": {
                "apiVersion": "v1",
                "kind": "Pod",
                "metadata": { "resourceVersion": "12" }
            }
        }))
        .unwrap();

        let event: WatchEvent<Pod> = event.into();
        assert_eq!(
            event,
            WatchEvent::Bookmark {
                resource_version: "12".to_string()
            }
        );
    }
}
