#[cfg(test)]
mod tests {
    use crate::client::ResourceClient;
    use crate::event::WatchEvent;
    use crate::list_watch::EventStream;
    use crate::memory::MemoryListWatch;
    use crate::mock_service::*;
    use crate::options::ListOptions;
    use crate::Error;
    use futures::StreamExt;
    use k8s_openapi::api::apps::v1::Deployment;
    use k8s_openapi::api::core::v1::Pod;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::time::Duration;

    fn create_test_pod(name: &str, namespace: &str, app: &str) -> Pod {
        let mut pod = Pod::default();
        pod.metadata.name = Some(name.to_string());
        pod.metadata.namespace = Some(namespace.to_string());
        pod.metadata.labels = Some(BTreeMap::from([("app".to_string(), app.to_string())]));
        pod
    }

    fn names(pods: &[Pod]) -> Vec<&str> {
        pods.iter()
            .filter_map(|p| p.metadata.name.as_deref())
            .collect()
    }

    async fn next_event(stream: &mut EventStream<Pod>) -> WatchEvent<Pod> {
        tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .expect("timed out waiting for watch event")
            .expect("watch ended")
            .unwrap()
    }

    fn seeded() -> Arc<MemoryListWatch<Pod>> {
        let source = Arc::new(MemoryListWatch::<Pod>::new());
        source.create(create_test_pod("web-0", "default", "web")).unwrap();
        source.create(create_test_pod("api-0", "default", "api")).unwrap();
        source.create(create_test_pod("web-1", "staging", "web")).unwrap();
        source
    }

    #[tokio::test]
    async fn test_list_through_kube_client() {
        let source = seeded();
        let pods = ResourceClient::<Pod>::all(client(Arc::clone(&source)));

        let list = pods.list(&ListOptions::default()).await.unwrap();
        assert_eq!(names(&list.items), vec!["api-0", "web-0", "web-1"]);
        assert_eq!(list.resource_version, source.resource_version());
        assert_eq!(source.list_calls(), 1);
    }

    #[tokio::test]
    async fn test_selectors_survive_query_encoding() {
        let source = seeded();
        let pods = ResourceClient::<Pod>::all(client(source));

        let list = pods
            .list(&ListOptions::default().labels("app in (web, db)"))
            .await
            .unwrap();
        assert_eq!(names(&list.items), vec!["web-0", "web-1"]);

        let list = pods
            .list(&ListOptions::default().fields("metadata.name!=web-0"))
            .await
            .unwrap();
        assert_eq!(names(&list.items), vec!["api-0", "web-1"]);
    }

    #[tokio::test]
    async fn test_namespaced_client_only_sees_its_namespace() {
        let source = seeded();
        let pods = ResourceClient::<Pod>::namespaced(client(source), "staging");

        let list = pods.list(&ListOptions::default()).await.unwrap();
        assert_eq!(names(&list.items), vec!["web-1"]);
    }

    #[tokio::test]
    async fn test_watch_streams_live_changes() {
        let source = seeded();
        let pods = ResourceClient::<Pod>::all(client(Arc::clone(&source)));
        let list = pods.list(&ListOptions::default()).await.unwrap();

        let mut options = ListOptions::default().for_watch(&list.resource_version);
        options.allow_bookmarks = true;
        let mut events = pods.watch(&options).await.unwrap();

        let created = source.create(create_test_pod("db-0", "default", "db")).unwrap();
        source.delete(Some("default"), "api-0").unwrap();
        source.bookmark();

        match next_event(&mut events).await {
            WatchEvent::Added(pod) => {
                assert_eq!(pod.metadata.name.as_deref(), Some("db-0"));
                assert_eq!(pod.metadata.uid, created.metadata.uid);
            }
            other => panic!("expected ADDED, got {}", other.type_name()),
        }
        match next_event(&mut events).await {
            WatchEvent::Deleted(pod) => assert_eq!(pod.metadata.name.as_deref(), Some("api-0")),
            other => panic!("expected DELETED, got {}", other.type_name()),
        }
        match next_event(&mut events).await {
            WatchEvent::Bookmark { resource_version } => {
                assert_eq!(resource_version, source.resource_version())
            }
            other => panic!("expected BOOKMARK, got {}", other.type_name()),
        }
    }

    #[tokio::test]
    async fn test_watch_replays_from_resource_version() {
        let source = Arc::new(MemoryListWatch::<Pod>::new());
        let first = source.create(create_test_pod("a", "default", "web")).unwrap();
        source.create(create_test_pod("b", "default", "web")).unwrap();

        let pods = ResourceClient::<Pod>::all(client(source));
        let from = first.metadata.resource_version.unwrap();
        let mut events = pods
            .watch(&ListOptions::default().for_watch(&from))
            .await
            .unwrap();

        match next_event(&mut events).await {
            WatchEvent::Added(pod) => assert_eq!(pod.metadata.name.as_deref(), Some("b")),
            other => panic!("expected ADDED b, got {}", other.type_name()),
        }
    }

    #[tokio::test]
    async fn test_compacted_watch_reports_expired() {
        let source = Arc::new(MemoryListWatch::<Pod>::new().with_history_limit(1));
        for name in ["a", "b", "c"] {
            source.create(create_test_pod(name, "default", "web")).unwrap();
        }

        let pods = ResourceClient::<Pod>::all(client(source));
        let mut events = pods
            .watch(&ListOptions::default().for_watch("1"))
            .await
            .unwrap();

        match next_event(&mut events).await {
            WatchEvent::Error(status) => {
                assert!(status.is_expired());
                assert_eq!(status.code, 410);
            }
            other => panic!("expected ERROR, got {}", other.type_name()),
        }
    }

    #[tokio::test]
    async fn test_single_object_requests_are_rejected() {
        let pods = ResourceClient::<Pod>::namespaced(client(seeded()), "default");

        let err = pods.api().get("web-0").await.unwrap_err();
        match crate::client::map_kube_error::<Pod>(err) {
            Error::Api { code, .. } => assert_eq!(code, 405),
            other => panic!("expected 405, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_grouped_resources_are_served() {
        let source = Arc::new(MemoryListWatch::<Deployment>::new());
        let mut deploy = Deployment::default();
        deploy.metadata.name = Some("frontend".to_string());
        deploy.metadata.namespace = Some("default".to_string());
        source.create(deploy).unwrap();

        let deployments = ResourceClient::<Deployment>::namespaced(client(source), "default");
        let list = deployments.list(&ListOptions::default()).await.unwrap();
        assert_eq!(list.items.len(), 1);
        assert_eq!(list.items[0].metadata.name.as_deref(), Some("frontend"));
    }
}
