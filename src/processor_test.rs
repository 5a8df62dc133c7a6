#[cfg(test)]
mod tests {
    use crate::processor::*;
    use k8s_openapi::api::core::v1::ConfigMap;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn cm(name: &str) -> Arc<ConfigMap> {
        let mut cm = ConfigMap::default();
        cm.metadata.name = Some(name.to_string());
        cm.metadata.namespace = Some("default".to_string());
        Arc::new(cm)
    }

    fn name(obj: &Arc<ConfigMap>) -> String {
        obj.metadata.name.clone().unwrap_or_default()
    }

    /// Handler forwarding "<kind>:<name>" strings to a channel.
    fn recorder() -> (HandlerFuncs<ConfigMap>, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (add, update, delete, sync) = (tx.clone(), tx.clone(), tx.clone(), tx);
        let handler = HandlerFuncs::new()
            .on_add(move |obj| {
                add.send(format!("add:{}", name(obj)))?;
                Ok(())
            })
            .on_update(move |_old, new| {
                update.send(format!("update:{}", name(new)))?;
                Ok(())
            })
            .on_delete(move |obj| {
                delete.send(format!("delete:{}", name(obj)))?;
                Ok(())
            })
            .on_sync(move |obj| {
                sync.send(format!("sync:{}", name(obj)))?;
                Ok(())
            });
        (handler, rx)
    }

    async fn recv(rx: &mut mpsc::UnboundedReceiver<String>) -> String {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for notification")
            .expect("handler channel closed")
    }

    #[tokio::test]
    async fn test_notifications_delivered_in_order() {
        let processor = Processor::<ConfigMap>::new();
        let (handler, mut rx) = recorder();
        processor.add_listener(Arc::new(handler), vec![Notification::Add(cm("seed"))]);

        processor.distribute(&Notification::Add(cm("a")));
        processor.distribute(&Notification::Update {
            old: cm("a"),
            new: cm("a"),
        });
        processor.distribute(&Notification::Sync(cm("a")));
        processor.distribute(&Notification::Delete(cm("a")));

        assert_eq!(recv(&mut rx).await, "add:seed");
        assert_eq!(recv(&mut rx).await, "add:a");
        assert_eq!(recv(&mut rx).await, "update:a");
        assert_eq!(recv(&mut rx).await, "sync:a");
        assert_eq!(recv(&mut rx).await, "delete:a");
    }

    #[tokio::test]
    async fn test_every_listener_gets_every_notification() {
        let processor = Processor::<ConfigMap>::new();
        let (first, mut first_rx) = recorder();
        let (second, mut second_rx) = recorder();
        processor.add_listener(Arc::new(first), vec![]);
        processor.add_listener(Arc::new(second), vec![]);
        assert_eq!(processor.len(), 2);

        processor.distribute(&Notification::Add(cm("a")));
        assert_eq!(recv(&mut first_rx).await, "add:a");
        assert_eq!(recv(&mut second_rx).await, "add:a");
    }

    #[tokio::test]
    async fn test_panicking_handler_does_not_affect_others() {
        let processor = Processor::<ConfigMap>::new();
        let panics = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&panics);
        processor.add_listener(
            Arc::new(HandlerFuncs::<ConfigMap>::new().on_add(move |_| {
                *counter.lock().unwrap() += 1;
                panic!("handler bug");
            })),
            vec![],
        );
        let failing = HandlerFuncs::<ConfigMap>::new().on_add(|_| Err("rejected".into()));
        processor.add_listener(Arc::new(failing), vec![]);
        let (healthy, mut rx) = recorder();
        processor.add_listener(Arc::new(healthy), vec![]);

        processor.distribute(&Notification::Add(cm("a")));
        processor.distribute(&Notification::Add(cm("b")));

        assert_eq!(recv(&mut rx).await, "add:a");
        assert_eq!(recv(&mut rx).await, "add:b");

        // The panicking handler keeps receiving after its first panic.
        tokio::time::timeout(Duration::from_secs(5), async {
            while *panics.lock().unwrap() < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_slow_handler_does_not_block_others() {
        let processor = Processor::<ConfigMap>::new();
        let (gate_tx, gate_rx) = std::sync::mpsc::channel::<()>();
        let gate_rx = Mutex::new(gate_rx);
        processor.add_listener(
            Arc::new(HandlerFuncs::<ConfigMap>::new().on_add(move |_| {
                // Blocks its own delivery task until released.
                let _ = gate_rx.lock().unwrap().recv();
                Ok(())
            })),
            vec![],
        );
        let (fast, mut rx) = recorder();
        processor.add_listener(Arc::new(fast), vec![]);

        processor.distribute(&Notification::Add(cm("a")));
        assert_eq!(recv(&mut rx).await, "add:a");
        gate_tx.send(()).unwrap();
    }

    #[tokio::test]
    async fn test_remove_listener() {
        let processor = Processor::<ConfigMap>::new();
        let (handler, mut rx) = recorder();
        let registration = processor.add_listener(Arc::new(handler), vec![]);

        processor.distribute(&Notification::Add(cm("before")));
        assert!(processor.remove_listener(&registration));
        assert!(!processor.remove_listener(&registration));
        assert!(processor.is_empty());
        processor.distribute(&Notification::Add(cm("after")));

        assert_eq!(recv(&mut rx).await, "add:before");
        // The queue closes once the listener is gone.
        assert!(tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_registrations_are_unique() {
        let processor = Processor::<ConfigMap>::new();
        let a = processor.add_listener(Arc::new(HandlerFuncs::<ConfigMap>::new()), vec![]);
        let b = processor.add_listener(Arc::new(HandlerFuncs::<ConfigMap>::new()), vec![]);
        assert_ne!(a, b);
        assert_ne!(a.id(), b.id());
        processor.close().await;
        assert!(processor.is_empty());
    }

    #[tokio::test]
    async fn test_close_drains_queued_notifications() {
        let processor = Processor::<ConfigMap>::new();
        let (handler, mut rx) = recorder();
        let registration = processor.add_listener(Arc::new(handler), vec![]);
        processor.distribute(&Notification::Add(cm("a")));
        processor.distribute(&Notification::Delete(cm("a")));

        processor.close().await;
        assert!(!processor.remove_listener(&registration));
        // Nothing reaches a closed processor's former listeners.
        processor.distribute(&Notification::Add(cm("b")));

        assert_eq!(rx.try_recv().unwrap(), "add:a");
        assert_eq!(rx.try_recv().unwrap(), "delete:a");
        assert!(matches!(
            rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn test_listener_waits_for_a_runtime() {
        let processor = Processor::<ConfigMap>::new();
        let (handler, mut rx) = recorder();
        processor.add_listener(Arc::new(handler), vec![Notification::Add(cm("seed"))]);
        processor.distribute(&Notification::Add(cm("a")));
        assert_eq!(processor.len(), 1);
        assert!(rx.try_recv().is_err());

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        processor.start(runtime.handle().clone());
        runtime.block_on(async {
            assert_eq!(recv(&mut rx).await, "add:seed");
            assert_eq!(recv(&mut rx).await, "add:a");
            processor.close().await;
        });
    }

    #[test]
    fn test_notification_accessors() {
        let update = Notification::Update {
            old: cm("old"),
            new: cm("new"),
        };
        assert_eq!(update.kind(), "update");
        assert_eq!(name(update.object()), "new");
        assert_eq!(Notification::Sync(cm("s")).kind(), "sync");
    }
}
