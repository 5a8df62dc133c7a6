#[cfg(test)]
mod tests {
    use crate::backoff::BackoffConfig;
    use crate::config::*;
    use crate::Error;
    use std::time::Duration;

    #[test]
    fn test_defaults() {
        let config = InformerConfig::default();
        assert_eq!(config.resync_period, Duration::from_secs(300));
        assert_eq!(config.list_timeout, Duration::from_secs(60));
        assert_eq!(config.watch_timeout, Duration::from_secs(290));
        assert_eq!(config.backoff, BackoffConfig::default());
        assert!(config.allow_bookmarks);
    }

    #[test]
    fn test_builders() {
        let config = InformerConfig::new()
            .without_resync()
            .with_list_timeout(Duration::from_secs(5))
            .with_watch_timeout(Duration::from_secs(30))
            .with_bookmarks(false);

        assert!(config.resync_period.is_zero());
        assert_eq!(config.list_timeout, Duration::from_secs(5));
        assert_eq!(config.watch_timeout, Duration::from_secs(30));
        assert!(!config.allow_bookmarks);
    }

    #[test]
    fn test_from_yaml() {
        let config = InformerConfig::from_yaml_str(
            r#"
resyncPeriod: 0
listTimeout: 12.5
allowBookmarks: false
backoff:
  initialDelay: 0.25
  multiplier: 3
"#,
        )
        .unwrap();

        assert!(config.resync_period.is_zero());
        assert_eq!(config.list_timeout, Duration::from_millis(12_500));
        // Unset keys keep their defaults.
        assert_eq!(config.watch_timeout, Duration::from_secs(290));
        assert!(!config.allow_bookmarks);
        assert_eq!(config.backoff.initial_delay, Duration::from_millis(250));
        assert_eq!(config.backoff.multiplier, 3.0);
        assert_eq!(config.backoff.max_delay, Duration::from_secs(30));
    }

    #[test]
    fn test_empty_yaml_is_default() {
        let config = InformerConfig::from_yaml_str("{}").unwrap();
        assert_eq!(config, InformerConfig::default());
    }

    #[test]
    fn test_invalid_yaml() {
        assert!(matches!(
            InformerConfig::from_yaml_str("resyncPeriod: soon"),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            InformerConfig::from_yaml_str("listTimeout: -1"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_rejects_invalid_backoff() {
        for yaml in [
            "backoff:\n  multiplier: -1\n",
            "backoff:\n  multiplier: 0.5\n",
            "backoff:\n  jitter: 2\n",
            "backoff:\n  initialDelay: 60\n  maxDelay: 10\n",
        ] {
            assert!(
                matches!(InformerConfig::from_yaml_str(yaml), Err(Error::Config(_))),
                "{}",
                yaml
            );
        }
    }
}
