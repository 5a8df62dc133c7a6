#[cfg(test)]
mod tests {
    use crate::backoff::*;
    use std::time::Duration;

    fn no_jitter() -> BackoffConfig {
        BackoffConfig {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1000),
            multiplier: 2.0,
            jitter: 0.0,
        }
    }

    #[test]
    fn test_defaults() {
        let config = BackoffConfig::default();
        assert_eq!(config.initial_delay, Duration::from_millis(800));
        assert_eq!(config.max_delay, Duration::from_secs(30));
        assert_eq!(config.multiplier, 2.0);
        assert_eq!(config.jitter, 0.5);
    }

    #[test]
    fn test_exponential_growth_is_capped() {
        let mut backoff = Backoff::new(no_jitter());
        let delays: Vec<u128> = (0..6).map(|_| backoff.next_delay().as_millis()).collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1000, 1000]);
        assert_eq!(backoff.attempts(), 6);
    }

    #[test]
    fn test_reset() {
        let mut backoff = Backoff::new(no_jitter());
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.attempts(), 0);
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let mut backoff = Backoff::new(BackoffConfig {
            jitter: 0.5,
            ..no_jitter()
        });
        for _ in 0..50 {
            backoff.reset();
            let delay = backoff.next_delay();
            assert!(delay >= Duration::from_millis(50), "{:?}", delay);
            assert!(delay <= Duration::from_millis(150), "{:?}", delay);
        }
    }

    #[test]
    fn test_jitter_never_exceeds_max() {
        let mut backoff = Backoff::new(BackoffConfig {
            jitter: 1.0,
            ..no_jitter()
        });
        for _ in 0..50 {
            assert!(backoff.next_delay() <= Duration::from_millis(1000));
        }
    }

    #[test]
    fn test_validate() {
        assert!(BackoffConfig::default().validate().is_ok());
        for config in [
            BackoffConfig { multiplier: -1.0, ..no_jitter() },
            BackoffConfig { multiplier: 0.5, ..no_jitter() },
            BackoffConfig { multiplier: f64::NAN, ..no_jitter() },
            BackoffConfig { jitter: 1.5, ..no_jitter() },
            BackoffConfig {
                initial_delay: Duration::from_secs(2),
                ..no_jitter()
            },
        ] {
            assert!(
                matches!(config.validate(), Err(crate::Error::Config(_))),
                "{:?}",
                config
            );
        }
    }

    #[test]
    fn test_unvalidated_multiplier_never_shrinks_delay() {
        let mut backoff = Backoff::new(BackoffConfig {
            multiplier: -1.0,
            ..no_jitter()
        });
        let delays: Vec<u128> = (0..3).map(|_| backoff.next_delay().as_millis()).collect();
        assert_eq!(delays, vec![100, 100, 100]);
    }

    #[test]
    fn test_huge_max_delay_does_not_overflow() {
        let mut backoff = Backoff::new(BackoffConfig {
            initial_delay: Duration::from_secs(u64::MAX / 2),
            max_delay: Duration::MAX,
            multiplier: 4.0,
            jitter: 0.0,
        });
        backoff.next_delay();
        assert_eq!(backoff.next_delay(), Duration::MAX);
    }
}
