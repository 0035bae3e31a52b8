#[cfg(test)]
mod tests {
    use crate::engines::circuit_breaker::{CircuitBreakerRegistry, CircuitConfig, Status};
    use crate::utils::clock::ManualClock;
    use std::sync::Arc;
    use std::time::Duration;

    const TARGET: &str = "hooks.example.com:443";

    fn registry() -> (CircuitBreakerRegistry, ManualClock) {
        let clock = ManualClock::default();
        let config = CircuitConfig {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
            failure_window: Duration::from_secs(60),
            idle_eviction: Duration::from_secs(600),
        };
        (
            CircuitBreakerRegistry::new(config, Arc::new(clock.clone())),
            clock,
        )
    }

    fn fail_times(registry: &CircuitBreakerRegistry, n: usize) {
        for _ in 0..n {
            registry.try_acquire(TARGET).unwrap().record_failure();
        }
    }

    #[test]
    fn test_opens_after_threshold_and_recovers_through_single_trial() {
        let (registry, clock) = registry();

        fail_times(&registry, 4);
        assert_eq!(registry.snapshot(TARGET).unwrap().status, Status::Closed);
        fail_times(&registry, 1);
        assert_eq!(registry.snapshot(TARGET).unwrap().status, Status::Open);

        clock.advance(Duration::from_secs(29));
        let rejected = registry.try_acquire(TARGET).err().unwrap();
        assert_eq!(rejected.retry_after, Duration::from_secs(1));

        clock.advance(Duration::from_secs(1));
        let trial = registry.try_acquire(TARGET).unwrap();
        assert!(trial.is_trial());
        // 半开期间只允许一个试探请求
        assert!(registry.try_acquire(TARGET).is_err());

        trial.record_success();
        let snapshot = registry.snapshot(TARGET).unwrap();
        assert_eq!(snapshot.status, Status::Closed);
        assert_eq!(snapshot.consecutive_failures, 0);
        assert!(registry.try_acquire(TARGET).is_ok());
    }

    #[test]
    fn test_failed_trial_restarts_cooldown() {
        let (registry, clock) = registry();
        fail_times(&registry, 5);

        clock.advance(Duration::from_secs(30));
        registry.try_acquire(TARGET).unwrap().record_failure();
        assert_eq!(registry.snapshot(TARGET).unwrap().status, Status::Open);

        clock.advance(Duration::from_secs(10));
        let rejected = registry.try_acquire(TARGET).err().unwrap();
        assert_eq!(rejected.retry_after, Duration::from_secs(20));
    }

    #[test]
    fn test_dropped_trial_permit_frees_slot() {
        let (registry, clock) = registry();
        fail_times(&registry, 5);
        clock.advance(Duration::from_secs(30));

        let trial = registry.try_acquire(TARGET).unwrap();
        drop(trial);

        let again = registry.try_acquire(TARGET).unwrap();
        assert!(again.is_trial());
        assert_eq!(registry.snapshot(TARGET).unwrap().status, Status::HalfOpen);
    }

    #[test]
    fn test_spaced_failures_do_not_accumulate() {
        let (registry, clock) = registry();

        for _ in 0..10 {
            registry.try_acquire(TARGET).unwrap().record_failure();
            clock.advance(Duration::from_secs(61));
        }
        let snapshot = registry.snapshot(TARGET).unwrap();
        assert_eq!(snapshot.status, Status::Closed);
        assert_eq!(snapshot.consecutive_failures, 1);
    }

    #[test]
    fn test_success_resets_consecutive_failures() {
        let (registry, _clock) = registry();
        fail_times(&registry, 4);
        registry.try_acquire(TARGET).unwrap().record_success();
        fail_times(&registry, 4);
        assert_eq!(registry.snapshot(TARGET).unwrap().status, Status::Closed);
    }

    #[test]
    fn test_concurrent_failures_open_exactly_once() {
        let (registry, _clock) = registry();

        std::thread::scope(|scope| {
            for _ in 0..8 {
                let registry = registry.clone();
                scope.spawn(move || {
                    if let Ok(permit) = registry.try_acquire(TARGET) {
                        permit.record_failure();
                    }
                });
            }
        });

        let snapshot = registry.snapshot(TARGET).unwrap();
        assert_eq!(snapshot.status, Status::Open);
        assert_eq!(snapshot.total_failures, snapshot.total_requests);
    }

    #[test]
    fn test_evict_idle_keeps_unhealthy_targets() {
        let (registry, clock) = registry();
        registry.try_acquire("idle:80").unwrap().record_success();
        fail_times(&registry, 5);

        clock.advance(Duration::from_secs(601));
        assert_eq!(registry.evict_idle(), 1);
        assert!(registry.snapshot("idle:80").is_none());
        assert!(registry.snapshot(TARGET).is_some());
    }
}
