//! Fixed-window rate limiter keyed by client identifier.
//!
//! Owned by `AppState` and shared as `Arc<RateLimiter>`; the clock is
//! injected so tests can move time by hand. Expired windows are evicted by a
//! background sweeper rather than on the request path.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tracing::debug;

pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed { remaining: u32 },
    Limited { retry_after: Duration },
}

impl RateDecision {
    /// Whole seconds to wait, rounded up and never zero.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            RateDecision::Allowed { .. } => None,
            RateDecision::Limited { retry_after } => {
                let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
                Some(secs.max(1))
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

pub struct RateLimiter {
    window: Duration,
    max_requests: u32,
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<String, Window>>,
}

impl RateLimiter {
    pub fn new(window: Duration, max_requests: u32) -> Self {
        Self::with_clock(window, max_requests, Arc::new(SystemClock))
    }

    pub fn with_clock(window: Duration, max_requests: u32, clock: Arc<dyn Clock>) -> Self {
        Self {
            window,
            max_requests,
            clock,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Counts one request for `key`. Increment-or-reset happens under one lock.
    pub fn check(&self, key: &str) -> RateDecision {
        let now = self.clock.now();
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());

        let window = entries.entry(key.to_string()).or_insert(Window {
            started: now,
            count: 0,
        });
        if now.duration_since(window.started) >= self.window {
            *window = Window {
                started: now,
                count: 0,
            };
        }

        if window.count >= self.max_requests {
            let retry_after = self.window.saturating_sub(now.duration_since(window.started));
            return RateDecision::Limited { retry_after };
        }
        window.count += 1;
        RateDecision::Allowed {
            remaining: self.max_requests - window.count,
        }
    }

    /// Drops every expired window; returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let before = entries.len();
        entries.retain(|_, w| now.duration_since(w.started) < self.window);
        before - entries.len()
    }

    pub fn tracked_clients(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Runs [`sweep`](Self::sweep) every `interval` until the handle is aborted.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let limiter = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // first tick is immediate
            loop {
                ticker.tick().await;
                let evicted = limiter.sweep();
                if evicted > 0 {
                    debug!(evicted, remaining = limiter.tracked_clients(), "Swept rate-limit windows");
                }
            }
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Clock that only moves when told to.
    pub struct ManualClock {
        base: Instant,
        offset: Mutex<Duration>,
    }

    impl ManualClock {
        pub fn new() -> Self {
            Self {
                base: Instant::now(),
                offset: Mutex::new(Duration::ZERO),
            }
        }

        pub fn advance(&self, by: Duration) {
            *self.offset.lock().unwrap() += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            self.base + *self.offset.lock().unwrap()
        }
    }

    fn limiter() -> (Arc<ManualClock>, RateLimiter) {
        let clock = Arc::new(ManualClock::new());
        let limiter = RateLimiter::with_clock(Duration::from_secs(60), 10, clock.clone());
        (clock, limiter)
    }

    #[test]
    fn test_eleventh_request_is_limited() {
        let (clock, limiter) = limiter();
        for i in 0..10 {
            assert_eq!(limiter.check("1.2.3.4"), RateDecision::Allowed { remaining: 9 - i });
            clock.advance(Duration::from_secs(1));
        }
        let decision = limiter.check("1.2.3.4");
        assert_eq!(
            decision,
            RateDecision::Limited {
                retry_after: Duration::from_secs(50)
            }
        );
        assert_eq!(decision.retry_after_secs(), Some(50));
    }

    #[test]
    fn test_fresh_window_succeeds() {
        let (clock, limiter) = limiter();
        for _ in 0..11 {
            limiter.check("client");
        }
        clock.advance(Duration::from_secs(60));
        assert_eq!(limiter.check("client"), RateDecision::Allowed { remaining: 9 });
    }

    #[test]
    fn test_clients_are_independent() {
        let (_, limiter) = limiter();
        for _ in 0..10 {
            limiter.check("a");
        }
        assert!(matches!(limiter.check("a"), RateDecision::Limited { .. }));
        assert!(matches!(limiter.check("b"), RateDecision::Allowed { .. }));
    }

    #[test]
    fn test_sweep_evicts_expired_windows() {
        let (clock, limiter) = limiter();
        limiter.check("old");
        clock.advance(Duration::from_secs(30));
        limiter.check("new");
        clock.advance(Duration::from_secs(31));
        assert_eq!(limiter.sweep(), 1);
        assert_eq!(limiter.tracked_clients(), 1);
    }

    #[test]
    fn test_retry_after_rounds_up() {
        let d = RateDecision::Limited {
            retry_after: Duration::from_millis(1),
        };
        assert_eq!(d.retry_after_secs(), Some(1));
        assert_eq!(RateDecision::Allowed { remaining: 3 }.retry_after_secs(), None);
    }

    #[test]
    fn test_concurrent_checks_never_exceed_ceiling() {
        let limiter = Arc::new(RateLimiter::new(Duration::from_secs(60), 10));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                std::thread::spawn(move || {
                    (0..5)
                        .filter(|_| matches!(limiter.check("shared"), RateDecision::Allowed { .. }))
                        .count()
                })
            })
            .collect();
        let allowed: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(allowed, 10);
    }
}
