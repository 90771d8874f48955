use crate::config::BreakerSettings;
use crate::errors::GatewayError;
use crate::metrics_defs::{BREAKER_FALLBACK, BREAKER_OPENED, BREAKER_SHORT_CIRCUIT};
use shared::counter;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::time::{Duration, Instant, timeout};

/// Observable breaker state, one instance per named downstream operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

enum State {
    Closed { failure_count: u32 },
    Open { until: Instant },
    HalfOpen { probe_in_flight: bool },
}

enum Admission {
    /// Call may proceed; `probe` marks the single half-open probe.
    Allow { probe: bool },
    /// Breaker is open or a probe is already in flight.
    Reject,
}

struct Breaker {
    state: Mutex<State>,
}

impl Breaker {
    fn new() -> Self {
        Breaker {
            state: Mutex::new(State::Closed { failure_count: 0 }),
        }
    }

    fn admit(&self) -> Admission {
        let mut state = self.state.lock().expect("breaker poisoned");
        match &mut *state {
            State::Closed { .. } => Admission::Allow { probe: false },
            State::Open { until } => {
                if Instant::now() < *until {
                    Admission::Reject
                } else {
                    // Cooldown elapsed; this caller becomes the probe
                    *state = State::HalfOpen {
                        probe_in_flight: true,
                    };
                    Admission::Allow { probe: true }
                }
            }
            State::HalfOpen { probe_in_flight } => {
                if *probe_in_flight {
                    Admission::Reject
                } else {
                    *probe_in_flight = true;
                    Admission::Allow { probe: true }
                }
            }
        }
    }

    fn on_success(&self, probe: bool) {
        let mut state = self.state.lock().expect("breaker poisoned");
        match &mut *state {
            State::Closed { failure_count } if !probe => *failure_count = 0,
            State::HalfOpen { .. } if probe => *state = State::Closed { failure_count: 0 },
            // A stale call completed after the state already moved on
            _ => {}
        }
    }

    fn on_failure(&self, probe: bool, settings: &BreakerSettings) -> bool {
        let mut state = self.state.lock().expect("breaker poisoned");
        let open_until = Instant::now() + Duration::from_millis(settings.cooldown_ms);
        match &mut *state {
            State::Closed { failure_count } if !probe => {
                *failure_count += 1;
                if *failure_count >= settings.failure_threshold {
                    *state = State::Open { until: open_until };
                    return true;
                }
            }
            State::HalfOpen { .. } if probe => {
                *state = State::Open { until: open_until };
                return true;
            }
            _ => {}
        }
        false
    }

    fn current(&self) -> CircuitState {
        match &*self.state.lock().expect("breaker poisoned") {
            State::Closed { .. } => CircuitState::Closed,
            State::Open { .. } => CircuitState::Open,
            State::HalfOpen { .. } => CircuitState::HalfOpen,
        }
    }
}

/// Circuit breaker registry keyed by operation name.
///
/// `execute` never fails: the caller always receives either the
/// primary's value or the fallback. Any error or a primary exceeding
/// the call timeout counts as a failure; past the threshold the
/// breaker opens and callers get the fallback without touching the
/// downstream until the cooldown elapses, at which point a single
/// probe call is let through.
///
/// The per-entry lock guards only state transitions; multiple
/// closed-state primaries for the same operation may be in flight
/// concurrently. A timed-out primary is abandoned rather than
/// cancelled, so a slow call may still complete with its result
/// discarded.
pub struct CircuitBreakers {
    settings: BreakerSettings,
    entries: Mutex<HashMap<String, Arc<Breaker>>>,
}

impl CircuitBreakers {
    pub fn new(settings: BreakerSettings) -> Self {
        CircuitBreakers {
            settings,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn entry(&self, name: &str) -> Arc<Breaker> {
        let mut entries = self.entries.lock().expect("breaker map poisoned");
        entries
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Breaker::new()))
            .clone()
    }

    /// Runs `primary` under the named breaker, substituting `fallback`
    /// on error, timeout, or an open circuit.
    pub async fn execute<T, F>(&self, name: &str, primary: F, fallback: T) -> T
    where
        F: Future<Output = Result<T, GatewayError>>,
    {
        let breaker = self.entry(name);

        let probe = match breaker.admit() {
            Admission::Allow { probe } => probe,
            Admission::Reject => {
                counter!(BREAKER_SHORT_CIRCUIT).increment(1);
                tracing::debug!(operation = name, "circuit open, returning fallback");
                return fallback;
            }
        };

        let call_timeout = Duration::from_millis(self.settings.call_timeout_ms);
        match timeout(call_timeout, primary).await {
            Ok(Ok(value)) => {
                breaker.on_success(probe);
                value
            }
            Ok(Err(e)) => {
                tracing::warn!(operation = name, error = %e, "primary call failed");
                self.record_failure(name, &breaker, probe);
                fallback
            }
            Err(_elapsed) => {
                tracing::warn!(operation = name, "primary call timed out");
                self.record_failure(name, &breaker, probe);
                fallback
            }
        }
    }

    fn record_failure(&self, name: &str, breaker: &Breaker, probe: bool) {
        counter!(BREAKER_FALLBACK).increment(1);
        if breaker.on_failure(probe, &self.settings) {
            counter!(BREAKER_OPENED).increment(1);
            tracing::warn!(operation = name, "circuit opened");
        }
    }

    /// Current state of a named breaker, if it has been used.
    pub fn state(&self, name: &str) -> Option<CircuitState> {
        let entries = self.entries.lock().expect("breaker map poisoned");
        entries.get(name).map(|b| b.current())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::oneshot;
    use tokio::task::yield_now;
    use tokio::time::advance;

    fn settings(threshold: u32) -> BreakerSettings {
        BreakerSettings {
            failure_threshold: threshold,
            cooldown_ms: 10_000,
            call_timeout_ms: 1_000,
        }
    }

    async fn fail_once(breakers: &CircuitBreakers, calls: &Arc<AtomicUsize>) {
        let calls = calls.clone();
        let result = breakers
            .execute(
                "op",
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<&str, _>(GatewayError::InternalError("boom".into()))
                },
                "fallback",
            )
            .await;
        assert_eq!(result, "fallback");
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_threshold_failures() {
        let breakers = CircuitBreakers::new(settings(3));
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            fail_once(&breakers, &calls).await;
        }
        assert_eq!(breakers.state("op"), Some(CircuitState::Open));
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        // While open the primary is never invoked
        fail_once(&breakers, &calls).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_failure_count() {
        let breakers = CircuitBreakers::new(settings(3));
        let calls = Arc::new(AtomicUsize::new(0));

        fail_once(&breakers, &calls).await;
        fail_once(&breakers, &calls).await;

        let ok = breakers
            .execute("op", async { Ok::<_, GatewayError>("value") }, "fallback")
            .await;
        assert_eq!(ok, "value");

        // The two earlier failures no longer count toward the threshold
        fail_once(&breakers, &calls).await;
        fail_once(&breakers, &calls).await;
        assert_eq!(breakers.state("op"), Some(CircuitState::Closed));

        fail_once(&breakers, &calls).await;
        assert_eq!(breakers.state("op"), Some(CircuitState::Open));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_counts_as_failure() {
        let breakers = CircuitBreakers::new(settings(1));

        let result = breakers
            .execute(
                "op",
                async {
                    std::future::pending::<()>().await;
                    Ok::<_, GatewayError>("never")
                },
                "fallback",
            )
            .await;

        assert_eq!(result, "fallback");
        assert_eq!(breakers.state("op"), Some(CircuitState::Open));
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_allows_single_probe() {
        let breakers = Arc::new(CircuitBreakers::new(settings(1)));
        let calls = Arc::new(AtomicUsize::new(0));

        fail_once(&breakers, &calls).await;
        assert_eq!(breakers.state("op"), Some(CircuitState::Open));

        advance(Duration::from_millis(10_000)).await;

        // First caller after the cooldown becomes the probe; hold its
        // primary open on a oneshot so a second caller overlaps it.
        let (tx, rx) = oneshot::channel::<()>();
        let probe_calls = calls.clone();
        let probe_breakers = breakers.clone();
        let probe = tokio::spawn(async move {
            probe_breakers
                .execute(
                    "op",
                    async move {
                        probe_calls.fetch_add(1, Ordering::SeqCst);
                        let _ = rx.await;
                        Ok::<_, GatewayError>("probe-ok")
                    },
                    "fallback",
                )
                .await
        });

        for _ in 0..5 {
            yield_now().await;
        }
        assert_eq!(breakers.state("op"), Some(CircuitState::HalfOpen));

        // Concurrent caller during the probe gets the fallback and does
        // not invoke its primary.
        let concurrent_calls = calls.clone();
        let result = breakers
            .execute(
                "op",
                async move {
                    concurrent_calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, GatewayError>("second")
                },
                "fallback",
            )
            .await;
        assert_eq!(result, "fallback");
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        tx.send(()).unwrap();
        assert_eq!(probe.await.unwrap(), "probe-ok");
        assert_eq!(breakers.state("op"), Some(CircuitState::Closed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_failure_reopens() {
        let breakers = CircuitBreakers::new(settings(1));
        let calls = Arc::new(AtomicUsize::new(0));

        fail_once(&breakers, &calls).await;
        advance(Duration::from_millis(10_000)).await;

        // Probe fails, so the breaker opens again with a fresh cooldown
        fail_once(&breakers, &calls).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(breakers.state("op"), Some(CircuitState::Open));

        fail_once(&breakers, &calls).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_breakers_are_independent() {
        let breakers = CircuitBreakers::new(settings(1));
        let calls = Arc::new(AtomicUsize::new(0));

        fail_once(&breakers, &calls).await;
        assert_eq!(breakers.state("op"), Some(CircuitState::Open));

        let other = breakers
            .execute("other", async { Ok::<_, GatewayError>("ok") }, "fallback")
            .await;
        assert_eq!(other, "ok");
        assert_eq!(breakers.state("other"), Some(CircuitState::Closed));
    }
}
