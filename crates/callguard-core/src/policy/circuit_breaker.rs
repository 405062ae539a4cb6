//! Three-state circuit breaker: Closed → Open → Half-Open.
//!
//! State transitions:
//! - `Closed` → `Open`:      `requests >= min_request_threshold` and the failure
//!   ratio reaches `failure_ratio_threshold`
//! - `Open` → `Half-Open`:   `open_timeout` has elapsed
//! - `Half-Open` → `Closed`: `max_probe_requests` probes succeeded
//! - `Half-Open` → `Open`:   any probe failed
//!
//! Every transition starts a new generation. Outcomes are recorded against the
//! generation the call was admitted in; outcomes from an older generation are
//! ignored.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::error::CallError;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation.
    Closed,
    /// All requests rejected. Wait for `open_timeout` before probing.
    Open,
    /// A limited number of probe requests test the remote's health.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Configuration for the circuit breaker.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Name used in logs, events and `CircuitOpen` errors.
    pub name: String,
    /// Minimum completed requests in the window before the breaker may trip.
    pub min_request_threshold: u32,
    /// Failure ratio (0.0–1.0] at which the breaker trips.
    pub failure_ratio_threshold: f64,
    /// How long to stay open before transitioning to half-open.
    #[serde(with = "millis", rename = "open_timeout_ms")]
    pub open_timeout: Duration,
    /// Probes admitted in half-open; this many successes close the breaker.
    pub max_probe_requests: u32,
    /// Clear closed-state counts this often. `None` keeps them until a transition.
    #[serde(with = "opt_millis", rename = "window_ms")]
    pub window: Option<Duration>,
    /// Buffered state-change events per subscriber.
    pub event_capacity: usize,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            name: "default".into(),
            min_request_threshold: 5,
            failure_ratio_threshold: 0.5,
            open_timeout: Duration::from_secs(30),
            max_probe_requests: 1,
            window: None,
            event_capacity: 64,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn validate(&self) -> Result<(), CallError> {
        if !(self.failure_ratio_threshold > 0.0 && self.failure_ratio_threshold <= 1.0) {
            return Err(CallError::Config(format!(
                "breaker {}: failure_ratio_threshold must be in (0, 1], got {}",
                self.name, self.failure_ratio_threshold
            )));
        }
        if self.min_request_threshold == 0 {
            return Err(CallError::Config(format!(
                "breaker {}: min_request_threshold must be at least 1",
                self.name
            )));
        }
        if self.max_probe_requests == 0 {
            return Err(CallError::Config(format!(
                "breaker {}: max_probe_requests must be at least 1",
                self.name
            )));
        }
        if self.window == Some(Duration::ZERO) {
            return Err(CallError::Config(format!(
                "breaker {}: window must be non-zero",
                self.name
            )));
        }
        Ok(())
    }
}

/// Request/outcome counters since the last reset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counts {
    pub requests: u32,
    pub total_successes: u32,
    pub total_failures: u32,
    pub consecutive_successes: u32,
    pub consecutive_failures: u32,
}

impl Counts {
    fn on_success(&mut self) {
        self.requests += 1;
        self.total_successes += 1;
        self.consecutive_successes += 1;
        self.consecutive_failures = 0;
    }

    fn on_failure(&mut self) {
        self.requests += 1;
        self.total_failures += 1;
        self.consecutive_failures += 1;
        self.consecutive_successes = 0;
    }

    /// Fraction of completed requests that failed.
    pub fn failure_ratio(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            f64::from(self.total_failures) / f64::from(self.requests)
        }
    }
}

/// A transition, as delivered to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub struct StateChange {
    pub breaker: Arc<str>,
    pub from: CircuitState,
    pub to: CircuitState,
    /// Generation that the new state starts.
    pub generation: u64,
}

struct CircuitInner {
    state: CircuitState,
    counts: Counts,
    generation: u64,
    /// Probes admitted in the current half-open generation.
    probes: u32,
    opened_at: Option<Instant>,
    window_expiry: Option<Instant>,
}

struct Shared {
    config: CircuitBreakerConfig,
    name: Arc<str>,
    inner: Mutex<CircuitInner>,
    events: broadcast::Sender<StateChange>,
}

/// Thread-safe circuit breaker.
///
/// Cheap to clone; clones share state. Construct one per protected operation
/// class and pass it to the clients that need it.
#[derive(Clone)]
pub struct CircuitBreaker {
    shared: Arc<Shared>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker in `Closed` state.
    pub fn new(config: CircuitBreakerConfig) -> Result<Self, CallError> {
        config.validate()?;
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let window_expiry = config.window.map(|w| Instant::now() + w);
        Ok(Self {
            shared: Arc::new(Shared {
                name: Arc::from(config.name.as_str()),
                config,
                inner: Mutex::new(CircuitInner {
                    state: CircuitState::Closed,
                    counts: Counts::default(),
                    generation: 0,
                    probes: 0,
                    opened_at: None,
                    window_expiry,
                }),
                events,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.shared.config
    }

    /// Returns the current state, transitioning Open→HalfOpen if the wait has elapsed.
    pub fn state(&self) -> CircuitState {
        let mut inner = self.lock();
        self.refresh(&mut inner, Instant::now());
        inner.state
    }

    /// Snapshot of the counters for the current generation.
    pub fn counts(&self) -> Counts {
        let mut inner = self.lock();
        self.refresh(&mut inner, Instant::now());
        inner.counts
    }

    pub fn generation(&self) -> u64 {
        let mut inner = self.lock();
        self.refresh(&mut inner, Instant::now());
        inner.generation
    }

    /// Subscribe to state changes. Publishing never waits on subscribers; a
    /// subscriber that falls behind misses the oldest events.
    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.shared.events.subscribe()
    }

    /// Ask whether a call may proceed.
    ///
    /// On success the returned [`Admission`] must be resolved with
    /// `record_success` or `record_failure` once the call completes.
    pub fn admit(&self) -> Result<Admission, CallError> {
        let mut inner = self.lock();
        self.refresh(&mut inner, Instant::now());
        match inner.state {
            CircuitState::Closed => {}
            CircuitState::Open => return Err(self.rejection()),
            CircuitState::HalfOpen => {
                if inner.probes >= self.shared.config.max_probe_requests {
                    return Err(self.rejection());
                }
                inner.probes += 1;
            }
        }
        Ok(Admission {
            breaker: self.clone(),
            generation: inner.generation,
            resolved: false,
        })
    }

    /// Run `call` under the breaker: rejected calls never start.
    pub async fn call<F, T>(&self, call: F) -> Result<T, CallError>
    where
        F: std::future::Future<Output = Result<T, CallError>>,
    {
        let admission = self.admit()?;
        let res = call.await;
        admission.record(&res);
        res
    }

    fn rejection(&self) -> CallError {
        CallError::CircuitOpen {
            breaker: self.shared.config.name.clone(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CircuitInner> {
        self.shared
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Apply time-driven changes: the open timeout and the closed-state window.
    fn refresh(&self, inner: &mut CircuitInner, now: Instant) {
        match inner.state {
            CircuitState::Open => {
                let elapsed = inner
                    .opened_at
                    .map_or(true, |at| now.duration_since(at) >= self.shared.config.open_timeout);
                if elapsed {
                    self.transition(inner, CircuitState::HalfOpen, now);
                }
            }
            CircuitState::Closed => {
                if let (Some(expiry), Some(window)) = (inner.window_expiry, self.shared.config.window) {
                    if now >= expiry {
                        inner.counts = Counts::default();
                        inner.window_expiry = Some(now + window);
                    }
                }
            }
            CircuitState::HalfOpen => {}
        }
    }

    fn on_outcome(&self, generation: u64, success: bool) {
        let now = Instant::now();
        let mut inner = self.lock();
        self.refresh(&mut inner, now);
        if inner.generation != generation {
            tracing::trace!(
                breaker = %self.shared.name,
                stale = generation,
                current = inner.generation,
                "discarding outcome from previous generation"
            );
            return;
        }

        match (inner.state, success) {
            (CircuitState::Closed, _) => {
                if success {
                    inner.counts.on_success();
                } else {
                    inner.counts.on_failure();
                }
                let counts = inner.counts;
                let config = &self.shared.config;
                if counts.requests >= config.min_request_threshold {
                    let ratio = counts.failure_ratio();
                    tracing::debug!(
                        breaker = %self.shared.name,
                        failures = counts.total_failures,
                        requests = counts.requests,
                        ratio,
                        "checking failure ratio"
                    );
                    if ratio >= config.failure_ratio_threshold {
                        self.transition(&mut inner, CircuitState::Open, now);
                    }
                }
            }
            (CircuitState::HalfOpen, true) => {
                inner.counts.on_success();
                if inner.counts.consecutive_successes >= self.shared.config.max_probe_requests {
                    self.transition(&mut inner, CircuitState::Closed, now);
                }
            }
            (CircuitState::HalfOpen, false) => {
                inner.counts.on_failure();
                self.transition(&mut inner, CircuitState::Open, now);
            }
            // Open admits nothing, so a same-generation outcome cannot arrive here.
            (CircuitState::Open, _) => {}
        }
    }

    /// Release a half-open probe slot for a call that ended without an outcome.
    fn on_abandon(&self, generation: u64) {
        let mut inner = self.lock();
        if inner.generation == generation && inner.state == CircuitState::HalfOpen {
            inner.probes = inner.probes.saturating_sub(1);
        }
    }

    fn transition(&self, inner: &mut CircuitInner, to: CircuitState, now: Instant) {
        let from = inner.state;
        if from == to {
            return;
        }
        inner.state = to;
        inner.generation += 1;
        inner.counts = Counts::default();
        inner.probes = 0;
        match to {
            CircuitState::Open => {
                inner.opened_at = Some(now);
                inner.window_expiry = None;
            }
            CircuitState::HalfOpen => {}
            CircuitState::Closed => {
                inner.opened_at = None;
                inner.window_expiry = self.shared.config.window.map(|w| now + w);
            }
        }

        match to {
            CircuitState::Open => tracing::warn!(
                breaker = %self.shared.name,
                %from,
                generation = inner.generation,
                "Circuit breaker → open"
            ),
            _ => tracing::info!(
                breaker = %self.shared.name,
                %from,
                generation = inner.generation,
                "Circuit breaker → {to}"
            ),
        }

        // No receivers is fine; `send` never blocks.
        let _ = self.shared.events.send(StateChange {
            breaker: self.shared.name.clone(),
            from,
            to,
            generation: inner.generation,
        });
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.shared.name)
            .field("state", &self.state())
            .finish()
    }
}

/// Permission for one call, tied to the generation it was granted in.
///
/// Dropping it unresolved releases a half-open probe slot without recording anything.
#[must_use = "an admission must be resolved with the call's outcome"]
pub struct Admission {
    breaker: CircuitBreaker,
    generation: u64,
    resolved: bool,
}

impl Admission {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn record_success(mut self) {
        self.resolved = true;
        self.breaker.on_outcome(self.generation, true);
    }

    pub fn record_failure(mut self) {
        self.resolved = true;
        self.breaker.on_outcome(self.generation, false);
    }

    /// Record a call result.
    ///
    /// Caller cancellation and errors raised on this side of the transport
    /// (missing credentials, bad configuration, a nested breaker's rejection)
    /// count as neither success nor failure.
    pub fn record<T>(self, result: &Result<T, CallError>) {
        match result {
            Ok(_) => self.record_success(),
            Err(
                CallError::Canceled
                | CallError::Unauthenticated(_)
                | CallError::Config(_)
                | CallError::CircuitOpen { .. },
            ) => drop(self),
            Err(_) => self.record_failure(),
        }
    }
}

impl Drop for Admission {
    fn drop(&mut self) {
        if !self.resolved {
            self.breaker.on_abandon(self.generation);
        }
    }
}

impl std::fmt::Debug for Admission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Admission")
            .field("breaker", &self.breaker.name())
            .field("generation", &self.generation)
            .finish()
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

mod opt_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(d).map(|v| v.map(Duration::from_millis))
    }
}
