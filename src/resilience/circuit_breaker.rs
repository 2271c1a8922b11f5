//! Circuit breaker for upstream protection.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: backend assumed degraded, calls fail fast (or go to the fallback)
//! - Half-Open: a bounded number of probes test whether it recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive classified failures >= failure_threshold
//! Open → Half-Open: first call after reset_timeout has elapsed
//! Half-Open → Closed: consecutive probe successes >= success_threshold
//! Half-Open → Open: any classified probe failure
//! ```
//!
//! Errors the classifier does not mark as circuit-breaking leave the
//! counters untouched and go straight back to the caller.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde::Serialize;
use serde_json::Value;
use tokio::time::Instant;

use crate::config::CircuitConfig;
use crate::observability::metrics;
use crate::resilience::timeouts::with_deadline;
use crate::resilience::types::{CircuitError, CircuitResult, UpstreamError};

/// Decides whether an error counts toward opening the circuit.
pub type FailureClassifier = Arc<dyn Fn(&UpstreamError) -> bool + Send + Sync>;

/// Substitute result, invoked with the original call arguments.
pub type Fallback = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value, UpstreamError>> + Send + Sync>;

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn name(&self) -> &'static str {
        match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Configuration for one circuit.
#[derive(Clone)]
pub struct CircuitBreakerOptions {
    /// Consecutive classified failures before opening.
    pub failure_threshold: u32,

    /// Consecutive half-open successes before closing.
    pub success_threshold: u32,

    /// How long to stay open before admitting a probe.
    pub reset_timeout: Duration,

    /// Deadline for each call.
    pub request_timeout: Duration,

    /// Deadline for the very first call through this circuit.
    pub initial_request_timeout: Duration,

    /// Concurrent probes admitted while half-open.
    pub half_open_max_probes: u32,

    /// Circuit-breaking classification. Defaults to [`UpstreamError::is_server_side`].
    pub is_failure: FailureClassifier,

    pub fallback: Option<Fallback>,
}

impl CircuitBreakerOptions {
    pub fn with_classifier<F>(mut self, is_failure: F) -> Self
    where
        F: Fn(&UpstreamError) -> bool + Send + Sync + 'static,
    {
        self.is_failure = Arc::new(is_failure);
        self
    }

    pub fn with_fallback<F, Fut>(mut self, fallback: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, UpstreamError>> + Send + 'static,
    {
        let boxed: Fallback = Arc::new(move |args| -> BoxFuture<'static, Result<Value, UpstreamError>> {
            Box::pin(fallback(args))
        });
        self.fallback = Some(boxed);
        self
    }
}

impl Default for CircuitBreakerOptions {
    fn default() -> Self {
        Self::from(&CircuitConfig::default())
    }
}

impl From<&CircuitConfig> for CircuitBreakerOptions {
    fn from(config: &CircuitConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold.max(1),
            success_threshold: config.success_threshold.max(1),
            reset_timeout: config.reset_timeout(),
            request_timeout: config.request_timeout(),
            initial_request_timeout: config.initial_request_timeout(),
            half_open_max_probes: config.half_open_max_probes.max(1),
            is_failure: Arc::new(UpstreamError::is_server_side),
            fallback: None,
        }
    }
}

impl fmt::Debug for CircuitBreakerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreakerOptions")
            .field("failure_threshold", &self.failure_threshold)
            .field("success_threshold", &self.success_threshold)
            .field("reset_timeout", &self.reset_timeout)
            .field("request_timeout", &self.request_timeout)
            .field("initial_request_timeout", &self.initial_request_timeout)
            .field("half_open_max_probes", &self.half_open_max_probes)
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}

/// Serializable view of a circuit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CircuitSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    /// Milliseconds since the circuit last opened, while open or half-open.
    pub opened_ms_ago: Option<u64>,
    pub total_calls: u64,
    pub total_failures: u64,
    pub total_rejections: u64,
    pub total_fallbacks: u64,
}

#[derive(Debug)]
struct CircuitInner {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_at: Option<Instant>,
    probes_in_flight: u32,
    /// Bumped on every entry into half-open so stale probe permits are ignored.
    half_open_epoch: u64,
}

impl CircuitInner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            opened_at: None,
            probes_in_flight: 0,
            half_open_epoch: 0,
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    calls: AtomicU64,
    failures: AtomicU64,
    rejections: AtomicU64,
    fallbacks: AtomicU64,
}

/// How a call was let through.
enum Admission<'a> {
    Rejected,
    Admitted(Permit<'a>),
}

/// Held for the duration of an admitted call. Dropping a probe permit
/// returns its half-open slot, including when the caller abandons the call.
struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    probe_epoch: Option<u64>,
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if self.probe_epoch.is_none() {
            return;
        }
        let mut inner = self.breaker.lock();
        if CircuitBreaker::is_current_probe(&inner, self) {
            inner.probes_in_flight = inner.probes_in_flight.saturating_sub(1);
        }
    }
}

/// Per-operation circuit breaker.
pub struct CircuitBreaker {
    name: String,
    options: CircuitBreakerOptions,
    inner: Mutex<CircuitInner>,
    first_call: AtomicBool,
    counters: Counters,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, options: CircuitBreakerOptions) -> Self {
        Self {
            name: name.into(),
            options,
            inner: Mutex::new(CircuitInner::new()),
            first_call: AtomicBool::new(true),
            counters: Counters::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &CircuitBreakerOptions {
        &self.options
    }

    /// Current state. An expired open period only turns into half-open on
    /// the next call.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Execute `operation(args)` through the circuit.
    ///
    /// The call is bounded by `timeout_override`, or by the request timeout
    /// (the initial timeout for the circuit's first call).
    pub async fn exec<F, Fut>(
        &self,
        operation: F,
        args: Value,
        timeout_override: Option<Duration>,
    ) -> CircuitResult<Value>
    where
        F: FnOnce(Value) -> Fut,
        Fut: Future<Output = Result<Value, UpstreamError>>,
    {
        let permit = match self.admit() {
            Admission::Admitted(permit) => permit,
            Admission::Rejected => return self.reject(args).await,
        };

        // An override on the first call still uses up the cold-start deadline.
        let first = self.first_call.swap(false, Ordering::SeqCst);
        let deadline = timeout_override.unwrap_or(if first {
            self.options.initial_request_timeout
        } else {
            self.options.request_timeout
        });
        self.counters.calls.fetch_add(1, Ordering::Relaxed);

        let fallback_args = self.options.fallback.as_ref().map(|_| args.clone());
        let outcome = with_deadline(deadline, operation(args)).await;

        match outcome {
            Ok(value) => {
                self.on_success(&permit);
                drop(permit);
                metrics::record_circuit_call(&self.name, "success");
                Ok(value)
            }
            Err(error) if (self.options.is_failure)(&error) => {
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
                self.on_failure(&permit, &error);
                drop(permit);
                metrics::record_circuit_call(&self.name, "failure");

                match (&self.options.fallback, fallback_args) {
                    (Some(fallback), Some(args)) => {
                        self.counters.fallbacks.fetch_add(1, Ordering::Relaxed);
                        fallback(args).await.map_err(CircuitError::from)
                    }
                    _ => Err(CircuitError::Upstream(error)),
                }
            }
            Err(error) => {
                drop(permit);
                metrics::record_circuit_call(&self.name, "passthrough");
                tracing::debug!(circuit = %self.name, error = %error, "Non-breaking error passed through");
                Err(CircuitError::Upstream(error))
            }
        }
    }

    /// Force the circuit back to a fresh closed state.
    pub fn reset(&self) {
        let mut inner = self.lock();
        let previous = inner.state;
        *inner = CircuitInner::new();
        drop(inner);

        self.first_call.store(true, Ordering::SeqCst);
        self.counters.calls.store(0, Ordering::Relaxed);
        self.counters.failures.store(0, Ordering::Relaxed);
        self.counters.rejections.store(0, Ordering::Relaxed);
        self.counters.fallbacks.store(0, Ordering::Relaxed);

        if previous != CircuitState::Closed {
            tracing::info!(circuit = %self.name, from = %previous, "Circuit reset");
        }
        metrics::record_circuit_state(&self.name, CircuitState::Closed);
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let inner = self.lock();
        CircuitSnapshot {
            name: self.name.clone(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            consecutive_successes: inner.consecutive_successes,
            opened_ms_ago: inner.opened_at.map(|at| at.elapsed().as_millis() as u64),
            total_calls: self.counters.calls.load(Ordering::Relaxed),
            total_failures: self.counters.failures.load(Ordering::Relaxed),
            total_rejections: self.counters.rejections.load(Ordering::Relaxed),
            total_fallbacks: self.counters.fallbacks.load(Ordering::Relaxed),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CircuitInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn admit(&self) -> Admission<'_> {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => Admission::Admitted(Permit {
                breaker: self,
                probe_epoch: None,
            }),
            CircuitState::Open => {
                let cooled_down = inner
                    .opened_at
                    .map_or(true, |at| at.elapsed() >= self.options.reset_timeout);
                if !cooled_down {
                    return Admission::Rejected;
                }
                self.transition(&mut inner, CircuitState::HalfOpen);
                inner.probes_in_flight = 1;
                Admission::Admitted(Permit {
                    breaker: self,
                    probe_epoch: Some(inner.half_open_epoch),
                })
            }
            CircuitState::HalfOpen => {
                if inner.probes_in_flight >= self.options.half_open_max_probes {
                    return Admission::Rejected;
                }
                inner.probes_in_flight += 1;
                Admission::Admitted(Permit {
                    breaker: self,
                    probe_epoch: Some(inner.half_open_epoch),
                })
            }
        }
    }

    async fn reject(&self, args: Value) -> CircuitResult<Value> {
        self.counters.rejections.fetch_add(1, Ordering::Relaxed);
        metrics::record_circuit_rejection(&self.name);

        match &self.options.fallback {
            Some(fallback) => {
                self.counters.fallbacks.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(circuit = %self.name, "Circuit open, serving fallback");
                fallback(args).await.map_err(CircuitError::from)
            }
            None => Err(CircuitError::Open {
                name: self.name.clone(),
            }),
        }
    }

    /// True when `permit` is a probe of the half-open period in progress.
    fn is_current_probe(inner: &CircuitInner, permit: &Permit<'_>) -> bool {
        inner.state == CircuitState::HalfOpen && permit.probe_epoch == Some(inner.half_open_epoch)
    }

    fn on_success(&self, permit: &Permit<'_>) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => inner.consecutive_failures = 0,
            CircuitState::HalfOpen if Self::is_current_probe(&inner, permit) => {
                inner.consecutive_successes += 1;
                if inner.consecutive_successes >= self.options.success_threshold {
                    self.transition(&mut inner, CircuitState::Closed);
                }
            }
            // Late results from calls admitted before the circuit opened.
            _ => {}
        }
    }

    fn on_failure(&self, permit: &Permit<'_>, error: &UpstreamError) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.options.failure_threshold {
                    tracing::warn!(
                        circuit = %self.name,
                        failures = inner.consecutive_failures,
                        error = %error,
                        "Failure threshold reached"
                    );
                    self.transition(&mut inner, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen if Self::is_current_probe(&inner, permit) => {
                tracing::warn!(circuit = %self.name, error = %error, "Probe failed");
                self.transition(&mut inner, CircuitState::Open);
            }
            _ => {}
        }
    }

    fn transition(&self, inner: &mut CircuitInner, to: CircuitState) {
        let from = inner.state;
        inner.state = to;
        match to {
            CircuitState::Open => {
                inner.opened_at = Some(Instant::now());
                inner.consecutive_successes = 0;
                inner.probes_in_flight = 0;
            }
            CircuitState::HalfOpen => {
                inner.half_open_epoch += 1;
                inner.consecutive_successes = 0;
                inner.probes_in_flight = 0;
            }
            CircuitState::Closed => {
                inner.opened_at = None;
                inner.consecutive_failures = 0;
                inner.consecutive_successes = 0;
                inner.probes_in_flight = 0;
            }
        }

        tracing::info!(circuit = %self.name, from = %from, to = %to, "Circuit state changed");
        metrics::record_circuit_state(&self.name, to);
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("options", &self.options)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicU32;

    fn options(failure_threshold: u32, success_threshold: u32, reset_ms: u64) -> CircuitBreakerOptions {
        CircuitBreakerOptions {
            failure_threshold,
            success_threshold,
            reset_timeout: Duration::from_millis(reset_ms),
            request_timeout: Duration::from_millis(500),
            initial_request_timeout: Duration::from_millis(2000),
            ..Default::default()
        }
    }

    fn server_error() -> UpstreamError {
        UpstreamError::from_status(503, "unavailable")
    }

    async fn fail(breaker: &CircuitBreaker) -> CircuitResult<Value> {
        breaker.exec(|_| async { Err(server_error()) }, Value::Null, None).await
    }

    async fn succeed(breaker: &CircuitBreaker) -> CircuitResult<Value> {
        breaker.exec(|_| async { Ok(json!("ok")) }, Value::Null, None).await
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_cycle() {
        let breaker = CircuitBreaker::new("rooms.list", options(3, 2, 1000));
        let calls = AtomicU32::new(0);

        for _ in 0..3 {
            assert!(fail(&breaker).await.is_err());
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        let err = breaker
            .exec(
                |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Ok(json!(1)) }
                },
                Value::Null,
                None,
            )
            .await
            .unwrap_err();
        assert!(err.is_open());
        assert_eq!(calls.load(Ordering::SeqCst), 0, "operation never attempted while open");

        tokio::time::advance(Duration::from_millis(1000)).await;
        assert_eq!(succeed(&breaker).await.unwrap(), json!("ok"));
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        succeed(&breaker).await.unwrap();
        assert_eq!(breaker.state(), CircuitState::Closed);
        let snapshot = breaker.snapshot();
        assert_eq!(snapshot.consecutive_failures, 0);
        assert_eq!(snapshot.consecutive_successes, 0);
        assert_eq!(snapshot.total_rejections, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens() {
        let breaker = CircuitBreaker::new("rooms.get", options(1, 3, 100));
        fail(&breaker).await.unwrap_err();
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_millis(100)).await;
        succeed(&breaker).await.unwrap();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        fail(&breaker).await.unwrap_err();
        assert_eq!(breaker.state(), CircuitState::Open);

        // openedAt was reset, so the full timeout applies again.
        tokio::time::advance(Duration::from_millis(50)).await;
        assert!(succeed(&breaker).await.unwrap_err().is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_errors_never_count() {
        let breaker = CircuitBreaker::new("rooms.create", options(2, 1, 1000));

        for _ in 0..10 {
            let err = breaker
                .exec(|_| async { Err(UpstreamError::Validation("bad name".into())) }, Value::Null, None)
                .await
                .unwrap_err();
            assert_eq!(err, CircuitError::Upstream(UpstreamError::Validation("bad name".into())));
        }

        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.snapshot().consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_failure_count() {
        let breaker = CircuitBreaker::new("meetings.list", options(3, 1, 1000));
        fail(&breaker).await.unwrap_err();
        fail(&breaker).await.unwrap_err();
        succeed(&breaker).await.unwrap();
        fail(&breaker).await.unwrap_err();
        fail(&breaker).await.unwrap_err();

        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.snapshot().consecutive_failures, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_counts_as_failure() {
        let breaker = CircuitBreaker::new("slow", options(1, 1, 1000));
        let err = breaker
            .exec(
                |_| async {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    Ok(Value::Null)
                },
                Value::Null,
                Some(Duration::from_millis(20)),
            )
            .await
            .unwrap_err();

        assert_eq!(err, CircuitError::Upstream(UpstreamError::Timeout(Duration::from_millis(20))));
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_call_gets_initial_timeout() {
        let breaker = CircuitBreaker::new("cold", options(5, 1, 1000));
        let slow = |_: Value| async {
            tokio::time::sleep(Duration::from_millis(1000)).await;
            Ok::<_, UpstreamError>(json!("warm"))
        };

        // 1000ms fits the 2000ms initial timeout but not the 500ms one.
        assert_eq!(breaker.exec(slow, Value::Null, None).await.unwrap(), json!("warm"));
        let err = breaker.exec(slow, Value::Null, None).await.unwrap_err();
        assert_eq!(err, CircuitError::Upstream(UpstreamError::Timeout(Duration::from_millis(500))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_overridden_first_call_consumes_initial_timeout() {
        let breaker = CircuitBreaker::new("cold", options(5, 1, 1000));
        let slow = |_: Value| async {
            tokio::time::sleep(Duration::from_millis(1000)).await;
            Ok::<_, UpstreamError>(Value::Null)
        };

        breaker
            .exec(slow, Value::Null, Some(Duration::from_secs(2)))
            .await
            .unwrap();
        let err = breaker.exec(slow, Value::Null, None).await.unwrap_err();
        assert_eq!(err, CircuitError::Upstream(UpstreamError::Timeout(Duration::from_millis(500))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_both_rejected_while_open() {
        let breaker = CircuitBreaker::new("rooms.delete", options(1, 1, 1000));
        fail(&breaker).await.unwrap_err();
        assert_eq!(breaker.state(), CircuitState::Open);

        let (a, b) = tokio::join!(succeed(&breaker), succeed(&breaker));

        assert!(a.unwrap_err().is_open());
        assert!(b.unwrap_err().is_open());
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.snapshot().total_rejections, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_receives_original_args() {
        let breaker = CircuitBreaker::new(
            "rooms.list",
            options(1, 1, 1000).with_fallback(|args| async move { Ok(json!({"cached": args})) }),
        );

        let args = json!({"limit": 10});
        let value = breaker
            .exec(|_| async { Err(server_error()) }, args.clone(), None)
            .await
            .unwrap();
        assert_eq!(value, json!({"cached": {"limit": 10}}));
        assert_eq!(breaker.state(), CircuitState::Open);

        let value = breaker.exec(|_| async { Ok(json!("live")) }, args, None).await.unwrap();
        assert_eq!(value, json!({"cached": {"limit": 10}}));
        assert_eq!(breaker.snapshot().total_fallbacks, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_error_becomes_result() {
        let breaker = CircuitBreaker::new(
            "rooms.list",
            options(1, 1, 1000).with_fallback(|_| async { Err(UpstreamError::Other("no cached copy".into())) }),
        );
        fail(&breaker).await.unwrap_err();

        let err = succeed(&breaker).await.unwrap_err();
        assert_eq!(err, CircuitError::Upstream(UpstreamError::Other("no cached copy".into())));
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_classifier() {
        let breaker = CircuitBreaker::new(
            "strict",
            options(1, 1, 1000).with_classifier(|e| matches!(e, UpstreamError::NotFound(_))),
        );

        breaker
            .exec(|_| async { Err(server_error()) }, Value::Null, None)
            .await
            .unwrap_err();
        assert_eq!(breaker.state(), CircuitState::Closed);

        breaker
            .exec(|_| async { Err(UpstreamError::NotFound("x".into())) }, Value::Null, None)
            .await
            .unwrap_err();
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_limits_probes() {
        let breaker = Arc::new(CircuitBreaker::new("probe", options(1, 1, 100)));
        fail(&breaker).await.unwrap_err();
        tokio::time::advance(Duration::from_millis(100)).await;

        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let probe = {
            let breaker = breaker.clone();
            tokio::spawn(async move {
                breaker
                    .exec(
                        |_| async move {
                            let _ = release_rx.await;
                            Ok(json!("probe"))
                        },
                        Value::Null,
                        Some(Duration::from_secs(60)),
                    )
                    .await
            })
        };
        tokio::task::yield_now().await;
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        assert!(succeed(&breaker).await.unwrap_err().is_open(), "second probe rejected");

        release_tx.send(()).unwrap();
        assert_eq!(probe.await.unwrap().unwrap(), json!("probe"));
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset() {
        let breaker = CircuitBreaker::new("reset", options(1, 1, 60_000));
        fail(&breaker).await.unwrap_err();
        assert_eq!(breaker.state(), CircuitState::Open);

        breaker.reset();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.snapshot().total_calls, 0);
        succeed(&breaker).await.unwrap();
    }

    #[test]
    fn test_state_serializes_upper_case() {
        assert_eq!(serde_json::to_value(CircuitState::HalfOpen).unwrap(), json!("HALF_OPEN"));
        assert_eq!(CircuitState::Open.to_string(), "OPEN");
    }
}
