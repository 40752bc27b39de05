//! Circuit breaker for backend protection.
//!
//! # States
//! - Closed: normal operation, requests pass through
//! - Open: backend assumed down, requests fail fast
//! - Half-Open: a single trial request decides recovery
//!
//! # State Transitions
//! ```text
//! Closed → Open: failure count reaches max_failures
//! Open → Half-Open: first allow() after timeout since the last failure
//! Half-Open → Closed: trial succeeds (failure count reset)
//! Half-Open → Open: trial fails (last-failure time refreshed)
//! ```
//!
//! # Design Decisions
//! - One breaker per service, created at startup and never persisted
//! - Every transition happens under one mutex; an atomic mirror of the
//!   state serves the Closed fast path without locking
//! - Failures accumulate across interleaved successes while Closed; only
//!   recovery through Half-Open resets the count
//! - `allow()` hands out an [`Admission`]; only the holder of the current
//!   trial settles a Half-Open breaker.
//!   Calls admitted while Closed that finish during Half-Open still count
//!   as failures but never decide the trial
//! - A Half-Open trial whose outcome is never reported is treated as lost
//!   once `timeout` has passed, so the breaker cannot wedge. Its late
//!   outcome is then ignored

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use parking_lot::Mutex;
use serde::Serialize;

use crate::config::BreakerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed = 0,
    HalfOpen = 1,
    Open = 2,
}

impl CircuitState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => CircuitState::HalfOpen,
            2 => CircuitState::Open,
            _ => CircuitState::Closed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::HalfOpen => "half_open",
            CircuitState::Open => "open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ticket handed out by [`CircuitBreaker::allow`]. The caller returns it
/// with the call's outcome so the breaker can tell the Half-Open trial
/// apart from calls admitted before the breaker tripped.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "report the outcome with success, failure or abandon_trial"]
pub enum Admission {
    /// Admitted while Closed. Never decides a Half-Open trial.
    Normal,
    /// The single Half-Open trial.
    Trial(TrialId),
}

impl Admission {
    pub fn is_trial(&self) -> bool {
        matches!(self, Admission::Trial(_))
    }
}

/// Generation number of a Half-Open trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrialId(u64);

#[derive(Debug)]
struct Trial {
    id: u64,
    started: Instant,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    failures: u32,
    last_failure: Option<Instant>,
    trial: Option<Trial>,
    next_trial: u64,
}

impl Inner {
    fn start_trial(&mut self, now: Instant) -> Admission {
        let id = self.next_trial;
        self.next_trial = self.next_trial.wrapping_add(1);
        self.trial = Some(Trial { id, started: now });
        Admission::Trial(TrialId(id))
    }

    fn holds_trial(&self, admission: &Admission) -> bool {
        match (admission, &self.trial) {
            (Admission::Trial(TrialId(id)), Some(trial)) => {
                self.state == CircuitState::HalfOpen && trial.id == *id
            }
            _ => false,
        }
    }
}

pub struct CircuitBreaker {
    name: String,
    max_failures: u32,
    timeout: Duration,
    state: AtomicU8,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, max_failures: u32, timeout: Duration) -> Self {
        let breaker = Self {
            name: name.into(),
            max_failures: max_failures.max(1),
            timeout,
            state: AtomicU8::new(CircuitState::Closed as u8),
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failures: 0,
                last_failure: None,
                trial: None,
                next_trial: 0,
            }),
        };
        breaker.publish(CircuitState::Closed);
        breaker
    }

    pub fn from_config(name: impl Into<String>, config: &BreakerConfig) -> Self {
        Self::new(name, config.max_failures, config.timeout())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Decide whether a call may proceed. May move Open → Half-Open.
    ///
    /// `None` means reject. An admitted caller must hand the returned
    /// [`Admission`] back to exactly one of `success`, `failure` or
    /// `abandon_trial`.
    pub fn allow(&self) -> Option<Admission> {
        if self.get_state() == CircuitState::Closed {
            return Some(Admission::Normal);
        }

        let mut inner = self.inner.lock();
        let now = Instant::now();
        match inner.state {
            CircuitState::Closed => Some(Admission::Normal),
            CircuitState::Open => {
                let expired = inner
                    .last_failure
                    .map_or(true, |at| now.duration_since(at) > self.timeout);
                if !expired {
                    return None;
                }
                let admission = inner.start_trial(now);
                self.transition(&mut inner, CircuitState::HalfOpen);
                Some(admission)
            }
            CircuitState::HalfOpen => {
                let in_flight = inner
                    .trial
                    .as_ref()
                    .map_or(false, |trial| now.duration_since(trial.started) <= self.timeout);
                if in_flight {
                    return None;
                }
                tracing::debug!(breaker = %self.name, "Admitting replacement half-open trial");
                Some(inner.start_trial(now))
            }
        }
    }

    /// Record a successful call. Only the current Half-Open trial changes
    /// state.
    pub fn success(&self, admission: Admission) {
        if !admission.is_trial() {
            return;
        }
        let mut inner = self.inner.lock();
        if inner.holds_trial(&admission) {
            inner.failures = 0;
            inner.trial = None;
            self.transition(&mut inner, CircuitState::Closed);
        } else {
            tracing::debug!(breaker = %self.name, "Ignoring outcome of a superseded trial");
        }
    }

    /// Record a failed call.
    ///
    /// Every failure counts and refreshes the last-failure time, but only
    /// the current trial reopens a Half-Open breaker.
    pub fn failure(&self, admission: Admission) {
        let mut inner = self.inner.lock();
        inner.failures = inner.failures.saturating_add(1);
        inner.last_failure = Some(Instant::now());

        match inner.state {
            CircuitState::Closed if inner.failures >= self.max_failures => {
                self.transition(&mut inner, CircuitState::Open);
            }
            CircuitState::HalfOpen if inner.holds_trial(&admission) => {
                inner.trial = None;
                self.transition(&mut inner, CircuitState::Open);
            }
            _ => {}
        }
    }

    /// Release the Half-Open trial slot without recording an outcome, e.g.
    /// when the trial was answered without reaching the backend. A
    /// non-trial admission is simply dropped.
    pub fn abandon_trial(&self, admission: Admission) {
        if !admission.is_trial() {
            return;
        }
        let mut inner = self.inner.lock();
        if inner.holds_trial(&admission) {
            inner.trial = None;
        }
    }

    /// Force Closed with a zero failure count.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.failures = 0;
        inner.last_failure = None;
        inner.trial = None;
        if inner.state != CircuitState::Closed {
            self.transition(&mut inner, CircuitState::Closed);
        }
    }

    pub fn get_state(&self) -> CircuitState {
        CircuitState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn failures(&self) -> u32 {
        self.inner.lock().failures
    }

    fn transition(&self, inner: &mut Inner, to: CircuitState) {
        let from = inner.state;
        inner.state = to;
        self.state.store(to as u8, Ordering::Release);

        match to {
            CircuitState::Open => tracing::warn!(
                breaker = %self.name,
                from = %from,
                failures = inner.failures,
                "Circuit opened"
            ),
            _ => tracing::info!(breaker = %self.name, from = %from, to = %to, "Circuit state changed"),
        }
        self.publish(to);
    }

    fn publish(&self, state: CircuitState) {
        metrics::gauge!("proxy_circuit_state", "service" => self.name.clone()).set(state as u8 as f64);
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.get_state())
            .field("max_failures", &self.max_failures)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Axum middleware guarding a handler with a breaker.
///
/// Rejects with 503 while the breaker disallows calls; otherwise runs the
/// handler and records a status >= 500 as a failure.
///
/// ```ignore
/// let app = Router::new()
///     .route("/", get(handler))
///     .layer(axum::middleware::from_fn_with_state(breaker, circuit_breaker::guard));
/// ```
pub async fn guard(
    State(breaker): State<Arc<CircuitBreaker>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let Some(admission) = breaker.allow() else {
        return (StatusCode::SERVICE_UNAVAILABLE, "Service unavailable").into_response();
    };

    let response = next.run(request).await;
    if response.status().is_server_error() {
        breaker.failure(admission);
    } else {
        breaker.success(admission);
    }
    response
}
