// Copyright (c) 2026 Isprava Engineering
//! Circuit breaker domain model (`spec.md` SS4.1).
//!
//! A named, three-state failure isolator. Pure state machine: no I/O, no
//! async, mirroring the teacher's domain aggregates (`ToolServer::start`,
//! `ToolInvocation::complete`) that return explicit transitions and let
//! infrastructure wrap them with async execution.

use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

/// Observable breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Tuning parameters for one breaker instance.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub reset_timeout: Duration,
}

impl CircuitBreakerConfig {
    pub fn new(failure_threshold: u32, reset_timeout: Duration) -> Self {
        Self { failure_threshold, reset_timeout }
    }
}

struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<DateTime<Utc>>,
}

/// Serializable snapshot for health endpoints (`getState()` in `spec.md`).
#[derive(Debug, Clone, serde::Serialize)]
pub struct CircuitSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub opened_at: Option<DateTime<Utc>>,
}

/// Error returned by [`CircuitBreaker::execute`].
#[derive(Debug, thiserror::Error)]
pub enum CircuitError<E> {
    #[error("circuit open")]
    Open,
    #[error(transparent)]
    Inner(E),
}

/// A named three-state failure isolator.
///
/// `is_transient` classifies an error (by its rendered message) as
/// transient — a transient failure is observed but never counted against
/// the breaker, per `spec.md` SS4.1.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
    is_transient: Box<dyn Fn(&str) -> bool + Send + Sync>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self::with_transient_predicate(name, config, |_| false)
    }

    pub fn with_transient_predicate(
        name: impl Into<String>,
        config: CircuitBreakerConfig,
        is_transient: impl Fn(&str) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
            }),
            is_transient: Box::new(is_transient),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Execute `f`, applying the breaker's gating and failure accounting.
    pub async fn execute<T, E, F, Fut>(&self, f: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        self.admit()?;

        match f().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) => {
                if !(self.is_transient)(&err.to_string()) {
                    self.record_failure();
                }
                Err(CircuitError::Inner(err))
            }
        }
    }

    /// Decide whether a call may proceed, transitioning open -> half-open
    /// once `reset_timeout` has elapsed. Half-open permits exactly one
    /// probe (`spec.md` SS4.1: "transition open->half-open and permit one
    /// probe"); a caller that observes the circuit already half-open is
    /// blocked until the in-flight probe resolves.
    fn admit<E>(&self) -> Result<(), CircuitError<E>> {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::HalfOpen => Err(CircuitError::Open),
            CircuitState::Open => {
                let opened_at = inner.opened_at.unwrap_or_else(Utc::now);
                let elapsed = Utc::now().signed_duration_since(opened_at);
                let reset = chrono::Duration::from_std(self.config.reset_timeout)
                    .unwrap_or(chrono::Duration::zero());
                if elapsed >= reset {
                    inner.state = CircuitState::HalfOpen;
                    Ok(())
                } else {
                    Err(CircuitError::Open)
                }
            }
        }
    }

    fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
    }

    fn record_failure(&self) {
        let mut inner = self.inner.lock();
        if matches!(inner.state, CircuitState::HalfOpen) {
            inner.state = CircuitState::Open;
            inner.opened_at = Some(Utc::now());
            drop(inner);
            crate::metrics::record_circuit_trip(&self.name);
            return;
        }
        inner.consecutive_failures += 1;
        if inner.consecutive_failures >= self.config.failure_threshold {
            inner.state = CircuitState::Open;
            inner.opened_at = Some(Utc::now());
            drop(inner);
            crate::metrics::record_circuit_trip(&self.name);
        }
    }

    pub fn get_state(&self) -> CircuitSnapshot {
        let inner = self.inner.lock();
        CircuitSnapshot {
            name: self.name.clone(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            opened_at: inner.opened_at,
        }
    }
}
