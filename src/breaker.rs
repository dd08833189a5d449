//! Circuit breaker
//!
//! Guards a whole pipeline invocation. Closed lets calls through and counts
//! consecutive failures; once the threshold is reached the circuit opens and
//! calls are rejected without running. After the cool-down one trial call is
//! admitted (half-open): success closes the circuit, failure reopens it.

use crate::error::PipelineError;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Default consecutive failures before the circuit opens
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

/// Default time the circuit stays open before a trial
pub const DEFAULT_COOLDOWN_SECS: u64 = 300;

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            cooldown: Duration::from_secs(DEFAULT_COOLDOWN_SECS),
        }
    }
}

/// Externally visible circuit state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
enum State {
    Closed { failures: u32 },
    Open { reopen_at: Instant },
    /// A trial call is in flight
    HalfOpen,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: Mutex<State>,
}

/// Admission ticket for one call. Dropping it without recording an outcome
/// (the call future was dropped) abandons a half-open trial.
struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    settled: bool,
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if self.trial && !self.settled {
            self.breaker.abandon_trial();
        }
    }
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: Mutex::new(State::Closed { failures: 0 }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> CircuitState {
        match &*self.lock() {
            State::Closed { .. } => CircuitState::Closed,
            State::Open { reopen_at } if Instant::now() >= *reopen_at => CircuitState::HalfOpen,
            State::Open { .. } => CircuitState::Open,
            State::HalfOpen => CircuitState::HalfOpen,
        }
    }

    /// Consecutive failures counted while closed
    pub fn failure_count(&self) -> u32 {
        match &*self.lock() {
            State::Closed { failures } => *failures,
            _ => self.config.failure_threshold,
        }
    }

    /// Run `call` under the circuit.
    ///
    /// Rejected calls return [`PipelineError::CircuitOpen`] without polling
    /// `call`. Only errors for which [`PipelineError::counts_as_failure`]
    /// holds move the circuit toward open.
    pub async fn call<F, Fut, T>(&self, call: F) -> Result<T, PipelineError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, PipelineError>>,
    {
        let mut permit = self.acquire()?;
        let outcome = call().await;

        match &outcome {
            Ok(_) => self.record_success(permit.trial),
            Err(err) if err.counts_as_failure() => self.record_failure(permit.trial),
            Err(_) => {
                // Cancelled trials leave the circuit ready for another trial
                if permit.trial {
                    self.abandon_trial();
                }
            }
        }
        permit.settled = true;

        outcome
    }

    fn acquire(&self) -> Result<Permit<'_>, PipelineError> {
        let mut state = self.lock();
        let now = Instant::now();

        let trial = match &*state {
            State::Closed { .. } => false,
            State::Open { reopen_at } if now >= *reopen_at => {
                debug!(circuit = %self.name, "circuit half-open, admitting trial call");
                *state = State::HalfOpen;
                true
            }
            State::Open { reopen_at } => {
                return Err(PipelineError::CircuitOpen {
                    circuit: self.name.clone(),
                    retry_after: reopen_at.saturating_duration_since(now),
                });
            }
            State::HalfOpen => {
                return Err(PipelineError::CircuitOpen {
                    circuit: self.name.clone(),
                    retry_after: Duration::ZERO,
                });
            }
        };

        Ok(Permit {
            breaker: self,
            trial,
            settled: false,
        })
    }

    fn record_success(&self, trial: bool) {
        let mut state = self.lock();
        match &*state {
            State::Closed { .. } => *state = State::Closed { failures: 0 },
            State::HalfOpen if trial => {
                info!(circuit = %self.name, "circuit closed after successful trial");
                *state = State::Closed { failures: 0 };
            }
            // Admitted while closed, finished after the circuit opened
            _ => debug!(circuit = %self.name, "ignoring late success, circuit not closed"),
        }
    }

    fn record_failure(&self, trial: bool) {
        let mut state = self.lock();
        let reopen_at = Instant::now() + self.config.cooldown;

        match &mut *state {
            State::Closed { failures } => {
                *failures += 1;
                if *failures >= self.config.failure_threshold {
                    warn!(
                        circuit = %self.name,
                        failures = *failures,
                        cooldown_secs = self.config.cooldown.as_secs(),
                        "circuit opened after consecutive failures"
                    );
                    *state = State::Open { reopen_at };
                }
            }
            State::HalfOpen if trial => {
                warn!(circuit = %self.name, "trial call failed, circuit reopened");
                *state = State::Open { reopen_at };
            }
            // A call admitted while closed finished after the circuit opened
            State::HalfOpen | State::Open { .. } => {}
        }
    }

    fn abandon_trial(&self) {
        let mut state = self.lock();
        if matches!(*state, State::HalfOpen) {
            debug!(circuit = %self.name, "trial call abandoned");
            *state = State::Open {
                reopen_at: Instant::now(),
            };
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        // State is a plain enum, a poisoned lock still holds a valid value
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Named circuits shared across invocations
#[derive(Debug, Default)]
pub struct CircuitRegistry {
    config: CircuitBreakerConfig,
    circuits: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            circuits: RwLock::new(HashMap::new()),
        }
    }

    /// Get the circuit for `name`, creating it closed on first use
    pub fn get(&self, name: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self
            .circuits
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
        {
            return existing.clone();
        }

        self.circuits
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(name, self.config.clone())))
            .clone()
    }

    /// Names of circuits not currently closed
    pub fn open_circuits(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .circuits
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|c| c.state() != CircuitState::Closed)
            .map(|c| c.name().to_string())
            .collect();
        names.sort();
        names
    }
}
