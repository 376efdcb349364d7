use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{info, warn};

use vigil_core::dialogue::{DialogueTurn, Generation};
use vigil_core::errors::ReasoningError;
use vigil_core::reasoner::Reasoner;
use vigil_core::role::Role;

#[derive(Clone, Debug)]
pub struct ReliableConfig {
    /// Extra attempts after the first for retryable errors.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Fraction of the backoff randomly added or removed.
    pub jitter_factor: f64,
    /// Consecutive failed calls that open the circuit.
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_cooldown: Duration,
}

impl Default for ReliableConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter_factor: 0.2,
            circuit_breaker_threshold: 3,
            circuit_breaker_cooldown: Duration::from_secs(60),
        }
    }
}

impl ReliableConfig {
    /// Wait before retry number `attempt` (zero-based). A server hint wins
    /// over the computed backoff.
    fn backoff(&self, attempt: u32, hint: Option<Duration>) -> Duration {
        if let Some(hint) = hint {
            return hint;
        }
        let base_ms = self.base_delay.as_millis() as f64 * 2f64.powi(attempt.min(30) as i32);
        let capped = base_ms.min(self.max_delay.as_millis() as f64);
        let spread = capped * self.jitter_factor.clamp(0.0, 1.0);
        let jittered = capped + spread * (rand::random::<f64>() * 2.0 - 1.0);
        Duration::from_millis(jittered.max(1.0) as u64)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    /// Calls are refused until the cooldown passes.
    Open,
    /// Cooldown passed; the next outcome decides.
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug, Default)]
struct BreakerInner {
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

#[derive(Debug)]
struct CircuitBreaker {
    threshold: u32,
    cooldown: Duration,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            cooldown,
            inner: Mutex::default(),
        }
    }

    fn state(&self) -> CircuitState {
        match self.inner.lock().opened_at {
            None => CircuitState::Closed,
            Some(at) if at.elapsed() < self.cooldown => CircuitState::Open,
            Some(_) => CircuitState::HalfOpen,
        }
    }

    fn admit(&self) -> Result<(), ReasoningError> {
        match self.state() {
            CircuitState::Open => Err(ReasoningError::Overloaded),
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
        }
    }

    fn on_success(&self) {
        let mut inner = self.inner.lock();
        if inner.opened_at.take().is_some() {
            info!("reasoner circuit closed");
        }
        inner.consecutive_failures = 0;
    }

    fn on_failure(&self) {
        let mut inner = self.inner.lock();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        let half_open = inner.opened_at.is_some();
        // A failed probe re-opens at once; otherwise wait for the threshold.
        if half_open || inner.consecutive_failures >= self.threshold {
            warn!(
                failures = inner.consecutive_failures,
                cooldown_ms = u64::try_from(self.cooldown.as_millis()).unwrap_or(u64::MAX),
                "reasoner circuit opened"
            );
            inner.opened_at = Some(Instant::now());
        }
    }
}

/// A [`Reasoner`] that retries transient failures and stops calling a
/// backend that keeps failing.
///
/// Only errors the backend classifies as retryable are retried, with
/// exponential backoff and jitter, honoring rate-limit hints. One call that
/// still fails after its retries counts once towards the circuit breaker.
/// While the circuit is open, calls fail fast with
/// [`ReasoningError::Overloaded`].
#[derive(Debug)]
pub struct ReliableReasoner<R: Reasoner> {
    inner: R,
    config: ReliableConfig,
    breaker: CircuitBreaker,
    retries: AtomicU64,
}

impl<R: Reasoner> ReliableReasoner<R> {
    pub fn new(inner: R, config: ReliableConfig) -> Self {
        let breaker = CircuitBreaker::new(config.circuit_breaker_threshold, config.circuit_breaker_cooldown);
        Self {
            inner,
            config,
            breaker,
            retries: AtomicU64::new(0),
        }
    }

    pub fn with_defaults(inner: R) -> Self {
        Self::new(inner, ReliableConfig::default())
    }

    /// Retries performed across all calls.
    pub fn total_retries(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }
}

#[async_trait]
impl<R: Reasoner> Reasoner for ReliableReasoner<R> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn generate(
        &self,
        role: &Role,
        prompt: &str,
        conversation: &[DialogueTurn],
    ) -> Result<Generation, ReasoningError> {
        self.breaker.admit()?;

        let mut attempt: u32 = 0;
        loop {
            let err = match self.inner.generate(role, prompt, conversation).await {
                Ok(generation) => {
                    self.breaker.on_success();
                    return Ok(generation);
                }
                Err(err) => err,
            };
            if !err.is_retryable() || attempt >= self.config.max_retries {
                self.breaker.on_failure();
                return Err(err);
            }

            let wait = self.config.backoff(attempt, err.suggested_delay());
            self.retries.fetch_add(1, Ordering::Relaxed);
            warn!(
                role = role.name(),
                attempt = attempt + 1,
                wait_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
                kind = err.error_kind(),
                "reasoner call failed, retrying"
            );
            tokio::time::sleep(wait).await;
            attempt += 1;
        }
    }
}
