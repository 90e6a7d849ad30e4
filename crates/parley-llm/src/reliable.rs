use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;
use rand::Rng;
use tracing::{info, warn};

use parley_core::{GenerateStream, GenerationError, GenerationRequest, Generator};

#[derive(Clone, Debug)]
pub struct ReliableConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter_factor: f64,
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_cooldown: Duration,
}

impl Default for ReliableConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            jitter_factor: 0.2,
            circuit_breaker_threshold: 5,
            circuit_breaker_cooldown: Duration::from_secs(30),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum CircuitState {
    Closed,
    Open { since: Instant },
    HalfOpen,
}

/// Retries the opening `generate` call with exponential backoff and jitter.
///
/// Only the call that opens the stream is retried. Once a stream is handed out,
/// its deltas may already be on their way to a learner, so a failure inside it
/// is passed through untouched.
pub struct ReliableGenerator<G: Generator> {
    inner: G,
    config: ReliableConfig,
    circuit_state: RwLock<CircuitState>,
    consecutive_failures: AtomicU32,
    total_retries: AtomicU64,
}

impl<G: Generator> ReliableGenerator<G> {
    pub fn new(inner: G, config: ReliableConfig) -> Self {
        Self {
            inner,
            config,
            circuit_state: RwLock::new(CircuitState::Closed),
            consecutive_failures: AtomicU32::new(0),
            total_retries: AtomicU64::new(0),
        }
    }

    pub fn with_defaults(inner: G) -> Self {
        Self::new(inner, ReliableConfig::default())
    }

    fn check_circuit(&self) -> Result<(), GenerationError> {
        let state = self.circuit_state.read().clone();
        match state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open { since } => {
                if since.elapsed() >= self.config.circuit_breaker_cooldown {
                    *self.circuit_state.write() = CircuitState::HalfOpen;
                    Ok(())
                } else {
                    Err(GenerationError::Provider("generator circuit open".into()))
                }
            }
        }
    }

    fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
        let mut state = self.circuit_state.write();
        if *state != CircuitState::Closed {
            info!("generator circuit closed");
            *state = CircuitState::Closed;
        }
    }

    fn record_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures >= self.config.circuit_breaker_threshold {
            let mut state = self.circuit_state.write();
            if !matches!(*state, CircuitState::Open { .. }) {
                warn!(
                    failures,
                    cooldown_secs = self.config.circuit_breaker_cooldown.as_secs(),
                    "generator circuit opened"
                );
                *state = CircuitState::Open { since: Instant::now() };
            }
        }
    }

    fn retry_delay(&self, attempt: u32, suggested: Option<Duration>) -> Duration {
        if let Some(delay) = suggested {
            return delay;
        }
        let exp_ms = self.config.base_delay.as_millis() as f64 * 2.0_f64.powi(attempt as i32);
        let capped = exp_ms.min(self.config.max_delay.as_millis() as f64);
        let jitter_range = capped * self.config.jitter_factor;
        let jitter = if jitter_range > 0.0 {
            rand::thread_rng().gen_range(-jitter_range..=jitter_range)
        } else {
            0.0
        };
        Duration::from_millis((capped + jitter).max(0.0) as u64)
    }

    pub fn total_retries(&self) -> u64 {
        self.total_retries.load(Ordering::Relaxed)
    }

    pub fn circuit_state_name(&self) -> &'static str {
        match &*self.circuit_state.read() {
            CircuitState::Closed => "closed",
            CircuitState::Open { .. } => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

#[async_trait]
impl<G: Generator> Generator for ReliableGenerator<G> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn model(&self) -> &str {
        self.inner.model()
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GenerateStream, GenerationError> {
        self.check_circuit()?;

        let mut attempt = 0;
        loop {
            match self.inner.generate(request).await {
                Ok(stream) => {
                    self.record_success();
                    return Ok(stream);
                }
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    let delay = self.retry_delay(attempt, e.suggested_delay());
                    self.total_retries.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        attempt = attempt + 1,
                        max_retries = self.config.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "generator call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    self.check_circuit()?;
                    attempt += 1;
                }
                Err(e) => {
                    self.record_failure();
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockReply, ScriptedGenerator};

    fn fast() -> ReliableConfig {
        ReliableConfig {
            max_retries: 3,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
            ..Default::default()
        }
    }

    fn upstream() -> GenerationError {
        GenerationError::Upstream { status: 503, body: "unavailable".into() }
    }

    #[tokio::test(start_paused = true)]
    async fn success_on_first_try() {
        let g = ReliableGenerator::new(ScriptedGenerator::new(vec![MockReply::text(&["hi"])]), fast());
        assert!(g.generate(&GenerationRequest::default()).await.is_ok());
        assert_eq!(g.total_retries(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_retryable_errors() {
        let g = ReliableGenerator::new(
            ScriptedGenerator::new(vec![
                MockReply::Error(upstream()),
                MockReply::Error(GenerationError::Network("reset".into())),
                MockReply::text(&["recovered"]),
            ]),
            fast(),
        );
        assert!(g.generate(&GenerationRequest::default()).await.is_ok());
        assert_eq!(g.total_retries(), 2);
        assert_eq!(g.circuit_state_name(), "closed");
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_error_not_retried() {
        let g = ReliableGenerator::new(
            ScriptedGenerator::new(vec![
                MockReply::Error(GenerationError::AuthenticationFailed("bad key".into())),
                MockReply::text(&["unreachable"]),
            ]),
            fast(),
        );
        let err = g.generate(&GenerationRequest::default()).await.err().unwrap();
        assert!(matches!(err, GenerationError::AuthenticationFailed(_)));
        assert_eq!(g.total_retries(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_retries() {
        let replies = (0..4).map(|_| MockReply::Error(upstream())).collect();
        let g = ReliableGenerator::new(ScriptedGenerator::new(replies), fast());
        let err = g.generate(&GenerationRequest::default()).await.err().unwrap();
        assert!(matches!(err, GenerationError::Upstream { .. }));
        assert_eq!(g.total_retries(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn circuit_opens_after_threshold() {
        let config = ReliableConfig { max_retries: 0, circuit_breaker_threshold: 2, ..fast() };
        let replies = (0..3).map(|_| MockReply::Error(upstream())).collect();
        let g = ReliableGenerator::new(ScriptedGenerator::new(replies), config);
        let _ = g.generate(&GenerationRequest::default()).await;
        let _ = g.generate(&GenerationRequest::default()).await;
        assert_eq!(g.circuit_state_name(), "open");

        let err = g.generate(&GenerationRequest::default()).await.err().unwrap();
        assert!(matches!(err, GenerationError::Provider(_)));
    }

    #[test]
    fn delay_respects_rate_limit_hint() {
        let g = ReliableGenerator::new(ScriptedGenerator::new(vec![]), fast());
        assert_eq!(g.retry_delay(0, Some(Duration::from_secs(3))), Duration::from_secs(3));
        let d = g.retry_delay(10, None);
        assert!(d <= Duration::from_millis(60), "capped with jitter, got {d:?}");
    }
}
