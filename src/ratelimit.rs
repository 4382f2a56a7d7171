//! Adaptive rate limiting for external providers.
//!
//! One `RateLimiter` instance guards one provider. It slows down when errors
//! occur and speeds back up on success, so a run self-tunes to whatever the
//! service tolerates on a given day.

use rand::Rng;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Minimum delay between requests.
    pub min_delay: Duration,
    /// Maximum delay between requests.
    pub max_delay: Duration,
    /// Starting delay.
    pub initial_delay: Duration,
    /// Multiply delay by this on error.
    pub backoff_factor: f64,
    /// Multiply delay by this on success.
    pub recovery_factor: f64,
    /// Random jitter fraction (0.1 = ±10%).
    pub jitter: f64,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            initial_delay: Duration::from_millis(500),
            backoff_factor: 2.0,
            recovery_factor: 0.9,
            jitter: 0.1,
        }
    }
}

#[derive(Debug)]
struct State {
    current_delay: f64,
    consecutive_errors: u32,
    last_request: Option<Instant>,
}

/// Adaptive rate limiter with exponential backoff.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimiterConfig,
    state: Mutex<State>,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        let current_delay = config.initial_delay.as_secs_f64();
        Self {
            config,
            state: Mutex::new(State {
                current_delay,
                consecutive_errors: 0,
                last_request: None,
            }),
        }
    }

    /// Sleep until enough time has passed since the previous request.
    pub async fn wait(&self) {
        let sleep_for = {
            let mut state = self.state.lock().await;
            let delay = self.delay_with_jitter(state.current_delay);
            let sleep_for = match state.last_request {
                Some(last) => delay.saturating_sub(last.elapsed()),
                None => Duration::ZERO,
            };
            state.last_request = Some(Instant::now() + sleep_for);
            sleep_for
        };

        if !sleep_for.is_zero() {
            tokio::time::sleep(sleep_for).await;
        }
    }

    /// Report a successful request; recovers the delay toward the minimum.
    pub async fn report_success(&self) {
        let mut state = self.state.lock().await;
        state.consecutive_errors = 0;
        state.current_delay = (state.current_delay * self.config.recovery_factor)
            .max(self.config.min_delay.as_secs_f64());
    }

    /// Report a failed request; backs the delay off toward the maximum.
    pub async fn report_error(&self) {
        let mut state = self.state.lock().await;
        state.consecutive_errors += 1;
        state.current_delay = (state.current_delay * self.config.backoff_factor)
            .min(self.config.max_delay.as_secs_f64());
    }

    /// Delay before retry `attempt` (0-based), with exponential backoff on
    /// top of the current adaptive delay.
    pub async fn retry_delay(&self, attempt: u32) -> Duration {
        let state = self.state.lock().await;
        let base = state.current_delay * self.config.backoff_factor.powi(attempt as i32);
        let jitter = rand::thread_rng().gen_range(0.0..=base * self.config.jitter);
        Duration::from_secs_f64((base + jitter).min(self.config.max_delay.as_secs_f64()))
    }

    /// Current adaptive delay in seconds. Exposed for tests and diagnostics.
    pub async fn current_delay(&self) -> f64 {
        self.state.lock().await.current_delay
    }

    /// Consecutive errors since the last success.
    pub async fn consecutive_errors(&self) -> u32 {
        self.state.lock().await.consecutive_errors
    }

    fn delay_with_jitter(&self, current: f64) -> Duration {
        let range = current * self.config.jitter;
        let jitter = if range > 0.0 {
            rand::thread_rng().gen_range(-range..=range)
        } else {
            0.0
        };
        Duration::from_secs_f64((current + jitter).max(self.config.min_delay.as_secs_f64()))
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimiterConfig::default())
    }
}
