//! Model Router: tier policy, provider fallback chain, circuit breaker,
//! rate limiting, and cost/token accounting.

pub mod client;
pub mod rate_limit;

pub use client::{ClientCallError, CompletionRequest, Message, ModelClient, ModelResponse};
pub use rate_limit::{RateLimitConfig, RateLimiter};

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::time::sleep;

/// Abstraction over model capability/cost (GLOSSARY: Tier). The router maps
/// a tier to a concrete model id per provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelTier {
    Mini,
    Advanced,
}

impl ModelTier {
    /// One step up, saturating at Advanced.
    pub fn step_up(self) -> Self {
        match self {
            Self::Mini => Self::Advanced,
            Self::Advanced => Self::Advanced,
        }
    }
}

/// CLOSED/OPEN/HALF_OPEN circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

struct CircuitBreaker {
    state: BreakerState,
    consecutive_failures: u32,
    trip_threshold: u32,
    opened_at: Option<Instant>,
    cooldown: Duration,
}

impl CircuitBreaker {
    fn new(trip_threshold: u32, cooldown: Duration) -> Self {
        Self { state: BreakerState::Closed, consecutive_failures: 0, trip_threshold, opened_at: None, cooldown }
    }

    /// Whether a request may currently be attempted through this provider.
    fn allow_request(&mut self) -> bool {
        match self.state {
            BreakerState::Closed => true,
            BreakerState::Open => {
                if self.opened_at.is_some_and(|at| at.elapsed() >= self.cooldown) {
                    self.state = BreakerState::HalfOpen;
                    true
                } else {
                    false
                }
            }
            BreakerState::HalfOpen => true,
        }
    }

    fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.state = BreakerState::Closed;
        self.opened_at = None;
    }

    fn record_transient_failure(&mut self) {
        self.consecutive_failures += 1;
        if self.state == BreakerState::HalfOpen || self.consecutive_failures >= self.trip_threshold {
            self.state = BreakerState::Open;
            self.opened_at = Some(Instant::now());
        }
    }
}

/// One registered provider: a `ModelClient` plus its circuit breaker.
struct Provider {
    client: Arc<dyn ModelClient>,
    breaker: Mutex<CircuitBreaker>,
}

/// Per-job/per-stage cost and token accumulator, read by the orchestrator
/// at each checkpoint boundary.
#[derive(Debug, Clone, Default)]
pub struct CostAccumulator {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub usd_cost: f64,
}

/// One completed call's cost-ledger row (`job_id, stage, model_id,
/// prompt_tokens, completion_tokens, usd`), returned to the caller so it
/// can be persisted by whoever owns the ledger (the Triple Memory store).
#[derive(Debug, Clone)]
pub struct RouterCallRecord {
    pub model_id: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub usd_cost: f64,
    pub transient_retries: u32,
}

/// Maps USD cost from token counts. A fixed per-1k-token rate table keyed
/// by tier; a real deployment would key this by concrete model id, but the
/// core only needs tier-level estimates for budget enforcement.
#[derive(Debug, Clone, Copy)]
pub struct PricingTable {
    pub mini_prompt_per_1k: f64,
    pub mini_completion_per_1k: f64,
    pub advanced_prompt_per_1k: f64,
    pub advanced_completion_per_1k: f64,
}

impl Default for PricingTable {
    fn default() -> Self {
        Self {
            mini_prompt_per_1k: 0.0008,
            mini_completion_per_1k: 0.004,
            advanced_prompt_per_1k: 0.003,
            advanced_completion_per_1k: 0.015,
        }
    }
}

impl PricingTable {
    pub fn cost(&self, tier: ModelTier, prompt_tokens: u64, completion_tokens: u64) -> f64 {
        let (p, c) = match tier {
            ModelTier::Mini => (self.mini_prompt_per_1k, self.mini_completion_per_1k),
            ModelTier::Advanced => (self.advanced_prompt_per_1k, self.advanced_completion_per_1k),
        };
        (prompt_tokens as f64 / 1000.0) * p + (completion_tokens as f64 / 1000.0) * c
    }

    /// A conservative pre-call estimate used for the `max_cost_per_job`
    /// pre-flight check.
    pub fn estimate(&self, tier: ModelTier, max_tokens: u32) -> f64 {
        self.cost(tier, max_tokens as u64 / 3, max_tokens as u64)
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum RouterError {
    #[error("no provider available for tier {0:?} (all circuits open or exhausted)")]
    NoProviderAvailable(ModelTier),
    #[error("model provider returned malformed response: {0}")]
    MalformedResponse(String),
    #[error("model provider returned a permanent error (status {status}): {body}")]
    Permanent { status: u16, body: String },
    #[error("rate limiter deadline exceeded after waiting {0:?}")]
    RateLimiterDeadlineExceeded(Duration),
    #[error("cost budget of ${budget:.4} exceeded (spent ${spent:.4}, next call est. ${estimate:.4})")]
    CostExceeded { budget: f64, spent: f64, estimate: f64 },
}

/// Maps tiers to concrete model identifiers for one provider.
#[derive(Debug, Clone)]
pub struct TierModelMap {
    pub mini: String,
    pub advanced: String,
}

impl TierModelMap {
    pub fn model_for(&self, tier: ModelTier) -> &str {
        match tier {
            ModelTier::Mini => &self.mini,
            ModelTier::Advanced => &self.advanced,
        }
    }
}

/// The Model Router: tier policy, rate limiting, retry with backoff,
/// circuit breaker, and cost accounting, composed over an ordered list of
/// providers.
pub struct ModelRouter {
    providers: Vec<Provider>,
    tier_models: TierModelMap,
    rate_limiter: Arc<RateLimiter>,
    pricing: PricingTable,
    backoff_base: Duration,
    backoff_cap: Duration,
    max_cost_per_job: f64,
    spent: Mutex<f64>,
}

impl ModelRouter {
    pub fn new(
        tier_models: TierModelMap,
        rate_limiter: Arc<RateLimiter>,
        pricing: PricingTable,
        backoff_base: Duration,
        backoff_cap: Duration,
        max_cost_per_job: f64,
    ) -> Self {
        Self {
            providers: Vec::new(),
            tier_models,
            rate_limiter,
            pricing,
            backoff_base,
            backoff_cap,
            max_cost_per_job,
            spent: Mutex::new(0.0),
        }
    }

    /// Register a provider at the back of the fallback chain. Trip threshold defaults to 5 consecutive
    /// transient failures, cooldown to 30s.
    pub fn register_provider(&mut self, client: Arc<dyn ModelClient>) {
        self.providers.push(Provider { client, breaker: Mutex::new(CircuitBreaker::new(5, Duration::from_secs(30))) });
    }

    pub fn cumulative_cost(&self) -> f64 {
        *self.spent.lock().unwrap()
    }

    /// Seed the router's running spend, used when resuming a job whose
    /// earlier stages already spent against the same `max_cost_per_job`
    /// budget: a fresh `ModelRouter` is built per job
    /// run, so the prior cumulative cost has to be carried in explicitly.
    pub fn seed_spent(&self, amount: f64) {
        *self.spent.lock().unwrap() = amount;
    }

    /// Execute one completion against the preferred tier, walking the
    /// fallback chain on transient/circuit-open failures and retrying with
    /// exponential backoff + jitter within each provider attempt (spec
    /// §4.3 "Error classification", §7 retry policy). Returns the response
    /// plus a ledger-ready call record. Schema errors are the agent's
    /// concern (parsing the returned text), not the router's — the router
    /// only classifies transport-level failures.
    pub async fn complete(
        &self,
        tier: ModelTier,
        system_prompt: &str,
        user_prompt: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<(ModelResponse, RouterCallRecord), RouterError> {
        let estimate = self.pricing.estimate(tier, max_tokens);
        {
            let spent = *self.spent.lock().unwrap();
            if spent + estimate > self.max_cost_per_job {
                return Err(RouterError::CostExceeded { budget: self.max_cost_per_job, spent, estimate });
            }
        }

        let model_id = self.tier_models.model_for(tier).to_string();
        let mut transient_retries = 0u32;
        let mut last_err: Option<ClientCallError> = None;

        for provider in &self.providers {
            let mut attempts_on_provider = 0u32;
            loop {
                {
                    let mut breaker = provider.breaker.lock().unwrap();
                    if !breaker.allow_request() {
                        break;
                    }
                }

                if self.rate_limiter.acquire(&model_id, max_tokens).await.is_err() {
                    return Err(RouterError::RateLimiterDeadlineExceeded(self.backoff_cap));
                }

                let request = CompletionRequest {
                    model_id: model_id.clone(),
                    messages: vec![Message::system(system_prompt), Message::user(user_prompt)],
                    max_tokens,
                    temperature,
                };

                match provider.client.complete(request).await {
                    Ok(response) => {
                        provider.breaker.lock().unwrap().record_success();
                        let cost = self.pricing.cost(tier, response.prompt_tokens, response.completion_tokens);
                        *self.spent.lock().unwrap() += cost;
                        let record = RouterCallRecord {
                            model_id,
                            prompt_tokens: response.prompt_tokens,
                            completion_tokens: response.completion_tokens,
                            usd_cost: cost,
                            transient_retries,
                        };
                        return Ok((response, record));
                    }
                    Err(ClientCallError::Permanent { status, body }) => {
                        return Err(RouterError::Permanent { status, body });
                    }
                    Err(err @ ClientCallError::Transient(_)) | Err(err @ ClientCallError::RateLimited { .. }) => {
                        provider.breaker.lock().unwrap().record_transient_failure();
                        attempts_on_provider += 1;
                        let delay = match &err {
                            ClientCallError::RateLimited { retry_after: Some(d) } => *d,
                            _ => self.backoff_delay(transient_retries),
                        };
                        transient_retries += 1;
                        last_err = Some(err);
                        if attempts_on_provider >= MAX_ATTEMPTS_PER_PROVIDER {
                            break;
                        }
                        sleep(delay).await;
                    }
                }
            }
        }

        let _ = last_err;
        Err(RouterError::NoProviderAvailable(tier))
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = self.backoff_base.as_millis() as u64 * 2u64.saturating_pow(attempt);
        let capped = exp.min(self.backoff_cap.as_millis() as u64);
        let jitter = (capped as f64 * 0.1 * fastrand_fraction(attempt)) as u64;
        Duration::from_millis(capped.saturating_sub(jitter / 2) + jitter)
    }
}

/// How many times `complete` retries the same provider on a transient
/// failure before moving on to the next provider in the fallback chain.
const MAX_ATTEMPTS_PER_PROVIDER: u32 = 3;

/// Deterministic pseudo-jitter derived from the attempt count — avoids a
/// extra `rand` dependency, while still perturbing the
/// backoff delay so concurrent retries don't thunder in lockstep.
fn fastrand_fraction(attempt: u32) -> f64 {
    let seed = (attempt.wrapping_mul(2654435761)) % 1000;
    seed as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::client::mock::{MockModelClient, ScriptedOutcome};
    use super::*;

    fn router_with(client: MockModelClient, max_cost: f64) -> ModelRouter {
        let mut router = ModelRouter::new(
            TierModelMap { mini: "mini-model".into(), advanced: "advanced-model".into() },
            Arc::new(RateLimiter::new(Duration::from_secs(5))),
            PricingTable::default(),
            Duration::from_millis(1),
            Duration::from_millis(10),
            max_cost,
        );
        router.register_provider(Arc::new(client));
        router
    }

    #[tokio::test]
    async fn successful_call_records_cost_and_tokens() {
        let client = MockModelClient::new(
            "primary",
            vec![ScriptedOutcome::Ok(ModelResponse { text: "hello".into(), prompt_tokens: 100, completion_tokens: 50 })],
        );
        let router = router_with(client, 10.0);
        let (response, record) =
            router.complete(ModelTier::Mini, "sys", "user", 200, 0.7).await.unwrap();
        assert_eq!(response.text, "hello");
        assert_eq!(record.prompt_tokens, 100);
        assert!(router.cumulative_cost() > 0.0);
    }

    #[tokio::test]
    async fn transient_failures_retry_then_succeed() {
        let client = MockModelClient::new(
            "primary",
            vec![
                ScriptedOutcome::Err(ClientCallError::RateLimited { retry_after: None }),
                ScriptedOutcome::Err(ClientCallError::RateLimited { retry_after: None }),
                ScriptedOutcome::Ok(ModelResponse { text: "ok".into(), prompt_tokens: 10, completion_tokens: 10 }),
            ],
        );
        let router = router_with(client, 10.0);
        let (response, record) = router.complete(ModelTier::Mini, "sys", "user", 100, 0.5).await.unwrap();
        assert_eq!(response.text, "ok");
        assert_eq!(record.transient_retries, 2);
    }

    #[tokio::test]
    async fn permanent_error_is_not_retried() {
        let client = MockModelClient::new(
            "primary",
            vec![ScriptedOutcome::Err(ClientCallError::Permanent { status: 401, body: "bad key".into() })],
        );
        let router = router_with(client, 10.0);
        let err = router.complete(ModelTier::Mini, "sys", "user", 100, 0.5).await.unwrap_err();
        assert!(matches!(err, RouterError::Permanent { status: 401, .. }));
    }

    #[tokio::test]
    async fn zero_budget_fails_before_any_call() {
        let client = MockModelClient::new(
            "primary",
            vec![ScriptedOutcome::Ok(ModelResponse { text: "ok".into(), prompt_tokens: 10, completion_tokens: 10 })],
        );
        let router = router_with(client, 0.0);
        let err = router.complete(ModelTier::Mini, "sys", "user", 100, 0.5).await.unwrap_err();
        assert!(matches!(err, RouterError::CostExceeded { .. }));
    }

    #[test]
    fn tier_step_up_saturates_at_advanced() {
        assert!(matches!(ModelTier::Mini.step_up(), ModelTier::Advanced));
        assert!(matches!(ModelTier::Advanced.step_up(), ModelTier::Advanced));
    }

    #[test]
    fn circuit_breaker_opens_after_threshold_then_half_opens_after_cooldown() {
        let mut breaker = CircuitBreaker::new(2, Duration::from_millis(1));
        assert!(breaker.allow_request());
        breaker.record_transient_failure();
        assert!(breaker.allow_request());
        breaker.record_transient_failure();
        assert_eq!(breaker.state, BreakerState::Open);
        assert!(!breaker.allow_request());
        std::thread::sleep(Duration::from_millis(5));
        assert!(breaker.allow_request());
        assert_eq!(breaker.state, BreakerState::HalfOpen);
    }
}
