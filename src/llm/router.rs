//! Multi-provider routing with failover.
//!
//! One `generate` call resolves the model's provider chain, then walks it:
//! rate-limit admission, circuit-breaker admission, adapter invocation,
//! health bookkeeping, first success wins. Breaker, limiter, and health
//! state live in [`RouterServices`], injected so tests can isolate
//! instances; in production one instance is shared process-wide across all
//! concurrent runs.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::circuit_breaker::CircuitBreaker;
use super::json_repair::parse_or_repair;
use super::keys::{ApiKeyResolver, CredentialStore, KeyError};
use super::provider::{
    AdapterRequest, ModelCatalog, ProviderAdapter, ProviderId,
};
use super::rate_limiter::{estimate_tokens, RateLimiter};

/// Consecutive errors before a provider is considered unavailable.
const HEALTH_THRESHOLD: u32 = 3;

/// How many times a JSON-mode call is re-invoked when repair fails.
const MAX_JSON_RETRIES: u32 = 2;

const JSON_RETRY_BASE_BACKOFF: Duration = Duration::from_millis(500);

/// Capability tier for a call, sizing the response budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    Fast,
    #[default]
    Balanced,
    Deep,
}

impl ModelTier {
    pub fn max_tokens(self) -> u32 {
        match self {
            Self::Fast => 1024,
            Self::Balanced => 2048,
            Self::Deep => 4096,
        }
    }
}

/// Error from a routed generation.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error(transparent)]
    NoProvider(#[from] KeyError),

    #[error("all providers exhausted for model '{model}': {last_error}")]
    AllProvidersExhausted { model: String, last_error: String },

    #[error("model '{model}' returned unparseable JSON after {attempts} attempts")]
    MalformedJson { model: String, attempts: u32 },
}

/// Per-provider consecutive-error health tracking. Independent of breaker
/// and limiter state; only influences candidate ordering.
#[derive(Debug, Default)]
pub struct ProviderHealth {
    errors: Mutex<HashMap<ProviderId, u32>>,
}

impl ProviderHealth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_available(&self, provider: ProviderId) -> bool {
        let errors = self.errors.lock().expect("health poisoned");
        errors.get(&provider).copied().unwrap_or(0) < HEALTH_THRESHOLD
    }

    pub fn record_success(&self, provider: ProviderId) {
        let mut errors = self.errors.lock().expect("health poisoned");
        errors.insert(provider, 0);
    }

    pub fn record_failure(&self, provider: ProviderId) {
        let mut errors = self.errors.lock().expect("health poisoned");
        let count = errors.entry(provider).or_insert(0);
        *count += 1;
        if *count == HEALTH_THRESHOLD {
            warn!(%provider, "provider marked unavailable after consecutive errors");
        }
    }
}

/// Process-wide resilience state: one breaker, limiter, and health entry
/// per provider, shared across all debate runs.
pub struct RouterServices {
    breakers: HashMap<ProviderId, CircuitBreaker>,
    limiters: HashMap<ProviderId, RateLimiter>,
    pub health: ProviderHealth,
}

impl RouterServices {
    pub fn new() -> Self {
        let mut breakers = HashMap::new();
        let mut limiters = HashMap::new();
        for provider in ProviderId::all() {
            breakers.insert(*provider, CircuitBreaker::new(provider.vendor_prefix()));
            limiters.insert(*provider, RateLimiter::new(provider.vendor_prefix()));
        }
        Self {
            breakers,
            limiters,
            health: ProviderHealth::new(),
        }
    }

    pub fn breaker(&self, provider: ProviderId) -> &CircuitBreaker {
        &self.breakers[&provider]
    }

    pub fn limiter(&self, provider: ProviderId) -> &RateLimiter {
        &self.limiters[&provider]
    }
}

impl Default for RouterServices {
    fn default() -> Self {
        Self::new()
    }
}

/// One generation request as seen by the router.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub prompt: String,
    pub model: String,
    pub tier: ModelTier,
    pub temperature: f32,
    pub json_mode: bool,
    pub web_search: bool,
    pub caller_id: String,
}

impl GenerateRequest {
    pub fn new(prompt: &str, model: &str, caller_id: &str) -> Self {
        Self {
            prompt: prompt.to_string(),
            model: model.to_string(),
            tier: ModelTier::default(),
            temperature: 0.7,
            json_mode: false,
            web_search: false,
            caller_id: caller_id.to_string(),
        }
    }

    pub fn tier(mut self, tier: ModelTier) -> Self {
        self.tier = tier;
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn json_mode(mut self, json_mode: bool) -> Self {
        self.json_mode = json_mode;
        self
    }

    pub fn web_search(mut self, web_search: bool) -> Self {
        self.web_search = web_search;
        self
    }
}

/// The generation seam the debate engine consumes. [`LlmRouter`] is the
/// production implementation; tests substitute scripted clients.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn generate(&self, req: &GenerateRequest) -> Result<String, RouterError>;
}

/// The routing facade consumed by the debate engine.
pub struct LlmRouter<S> {
    catalog: ModelCatalog,
    resolver: ApiKeyResolver<S>,
    adapters: HashMap<ProviderId, Arc<dyn ProviderAdapter>>,
    services: Arc<RouterServices>,
}

impl<S: CredentialStore> LlmRouter<S> {
    pub fn new(
        catalog: ModelCatalog,
        resolver: ApiKeyResolver<S>,
        adapters: HashMap<ProviderId, Arc<dyn ProviderAdapter>>,
        services: Arc<RouterServices>,
    ) -> Self {
        Self {
            catalog,
            resolver,
            adapters,
            services,
        }
    }

    /// Order the chain for this request: healthy providers before unhealthy
    /// ones (unhealthy stay as last resort), and the search-capable
    /// aggregator first when web search is requested.
    fn order_chain(
        &self,
        mut chain: Vec<(ProviderId, String)>,
        web_search: bool,
    ) -> Vec<(ProviderId, String)> {
        chain.sort_by_key(|(provider, _)| !self.services.health.is_available(*provider));
        if web_search {
            if let Some(idx) = chain.iter().position(|(p, _)| {
                self.adapters
                    .get(p)
                    .map(|a| a.supports_web_search())
                    .unwrap_or(false)
            }) {
                let searchable = chain.remove(idx);
                chain.insert(0, searchable);
            }
            // No search-capable candidate: degrade silently to plain
            // generation on whatever the chain offers.
        }
        chain
    }

    /// One pass over the provider chain; first success wins.
    async fn invoke_chain(
        &self,
        req: &GenerateRequest,
        canonical_model: &str,
        chain: &[(ProviderId, String)],
    ) -> Result<String, RouterError> {
        let estimated = estimate_tokens(&req.prompt);
        let mut last_error = "chain empty".to_string();

        for (provider, credential) in chain {
            let provider = *provider;
            let Some(adapter) = self.adapters.get(&provider) else {
                debug!(%provider, "no adapter registered; skipping");
                continue;
            };

            if !self.services.limiter(provider).check(estimated) {
                debug!(%provider, estimated, "rate limit denied admission; skipping");
                last_error = format!("{provider}: rate limited");
                continue;
            }

            if let Err(e) = self.services.breaker(provider).try_acquire() {
                self.services.health.record_failure(provider);
                last_error = format!("{provider}: {e}");
                continue;
            }

            let adapter_req = AdapterRequest {
                model: canonical_model.to_string(),
                prompt: req.prompt.clone(),
                temperature: req.temperature,
                max_tokens: req.tier.max_tokens(),
                json_mode: req.json_mode,
                web_search: req.web_search && adapter.supports_web_search(),
                api_key: credential.clone(),
            };

            match adapter.generate(&adapter_req).await {
                Ok(response) => {
                    self.services.breaker(provider).record_success();
                    self.services.health.record_success(provider);
                    let tokens = if response.tokens_used > 0 {
                        response.tokens_used
                    } else {
                        estimated
                    };
                    self.services.limiter(provider).record(tokens);
                    info!(%provider, model = canonical_model, tokens, "generation succeeded");
                    return Ok(response.text);
                }
                Err(e) => {
                    self.services.breaker(provider).record_failure();
                    self.services.health.record_failure(provider);
                    warn!(%provider, model = canonical_model, error = %e, "provider call failed");
                    last_error = format!("{provider}: {e}");
                }
            }
        }

        Err(RouterError::AllProvidersExhausted {
            model: req.model.clone(),
            last_error,
        })
    }

    /// Generate text for a request, failing over across the provider chain.
    ///
    /// In JSON mode the response must parse; structural repair is tried
    /// before any re-invocation, and re-invocations are bounded with
    /// exponential backoff. The returned text is the canonical
    /// serialization of the parsed value.
    pub async fn generate(&self, req: &GenerateRequest) -> Result<String, RouterError> {
        let (native, canonical_model) = self.catalog.resolve(&req.model);
        let chain = self
            .resolver
            .resolve_chain(&req.model, native, &req.caller_id)
            .await?;
        let chain = self.order_chain(chain, req.web_search);

        let mut attempts = 0;
        loop {
            let text = self.invoke_chain(req, &canonical_model, &chain).await?;
            if !req.json_mode {
                return Ok(text);
            }
            attempts += 1;
            match parse_or_repair(&text) {
                Some(value) => return Ok(value.to_string()),
                None if attempts <= MAX_JSON_RETRIES => {
                    let backoff = JSON_RETRY_BASE_BACKOFF * 2u32.pow(attempts - 1);
                    warn!(
                        model = %req.model,
                        attempts,
                        backoff_ms = backoff.as_millis() as u64,
                        "JSON repair failed; re-invoking model"
                    );
                    tokio::time::sleep(backoff).await;
                }
                None => {
                    return Err(RouterError::MalformedJson {
                        model: req.model.clone(),
                        attempts,
                    })
                }
            }
        }
    }
}

#[async_trait]
impl<S: CredentialStore> LlmClient for LlmRouter<S> {
    async fn generate(&self, req: &GenerateRequest) -> Result<String, RouterError> {
        LlmRouter::generate(self, req).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::keys::MemoryCredentialStore;
    use crate::llm::provider::{AdapterResponse, ProviderError};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct ScriptedAdapter {
        provider: ProviderId,
        fail_first: u32,
        calls: AtomicU32,
        text: String,
        web_search: bool,
    }

    impl ScriptedAdapter {
        fn ok(provider: ProviderId, text: &str) -> Self {
            Self {
                provider,
                fail_first: 0,
                calls: AtomicU32::new(0),
                text: text.to_string(),
                web_search: provider.is_aggregator(),
            }
        }

        fn failing(provider: ProviderId, fail_first: u32, text: &str) -> Self {
            Self {
                fail_first,
                ..Self::ok(provider, text)
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ProviderAdapter for ScriptedAdapter {
        fn provider(&self) -> ProviderId {
            self.provider
        }

        fn supports_web_search(&self) -> bool {
            self.web_search
        }

        async fn generate(&self, _req: &AdapterRequest) -> Result<AdapterResponse, ProviderError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first {
                return Err(ProviderError::RequestFailed {
                    provider: self.provider,
                    reason: "scripted failure".to_string(),
                });
            }
            Ok(AdapterResponse {
                text: self.text.clone(),
                tokens_used: 100,
            })
        }
    }

    fn router_with(
        adapters: Vec<Arc<ScriptedAdapter>>,
        keys: &[(ProviderId, &str)],
    ) -> LlmRouter<MemoryCredentialStore> {
        let store = MemoryCredentialStore::new();
        for (provider, key) in keys {
            store.set("caller", *provider, key);
        }
        let map: HashMap<ProviderId, Arc<dyn ProviderAdapter>> = adapters
            .into_iter()
            .map(|a| (a.provider(), a as Arc<dyn ProviderAdapter>))
            .collect();
        LlmRouter::new(
            ModelCatalog::with_defaults(),
            ApiKeyResolver::new(store),
            map,
            Arc::new(RouterServices::new()),
        )
    }

    #[tokio::test]
    async fn test_native_success_first_try() {
        let openai = Arc::new(ScriptedAdapter::ok(ProviderId::OpenAi, "hello"));
        let router = router_with(vec![openai.clone()], &[(ProviderId::OpenAi, "sk-a")]);

        let text = router
            .generate(&GenerateRequest::new("hi", "gpt-4o", "caller"))
            .await
            .unwrap();
        assert_eq!(text, "hello");
        assert_eq!(openai.calls(), 1);
    }

    #[tokio::test]
    async fn test_failover_to_aggregator() {
        let anthropic = Arc::new(ScriptedAdapter::failing(ProviderId::Anthropic, 10, "never"));
        let openrouter = Arc::new(ScriptedAdapter::ok(ProviderId::OpenRouter, "fallback"));
        let router = router_with(
            vec![anthropic.clone(), openrouter.clone()],
            &[
                (ProviderId::Anthropic, "sk-ant"),
                (ProviderId::OpenRouter, "sk-or"),
            ],
        );

        let text = router
            .generate(&GenerateRequest::new("hi", "claude-opus-4", "caller"))
            .await
            .unwrap();
        assert_eq!(text, "fallback");
        assert_eq!(anthropic.calls(), 1);
        assert_eq!(openrouter.calls(), 1);
    }

    #[tokio::test]
    async fn test_all_exhausted() {
        let openai = Arc::new(ScriptedAdapter::failing(ProviderId::OpenAi, 10, "never"));
        let router = router_with(vec![openai], &[(ProviderId::OpenAi, "sk-a")]);

        let err = router
            .generate(&GenerateRequest::new("hi", "gpt-4o", "caller"))
            .await
            .unwrap_err();
        assert!(matches!(err, RouterError::AllProvidersExhausted { .. }));
    }

    #[tokio::test]
    async fn test_no_credential_is_typed() {
        let router = router_with(vec![], &[]);
        let err = router
            .generate(&GenerateRequest::new("hi", "gpt-4o", "caller"))
            .await
            .unwrap_err();
        assert!(matches!(err, RouterError::NoProvider(KeyError::NoCredential { .. })));
    }

    #[tokio::test]
    async fn test_web_search_prefers_aggregator() {
        let openai = Arc::new(ScriptedAdapter::ok(ProviderId::OpenAi, "native"));
        let openrouter = Arc::new(ScriptedAdapter::ok(ProviderId::OpenRouter, "searched"));
        let router = router_with(
            vec![openai.clone(), openrouter.clone()],
            &[
                (ProviderId::OpenAi, "sk-a"),
                (ProviderId::OpenRouter, "sk-or"),
            ],
        );

        let req = GenerateRequest::new("hi", "gpt-4o", "caller").web_search(true);
        let text = router.generate(&req).await.unwrap();
        assert_eq!(text, "searched");
        assert_eq!(openai.calls(), 0);
        assert_eq!(openrouter.calls(), 1);
    }

    #[tokio::test]
    async fn test_json_mode_repairs_before_reinvoking() {
        let openai = Arc::new(ScriptedAdapter::ok(
            ProviderId::OpenAi,
            "```json\n{\"a\": 1,}\n```",
        ));
        let router = router_with(vec![openai.clone()], &[(ProviderId::OpenAi, "sk-a")]);

        let req = GenerateRequest::new("hi", "gpt-4o", "caller").json_mode(true);
        let text = router.generate(&req).await.unwrap();
        assert_eq!(text, "{\"a\":1}");
        // Repair succeeded; no second billable call.
        assert_eq!(openai.calls(), 1);
    }

    #[tokio::test]
    async fn test_health_reorders_after_failures() {
        let health = ProviderHealth::new();
        health.record_failure(ProviderId::OpenAi);
        health.record_failure(ProviderId::OpenAi);
        assert!(health.is_available(ProviderId::OpenAi));
        health.record_failure(ProviderId::OpenAi);
        assert!(!health.is_available(ProviderId::OpenAi));
        health.record_success(ProviderId::OpenAi);
        assert!(health.is_available(ProviderId::OpenAi));
    }
}
