//! Provider adapters — a uniform "generate text" contract over concrete
//! LLM HTTP APIs, plus the model catalog that maps model identifiers to
//! their native provider.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

/// Identity of an upstream LLM provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderId {
    OpenAi,
    Anthropic,
    Google,
    /// Aggregator proxying multiple native vendors under one credential.
    OpenRouter,
}

impl ProviderId {
    pub fn all() -> &'static [ProviderId] {
        &[
            ProviderId::OpenAi,
            ProviderId::Anthropic,
            ProviderId::Google,
            ProviderId::OpenRouter,
        ]
    }

    pub fn is_aggregator(self) -> bool {
        matches!(self, Self::OpenRouter)
    }

    /// Vendor prefix used in aggregator model namespaces.
    pub fn vendor_prefix(self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Google => "google",
            Self::OpenRouter => "openrouter",
        }
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.vendor_prefix())
    }
}

/// Error from a single adapter call.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    #[error("request to {provider} failed: {reason}")]
    RequestFailed { provider: ProviderId, reason: String },

    #[error("{provider} returned HTTP {status}: {body}")]
    Http {
        provider: ProviderId,
        status: u16,
        body: String,
    },

    #[error("failed to parse {provider} response: {reason}")]
    ParseError { provider: ProviderId, reason: String },
}

/// A single generation request as seen by an adapter.
#[derive(Debug, Clone)]
pub struct AdapterRequest {
    pub model: String,
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub json_mode: bool,
    pub web_search: bool,
    pub api_key: String,
}

/// A successful adapter response.
#[derive(Debug, Clone)]
pub struct AdapterResponse {
    pub text: String,
    /// Token usage as reported by the provider; 0 when unreported.
    pub tokens_used: u64,
}

/// Uniform generate-text contract over one concrete provider API.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn provider(&self) -> ProviderId;

    /// Whether this provider can serve search-augmented generation.
    fn supports_web_search(&self) -> bool {
        false
    }

    async fn generate(&self, req: &AdapterRequest) -> Result<AdapterResponse, ProviderError>;
}

const HTTP_TIMEOUT: Duration = Duration::from_secs(120);

fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .expect("failed to create HTTP client")
}

fn nonempty_text(
    provider: ProviderId,
    text: Option<&str>,
) -> Result<String, ProviderError> {
    match text {
        Some(t) if !t.trim().is_empty() => Ok(t.to_string()),
        _ => Err(ProviderError::ParseError {
            provider,
            reason: "response contained no text content".to_string(),
        }),
    }
}

async fn read_json(
    provider: ProviderId,
    response: reqwest::Response,
) -> Result<Value, ProviderError> {
    if !response.status().is_success() {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        return Err(ProviderError::Http {
            provider,
            status,
            body,
        });
    }
    response
        .json::<Value>()
        .await
        .map_err(|e| ProviderError::ParseError {
            provider,
            reason: e.to_string(),
        })
}

/// OpenAI chat-completions adapter.
pub struct OpenAiAdapter {
    client: reqwest::Client,
    base_url: String,
}

impl OpenAiAdapter {
    pub fn new() -> Self {
        Self::with_base_url("https://api.openai.com/v1")
    }

    pub fn with_base_url(base_url: &str) -> Self {
        Self {
            client: http_client(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

impl Default for OpenAiAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiAdapter {
    fn provider(&self) -> ProviderId {
        ProviderId::OpenAi
    }

    async fn generate(&self, req: &AdapterRequest) -> Result<AdapterResponse, ProviderError> {
        let provider = self.provider();
        let mut body = serde_json::json!({
            "model": req.model,
            "messages": [{"role": "user", "content": req.prompt}],
            "temperature": req.temperature,
            "max_tokens": req.max_tokens,
        });
        if req.json_mode {
            body["response_format"] = serde_json::json!({"type": "json_object"});
        }

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&req.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::RequestFailed {
                provider,
                reason: e.to_string(),
            })?;

        let json = read_json(provider, response).await?;
        let text = nonempty_text(provider, json["choices"][0]["message"]["content"].as_str())?;
        let tokens_used = json["usage"]["total_tokens"].as_u64().unwrap_or(0);
        Ok(AdapterResponse { text, tokens_used })
    }
}

/// Anthropic messages adapter.
pub struct AnthropicAdapter {
    client: reqwest::Client,
    base_url: String,
}

impl AnthropicAdapter {
    pub fn new() -> Self {
        Self::with_base_url("https://api.anthropic.com")
    }

    pub fn with_base_url(base_url: &str) -> Self {
        Self {
            client: http_client(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

impl Default for AnthropicAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProviderAdapter for AnthropicAdapter {
    fn provider(&self) -> ProviderId {
        ProviderId::Anthropic
    }

    async fn generate(&self, req: &AdapterRequest) -> Result<AdapterResponse, ProviderError> {
        let provider = self.provider();
        // No native JSON response mode; the prompt carries the instruction.
        let body = serde_json::json!({
            "model": req.model,
            "max_tokens": req.max_tokens,
            "temperature": req.temperature,
            "messages": [{"role": "user", "content": req.prompt}],
        });

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &req.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::RequestFailed {
                provider,
                reason: e.to_string(),
            })?;

        let json = read_json(provider, response).await?;
        let text = nonempty_text(provider, json["content"][0]["text"].as_str())?;
        let input = json["usage"]["input_tokens"].as_u64().unwrap_or(0);
        let output = json["usage"]["output_tokens"].as_u64().unwrap_or(0);
        Ok(AdapterResponse {
            text,
            tokens_used: input + output,
        })
    }
}

/// Google Gemini generateContent adapter.
pub struct GeminiAdapter {
    client: reqwest::Client,
    base_url: String,
}

impl GeminiAdapter {
    pub fn new() -> Self {
        Self::with_base_url("https://generativelanguage.googleapis.com/v1beta")
    }

    pub fn with_base_url(base_url: &str) -> Self {
        Self {
            client: http_client(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

impl Default for GeminiAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProviderAdapter for GeminiAdapter {
    fn provider(&self) -> ProviderId {
        ProviderId::Google
    }

    async fn generate(&self, req: &AdapterRequest) -> Result<AdapterResponse, ProviderError> {
        let provider = self.provider();
        let mut generation_config = serde_json::json!({
            "temperature": req.temperature,
            "maxOutputTokens": req.max_tokens,
        });
        if req.json_mode {
            generation_config["responseMimeType"] = serde_json::json!("application/json");
        }
        let body = serde_json::json!({
            "contents": [{"parts": [{"text": req.prompt}]}],
            "generationConfig": generation_config,
        });

        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, req.model, req.api_key
        );
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::RequestFailed {
                provider,
                reason: e.to_string(),
            })?;

        let json = read_json(provider, response).await?;
        let text = nonempty_text(
            provider,
            json["candidates"][0]["content"]["parts"][0]["text"].as_str(),
        )?;
        let tokens_used = json["usageMetadata"]["totalTokenCount"].as_u64().unwrap_or(0);
        Ok(AdapterResponse { text, tokens_used })
    }
}

/// OpenRouter aggregator adapter (OpenAI-compatible schema). The one
/// provider in the chain that can serve search-augmented generation.
pub struct OpenRouterAdapter {
    client: reqwest::Client,
    base_url: String,
}

impl OpenRouterAdapter {
    pub fn new() -> Self {
        Self::with_base_url("https://openrouter.ai/api/v1")
    }

    pub fn with_base_url(base_url: &str) -> Self {
        Self {
            client: http_client(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

impl Default for OpenRouterAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProviderAdapter for OpenRouterAdapter {
    fn provider(&self) -> ProviderId {
        ProviderId::OpenRouter
    }

    fn supports_web_search(&self) -> bool {
        true
    }

    async fn generate(&self, req: &AdapterRequest) -> Result<AdapterResponse, ProviderError> {
        let provider = self.provider();
        let model = if req.web_search {
            format!("{}:online", req.model)
        } else {
            req.model.clone()
        };
        let mut body = serde_json::json!({
            "model": model,
            "messages": [{"role": "user", "content": req.prompt}],
            "temperature": req.temperature,
            "max_tokens": req.max_tokens,
        });
        if req.json_mode {
            body["response_format"] = serde_json::json!({"type": "json_object"});
        }

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&req.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::RequestFailed {
                provider,
                reason: e.to_string(),
            })?;

        let json = read_json(provider, response).await?;
        let text = nonempty_text(provider, json["choices"][0]["message"]["content"].as_str())?;
        let tokens_used = json["usage"]["total_tokens"].as_u64().unwrap_or(0);
        Ok(AdapterResponse { text, tokens_used })
    }
}

/// Maps model identifiers to (native provider, canonical model id).
#[derive(Debug, Clone)]
pub struct ModelCatalog {
    entries: HashMap<String, (ProviderId, String)>,
    default_provider: ProviderId,
}

impl ModelCatalog {
    pub fn empty(default_provider: ProviderId) -> Self {
        Self {
            entries: HashMap::new(),
            default_provider,
        }
    }

    /// Catalog of well-known model identifiers.
    pub fn with_defaults() -> Self {
        let mut catalog = Self::empty(ProviderId::OpenAi);
        for (id, provider) in [
            ("gpt-4o", ProviderId::OpenAi),
            ("gpt-4o-mini", ProviderId::OpenAi),
            ("o3", ProviderId::OpenAi),
            ("claude-opus-4", ProviderId::Anthropic),
            ("claude-sonnet-4", ProviderId::Anthropic),
            ("gemini-2.5-pro", ProviderId::Google),
            ("gemini-2.5-flash", ProviderId::Google),
        ] {
            catalog.insert(id, provider, id);
        }
        catalog
    }

    pub fn insert(&mut self, model: &str, provider: ProviderId, canonical: &str) {
        self.entries
            .insert(model.to_string(), (provider, canonical.to_string()));
    }

    /// Resolve a model identifier to its native provider and canonical id.
    ///
    /// Order: catalog lookup, then `provider/model`-shaped inference, then
    /// the default provider. Unknown vendor prefixes route to the
    /// aggregator, whose namespace they belong to.
    pub fn resolve(&self, model: &str) -> (ProviderId, String) {
        if let Some((provider, canonical)) = self.entries.get(model) {
            return (*provider, canonical.clone());
        }
        if let Some((prefix, rest)) = model.split_once('/') {
            let provider = match prefix {
                "openai" => ProviderId::OpenAi,
                "anthropic" => ProviderId::Anthropic,
                "google" | "gemini" => ProviderId::Google,
                _ => return (ProviderId::OpenRouter, model.to_string()),
            };
            return (provider, rest.to_string());
        }
        (self.default_provider, model.to_string())
    }
}

impl Default for ModelCatalog {
    fn default() -> Self {
        Self::with_defaults()
    }
}
