//! Resilient multi-provider LLM invocation: adapters, credential
//! resolution, circuit breaking, rate limiting, JSON repair, and the
//! failover router that composes them.

pub mod circuit_breaker;
pub mod json_repair;
pub mod keys;
pub mod provider;
pub mod rate_limiter;
pub mod router;

pub use keys::{ApiKeyResolver, CredentialStore, KeyError, MemoryCredentialStore};
pub use provider::{ModelCatalog, ProviderAdapter, ProviderId};
pub use router::{GenerateRequest, LlmClient, LlmRouter, ModelTier, RouterError, RouterServices};
