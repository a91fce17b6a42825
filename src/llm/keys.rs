//! Credential resolution — turns a caller's stored API keys into an
//! ordered provider chain for one model request.
//!
//! Chains are computed per call and never persisted; credentials come from
//! an external store, decrypted on read. A decrypted value that still looks
//! like a display mask is treated as absent rather than passed upstream.

use async_trait::async_trait;
use std::collections::HashMap;
use tracing::{debug, warn};

use super::provider::ProviderId;

/// Error from chain resolution.
#[derive(Debug, Clone, thiserror::Error)]
pub enum KeyError {
    #[error(
        "no credential for model '{model}' (native provider {native}); \
         configuring one of [{alternatives}] would enable it"
    )]
    NoCredential {
        model: String,
        native: ProviderId,
        /// Providers that could have served this model, comma-joined.
        alternatives: String,
    },

    #[error("credential store error: {0}")]
    Store(String),
}

/// Per-caller, provider-keyed credential access. Decrypt-on-read is the
/// store's concern; this trait sees plaintext.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn credentials(&self, caller_id: &str) -> Result<HashMap<ProviderId, String>, KeyError>;
}

/// In-memory credential store for tests and embedded use.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    by_caller: std::sync::Mutex<HashMap<String, HashMap<ProviderId, String>>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, caller_id: &str, provider: ProviderId, key: &str) {
        self.by_caller
            .lock()
            .expect("credential store poisoned")
            .entry(caller_id.to_string())
            .or_default()
            .insert(provider, key.to_string());
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn credentials(&self, caller_id: &str) -> Result<HashMap<ProviderId, String>, KeyError> {
        Ok(self
            .by_caller
            .lock()
            .expect("credential store poisoned")
            .get(caller_id)
            .cloned()
            .unwrap_or_default())
    }
}

/// Aggregators in fixed priority order, with the native vendors each one
/// can proxy.
const AGGREGATOR_SUPPORT: &[(ProviderId, &[ProviderId])] = &[(
    ProviderId::OpenRouter,
    &[ProviderId::OpenAi, ProviderId::Anthropic, ProviderId::Google],
)];

/// True when a decrypted credential is indistinguishable from a UI display
/// mask, i.e. corrupted or never really stored.
pub fn is_masked_credential(value: &str) -> bool {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return true;
    }
    // Masks render as a run of bullets/asterisks, optionally with a short
    // suffix of real characters ("************3fk9").
    let total = trimmed.chars().count();
    let masked_chars = trimmed
        .chars()
        .filter(|c| matches!(c, '*' | '\u{2022}' | '\u{00b7}'))
        .count();
    masked_chars * 2 >= total && masked_chars > 0
}

/// Resolves the ordered provider chain for a model request.
pub struct ApiKeyResolver<S> {
    store: S,
}

impl<S: CredentialStore> ApiKeyResolver<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Providers that could serve a model native to `native`: the native
    /// provider itself plus every aggregator whose support matrix covers it.
    fn serving_providers(native: ProviderId) -> Vec<ProviderId> {
        let mut providers = vec![native];
        for (aggregator, supported) in AGGREGATOR_SUPPORT {
            if supported.contains(&native) {
                providers.push(*aggregator);
            }
        }
        providers
    }

    /// Build the ordered chain: native provider first if credentialed, then
    /// each supporting aggregator in priority order.
    pub async fn resolve_chain(
        &self,
        model: &str,
        native: ProviderId,
        caller_id: &str,
    ) -> Result<Vec<(ProviderId, String)>, KeyError> {
        let mut credentials = self.store.credentials(caller_id).await?;
        credentials.retain(|provider, value| {
            if is_masked_credential(value) {
                warn!(%provider, caller_id, "discarding masked or corrupted credential");
                false
            } else {
                true
            }
        });

        let serving = Self::serving_providers(native);
        let chain: Vec<(ProviderId, String)> = serving
            .iter()
            .filter_map(|p| credentials.get(p).map(|key| (*p, key.clone())))
            .collect();

        if chain.is_empty() {
            let alternatives = serving
                .iter()
                .map(|p| p.to_string())
                .collect::<Vec<_>>()
                .join(", ");
            return Err(KeyError::NoCredential {
                model: model.to_string(),
                native,
                alternatives,
            });
        }

        debug!(
            model,
            %native,
            chain_len = chain.len(),
            "resolved provider chain"
        );
        Ok(chain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver_with(keys: &[(ProviderId, &str)]) -> ApiKeyResolver<MemoryCredentialStore> {
        let store = MemoryCredentialStore::new();
        for (provider, key) in keys {
            store.set("caller", *provider, key);
        }
        ApiKeyResolver::new(store)
    }

    #[tokio::test]
    async fn test_native_first_then_aggregator() {
        let resolver = resolver_with(&[
            (ProviderId::OpenRouter, "sk-or-abc"),
            (ProviderId::Anthropic, "sk-ant-abc"),
        ]);
        let chain = resolver
            .resolve_chain("claude-opus-4", ProviderId::Anthropic, "caller")
            .await
            .unwrap();
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[0].0, ProviderId::Anthropic);
        assert_eq!(chain[1].0, ProviderId::OpenRouter);
    }

    #[tokio::test]
    async fn test_aggregator_only_chain() {
        let resolver = resolver_with(&[(ProviderId::OpenRouter, "sk-or-abc")]);
        let chain = resolver
            .resolve_chain("gpt-4o", ProviderId::OpenAi, "caller")
            .await
            .unwrap();
        assert_eq!(chain, vec![(ProviderId::OpenRouter, "sk-or-abc".to_string())]);
    }

    #[tokio::test]
    async fn test_no_credentials_lists_alternatives() {
        let resolver = resolver_with(&[]);
        let err = resolver
            .resolve_chain("gemini-2.5-pro", ProviderId::Google, "caller")
            .await
            .unwrap_err();
        match err {
            KeyError::NoCredential {
                model,
                native,
                alternatives,
            } => {
                assert_eq!(model, "gemini-2.5-pro");
                assert_eq!(native, ProviderId::Google);
                assert!(alternatives.contains("google"));
                assert!(alternatives.contains("openrouter"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_unrelated_credential_does_not_serve() {
        let resolver = resolver_with(&[(ProviderId::OpenAi, "sk-abc")]);
        let err = resolver
            .resolve_chain("claude-opus-4", ProviderId::Anthropic, "caller")
            .await
            .unwrap_err();
        assert!(matches!(err, KeyError::NoCredential { .. }));
    }

    #[tokio::test]
    async fn test_masked_credential_treated_as_absent() {
        let resolver = resolver_with(&[
            (ProviderId::Anthropic, "************3fk9"),
            (ProviderId::OpenRouter, "sk-or-real"),
        ]);
        let chain = resolver
            .resolve_chain("claude-opus-4", ProviderId::Anthropic, "caller")
            .await
            .unwrap();
        assert_eq!(chain.len(), 1);
        assert_eq!(chain[0].0, ProviderId::OpenRouter);
    }

    #[test]
    fn test_mask_detection() {
        assert!(is_masked_credential(""));
        assert!(is_masked_credential("   "));
        assert!(is_masked_credential("********"));
        assert!(is_masked_credential("\u{2022}\u{2022}\u{2022}\u{2022}ab12"));
        assert!(!is_masked_credential("sk-ant-REDACTED"));
        // A real key with an x in it is not a mask.
        assert!(!is_masked_credential("sk-proj-xq7fn2"));
    }
}
