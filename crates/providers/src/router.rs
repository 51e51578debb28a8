//! Provider router: selects the correct completion backend from config.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use carebridge_core::provider::Provider;

use crate::openai_compat::OpenAiCompatProvider;

/// Routes completion requests to the correct provider.
pub struct ProviderRouter {
    providers: HashMap<String, Arc<dyn Provider>>,
    default_provider: String,
}

impl ProviderRouter {
    /// Create a new router with a default provider.
    pub fn new(default_provider: impl Into<String>) -> Self {
        Self {
            providers: HashMap::new(),
            default_provider: default_provider.into(),
        }
    }

    /// Register a provider.
    pub fn register(&mut self, name: impl Into<String>, provider: Arc<dyn Provider>) {
        self.providers.insert(name.into(), provider);
    }

    /// Get the default provider.
    pub fn default(&self) -> Option<Arc<dyn Provider>> {
        self.providers.get(&self.default_provider).cloned()
    }

    /// Get a specific provider by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(name).cloned()
    }

    /// List all registered provider names.
    pub fn list(&self) -> Vec<&str> {
        self.providers.keys().map(|s| s.as_str()).collect()
    }
}

/// Build the provider router from configuration.
pub fn build_from_config(config: &carebridge_config::AppConfig) -> ProviderRouter {
    let mut router = ProviderRouter::new(&config.provider);
    let api_key = config.api_key.clone().unwrap_or_default();
    let base_url = resolve_base_url(&config.provider, &config.api_url);

    tracing::debug!(provider = %config.provider, base_url = %base_url, "Registering provider");
    let provider: Arc<dyn Provider> = Arc::new(OpenAiCompatProvider::with_timeout(
        &config.provider,
        base_url,
        api_key,
        Duration::from_secs(config.request_timeout_secs),
    ));
    router.register(config.provider.clone(), provider);
    router
}

/// An explicit URL wins; the stock OpenAI URL yields to the named service's default.
fn resolve_base_url(provider_name: &str, api_url: &str) -> String {
    let openai = default_base_url("openai").expect("openai has a default base URL");
    if api_url.trim_end_matches('/') != openai {
        return api_url.to_string();
    }
    default_base_url(provider_name).unwrap_or(openai).to_string()
}

/// Get the default base URL for well-known OpenAI-compatible services.
fn default_base_url(provider_name: &str) -> Option<&'static str> {
    match provider_name {
        "openai" => Some("https://api.openai.com/v1"),
        "openrouter" => Some("https://openrouter.ai/api/v1"),
        "ollama" => Some("http://localhost:11434/v1"),
        "groq" => Some("https://api.groq.com/openai/v1"),
        "together" => Some("https://api.together.xyz/v1"),
        "vllm" => Some("http://localhost:8000/v1"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn router_register_and_lookup() {
        let mut router = ProviderRouter::new("openai");
        router.register("openai", Arc::new(OpenAiCompatProvider::openai("sk-test")));

        assert!(router.get("openai").is_some());
        assert!(router.get("nonexistent").is_none());
        assert!(router.default().is_some());
        assert_eq!(router.list(), vec!["openai"]);
    }

    #[test]
    fn well_known_services_get_their_urls() {
        assert_eq!(
            resolve_base_url("ollama", "https://api.openai.com/v1"),
            "http://localhost:11434/v1"
        );
        assert_eq!(
            resolve_base_url("ollama", "http://gpu-box:11434/v1"),
            "http://gpu-box:11434/v1"
        );
        assert_eq!(
            resolve_base_url("custom", "https://api.openai.com/v1"),
            "https://api.openai.com/v1"
        );
    }

    #[test]
    fn build_from_default_config() {
        let config = carebridge_config::AppConfig::default();
        let router = build_from_config(&config);
        let provider = router.default().unwrap();
        assert_eq!(provider.name(), "openai");
    }
}
