//! Provider router: selects the LLM backend named in config.

use std::collections::HashMap;
use std::sync::Arc;

use dewey_config::AppConfig;
use dewey_core::error::ProviderError;
use dewey_core::provider::Provider;
use tracing::debug;

use crate::openai_compat::OpenAiCompatProvider;

/// Base URLs of backends that need no `api_url` in config.
const KNOWN_BACKENDS: &[(&str, &str)] = &[
    ("ollama", "http://localhost:11434/v1"),
    ("openai", "https://api.openai.com/v1"),
    ("openrouter", "https://openrouter.ai/api/v1"),
    ("groq", "https://api.groq.com/openai/v1"),
    ("vllm", "http://localhost:8000/v1"),
    ("llamacpp", "http://localhost:8080/v1"),
];

/// Named backends plus the one requests go to by default.
pub struct ProviderRouter {
    providers: HashMap<String, Arc<dyn Provider>>,
    default_provider: String,
}

impl ProviderRouter {
    pub fn new(default_provider: impl Into<String>) -> Self {
        Self {
            providers: HashMap::new(),
            default_provider: default_provider.into(),
        }
    }

    /// Add a backend; a second registration under the same name replaces it.
    pub fn register(&mut self, name: impl Into<String>, provider: Arc<dyn Provider>) {
        self.providers.insert(name.into(), provider);
    }

    pub fn default(&self) -> Result<Arc<dyn Provider>, ProviderError> {
        self.get(&self.default_provider)
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Provider>, ProviderError> {
        match self.providers.get(name) {
            Some(provider) => Ok(Arc::clone(provider)),
            None => Err(ProviderError::NotConfigured(name.to_string())),
        }
    }

    pub fn list(&self) -> Vec<&str> {
        self.providers.keys().map(String::as_str).collect()
    }
}

/// Register every `[providers.*]` entry, and the default provider even when
/// it has no section of its own.
pub fn build_from_config(config: &AppConfig) -> ProviderRouter {
    let mut router = ProviderRouter::new(&config.default_provider);

    let mut names: Vec<&str> = config.providers.keys().map(String::as_str).collect();
    if !config.providers.contains_key(&config.default_provider) {
        names.push(&config.default_provider);
    }

    for name in names {
        router.register(name, provider_for(name, config));
    }
    router
}

fn provider_for(name: &str, config: &AppConfig) -> Arc<dyn Provider> {
    let section = config.providers.get(name);
    let api_key = section
        .and_then(|p| p.api_key.as_deref())
        .or(config.api_key.as_deref())
        .unwrap_or_default();
    let base_url = section
        .and_then(|p| p.api_url.as_deref())
        .unwrap_or_else(|| default_base_url(name));

    debug!(provider = name, base_url, "Registering provider");
    Arc::new(OpenAiCompatProvider::new(name, base_url, api_key))
}

/// Unknown names are assumed to be a local Ollama-style server.
fn default_base_url(name: &str) -> &'static str {
    let name = if name == "llama.cpp" { "llamacpp" } else { name };
    KNOWN_BACKENDS
        .iter()
        .find(|(known, _)| *known == name)
        .map_or(KNOWN_BACKENDS[0].1, |&(_, url)| url)
}
