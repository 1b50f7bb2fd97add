//! LLM Provider implementations for Dewey.
//!
//! All backends implement the `dewey_core::Provider` trait. The router picks
//! the backend named in config; [`ProviderGateway`] pairs it with a reply
//! parser to form the model gateway the agent loop talks to.

pub mod catalog;
pub mod model_gateway;
pub mod openai_compat;
pub mod router;

pub use catalog::ModelCatalog;
pub use model_gateway::ProviderGateway;
pub use openai_compat::OpenAiCompatProvider;
pub use router::{build_from_config, ProviderRouter};

use std::sync::Arc;

use dewey_core::error::Error;
use dewey_core::reply::parser_for;

/// Build the configured model gateway.
///
/// `tool_listing` is the registry's plain-text manifest, used only when the
/// configured protocol describes tools in the prompt.
pub fn build_gateway(
    config: &dewey_config::AppConfig,
    tool_listing: &str,
) -> Result<ProviderGateway, Error> {
    let router = build_from_config(config);
    let provider = router.default()?;
    let parser = parser_for(config.agent.reply_protocol).map_err(|e| Error::Config {
        message: format!("invalid tool call pattern: {e}"),
    })?;
    Ok(ProviderGateway::new(provider, Arc::from(parser))
        .with_temperature(config.default_temperature)
        .with_max_tokens(config.default_max_tokens)
        .with_tool_listing(tool_listing))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_gateway_from_default_config() {
        let config = dewey_config::AppConfig::default();
        let gateway = build_gateway(&config, "calculator: math").unwrap();
        assert_eq!(gateway.provider_name(), "ollama");
    }
}
