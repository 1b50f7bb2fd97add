//! `dewey gateway`: Start the HTTP API server.

use dewey_config::AppConfig;

pub async fn run(
    port_override: Option<u16>,
    run_worker: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    if let Some(port) = port_override {
        config.gateway.port = port;
    }

    println!("Dewey Gateway");
    println!("   Listening:  {}:{}", config.gateway.host, config.gateway.port);
    println!("   Provider:   {} ({})", config.default_provider, config.default_model);
    println!("   Store:      {}", config.store.backend);
    println!("   API keys:   {}", config.gateway.api_keys.len());
    println!("   Worker:     {}", if run_worker && config.worker.enabled { "on" } else { "off" });

    dewey_gateway::start(config, run_worker).await?;

    Ok(())
}
