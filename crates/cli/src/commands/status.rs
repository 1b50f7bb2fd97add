//! `dewey status`: Show configuration, provider reachability and queue depth.

use dewey_config::AppConfig;
use dewey_core::job::JobStatus;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    println!("Dewey Status");
    println!("============");
    println!("  Config dir:     {}", AppConfig::config_dir().display());
    println!("  Provider:       {}", config.default_provider);
    println!("  Model:          {}", config.default_model);
    println!("  Temperature:    {}", config.default_temperature);
    println!("  Protocol:       {:?}", config.agent.reply_protocol);
    println!("  Max iterations: {}", config.agent.max_iterations);
    println!("  Gateway:        {}:{}", config.gateway.host, config.gateway.port);
    println!("  Store:          {}", config.store.backend);

    let router = dewey_providers::build_from_config(&config);
    match router.default() {
        Ok(provider) => {
            let reachable = provider.health_check().await.unwrap_or(false);
            println!(
                "  Backend:        {}",
                if reachable { "reachable" } else { "unreachable" }
            );
        }
        Err(e) => println!("  Backend:        {e}"),
    }

    match dewey_store::open(&config.store).await {
        Ok(store) => {
            for status in [JobStatus::Queued, JobStatus::Processing, JobStatus::Done] {
                let count = store.count(status).await?;
                println!("  Jobs {:<11} {count}", format!("{status}:"));
            }
        }
        Err(e) => println!("  Store error:    {e}"),
    }

    let config_path = AppConfig::config_dir().join("config.toml");
    if config_path.exists() {
        println!("\n  Config file found");
    } else {
        println!("\n  No config file - run `dewey onboard` first");
    }

    Ok(())
}
