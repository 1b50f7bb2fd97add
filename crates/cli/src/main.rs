//! Dewey CLI: the main entry point.
//!
//! Commands:
//! - `onboard`  - Write a default config
//! - `agent`    - Interactive chat or single-message mode
//! - `gateway`  - Start the HTTP/WebSocket server and job worker
//! - `status`   - Show configuration and queue status

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "dewey",
    about = "Dewey - agentic chat orchestrator",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the default configuration file
    Onboard,

    /// Chat with the agent
    Agent {
        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,

        /// Pick the best known model with this capability (e.g. "tools", "vision")
        #[arg(long)]
        capability: Option<String>,
    },

    /// Start the HTTP gateway server
    Gateway {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,

        /// Serve the API without processing queued jobs
        #[arg(long)]
        no_worker: bool,
    },

    /// Show system status
    Status,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    if cli.json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    match cli.command {
        Commands::Onboard => commands::onboard::run().await?,
        Commands::Agent {
            message,
            capability,
        } => commands::agent::run(message, capability).await?,
        Commands::Gateway { port, no_worker } => commands::gateway::run(port, !no_worker).await?,
        Commands::Status => commands::status::run().await?,
    }

    Ok(())
}
