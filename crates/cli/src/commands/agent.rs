//! `dewey agent`: Interactive or single-message chat mode.

use std::io::Write;
use std::sync::Arc;

use dewey_agent::ChatSession;
use dewey_config::AppConfig;
use dewey_core::event::{AgentEvent, ChannelSink};
use dewey_core::message::Conversation;
use dewey_providers::ModelCatalog;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::info;

pub async fn run(
    message: Option<String>,
    capability: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    if let Some(capability) = capability {
        let catalog = ModelCatalog::default();
        let model = catalog
            .select_best(&capability)
            .ok_or("Model catalog is empty")?;
        config.default_model = model.to_string();
        info!(capability = %capability, model = %config.default_model, "Selected model from catalog");
    }

    let agent = dewey_gateway::build_agent(&config)?;
    let tool_names = agent.tools().names().join(", ");
    let session = ChatSession::new(Arc::new(agent));

    let (sink, events) = ChannelSink::channel();
    let printer = tokio::spawn(print_progress(events));
    let mut conv = Conversation::new();

    if let Some(msg) = message {
        // Single message mode
        let result = session.respond(&msg, &mut conv, &sink).await;
        drop(sink);
        let _ = printer.await;
        println!("{}", result?.answer);
        return Ok(());
    }

    // Interactive mode
    println!();
    println!("  Dewey Agent - Interactive Mode");
    println!();
    println!("  Provider:  {}", config.default_provider);
    println!("  Model:     {}", config.default_model);
    println!("  Tools:     {tool_names}");
    println!();
    println!("  Type your message and press Enter.");
    println!("  Type 'exit' or Ctrl+D to quit.");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    print!("  You > ");
    std::io::stdout().flush()?;

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line == "exit" || line == "quit" {
            break;
        }
        if !line.is_empty() {
            match session.respond(line, &mut conv, &sink).await {
                Ok(outcome) => {
                    println!();
                    for text in outcome.answer.lines() {
                        println!("  Dewey > {text}");
                    }
                    println!();
                }
                Err(e) => {
                    eprintln!("  [Error] {e}");
                    println!();
                }
            }
        }
        print!("  You > ");
        std::io::stdout().flush()?;
    }

    drop(sink);
    let _ = printer.await;
    println!();
    println!("  Goodbye!");
    println!();
    Ok(())
}

/// Show tool activity on stderr while the agent works.
async fn print_progress(mut events: UnboundedReceiver<AgentEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            AgentEvent::Thinking { step, .. } => eprintln!("  ... thinking ({step})"),
            AgentEvent::ToolCall { name, input, .. } => eprintln!("  [tool] {name} {input}"),
            AgentEvent::ToolResult { name, output, success, .. } => {
                let preview: String = output.chars().take(200).collect();
                let mark = if success { "ok" } else { "failed" };
                eprintln!("  [tool] {name} {mark}: {preview}");
            }
            AgentEvent::ChatResponse { thinking_time, .. } => {
                eprintln!("  (answered in {thinking_time:.2}s)")
            }
            _ => {}
        }
    }
}
