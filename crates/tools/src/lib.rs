//! Built-in tool implementations for Dewey.
//!
//! Tools give the agent the ability to act: do arithmetic, search the web,
//! read a page, and run a snippet of Python.

pub mod calculator;
pub mod python_code;
pub mod web;

use std::time::Duration;

use dewey_config::ToolsConfig;
use dewey_core::error::ToolError;
use dewey_core::tool::ToolRegistry;

pub use calculator::CalculatorTool;
pub use python_code::PythonCodeTool;
pub use web::{ReadablePageTool, SearchWebTool};

/// Create the registry with every built-in tool.
///
/// Order here is the order tools appear in the model-facing manifest.
pub fn default_registry(config: &ToolsConfig) -> Result<ToolRegistry, ToolError> {
    let fetch_timeout = Duration::from_secs(config.fetch_timeout_secs);
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(SearchWebTool::new(config.search_results, fetch_timeout)))?;
    registry.register(Box::new(ReadablePageTool::new(fetch_timeout)))?;
    registry.register(Box::new(CalculatorTool))?;
    registry.register(Box::new(PythonCodeTool::new(
        &config.python_bin,
        Duration::from_secs(config.code_timeout_secs),
    )))?;
    Ok(registry)
}
