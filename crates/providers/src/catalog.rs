//! Known local models and what they are good at.

use tracing::debug;

/// Ordered table of model name → capability tags.
///
/// Selection falls back to the first entry when no model has the
/// requested capability.
#[derive(Debug, Clone)]
pub struct ModelCatalog {
    models: Vec<(String, Vec<String>)>,
}

const GENERAL: &[&str] = &[
    "general_knowledge",
    "reasoning",
    "tool_calling",
    "conversation",
    "multilingual",
    "instruction_following",
];

impl ModelCatalog {
    pub fn new() -> Self {
        Self { models: Vec::new() }
    }

    /// Add a model. Re-adding a name replaces its capabilities in place.
    pub fn with_model(mut self, name: &str, capabilities: &[&str]) -> Self {
        let caps: Vec<String> = capabilities.iter().map(|c| c.to_string()).collect();
        match self.models.iter_mut().find(|(n, _)| n == name) {
            Some(entry) => entry.1 = caps,
            None => self.models.push((name.to_string(), caps)),
        }
        self
    }

    pub fn capabilities(&self, model: &str) -> &[String] {
        self.models
            .iter()
            .find(|(n, _)| n == model)
            .map(|(_, caps)| caps.as_slice())
            .unwrap_or(&[])
    }

    /// First model declaring `capability`, else the first model listed.
    pub fn select_best(&self, capability: &str) -> Option<&str> {
        let selected = self
            .models
            .iter()
            .find(|(_, caps)| caps.iter().any(|c| c == capability))
            .or_else(|| self.models.first())
            .map(|(n, _)| n.as_str());
        debug!(capability, selected = ?selected, "Selected model");
        selected
    }

    pub fn models(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.models.iter().map(|(n, c)| (n.as_str(), c.as_slice()))
    }
}

impl Default for ModelCatalog {
    /// The Ollama models Dewey is tuned for.
    fn default() -> Self {
        Self::new()
            .with_model("ajindal/llama3.1-storm:8b", GENERAL)
            .with_model("llama3.1:8b", GENERAL)
            .with_model("qwen2.5:7b", GENERAL)
            .with_model(
                "llama3.2:3b",
                &["summarization", "instruction_following", "tool_calling", "multilingual"],
            )
            .with_model(
                "llava:7b",
                &[
                    "visual_reasoning",
                    "visual_conversation",
                    "visual_tool_calling",
                    "vision",
                    "ocr",
                    "multimodal",
                ],
            )
    }
}
