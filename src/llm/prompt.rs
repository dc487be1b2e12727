//! Layered prompt builder.
//!
//! Prompts are assembled from plain-text fragments under the configured
//! prompts directory (`config/prompts/` by default). Layers are appended in
//! order; missing files are skipped so layers can be optional.
//!
//! ```text
//! system.md   persona and answering rules      -> system message
//! answer.txt  {{context}} + {{question}} body  -> user message
//! ```
//!
//! Substitution uses `{{key}}` syntax and runs once at
//! [`build()`](PromptBuilder::build) time in a single left-to-right pass, so
//! placeholder-like text inside substituted values is left alone.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

const SEPARATOR: &str = "\n\n";

pub const SYSTEM_LAYER: &str = "system.md";
pub const ANSWER_LAYER: &str = "answer.txt";

/// Used when `answer.txt` is missing so generation still has scaffolding.
const FALLBACK_ANSWER_TEMPLATE: &str = "Context:\n{{context}}\n\nQuestion: {{question}}\n\nAnswer:";

/// Fluent builder that assembles a layered prompt from template files.
pub struct PromptBuilder {
    prompts_dir: PathBuf,
    parts: Vec<String>,
    vars: HashMap<String, String>,
}

impl PromptBuilder {
    pub fn new(prompts_dir: impl Into<PathBuf>) -> Self {
        Self { prompts_dir: prompts_dir.into(), parts: Vec::new(), vars: HashMap::new() }
    }

    /// Append a layer by loading `filename` from the prompts directory.
    /// Silently skips the layer when the file does not exist.
    pub fn layer(mut self, filename: &str) -> Self {
        let path = self.prompts_dir.join(filename);
        match fs::read_to_string(&path) {
            Ok(text) => self.push(&text),
            Err(_) => tracing::debug!(path = %path.display(), "prompt layer not found, skipped"),
        }
        self
    }

    /// Like [`layer`](Self::layer) but falls back to `default` when the file
    /// is missing or empty.
    pub fn layer_or(mut self, filename: &str, default: &str) -> Self {
        let path = self.prompts_dir.join(filename);
        let text = fs::read_to_string(&path).unwrap_or_default();
        if text.trim().is_empty() {
            tracing::debug!(path = %path.display(), "prompt layer missing, using built-in");
            self.push(default);
        } else {
            self.push(&text);
        }
        self
    }

    /// Directly append a text fragment.
    pub fn append(mut self, text: impl Into<String>) -> Self {
        self.push(&text.into());
        self
    }

    pub fn var(mut self, key: &str, value: impl Into<String>) -> Self {
        self.vars.insert(key.to_string(), value.into());
        self
    }

    /// `true` when no layer produced any text.
    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Join all layers with blank lines and substitute variables.
    /// Unknown placeholders are kept verbatim.
    pub fn build(self) -> String {
        substitute(&self.parts.join(SEPARATOR), &self.vars)
    }

    fn push(&mut self, text: &str) {
        let trimmed = text.trim();
        if !trimmed.is_empty() {
            self.parts.push(trimmed.to_string());
        }
    }
}

fn substitute(template: &str, vars: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find("{{") {
        out.push_str(&rest[..open]);
        let after = &rest[open + 2..];
        match after.find("}}") {
            Some(close) => {
                let key = after[..close].trim();
                match vars.get(key) {
                    Some(value) => out.push_str(value),
                    None => out.push_str(&rest[open..open + 2 + close + 2]),
                }
                rest = &after[close + 2..];
            }
            None => {
                out.push_str(&rest[open..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// System and user prompt for one generation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerPrompt {
    pub system: Option<String>,
    pub prompt: String,
}

/// Render `system.md` and `answer.txt` for `question` over `context`.
pub fn answer_prompt(prompts_dir: impl AsRef<Path>, context: &str, question: &str) -> AnswerPrompt {
    let dir = prompts_dir.as_ref();
    let system = PromptBuilder::new(dir).layer(SYSTEM_LAYER);
    let system = if system.is_empty() { None } else { Some(system.build()) };

    let prompt = PromptBuilder::new(dir)
        .layer_or(ANSWER_LAYER, FALLBACK_ANSWER_TEMPLATE)
        .var("context", context)
        .var("question", question.trim())
        .build();

    AnswerPrompt { system, prompt }
}
