//! Content Tagger: extracts up to three taxonomy tags through one forced
//! tool call. Enrichment only: every failure yields an empty list.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::llm_client::{LlmClient, LlmError, ToolDefinition};
use crate::tagging::prompts::{
    TAG_PROMPT_TEMPLATE, TAG_SYSTEM, TAG_TOOL_DESCRIPTION, TAG_TOOL_NAME,
};
use crate::tagging::taxonomy::{self, ValidatedTags, MAX_TAGS};

/// Characters of title + body sent to the model.
pub const MAX_INPUT_CHARS: usize = 6000;

// ────────────────────────────────────────────────────────────────────────────
// Model port
// ────────────────────────────────────────────────────────────────────────────

/// A model that answers by calling one tool. Carried as `Arc<dyn TagModel>`.
#[async_trait]
pub trait TagModel: Send + Sync {
    async fn call_tool(
        &self,
        prompt: &str,
        system: &str,
        tool: &ToolDefinition,
    ) -> Result<Value, LlmError>;
}

#[async_trait]
impl TagModel for LlmClient {
    async fn call_tool(
        &self,
        prompt: &str,
        system: &str,
        tool: &ToolDefinition,
    ) -> Result<Value, LlmError> {
        LlmClient::call_tool(self, prompt, system, tool).await
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tagger
// ────────────────────────────────────────────────────────────────────────────

pub fn tag_tool() -> ToolDefinition {
    let allowed: Vec<&str> = taxonomy::all_tags().collect();
    ToolDefinition {
        name: TAG_TOOL_NAME.to_string(),
        description: TAG_TOOL_DESCRIPTION.to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "tags": {
                    "type": "array",
                    "items": { "type": "string", "enum": allowed },
                    "maxItems": MAX_TAGS
                }
            },
            "required": ["tags"]
        }),
    }
}

pub fn build_prompt(title: &str, body: &str) -> String {
    let content: String = format!("{title}\n\n{body}")
        .chars()
        .take(MAX_INPUT_CHARS)
        .collect();
    TAG_PROMPT_TEMPLATE.replace("{content}", &content)
}

/// Reads the `tags` array from the tool input. `None` when the payload is
/// not an object with an array under `tags`; non-string members are dropped.
fn parse_tool_input(input: &Value) -> Option<ValidatedTags> {
    let raw = input.get("tags")?.as_array()?;
    Some(taxonomy::validate(raw.iter().filter_map(Value::as_str)))
}

pub struct ContentTagger {
    model: Arc<dyn TagModel>,
    tool: ToolDefinition,
}

impl ContentTagger {
    pub fn new(model: Arc<dyn TagModel>) -> Self {
        Self {
            model,
            tool: tag_tool(),
        }
    }

    /// `[]` on any failure, otherwise 1..=3 taxonomy tags or the fallback tag.
    pub async fn extract_tags(&self, title: &str, body: &str) -> Vec<String> {
        let prompt = build_prompt(title, body);
        let input = match self.model.call_tool(&prompt, TAG_SYSTEM, &self.tool).await {
            Ok(input) => input,
            Err(e) => {
                warn!("Tagging call failed: {}", e);
                return vec![];
            }
        };
        match parse_tool_input(&input) {
            Some(validated) => {
                let tags = validated.into_tags();
                debug!("Extracted tags {:?}", tags);
                tags
            }
            None => {
                warn!("Tagging tool input had no tags array: {}", input);
                vec![]
            }
        }
    }
}
