//! Anthropic Messages API wire types
//!
//! The request keeps message content and unknown top-level fields as raw
//! JSON so the proxy forwards what the client sent instead of what this
//! crate happens to model.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// -- Request types --

/// `POST /v1/messages` request body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagesRequest {
    /// Model identifier (route key)
    pub model: String,
    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,
    /// Conversation messages
    pub messages: Vec<Message>,
    /// System prompt (string or block array)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<Value>,
    /// Sampling temperature
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Nucleus sampling threshold
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    /// Top-k sampling
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    /// Stop sequences
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,
    /// Whether to stream the response
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    /// Tool definitions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDefinition>>,
    /// Tool choice configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<Value>,
    /// Fields this proxy does not model, forwarded verbatim
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl MessagesRequest {
    /// Whether the client asked for a streamed response
    pub fn wants_stream(&self) -> bool {
        self.stream.unwrap_or(false)
    }

    /// Concatenated text content of all messages, for keyword matching
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        for message in &self.messages {
            collect_text(&message.content, &mut out);
        }
        out
    }
}

/// One conversation turn; content stays raw (string or block array)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// `user` or `assistant`
    pub role: String,
    /// Verbatim content value
    pub content: Value,
}

/// Tool definition offered to the model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name
    pub name: String,
    /// Human-readable description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema for the tool input
    pub input_schema: Value,
    /// Unmodeled fields, forwarded verbatim
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Pull every text fragment out of a content value
fn collect_text(content: &Value, out: &mut String) {
    match content {
        Value::String(text) => out.push_str(text),
        Value::Array(blocks) => {
            for block in blocks {
                if let Some(text) = block.get("text").and_then(Value::as_str) {
                    out.push_str(text);
                }
            }
        }
        _ => {}
    }
}

// -- Response types --

/// `POST /v1/messages` non-streaming response body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagesResponse {
    /// Response identifier
    pub id: String,
    /// Always `message`
    #[serde(rename = "type")]
    pub response_type: String,
    /// Always `assistant`
    pub role: String,
    /// Generated content blocks
    pub content: Vec<ContentBlock>,
    /// Model that produced the response
    pub model: String,
    /// Why generation stopped
    #[serde(default)]
    pub stop_reason: Option<String>,
    /// Stop sequence that fired, if any
    #[serde(default)]
    pub stop_sequence: Option<String>,
    /// Token accounting
    pub usage: TokenUsage,
}

/// Content block in a response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Text output
    Text {
        /// The text
        text: String,
    },
    /// Tool invocation request
    ToolUse {
        /// Tool use identifier
        id: String,
        /// Tool name
        name: String,
        /// Tool input
        input: Value,
    },
}

/// Input/output token counts
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Tokens consumed by the prompt
    pub input_tokens: u32,
    /// Tokens generated
    pub output_tokens: u32,
}
