//! OpenAI chat completions wire types
//!
//! Only what the translator needs: request construction, response parsing,
//! and the stream-chunk shapes the aggregator folds into a full response.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// -- Request types --

/// `POST /chat/completions` request body
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    /// Model identifier
    pub model: String,
    /// Conversation messages
    pub messages: Vec<ChatMessage>,
    /// Maximum tokens to generate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,
    /// Sampling temperature
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Nucleus sampling threshold
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    /// Stop sequences
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
    /// Whether to stream the response
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    /// Tool definitions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ChatTool>>,
    /// Tool choice configuration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<Value>,
}

/// Message within a chat request
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    /// Message role (`system`, `user`, `assistant`, `tool`)
    pub role: String,
    /// Text content
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Tool calls previously made by the assistant
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ChatToolCall>>,
    /// Tool call this message answers (role `tool`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    /// Plain text message with no tool plumbing
    pub fn text(role: &str, content: String) -> Self {
        Self {
            role: role.to_owned(),
            content: Some(content),
            tool_calls: None,
            tool_call_id: None,
        }
    }
}

/// Tool definition in OpenAI function form
#[derive(Debug, Clone, Serialize)]
pub struct ChatTool {
    /// Always `function`
    #[serde(rename = "type")]
    pub tool_type: String,
    /// Function specification
    pub function: ChatFunction,
}

/// Function specification inside a tool definition
#[derive(Debug, Clone, Serialize)]
pub struct ChatFunction {
    /// Function name
    pub name: String,
    /// Human-readable description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema for parameters
    pub parameters: Value,
}

/// Completed tool call attached to an assistant message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatToolCall {
    /// Tool call identifier
    pub id: String,
    /// Always `function`
    #[serde(rename = "type")]
    pub tool_type: String,
    /// Invoked function
    pub function: ChatFunctionCall,
}

/// Function name + JSON-encoded arguments
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatFunctionCall {
    /// Function name
    pub name: String,
    /// JSON-encoded arguments
    pub arguments: String,
}

// -- Response types --

/// `POST /chat/completions` non-streaming response body
#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    /// Response identifier
    #[serde(default)]
    pub id: String,
    /// Model that produced the response
    #[serde(default)]
    pub model: String,
    /// Generated choices
    pub choices: Vec<ChatChoice>,
    /// Token accounting
    #[serde(default)]
    pub usage: Option<ChatUsage>,
}

/// Choice within a chat response
#[derive(Debug, Clone, Deserialize)]
pub struct ChatChoice {
    /// Generated message
    pub message: ChatChoiceMessage,
    /// Why generation stopped
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Message within a response choice
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatChoiceMessage {
    /// Text content
    #[serde(default)]
    pub content: Option<String>,
    /// Tool calls
    #[serde(default)]
    pub tool_calls: Option<Vec<ChatToolCall>>,
}

/// Token usage in a chat response
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct ChatUsage {
    /// Prompt tokens
    #[serde(default)]
    pub prompt_tokens: u32,
    /// Completion tokens
    #[serde(default)]
    pub completion_tokens: u32,
}

// -- Streaming chunk types --

/// One SSE chunk of a streamed chat completion
#[derive(Debug, Clone, Deserialize)]
pub struct ChatStreamChunk {
    /// Response identifier
    #[serde(default)]
    pub id: String,
    /// Model that produced the chunk
    #[serde(default)]
    pub model: String,
    /// Delta choices
    #[serde(default)]
    pub choices: Vec<ChatStreamChoice>,
    /// Usage, present on the final chunk of some providers
    #[serde(default)]
    pub usage: Option<ChatUsage>,
}

/// Choice within a stream chunk
#[derive(Debug, Clone, Deserialize)]
pub struct ChatStreamChoice {
    /// Incremental delta
    #[serde(default)]
    pub delta: ChatStreamDelta,
    /// Present on the final chunk of the choice
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Delta payload within a stream choice
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatStreamDelta {
    /// Incremental text
    #[serde(default)]
    pub content: Option<String>,
    /// Incremental tool call fragments
    #[serde(default)]
    pub tool_calls: Option<Vec<ChatStreamToolCall>>,
}

/// Tool call fragment within a stream delta
#[derive(Debug, Clone, Deserialize)]
pub struct ChatStreamToolCall {
    /// Index in the assembled `tool_calls` array
    #[serde(default)]
    pub index: u32,
    /// Tool call identifier (first fragment only)
    #[serde(default)]
    pub id: Option<String>,
    /// Partial function call
    #[serde(default)]
    pub function: Option<ChatStreamFunction>,
}

/// Partial function data within a streamed tool call
#[derive(Debug, Clone, Deserialize)]
pub struct ChatStreamFunction {
    /// Function name (first fragment only)
    #[serde(default)]
    pub name: Option<String>,
    /// Arguments fragment
    #[serde(default)]
    pub arguments: Option<String>,
}
