//! Anthropic ↔ OpenAI translation
//!
//! Requests translate forward when a route lands on an OpenAI-typed
//! provider; the buffered OpenAI response translates back, and for
//! streaming clients the Anthropic SSE event sequence is synthesized from
//! the complete response.

use bytes::Bytes;
use serde_json::Value;

use crate::protocol::anthropic::{ContentBlock, MessagesRequest, MessagesResponse, TokenUsage};
use crate::protocol::openai::{
    ChatFunction, ChatFunctionCall, ChatMessage, ChatRequest, ChatResponse, ChatTool, ChatToolCall,
};

/// Translate an Anthropic request into an OpenAI chat request
pub fn messages_to_chat(request: &MessagesRequest, upstream_model: &str, stream: bool) -> ChatRequest {
    let mut messages = Vec::with_capacity(request.messages.len() + 1);

    if let Some(system) = &request.system {
        messages.push(ChatMessage::text("system", system_text(system)));
    }

    for message in &request.messages {
        push_translated_message(&mut messages, &message.role, &message.content);
    }

    let tools = request.tools.as_ref().map(|tools| {
        tools
            .iter()
            .map(|tool| ChatTool {
                tool_type: "function".to_owned(),
                function: ChatFunction {
                    name: tool.name.clone(),
                    description: tool.description.clone(),
                    parameters: tool.input_schema.clone(),
                },
            })
            .collect()
    });

    ChatRequest {
        model: upstream_model.to_owned(),
        messages,
        max_tokens: request.max_tokens,
        temperature: request.temperature,
        top_p: request.top_p,
        stop: request.stop_sequences.clone(),
        stream: stream.then_some(true),
        tools,
        tool_choice: translate_tool_choice(request.tool_choice.as_ref()),
    }
}

/// Translate a complete OpenAI response back into the Anthropic shape
pub fn chat_to_messages(response: &ChatResponse, fallback_model: &str) -> MessagesResponse {
    let choice = response.choices.first();

    let mut content = Vec::new();
    if let Some(choice) = choice {
        if let Some(text) = &choice.message.content
            && !text.is_empty()
        {
            content.push(ContentBlock::Text { text: text.clone() });
        }
        if let Some(tool_calls) = &choice.message.tool_calls {
            for call in tool_calls {
                content.push(tool_call_to_block(call));
            }
        }
    }

    let stop_reason = choice
        .and_then(|c| c.finish_reason.as_deref())
        .map(finish_reason_to_stop_reason)
        .map(ToOwned::to_owned);

    let model = if response.model.is_empty() {
        fallback_model.to_owned()
    } else {
        response.model.clone()
    };

    MessagesResponse {
        id: if response.id.is_empty() {
            format!("msg_{}", uuid::Uuid::new_v4().simple())
        } else {
            response.id.clone()
        },
        response_type: "message".to_owned(),
        role: "assistant".to_owned(),
        content,
        model,
        stop_reason,
        stop_sequence: None,
        usage: response.usage.map_or_else(TokenUsage::default, |u| TokenUsage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
        }),
    }
}

/// Synthesize the Anthropic SSE event sequence for a complete response
///
/// Emitted when an OpenAI-typed provider serves a streaming client: the
/// upstream response was buffered and classified first, so the stream is
/// replayed rather than relayed.
pub fn synthesize_sse(response: &MessagesResponse) -> Vec<Bytes> {
    let mut frames = Vec::with_capacity(response.content.len() * 3 + 3);

    frames.push(frame(
        "message_start",
        &serde_json::json!({
            "type": "message_start",
            "message": {
                "id": response.id,
                "type": "message",
                "role": "assistant",
                "model": response.model,
                "content": [],
                "stop_reason": null,
                "stop_sequence": null,
                "usage": {"input_tokens": response.usage.input_tokens, "output_tokens": 0}
            }
        }),
    ));

    for (index, block) in response.content.iter().enumerate() {
        match block {
            ContentBlock::Text { text } => {
                frames.push(frame(
                    "content_block_start",
                    &serde_json::json!({
                        "type": "content_block_start",
                        "index": index,
                        "content_block": {"type": "text", "text": ""}
                    }),
                ));
                frames.push(frame(
                    "content_block_delta",
                    &serde_json::json!({
                        "type": "content_block_delta",
                        "index": index,
                        "delta": {"type": "text_delta", "text": text}
                    }),
                ));
            }
            ContentBlock::ToolUse { id, name, input } => {
                frames.push(frame(
                    "content_block_start",
                    &serde_json::json!({
                        "type": "content_block_start",
                        "index": index,
                        "content_block": {"type": "tool_use", "id": id, "name": name, "input": {}}
                    }),
                ));
                frames.push(frame(
                    "content_block_delta",
                    &serde_json::json!({
                        "type": "content_block_delta",
                        "index": index,
                        "delta": {"type": "input_json_delta", "partial_json": input.to_string()}
                    }),
                ));
            }
        }
        frames.push(frame(
            "content_block_stop",
            &serde_json::json!({"type": "content_block_stop", "index": index}),
        ));
    }

    frames.push(frame(
        "message_delta",
        &serde_json::json!({
            "type": "message_delta",
            "delta": {
                "stop_reason": response.stop_reason,
                "stop_sequence": response.stop_sequence
            },
            "usage": {"output_tokens": response.usage.output_tokens}
        }),
    ));
    frames.push(frame("message_stop", &serde_json::json!({"type": "message_stop"})));

    frames
}

/// Frame one SSE event
fn frame(event: &str, data: &Value) -> Bytes {
    Bytes::from(format!("event: {event}\ndata: {data}\n\n"))
}

/// Map an OpenAI finish reason onto an Anthropic stop reason
fn finish_reason_to_stop_reason(finish_reason: &str) -> &'static str {
    match finish_reason {
        "length" => "max_tokens",
        "tool_calls" | "function_call" => "tool_use",
        _ => "end_turn",
    }
}

/// Flatten a system value (string or block array) into one string
fn system_text(system: &Value) -> String {
    match system {
        Value::String(text) => text.clone(),
        Value::Array(blocks) => {
            let mut out = String::new();
            for block in blocks {
                if let Some(text) = block.get("text").and_then(Value::as_str) {
                    if !out.is_empty() {
                        out.push('\n');
                    }
                    out.push_str(text);
                }
            }
            out
        }
        other => other.to_string(),
    }
}

/// Translate one Anthropic message, splitting out tool results and calls
fn push_translated_message(messages: &mut Vec<ChatMessage>, role: &str, content: &Value) {
    match content {
        Value::String(text) => messages.push(ChatMessage::text(role, text.clone())),
        Value::Array(blocks) => {
            let mut text = String::new();
            let mut tool_calls = Vec::new();

            for block in blocks {
                match block.get("type").and_then(Value::as_str) {
                    Some("text") => {
                        if let Some(t) = block.get("text").and_then(Value::as_str) {
                            text.push_str(t);
                        }
                    }
                    Some("tool_use") => {
                        tool_calls.push(ChatToolCall {
                            id: string_field(block, "id"),
                            tool_type: "function".to_owned(),
                            function: ChatFunctionCall {
                                name: string_field(block, "name"),
                                arguments: block.get("input").map(Value::to_string).unwrap_or_default(),
                            },
                        });
                    }
                    Some("tool_result") => {
                        // Tool results become their own `tool` role messages
                        messages.push(ChatMessage {
                            role: "tool".to_owned(),
                            content: Some(tool_result_text(block)),
                            tool_calls: None,
                            tool_call_id: Some(string_field(block, "tool_use_id")),
                        });
                    }
                    _ => {}
                }
            }

            if !text.is_empty() || !tool_calls.is_empty() {
                messages.push(ChatMessage {
                    role: role.to_owned(),
                    content: (!text.is_empty()).then_some(text),
                    tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
                    tool_call_id: None,
                });
            }
        }
        _ => {}
    }
}

fn tool_call_to_block(call: &ChatToolCall) -> ContentBlock {
    ContentBlock::ToolUse {
        id: call.id.clone(),
        name: call.function.name.clone(),
        input: serde_json::from_str(&call.function.arguments).unwrap_or(Value::Null),
    }
}

fn translate_tool_choice(tool_choice: Option<&Value>) -> Option<Value> {
    let choice = tool_choice?;
    match choice.get("type").and_then(Value::as_str) {
        Some("auto") => Some(Value::from("auto")),
        Some("any") => Some(Value::from("required")),
        Some("tool") => choice.get("name").and_then(Value::as_str).map(|name| {
            serde_json::json!({"type": "function", "function": {"name": name}})
        }),
        _ => None,
    }
}

fn string_field(value: &Value, key: &str) -> String {
    value.get(key).and_then(Value::as_str).unwrap_or_default().to_owned()
}

fn tool_result_text(block: &Value) -> String {
    match block.get("content") {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Array(parts)) => {
            let mut out = String::new();
            for part in parts {
                if let Some(text) = part.get("text").and_then(Value::as_str) {
                    out.push_str(text);
                }
            }
            out
        }
        _ => String::new(),
    }
}
