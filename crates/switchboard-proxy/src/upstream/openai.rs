//! Calls to OpenAI-typed providers
//!
//! These calls are always consumed in full before anything reaches the
//! client: a streamed upstream is aggregated chunk by chunk into a complete
//! chat response the dispatcher can classify and translate.

use eventsource_stream::Eventsource;
use futures_util::StreamExt;

use crate::protocol::openai::{
    ChatFunctionCall, ChatRequest, ChatResponse, ChatStreamChunk, ChatToolCall, ChatUsage,
};
use crate::registry::ProviderHandle;

use super::{AuthHeader, BearerKind, BufferedResponse, apply_auth, buffer_response};

/// Outcome of one chat completions call
pub(crate) enum ChatFetch {
    /// Streamed upstream, aggregated into one complete response
    Aggregated(ChatResponse),
    /// Raw buffered response (all non-streamed calls, and stream rejections);
    /// the dispatcher classifies it before parsing
    Raw(BufferedResponse),
}

fn completions_url(provider: &ProviderHandle) -> String {
    let base = provider.config.base_url.as_str().trim_end_matches('/');
    format!("{base}/chat/completions")
}

/// Issue a chat completions call, streaming upstream when asked to
pub(crate) async fn fetch_chat(
    provider: &ProviderHandle,
    body: &ChatRequest,
    auth: &AuthHeader,
    bearer_kind: BearerKind,
    stream_upstream: bool,
) -> Result<ChatFetch, String> {
    let client = if stream_upstream {
        &provider.streaming_client
    } else {
        &provider.client
    };

    let builder = client.post(completions_url(provider)).json(body);
    let response = apply_auth(builder, provider, auth, bearer_kind)
        .send()
        .await
        .map_err(|e| format!("request to {} failed: {e}", provider.identity))?;

    if stream_upstream && response.status().is_success() {
        aggregate_stream(provider, response).await.map(ChatFetch::Aggregated)
    } else {
        buffer_response(response).await.map(ChatFetch::Raw)
    }
}

/// Fold a streamed chat completion into one complete response
async fn aggregate_stream(provider: &ProviderHandle, response: reqwest::Response) -> Result<ChatResponse, String> {
    let mut events = response.bytes_stream().eventsource();
    let mut aggregator = ChatStreamAggregator::default();

    while let Some(event) = events.next().await {
        let event = event.map_err(|e| format!("stream from {} broke: {e}", provider.identity))?;
        let data = event.data.trim();
        if data.is_empty() || data == "[DONE]" {
            continue;
        }
        match serde_json::from_str::<ChatStreamChunk>(data) {
            Ok(chunk) => aggregator.push(&chunk),
            Err(e) => {
                tracing::debug!(provider = %provider.identity, error = %e, "skipping unparseable stream chunk");
            }
        }
    }

    Ok(aggregator.finish())
}

/// Accumulates stream chunks into a complete chat response
#[derive(Default)]
pub(crate) struct ChatStreamAggregator {
    id: String,
    model: String,
    content: String,
    tool_calls: Vec<PartialToolCall>,
    finish_reason: Option<String>,
    usage: Option<ChatUsage>,
}

#[derive(Default)]
struct PartialToolCall {
    id: String,
    name: String,
    arguments: String,
}

impl ChatStreamAggregator {
    pub(crate) fn push(&mut self, chunk: &ChatStreamChunk) {
        if self.id.is_empty() && !chunk.id.is_empty() {
            self.id.clone_from(&chunk.id);
        }
        if self.model.is_empty() && !chunk.model.is_empty() {
            self.model.clone_from(&chunk.model);
        }
        if let Some(usage) = chunk.usage {
            self.usage = Some(usage);
        }

        for choice in &chunk.choices {
            if let Some(text) = &choice.delta.content {
                self.content.push_str(text);
            }
            if let Some(calls) = &choice.delta.tool_calls {
                for call in calls {
                    let index = call.index as usize;
                    while self.tool_calls.len() <= index {
                        self.tool_calls.push(PartialToolCall::default());
                    }
                    let slot = &mut self.tool_calls[index];
                    if let Some(id) = &call.id {
                        slot.id.clone_from(id);
                    }
                    if let Some(function) = &call.function {
                        if let Some(name) = &function.name {
                            slot.name.clone_from(name);
                        }
                        if let Some(arguments) = &function.arguments {
                            slot.arguments.push_str(arguments);
                        }
                    }
                }
            }
            if let Some(reason) = &choice.finish_reason {
                self.finish_reason = Some(reason.clone());
            }
        }
    }

    pub(crate) fn finish(self) -> ChatResponse {
        let tool_calls: Vec<ChatToolCall> = self
            .tool_calls
            .into_iter()
            .filter(|c| !c.name.is_empty())
            .map(|c| ChatToolCall {
                id: c.id,
                tool_type: "function".to_owned(),
                function: ChatFunctionCall {
                    name: c.name,
                    arguments: c.arguments,
                },
            })
            .collect();

        let message = crate::protocol::openai::ChatChoiceMessage {
            content: (!self.content.is_empty()).then_some(self.content),
            tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
        };

        ChatResponse {
            id: self.id,
            model: self.model,
            choices: vec![crate::protocol::openai::ChatChoice {
                message,
                finish_reason: self.finish_reason,
            }],
            usage: self.usage,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(json: serde_json::Value) -> ChatStreamChunk {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn aggregates_text_chunks_in_order() {
        let mut agg = ChatStreamAggregator::default();
        agg.push(&chunk(serde_json::json!({
            "id": "c1", "model": "gpt-4o",
            "choices": [{"delta": {"content": "Hel"}}]
        })));
        agg.push(&chunk(serde_json::json!({
            "choices": [{"delta": {"content": "lo"}}]
        })));
        agg.push(&chunk(serde_json::json!({
            "choices": [{"delta": {}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 5, "completion_tokens": 2}
        })));

        let response = agg.finish();
        assert_eq!(response.id, "c1");
        assert_eq!(response.choices[0].message.content.as_deref(), Some("Hello"));
        assert_eq!(response.choices[0].finish_reason.as_deref(), Some("stop"));
        assert_eq!(response.usage.unwrap().completion_tokens, 2);
    }

    #[test]
    fn aggregates_tool_call_fragments() {
        let mut agg = ChatStreamAggregator::default();
        agg.push(&chunk(serde_json::json!({
            "choices": [{"delta": {"tool_calls": [
                {"index": 0, "id": "call_1", "function": {"name": "get_weather", "arguments": ""}}
            ]}}]
        })));
        agg.push(&chunk(serde_json::json!({
            "choices": [{"delta": {"tool_calls": [
                {"index": 0, "function": {"arguments": "{\"city\":"}}
            ]}}]
        })));
        agg.push(&chunk(serde_json::json!({
            "choices": [{"delta": {"tool_calls": [
                {"index": 0, "function": {"arguments": "\"SF\"}"}}
            ]}}, {"delta": {}, "finish_reason": "tool_calls"}]
        })));

        let response = agg.finish();
        let calls = response.choices[0].message.tool_calls.as_ref().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "call_1");
        assert_eq!(calls[0].function.name, "get_weather");
        assert_eq!(calls[0].function.arguments, "{\"city\":\"SF\"}");
    }

    #[test]
    fn nameless_tool_slots_are_dropped() {
        let mut agg = ChatStreamAggregator::default();
        agg.push(&chunk(serde_json::json!({
            "choices": [{"delta": {"tool_calls": [
                {"index": 1, "id": "call_2", "function": {"name": "lookup", "arguments": "{}"}}
            ]}}]
        })));

        // Index 0 was never populated; only the named call survives
        let response = agg.finish();
        let calls = response.choices[0].message.tool_calls.as_ref().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].function.name, "lookup");
    }
}
