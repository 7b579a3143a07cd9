//! Deterministic request identity for deduplication
//!
//! Two requests are duplicates when their fingerprints match. The hash
//! covers the semantically meaningful request fields and is computed over a
//! canonical JSON rendering (recursively sorted object keys), so client-side
//! key ordering and whitespace never split identical requests.

use sha2::{Digest, Sha256};

use serde_json::Value;

use crate::protocol::anthropic::MessagesRequest;

/// SHA-256 digest identifying a deduplicatable request
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Full hex digest
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    /// Shortened form for log lines
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", &self.0[..12.min(self.0.len())])
    }
}

/// Compute the fingerprint of a request
///
/// Covers: model, messages (role + content verbatim), system prompt, tool
/// definitions, sampling parameters, and the stream flag. `max_tokens` is
/// included only when the operator opted in.
pub fn fingerprint(request: &MessagesRequest, include_max_tokens: bool) -> Fingerprint {
    let mut fields: Vec<(&str, Value)> = vec![
        ("model", Value::from(request.model.clone())),
        (
            "messages",
            Value::Array(
                request
                    .messages
                    .iter()
                    .map(|m| {
                        serde_json::json!({
                            "role": m.role,
                            "content": m.content,
                        })
                    })
                    .collect(),
            ),
        ),
        ("stream", Value::from(request.wants_stream())),
    ];

    if let Some(system) = &request.system {
        fields.push(("system", system.clone()));
    }
    if let Some(tools) = &request.tools {
        fields.push((
            "tools",
            serde_json::to_value(tools).unwrap_or(Value::Null),
        ));
    }
    if let Some(temperature) = request.temperature {
        fields.push(("temperature", Value::from(temperature)));
    }
    if let Some(top_p) = request.top_p {
        fields.push(("top_p", Value::from(top_p)));
    }
    if let Some(top_k) = request.top_k {
        fields.push(("top_k", Value::from(top_k)));
    }
    if let Some(stop) = &request.stop_sequences {
        fields.push(("stop_sequences", Value::from(stop.clone())));
    }
    if include_max_tokens && let Some(max_tokens) = request.max_tokens {
        fields.push(("max_tokens", Value::from(max_tokens)));
    }

    let root = Value::Object(
        fields
            .into_iter()
            .map(|(k, v)| (k.to_owned(), v))
            .collect(),
    );

    let mut canonical = String::new();
    write_canonical(&root, &mut canonical);

    let digest = Sha256::digest(canonical.as_bytes());
    Fingerprint(hex_encode(&digest))
}

/// Write a canonical JSON rendering: object keys sorted at every level
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::from((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;

    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{byte:02x}");
    }
    out
}
