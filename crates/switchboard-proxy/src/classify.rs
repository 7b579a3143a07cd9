//! Upstream outcome classification
//!
//! Decides, for every attempt, whether the result is a success, a failure
//! worth failing over (and counting against the provider's health), or a
//! failure that belongs to the client. Rules come from settings and are
//! compiled once per configuration snapshot.

use std::collections::HashSet;

use regex::Regex;
use switchboard_config::Settings;

/// Classified result of one upstream attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// 2xx and no configured failure signal
    Success,
    /// Health-counting failure; the dispatcher moves to the next candidate
    Retryable {
        /// Human-readable description for logs and the exhaustion error
        reason: String,
        /// Upstream status, when the failure had one
        status: Option<u16>,
    },
    /// Failure that is passed through to the client unchanged
    NonRetryable {
        /// Upstream status
        status: u16,
    },
}

/// Compiled classification rules
pub struct ClassifyRules {
    exception_patterns: Vec<String>,
    body_patterns: Vec<Regex>,
    status_codes: HashSet<u16>,
}

impl ClassifyRules {
    /// Compile rules from settings
    ///
    /// Body patterns were validated at config load; a pattern failing here
    /// anyway is a bug, so compilation errors propagate.
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let body_patterns = settings
            .unhealthy_response_body_patterns
            .iter()
            .map(|p| Regex::new(p).map_err(|e| anyhow::anyhow!("invalid body pattern '{p}': {e}")))
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(Self {
            exception_patterns: settings
                .unhealthy_exception_patterns
                .iter()
                .map(|p| p.to_lowercase())
                .collect(),
            body_patterns,
            status_codes: settings.unhealthy_http_codes.iter().copied().collect(),
        })
    }

    /// Classify a transport-level failure (no HTTP response)
    ///
    /// A message matching any configured substring is retryable and counts
    /// against health; anything else is surfaced to the client as a bad
    /// gateway without failover.
    pub fn classify_transport(&self, message: &str) -> Outcome {
        let lowered = message.to_lowercase();
        if self.exception_patterns.iter().any(|p| lowered.contains(p)) {
            Outcome::Retryable {
                reason: format!("transport error: {message}"),
                status: None,
            }
        } else {
            Outcome::NonRetryable { status: 502 }
        }
    }

    /// Classify an HTTP response by status then body
    ///
    /// Order matters: a listed status wins, then a body pattern match (a
    /// 200 carrying a known error body is still a failure), then 2xx.
    pub fn classify_response(&self, status: u16, body: &[u8]) -> Outcome {
        if self.status_codes.contains(&status) {
            return Outcome::Retryable {
                reason: format!("upstream returned {status}"),
                status: Some(status),
            };
        }

        if !self.body_patterns.is_empty() {
            let text = String::from_utf8_lossy(body);
            if let Some(pattern) = self.body_patterns.iter().find(|re| re.is_match(&text)) {
                return Outcome::Retryable {
                    reason: format!("response body matched pattern '{pattern}'"),
                    status: Some(status),
                };
            }
        }

        if (200..300).contains(&status) {
            Outcome::Success
        } else {
            Outcome::NonRetryable { status }
        }
    }
}
