use serde::Deserialize;

/// Sentinel model name meaning "forward the client's model string unchanged"
pub const PASSTHROUGH: &str = "passthrough";

/// One candidate inside a model route
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RouteCandidate {
    /// Provider name this candidate targets
    pub provider: String,
    /// Upstream model name, or [`PASSTHROUGH`]
    #[serde(default = "default_model")]
    pub model: String,
    /// Lower priority is tried first; ties keep declaration order
    #[serde(default = "default_priority")]
    pub priority: u32,
    /// Require the provider entry bound to this account
    #[serde(default)]
    pub account_email: Option<String>,
}

impl RouteCandidate {
    /// Resolve the model string to send upstream for a given client model
    pub fn upstream_model<'a>(&'a self, client_model: &'a str) -> &'a str {
        if self.model == PASSTHROUGH {
            client_model
        } else {
            &self.model
        }
    }
}

fn default_model() -> String {
    PASSTHROUGH.to_owned()
}

const fn default_priority() -> u32 {
    1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_defaults_to_passthrough() {
        let c: RouteCandidate = serde_yaml::from_str("provider: anthropic").unwrap();
        assert_eq!(c.model, PASSTHROUGH);
        assert_eq!(c.priority, 1);
        assert_eq!(c.upstream_model("claude-3-5-sonnet-latest"), "claude-3-5-sonnet-latest");
    }

    #[test]
    fn literal_model_overrides_client_model() {
        let c: RouteCandidate =
            serde_yaml::from_str("provider: openrouter\nmodel: gpt-4o\npriority: 2").unwrap();
        assert_eq!(c.upstream_model("claude-3-5-sonnet-latest"), "gpt-4o");
    }
}
