use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;

use crate::Config;

impl Config {
    /// Load configuration from a YAML file
    ///
    /// Reads the file, expands `{{ env.VAR }}` placeholders, then
    /// deserializes and validates the result.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, environment variable
    /// expansion fails, YAML parsing fails, or validation fails
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read config file {}: {e}", path.display()))?;

        Self::from_yaml(&raw)
    }

    /// Parse and validate configuration from a YAML string
    ///
    /// # Errors
    ///
    /// Returns an error on expansion, parse, or validation failure
    pub fn from_yaml(raw: &str) -> anyhow::Result<Self> {
        let expanded = crate::env::expand_env(raw)
            .map_err(|e| anyhow::anyhow!("config variable expansion failed: {e}"))?;

        let config: Self =
            serde_yaml::from_str(&expanded).map_err(|e| anyhow::anyhow!("failed to parse config: {e}"))?;

        config.validate()?;

        Ok(config)
    }

    /// Listen address derived from `settings.host` and `settings.port`
    ///
    /// # Errors
    ///
    /// Returns an error if `settings.host` is not a valid IP address
    pub fn listen_address(&self) -> anyhow::Result<SocketAddr> {
        let ip: IpAddr = self
            .settings
            .host
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid settings.host '{}': {e}", self.settings.host))?;
        Ok(SocketAddr::new(ip, self.settings.port))
    }

    /// Validate that the configuration is internally consistent
    ///
    /// # Errors
    ///
    /// Returns an error if no provider is configured, provider identities
    /// collide, a route references an unknown provider, or a body pattern
    /// is not a valid regex
    pub fn validate(&self) -> anyhow::Result<()> {
        self.validate_providers()?;
        self.validate_routes()?;
        self.validate_patterns()?;
        Ok(())
    }

    fn validate_providers(&self) -> anyhow::Result<()> {
        if self.providers.is_empty() {
            anyhow::bail!("at least one provider must be configured");
        }

        let mut seen = HashSet::new();
        for provider in &self.providers {
            if !seen.insert(provider.identity()) {
                anyhow::bail!("duplicate provider identity '{}'", provider.identity());
            }

            // OAuth credentials come from the token store; everything else
            // needs a literal (or the passthrough sentinel) up front
            if provider.auth_type != crate::AuthType::Oauth && provider.auth_value.is_none() {
                anyhow::bail!(
                    "provider '{}' with auth_type {:?} requires an auth_value",
                    provider.identity(),
                    provider.auth_type
                );
            }
        }

        Ok(())
    }

    fn validate_routes(&self) -> anyhow::Result<()> {
        for (pattern, candidates) in &self.model_routes {
            if candidates.is_empty() {
                anyhow::bail!("route '{pattern}' has no candidates");
            }

            for candidate in candidates {
                let known = self.providers.iter().any(|p| {
                    p.name == candidate.provider
                        && candidate
                            .account_email
                            .as_ref()
                            .is_none_or(|email| p.account_email.as_ref() == Some(email))
                });
                if !known {
                    anyhow::bail!(
                        "route '{pattern}' references unknown provider '{}'",
                        candidate.provider
                    );
                }
            }
        }

        Ok(())
    }

    fn validate_patterns(&self) -> anyhow::Result<()> {
        for pattern in &self.settings.unhealthy_response_body_patterns {
            regex::Regex::new(pattern)
                .map_err(|e| anyhow::anyhow!("invalid unhealthy_response_body_patterns entry '{pattern}': {e}"))?;
        }
        Ok(())
    }
}
