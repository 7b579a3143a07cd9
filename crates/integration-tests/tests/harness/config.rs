//! Programmatic configuration builder for integration tests

use indexmap::IndexMap;
use secrecy::SecretString;
use switchboard_config::{
    AuthType, CachingTimeouts, Config, OauthSettings, ProviderConfig, ProviderType, RouteCandidate,
    Settings, Timeouts,
};

/// Builder for constructing test configurations
pub struct ConfigBuilder {
    providers: Vec<ProviderConfig>,
    model_routes: IndexMap<String, Vec<RouteCandidate>>,
    settings: Settings,
}

impl ConfigBuilder {
    /// Minimal defaults: loopback listen address, no keyring persistence,
    /// short dedup timeout so a broken test fails fast
    pub fn new() -> Self {
        let settings = Settings {
            host: "127.0.0.1".to_owned(),
            port: 0,
            oauth: OauthSettings {
                enable_persistence: false,
                ..OauthSettings::default()
            },
            timeouts: Timeouts {
                caching: CachingTimeouts {
                    deduplication_timeout: 10,
                },
                ..Timeouts::default()
            },
            ..Settings::default()
        };
        Self {
            providers: Vec::new(),
            model_routes: IndexMap::new(),
            settings,
        }
    }

    fn provider(name: &str, provider_type: ProviderType, base_url: &str) -> ProviderConfig {
        ProviderConfig {
            name: name.to_owned(),
            provider_type,
            base_url: base_url.parse().expect("valid mock URL"),
            auth_type: AuthType::ApiKey,
            auth_value: Some(SecretString::from("test-key")),
            account_email: None,
            proxy: None,
            enabled: true,
        }
    }

    /// Add an Anthropic-typed provider pointed at a mock backend
    pub fn with_anthropic_provider(mut self, name: &str, base_url: &str) -> Self {
        self.providers
            .push(Self::provider(name, ProviderType::Anthropic, base_url));
        self
    }

    /// Add an OpenAI-typed provider pointed at a mock backend
    pub fn with_openai_provider(mut self, name: &str, base_url: &str) -> Self {
        self.providers
            .push(Self::provider(name, ProviderType::Openai, base_url));
        self
    }

    /// Add an OAuth-authenticated Anthropic provider bound to an account
    pub fn with_oauth_provider(mut self, name: &str, base_url: &str, account_email: &str) -> Self {
        let mut provider = Self::provider(name, ProviderType::Anthropic, base_url);
        provider.auth_type = AuthType::Oauth;
        provider.auth_value = None;
        provider.account_email = Some(account_email.to_owned());
        self.providers.push(provider);
        self
    }

    /// Add a passthrough-auth provider (client credential forwarded)
    pub fn with_passthrough_provider(mut self, name: &str, base_url: &str) -> Self {
        let mut provider = Self::provider(name, ProviderType::Anthropic, base_url);
        provider.auth_value = Some(SecretString::from("passthrough"));
        self.providers.push(provider);
        self
    }

    /// Add a route: pattern → (provider, priority) candidates, passthrough model
    pub fn with_route(mut self, pattern: &str, candidates: &[(&str, u32)]) -> Self {
        let candidates = candidates
            .iter()
            .map(|(provider, priority)| RouteCandidate {
                provider: (*provider).to_owned(),
                model: "passthrough".to_owned(),
                priority: *priority,
                account_email: None,
            })
            .collect();
        self.model_routes.insert(pattern.to_owned(), candidates);
        self
    }

    /// Add a route candidate with an explicit upstream model
    pub fn with_route_model(mut self, pattern: &str, provider: &str, model: &str) -> Self {
        self.model_routes.insert(
            pattern.to_owned(),
            vec![RouteCandidate {
                provider: provider.to_owned(),
                model: model.to_owned(),
                priority: 1,
                account_email: None,
            }],
        );
        self
    }

    /// Set the consecutive-error threshold
    pub fn with_unhealthy_threshold(mut self, threshold: u32) -> Self {
        self.settings.unhealthy_threshold = threshold;
        self
    }

    /// Set the failure cooldown in seconds
    pub fn with_failure_cooldown(mut self, seconds: u64) -> Self {
        self.settings.failure_cooldown = seconds;
        self
    }

    /// Set the SSE error retention window in seconds
    pub fn with_sse_cleanup_delay(mut self, seconds: u64) -> Self {
        self.settings.deduplication.sse_error_cleanup_delay = seconds;
        self
    }

    /// Disable in-flight deduplication
    pub fn without_dedup(mut self) -> Self {
        self.settings.deduplication.enabled = false;
        self
    }

    /// Point OAuth token-endpoint calls at a mock
    pub fn with_oauth_proxy(mut self, base_url: &str) -> Self {
        self.settings.oauth.proxy = Some(base_url.to_owned());
        self
    }

    /// Build and validate the final config
    pub fn build(self) -> Config {
        let config = Config {
            providers: self.providers,
            model_routes: self.model_routes,
            settings: self.settings,
        };
        config.validate().expect("test config must validate");
        config
    }
}
