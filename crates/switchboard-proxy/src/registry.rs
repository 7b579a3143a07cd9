//! Provider registry
//!
//! Materializes configured providers into handles carrying their own HTTP
//! clients (timeouts and outbound proxy are per provider and per streaming
//! mode), and answers lookups by `(name, account_email)`.

use std::sync::Arc;

use switchboard_config::{HttpTimeouts, ProviderConfig, Timeouts};

/// A configured provider ready to receive requests
#[derive(Debug)]
pub struct ProviderHandle {
    /// The provider's configuration
    pub config: ProviderConfig,
    /// Health-tracker key: `name` or `name:account_email`
    pub identity: String,
    /// Client for buffered calls
    pub client: reqwest::Client,
    /// Client for streaming calls (longer read timeout)
    pub streaming_client: reqwest::Client,
}

/// All configured providers, in declaration order
pub struct ProviderRegistry {
    entries: Vec<Arc<ProviderHandle>>,
}

impl ProviderRegistry {
    /// Build handles and their HTTP clients from configuration
    ///
    /// # Errors
    ///
    /// Returns an error when a proxy URL is invalid or a client cannot be
    /// constructed.
    pub fn from_config(providers: &[ProviderConfig], timeouts: &Timeouts) -> anyhow::Result<Self> {
        let mut entries = Vec::with_capacity(providers.len());

        for config in providers {
            let identity = config.identity();
            let client = build_client(config, &timeouts.non_streaming)?;
            let streaming_client = build_client(config, &timeouts.streaming)?;

            entries.push(Arc::new(ProviderHandle {
                config: config.clone(),
                identity,
                client,
                streaming_client,
            }));
        }

        Ok(Self { entries })
    }

    /// Look up a provider by name and optional required account
    ///
    /// Without a required account, an entry that itself has no account is
    /// preferred; otherwise any entry sharing the name matches.
    pub fn find(&self, name: &str, account_email: Option<&str>) -> Option<Arc<ProviderHandle>> {
        if let Some(email) = account_email {
            return self
                .entries
                .iter()
                .find(|p| p.config.name == name && p.config.account_email.as_deref() == Some(email))
                .cloned();
        }

        self.entries
            .iter()
            .find(|p| p.config.name == name && p.config.account_email.is_none())
            .or_else(|| self.entries.iter().find(|p| p.config.name == name))
            .cloned()
    }

    /// All provider handles, in declaration order
    pub fn entries(&self) -> &[Arc<ProviderHandle>] {
        &self.entries
    }
}

fn build_client(config: &ProviderConfig, timeouts: &HttpTimeouts) -> anyhow::Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .connect_timeout(timeouts.connect())
        .timeout(timeouts.read())
        .pool_idle_timeout(timeouts.pool());

    if let Some(proxy) = &config.proxy {
        let proxy = reqwest::Proxy::all(proxy)
            .map_err(|e| anyhow::anyhow!("invalid proxy URL for provider '{}': {e}", config.name))?;
        builder = builder.proxy(proxy);
    }

    builder
        .build()
        .map_err(|e| anyhow::anyhow!("failed to build HTTP client for provider '{}': {e}", config.name))
}
