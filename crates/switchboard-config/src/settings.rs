use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Behavioral settings for the balancer
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// How candidates within a route are ordered
    #[serde(default)]
    pub selection_strategy: SelectionStrategy,
    /// Seconds an unhealthy provider stays ineligible
    #[serde(default = "default_failure_cooldown")]
    pub failure_cooldown: u64,
    /// Consecutive errors before a provider turns unhealthy
    #[serde(default = "default_unhealthy_threshold")]
    pub unhealthy_threshold: u32,
    /// Reset the error counter on any successful response
    #[serde(default = "default_true")]
    pub unhealthy_reset_on_success: bool,
    /// Seconds since the last error after which a provider heals on its own
    #[serde(default = "default_unhealthy_reset_timeout")]
    pub unhealthy_reset_timeout: u64,
    /// HTTP client timeouts
    #[serde(default)]
    pub timeouts: Timeouts,
    /// Transport error substrings that count toward unhealthiness
    #[serde(default = "default_exception_patterns")]
    pub unhealthy_exception_patterns: Vec<String>,
    /// Response body regexes that count toward unhealthiness
    #[serde(default)]
    pub unhealthy_response_body_patterns: Vec<String>,
    /// HTTP status codes that count toward unhealthiness
    #[serde(default = "default_unhealthy_http_codes")]
    pub unhealthy_http_codes: Vec<u16>,
    /// In-flight request deduplication
    #[serde(default)]
    pub deduplication: DeduplicationSettings,
    /// OAuth token management
    #[serde(default)]
    pub oauth: OauthSettings,
    /// Forced streaming mode; `auto` picks per provider type
    #[serde(default)]
    pub streaming_mode: StreamingMode,
    /// Listen host
    #[serde(default = "default_host")]
    pub host: String,
    /// Listen port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Log filter (tracing `EnvFilter` syntax)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Optional log file; stdout when unset
    #[serde(default)]
    pub log_file_path: Option<PathBuf>,
    /// Test-only request delay injection
    #[serde(default)]
    pub testing: Option<TestingSettings>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            selection_strategy: SelectionStrategy::default(),
            failure_cooldown: default_failure_cooldown(),
            unhealthy_threshold: default_unhealthy_threshold(),
            unhealthy_reset_on_success: true,
            unhealthy_reset_timeout: default_unhealthy_reset_timeout(),
            timeouts: Timeouts::default(),
            unhealthy_exception_patterns: default_exception_patterns(),
            unhealthy_response_body_patterns: Vec::new(),
            unhealthy_http_codes: default_unhealthy_http_codes(),
            deduplication: DeduplicationSettings::default(),
            oauth: OauthSettings::default(),
            streaming_mode: StreamingMode::default(),
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            log_file_path: None,
            testing: None,
        }
    }
}

impl Settings {
    /// Cooldown window as a [`Duration`]
    pub const fn failure_cooldown_duration(&self) -> Duration {
        Duration::from_secs(self.failure_cooldown)
    }

    /// Self-heal window as a [`Duration`]
    pub const fn unhealthy_reset_duration(&self) -> Duration {
        Duration::from_secs(self.unhealthy_reset_timeout)
    }
}

/// Candidate ordering strategy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    /// Ascending priority, declaration order on ties
    #[default]
    Priority,
    /// Rotate equal-priority candidates with a per-route cursor
    RoundRobin,
    /// Shuffle on every call
    Random,
}

/// Streaming delivery mode toward the client
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamingMode {
    /// Direct for Anthropic providers, background for OpenAI providers
    #[default]
    Auto,
    /// Pipe upstream bytes through as they arrive
    Direct,
    /// Buffer and classify the full upstream response before publishing
    Background,
}

/// HTTP client timeout groups
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Timeouts {
    /// Timeouts for buffered (non-streaming) upstream calls
    #[serde(default = "HttpTimeouts::non_streaming")]
    pub non_streaming: HttpTimeouts,
    /// Timeouts for streaming upstream calls
    #[serde(default = "HttpTimeouts::streaming")]
    pub streaming: HttpTimeouts,
    /// Timeouts around the deduplication table
    #[serde(default)]
    pub caching: CachingTimeouts,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            non_streaming: HttpTimeouts::non_streaming(),
            streaming: HttpTimeouts::streaming(),
            caching: CachingTimeouts::default(),
        }
    }
}

/// Connect / read / pool timeouts in seconds
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HttpTimeouts {
    /// TCP connect timeout
    pub connect_timeout: u64,
    /// Whole-request (read) timeout
    pub read_timeout: u64,
    /// Idle pooled connection timeout
    pub pool_timeout: u64,
}

impl HttpTimeouts {
    const fn non_streaming() -> Self {
        Self {
            connect_timeout: 30,
            read_timeout: 120,
            pool_timeout: 30,
        }
    }

    const fn streaming() -> Self {
        Self {
            connect_timeout: 30,
            read_timeout: 600,
            pool_timeout: 30,
        }
    }

    /// Connect timeout as a [`Duration`]
    pub const fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }

    /// Read timeout as a [`Duration`]
    pub const fn read(&self) -> Duration {
        Duration::from_secs(self.read_timeout)
    }

    /// Pool idle timeout as a [`Duration`]
    pub const fn pool(&self) -> Duration {
        Duration::from_secs(self.pool_timeout)
    }
}

/// Deduplication-adjacent timeouts
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CachingTimeouts {
    /// Seconds a dedup subscriber waits for the next chunk before giving up
    #[serde(default = "default_deduplication_timeout")]
    pub deduplication_timeout: u64,
}

impl Default for CachingTimeouts {
    fn default() -> Self {
        Self {
            deduplication_timeout: default_deduplication_timeout(),
        }
    }
}

impl CachingTimeouts {
    /// Subscriber wait bound as a [`Duration`]
    pub const fn deduplication(&self) -> Duration {
        Duration::from_secs(self.deduplication_timeout)
    }
}

/// In-flight deduplication settings
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeduplicationSettings {
    /// Whether concurrent identical requests share one upstream call
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Include `max_tokens` in the request fingerprint
    #[serde(default)]
    pub include_max_tokens_in_signature: bool,
    /// Seconds a mid-stream-errored entry stays joinable
    #[serde(default = "default_sse_error_cleanup_delay")]
    pub sse_error_cleanup_delay: u64,
}

impl Default for DeduplicationSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            include_max_tokens_in_signature: false,
            sse_error_cleanup_delay: default_sse_error_cleanup_delay(),
        }
    }
}

/// OAuth token lifecycle settings
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OauthSettings {
    /// Persist tokens to the OS keyring
    #[serde(default = "default_true")]
    pub enable_persistence: bool,
    /// Refresh tokens automatically when they near expiry
    #[serde(default = "default_true")]
    pub enable_auto_refresh: bool,
    /// Keyring service name tokens are stored under
    #[serde(default = "default_service_name")]
    pub service_name: String,
    /// Token endpoint override / proxy for refresh and exchange calls
    #[serde(default)]
    pub proxy: Option<String>,
}

impl Default for OauthSettings {
    fn default() -> Self {
        Self {
            enable_persistence: true,
            enable_auto_refresh: true,
            service_name: default_service_name(),
            proxy: None,
        }
    }
}

/// Request delay injection for exercising timeout paths in tests
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TestingSettings {
    /// Whether delay injection is active
    #[serde(default)]
    pub simulate_delay: bool,
    /// Seconds to sleep before dispatching a triggered request
    #[serde(default)]
    pub delay_seconds: u64,
    /// Keywords in message content that trigger the delay
    #[serde(default)]
    pub delay_trigger_keywords: Vec<String>,
}

const fn default_true() -> bool {
    true
}

const fn default_failure_cooldown() -> u64 {
    180
}

const fn default_unhealthy_threshold() -> u32 {
    2
}

const fn default_unhealthy_reset_timeout() -> u64 {
    300
}

const fn default_deduplication_timeout() -> u64 {
    180
}

const fn default_sse_error_cleanup_delay() -> u64 {
    3
}

fn default_exception_patterns() -> Vec<String> {
    ["connection", "timeout", "timed out", "reset by peer", "dns"]
        .into_iter()
        .map(ToOwned::to_owned)
        .collect()
}

fn default_unhealthy_http_codes() -> Vec<u16> {
    vec![402, 408, 429, 500, 502, 503, 504]
}

fn default_host() -> String {
    "127.0.0.1".to_owned()
}

const fn default_port() -> u16 {
    9090
}

fn default_log_level() -> String {
    "info".to_owned()
}

fn default_service_name() -> String {
    "switchboard".to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let settings = Settings::default();
        assert_eq!(settings.selection_strategy, SelectionStrategy::Priority);
        assert_eq!(settings.unhealthy_threshold, 2);
        assert!(settings.unhealthy_reset_on_success);
        assert!(settings.deduplication.enabled);
        assert!(!settings.deduplication.include_max_tokens_in_signature);
        assert_eq!(settings.streaming_mode, StreamingMode::Auto);
        assert_eq!(settings.timeouts.caching.deduplication_timeout, 180);
        assert!(settings.unhealthy_http_codes.contains(&502));
    }

    #[test]
    fn partial_yaml_fills_defaults() {
        let settings: Settings = serde_yaml::from_str(
            "selection_strategy: round_robin\nfailure_cooldown: 60\ndeduplication:\n  sse_error_cleanup_delay: 5",
        )
        .unwrap();
        assert_eq!(settings.selection_strategy, SelectionStrategy::RoundRobin);
        assert_eq!(settings.failure_cooldown, 60);
        assert_eq!(settings.deduplication.sse_error_cleanup_delay, 5);
        assert!(settings.deduplication.enabled);
    }

    #[test]
    fn unknown_settings_key_is_rejected() {
        let result: Result<Settings, _> = serde_yaml::from_str("failover_http_codes: [502]");
        assert!(result.is_err(), "legacy keys must fail loudly");
    }

    #[test]
    fn timeout_groups_differ_by_mode() {
        let settings = Settings::default();
        assert!(settings.timeouts.streaming.read() > settings.timeouts.non_streaming.read());
    }
}
