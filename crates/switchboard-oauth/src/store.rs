//! Per-account token store with singleflight refresh
//!
//! The store is the single source of truth for token data. Refresh for a
//! given account is coalesced: concurrent callers block on one per-account
//! async mutex and the first one through does the HTTP work; the rest
//! re-check state after acquiring the lock and find it already done.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use switchboard_config::OauthSettings;
use tokio::sync::Mutex;

use crate::error::OauthError;
use crate::keyring_store;
use crate::token::{self, TokenResponse};

/// A token is refreshed (and unusable) within this window before expiry
const EXPIRY_SLACK_MS: u64 = 5 * 60 * 1000;

/// How long refresh is suppressed after a refresh failure
const REFRESH_BACKOFF_MS: u64 = 60 * 60 * 1000;

/// Stored OAuth token for one account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OauthToken {
    /// Bearer token for API calls
    pub access_token: String,
    /// Token for obtaining the next access token
    pub refresh_token: String,
    /// Expiry as unix milliseconds (absolute, converted from `expires_in`)
    pub expires_at: u64,
    /// Granted scopes
    #[serde(default)]
    pub scopes: Vec<String>,
    /// When the account was first authorized (unix ms)
    pub created_at: u64,
    /// Last time this token authenticated a request (unix ms, 0 = never)
    #[serde(default)]
    pub last_used_at: u64,
    /// Requests authenticated with this account
    #[serde(default)]
    pub usage_count: u64,
    /// Refresh suppressed until this time after a failure (unix ms)
    #[serde(default)]
    pub refresh_backoff_until: u64,
}

impl OauthToken {
    fn from_response(response: TokenResponse, created_at: u64, now: u64) -> Self {
        let scopes = response
            .scope
            .as_deref()
            .unwrap_or_default()
            .split_whitespace()
            .map(ToOwned::to_owned)
            .collect();

        Self {
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            expires_at: now + response.expires_in * 1000,
            scopes,
            created_at,
            last_used_at: 0,
            usage_count: 0,
            refresh_backoff_until: 0,
        }
    }

    /// Usable: comfortably inside the expiry window and not backing off
    pub fn is_usable(&self, now_ms: u64) -> bool {
        now_ms + EXPIRY_SLACK_MS < self.expires_at && now_ms >= self.refresh_backoff_until
    }

    /// Within the slack window before expiry (or past it)
    pub fn needs_refresh(&self, now_ms: u64) -> bool {
        now_ms + EXPIRY_SLACK_MS >= self.expires_at
    }

    fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at
    }
}

/// Secret-free view of one account, for the status endpoint
#[derive(Debug, Clone, Serialize)]
pub struct AccountSnapshot {
    /// Account email
    pub account: String,
    /// Token expiry (unix ms)
    pub expires_at: u64,
    /// Granted scopes
    pub scopes: Vec<String>,
    /// First authorization time (unix ms)
    pub created_at: u64,
    /// Last request time (unix ms, 0 = never)
    pub last_used_at: u64,
    /// Requests authenticated with this account
    pub usage_count: u64,
    /// Active refresh backoff deadline (unix ms, 0 = none)
    pub refresh_backoff_until: u64,
    /// Whether the token is currently usable
    pub usable: bool,
}

/// Thread-safe store of per-account OAuth tokens
pub struct TokenStore {
    tokens: DashMap<String, OauthToken>,
    refresh_locks: DashMap<String, Arc<Mutex<()>>>,
    http: reqwest::Client,
    settings: OauthSettings,
}

impl TokenStore {
    /// Create an empty store
    pub fn new(settings: OauthSettings) -> Self {
        Self {
            tokens: DashMap::new(),
            refresh_locks: DashMap::new(),
            http: reqwest::Client::new(),
            settings,
        }
    }

    /// Load previously persisted tokens from the OS keyring
    ///
    /// No-op (returns 0) when persistence is disabled. Returns the number
    /// of accounts loaded.
    pub async fn load_persisted(&self) -> Result<usize, OauthError> {
        if !self.settings.enable_persistence {
            return Ok(0);
        }

        let service = self.settings.service_name.clone();
        let accounts = run_blocking(move || keyring_store::load_index(&service)).await?;

        let mut loaded = 0;
        for account in accounts {
            let service = self.settings.service_name.clone();
            let key = account.clone();
            if let Some(token) = run_blocking(move || keyring_store::load_token(&service, &key)).await? {
                self.tokens.insert(account, token);
                loaded += 1;
            }
        }

        tracing::info!(accounts = loaded, "loaded persisted oauth tokens");
        Ok(loaded)
    }

    /// Record tokens for an account after a completed authorization flow
    pub async fn insert(&self, account: String, response: TokenResponse) {
        let now = now_ms();
        let token = OauthToken::from_response(response, now, now);
        self.tokens.insert(account.clone(), token.clone());
        tracing::info!(account, "stored oauth token");
        self.persist(&account, &token).await;
    }

    /// Get a usable access token for an account, refreshing when needed
    ///
    /// After a refresh failure the previous token is still returned as long
    /// as it has not actually expired.
    pub async fn access_token(&self, account: &str) -> Result<String, OauthError> {
        let now = now_ms();
        let wants_refresh = {
            let token = self
                .tokens
                .get(account)
                .ok_or_else(|| OauthError::AccountNotFound(account.to_owned()))?;
            self.settings.enable_auto_refresh
                && token.needs_refresh(now)
                && now >= token.refresh_backoff_until
        };

        if wants_refresh {
            self.refresh(account).await;
        }

        let now = now_ms();
        let mut token = self
            .tokens
            .get_mut(account)
            .ok_or_else(|| OauthError::AccountNotFound(account.to_owned()))?;

        if token.is_expired(now) {
            return Err(OauthError::TokenUnavailable(account.to_owned()));
        }

        token.last_used_at = now;
        token.usage_count += 1;
        Ok(token.access_token.clone())
    }

    /// Refresh an account's token regardless of its remaining lifetime
    pub async fn force_refresh(&self, account: &str) -> Result<(), OauthError> {
        let current = self
            .tokens
            .get(account)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| OauthError::AccountNotFound(account.to_owned()))?;

        let lock = self.refresh_lock(account);
        let _guard = lock.lock().await;

        let response =
            token::refresh_token(&self.http, self.settings.proxy.as_deref(), &current.refresh_token).await?;
        self.replace_after_refresh(account, &current, response).await;
        Ok(())
    }

    /// Pick the usable account whose token was used least recently
    ///
    /// This is the round-robin used when a route candidate requires OAuth
    /// but does not pin an account.
    pub fn select_account(&self) -> Option<String> {
        let now = now_ms();
        self.tokens
            .iter()
            .filter(|entry| entry.value().is_usable(now))
            .min_by_key(|entry| entry.value().last_used_at)
            .map(|entry| entry.key().clone())
    }

    /// Remove one account's token; returns whether it existed
    pub async fn remove(&self, account: &str) -> bool {
        let existed = self.tokens.remove(account).is_some();
        if existed && self.settings.enable_persistence {
            let service = self.settings.service_name.clone();
            let key = account.to_owned();
            let accounts = self.account_names();
            if let Err(e) = run_blocking(move || {
                keyring_store::delete_token(&service, &key)?;
                keyring_store::save_index(&service, &accounts)
            })
            .await
            {
                tracing::warn!(account, error = %e, "failed to remove persisted token");
            }
        }
        existed
    }

    /// Remove every stored token; returns how many were removed
    pub async fn remove_all(&self) -> usize {
        let accounts = self.account_names();
        let mut removed = 0;
        for account in accounts {
            if self.remove(&account).await {
                removed += 1;
            }
        }
        removed
    }

    /// Secret-free snapshot of all accounts, sorted by account email
    pub fn snapshot(&self) -> Vec<AccountSnapshot> {
        let now = now_ms();
        let mut accounts: Vec<AccountSnapshot> = self
            .tokens
            .iter()
            .map(|entry| {
                let token = entry.value();
                AccountSnapshot {
                    account: entry.key().clone(),
                    expires_at: token.expires_at,
                    scopes: token.scopes.clone(),
                    created_at: token.created_at,
                    last_used_at: token.last_used_at,
                    usage_count: token.usage_count,
                    refresh_backoff_until: token.refresh_backoff_until,
                    usable: token.is_usable(now),
                }
            })
            .collect();
        accounts.sort_by(|a, b| a.account.cmp(&b.account));
        accounts
    }

    /// Singleflight refresh: first caller does the work, the rest observe it
    async fn refresh(&self, account: &str) {
        let lock = self.refresh_lock(account);
        let _guard = lock.lock().await;

        let now = now_ms();
        let Some(current) = self.tokens.get(account).map(|entry| entry.value().clone()) else {
            return;
        };

        // Another caller finished the refresh while we waited on the lock
        if !current.needs_refresh(now) || now < current.refresh_backoff_until {
            return;
        }

        match token::refresh_token(&self.http, self.settings.proxy.as_deref(), &current.refresh_token).await {
            Ok(response) => {
                self.replace_after_refresh(account, &current, response).await;
                tracing::info!(account, "access token refreshed");
            }
            Err(e) => {
                if let Some(mut token) = self.tokens.get_mut(account) {
                    token.refresh_backoff_until = now_ms() + REFRESH_BACKOFF_MS;
                }
                tracing::warn!(account, error = %e, "token refresh failed, backing off for 1h");
            }
        }
    }

    /// Swap in the refreshed token, carrying usage bookkeeping over
    async fn replace_after_refresh(&self, account: &str, previous: &OauthToken, response: TokenResponse) {
        let now = now_ms();
        let mut refreshed = OauthToken::from_response(response, previous.created_at, now);
        refreshed.last_used_at = previous.last_used_at;
        refreshed.usage_count = previous.usage_count;
        self.tokens.insert(account.to_owned(), refreshed.clone());
        self.persist(account, &refreshed).await;
    }

    fn refresh_lock(&self, account: &str) -> Arc<Mutex<()>> {
        let entry = self.refresh_locks.entry(account.to_owned()).or_default();
        Arc::clone(entry.value())
    }

    fn account_names(&self) -> Vec<String> {
        self.tokens.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Persist one token plus the account index; failures are logged, not
    /// propagated, so a keyring hiccup never fails a request
    async fn persist(&self, account: &str, token: &OauthToken) {
        if !self.settings.enable_persistence {
            return;
        }

        let service = self.settings.service_name.clone();
        let key = account.to_owned();
        let value = token.clone();
        let accounts = self.account_names();

        let result = run_blocking(move || {
            keyring_store::save_token(&service, &key, &value)?;
            keyring_store::save_index(&service, &accounts)
        })
        .await;

        if let Err(e) = result {
            tracing::warn!(account, error = %e, "failed to persist token to keyring");
        }
    }
}

/// Run a blocking keyring operation off the async runtime
async fn run_blocking<T, F>(f: F) -> Result<T, OauthError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, OauthError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| OauthError::Keyring(format!("blocking task failed: {e}")))?
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_settings() -> OauthSettings {
        OauthSettings {
            enable_persistence: false,
            enable_auto_refresh: true,
            service_name: "switchboard-test".to_owned(),
            proxy: None,
        }
    }

    fn token(access: &str, expires_at: u64, last_used_at: u64) -> OauthToken {
        OauthToken {
            access_token: access.to_owned(),
            refresh_token: format!("rt_{access}"),
            expires_at,
            scopes: vec!["user:inference".to_owned()],
            created_at: 0,
            last_used_at,
            usage_count: 0,
            refresh_backoff_until: 0,
        }
    }

    fn far_future() -> u64 {
        now_ms() + 24 * 60 * 60 * 1000
    }

    #[tokio::test]
    async fn access_token_returns_stored_value() {
        let store = TokenStore::new(memory_settings());
        store.tokens.insert("a@example.com".into(), token("at_a", far_future(), 0));

        let access = store.access_token("a@example.com").await.unwrap();
        assert_eq!(access, "at_a");

        let stored = store.tokens.get("a@example.com").unwrap();
        assert_eq!(stored.usage_count, 1);
        assert!(stored.last_used_at > 0);
    }

    #[tokio::test]
    async fn unknown_account_errors() {
        let store = TokenStore::new(memory_settings());
        let err = store.access_token("ghost@example.com").await.unwrap_err();
        assert!(matches!(err, OauthError::AccountNotFound(_)));
    }

    #[tokio::test]
    async fn expired_token_with_backoff_is_unavailable() {
        let store = TokenStore::new(memory_settings());
        let mut expired = token("at_old", now_ms().saturating_sub(1000), 0);
        expired.refresh_backoff_until = far_future();
        store.tokens.insert("a@example.com".into(), expired);

        let err = store.access_token("a@example.com").await.unwrap_err();
        assert!(matches!(err, OauthError::TokenUnavailable(_)));
    }

    #[tokio::test]
    async fn near_expiry_token_survives_failed_refresh() {
        // Token inside the slack window but not yet expired; refresh will
        // fail (no token endpoint reachable) and set backoff, but the old
        // token must still be returned.
        let store = TokenStore::new(OauthSettings {
            proxy: Some("http://127.0.0.1:9".to_owned()),
            ..memory_settings()
        });
        let near = token("at_near", now_ms() + 60 * 1000, 0);
        store.tokens.insert("a@example.com".into(), near);

        let access = store.access_token("a@example.com").await.unwrap();
        assert_eq!(access, "at_near");

        let stored = store.tokens.get("a@example.com").unwrap();
        assert!(stored.refresh_backoff_until > now_ms(), "failed refresh must back off");
    }

    #[tokio::test]
    async fn select_account_prefers_least_recently_used() {
        let store = TokenStore::new(memory_settings());
        store.tokens.insert("busy@example.com".into(), token("at_busy", far_future(), 5000));
        store.tokens.insert("idle@example.com".into(), token("at_idle", far_future(), 100));

        assert_eq!(store.select_account().as_deref(), Some("idle@example.com"));
    }

    #[tokio::test]
    async fn select_account_skips_unusable_tokens() {
        let store = TokenStore::new(memory_settings());
        store
            .tokens
            .insert("expired@example.com".into(), token("at_x", now_ms().saturating_sub(1), 0));
        store.tokens.insert("good@example.com".into(), token("at_g", far_future(), 9999));

        assert_eq!(store.select_account().as_deref(), Some("good@example.com"));
    }

    #[tokio::test]
    async fn select_account_empty_store_is_none() {
        let store = TokenStore::new(memory_settings());
        assert!(store.select_account().is_none());
    }

    #[tokio::test]
    async fn insert_and_remove_roundtrip() {
        let store = TokenStore::new(memory_settings());
        store
            .insert(
                "a@example.com".into(),
                TokenResponse {
                    access_token: "at_new".into(),
                    refresh_token: "rt_new".into(),
                    expires_in: 3600,
                    scope: Some("user:inference user:profile".into()),
                },
            )
            .await;

        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot[0].usable);
        assert_eq!(snapshot[0].scopes, ["user:inference", "user:profile"]);

        assert!(store.remove("a@example.com").await);
        assert!(!store.remove("a@example.com").await);
        assert!(store.snapshot().is_empty());
    }

    #[test]
    fn usable_window_respects_slack() {
        let now = 1_000_000_000;
        let inside_slack = token("at", now + EXPIRY_SLACK_MS - 1, 0);
        assert!(!inside_slack.is_usable(now));
        assert!(inside_slack.needs_refresh(now));

        let comfortable = token("at", now + EXPIRY_SLACK_MS + 1000, 0);
        assert!(comfortable.is_usable(now));
        assert!(!comfortable.needs_refresh(now));
    }
}
