//! OS keyring persistence for OAuth tokens
//!
//! Each account's token is one keyring entry keyed by
//! `(service_name, account_email)`. The keyring cannot enumerate entries,
//! so a separate index entry records the known account list.

use keyring::Entry;

use crate::error::OauthError;
use crate::store::OauthToken;

/// Pseudo-account under which the account index is stored
const INDEX_ACCOUNT: &str = "__accounts__";

pub(crate) fn save_token(service: &str, account: &str, token: &OauthToken) -> Result<(), OauthError> {
    let json = serde_json::to_string(token).map_err(|e| OauthError::Keyring(format!("serialize: {e}")))?;
    entry(service, account)?
        .set_password(&json)
        .map_err(|e| OauthError::Keyring(format!("store token for {account}: {e}")))
}

pub(crate) fn load_token(service: &str, account: &str) -> Result<Option<OauthToken>, OauthError> {
    match entry(service, account)?.get_password() {
        Ok(json) => serde_json::from_str(&json)
            .map(Some)
            .map_err(|e| OauthError::Keyring(format!("parse token for {account}: {e}"))),
        Err(keyring::Error::NoEntry) => Ok(None),
        Err(e) => Err(OauthError::Keyring(format!("load token for {account}: {e}"))),
    }
}

pub(crate) fn delete_token(service: &str, account: &str) -> Result<(), OauthError> {
    match entry(service, account)?.delete_credential() {
        Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
        Err(e) => Err(OauthError::Keyring(format!("delete token for {account}: {e}"))),
    }
}

pub(crate) fn save_index(service: &str, accounts: &[String]) -> Result<(), OauthError> {
    let json = serde_json::to_string(accounts).map_err(|e| OauthError::Keyring(format!("serialize index: {e}")))?;
    entry(service, INDEX_ACCOUNT)?
        .set_password(&json)
        .map_err(|e| OauthError::Keyring(format!("store account index: {e}")))
}

pub(crate) fn load_index(service: &str) -> Result<Vec<String>, OauthError> {
    match entry(service, INDEX_ACCOUNT)?.get_password() {
        Ok(json) => {
            serde_json::from_str(&json).map_err(|e| OauthError::Keyring(format!("parse account index: {e}")))
        }
        Err(keyring::Error::NoEntry) => Ok(Vec::new()),
        Err(e) => Err(OauthError::Keyring(format!("load account index: {e}"))),
    }
}

fn entry(service: &str, account: &str) -> Result<Entry, OauthError> {
    Entry::new(service, account).map_err(|e| OauthError::Keyring(format!("open entry {service}/{account}: {e}")))
}
