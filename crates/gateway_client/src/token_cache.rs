//! Per-role device tokens issued by the gateway.
//!
//! Stored next to the identity at `<state_dir>/identity/device-auth.json`.
//! The file belongs to one device id; entries written for another device are
//! never returned.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::identity::now_ms;
use crate::private_fs::write_private_file;

const TOKEN_CACHE_VERSION: u32 = 1;
const TOKEN_CACHE_FILE: &str = "device-auth.json";

#[derive(Debug, thiserror::Error)]
pub enum TokenCacheError {
    #[error("failed to write token cache {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode token cache: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedToken {
    pub token: String,
    pub role: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub updated_at_ms: u64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenRecord {
    version: u32,
    device_id: String,
    #[serde(default)]
    tokens: BTreeMap<String, CachedToken>,
}

#[derive(Debug, Clone)]
pub struct TokenCache {
    path: PathBuf,
}

impl TokenCache {
    pub fn new(state_dir: &Path) -> Self {
        Self {
            path: state_dir.join("identity").join(TOKEN_CACHE_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Token for `role`, if one was stored for this device.
    pub fn load(&self, device_id: &str, role: &str) -> Option<CachedToken> {
        let record = self.read_record()?;
        if record.device_id != device_id {
            debug!(cached_device = %record.device_id, "token cache belongs to another device");
            return None;
        }
        record
            .tokens
            .get(role)
            .filter(|entry| !entry.token.is_empty())
            .cloned()
    }

    /// Insert or replace the token for `role`. A cache written for another
    /// device is discarded.
    pub fn store(
        &self,
        device_id: &str,
        role: &str,
        token: &str,
        scopes: &[String],
    ) -> Result<CachedToken, TokenCacheError> {
        let mut record = match self.read_record() {
            Some(record) if record.device_id == device_id => record,
            _ => TokenRecord {
                version: TOKEN_CACHE_VERSION,
                device_id: device_id.to_string(),
                tokens: BTreeMap::new(),
            },
        };
        let entry = CachedToken {
            token: token.to_string(),
            role: role.to_string(),
            scopes: scopes.to_vec(),
            updated_at_ms: now_ms(),
        };
        record.tokens.insert(role.to_string(), entry.clone());
        self.write_record(&record)?;
        debug!(%role, "stored device token");
        Ok(entry)
    }

    /// Remove the entry for `role`, leaving other roles untouched. Returns
    /// whether an entry was removed.
    pub fn clear(&self, device_id: &str, role: &str) -> Result<bool, TokenCacheError> {
        let Some(mut record) = self.read_record() else {
            return Ok(false);
        };
        if record.device_id != device_id || record.tokens.remove(role).is_none() {
            return Ok(false);
        }
        self.write_record(&record)?;
        debug!(%role, "cleared device token");
        Ok(true)
    }

    fn read_record(&self) -> Option<TokenRecord> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "unreadable token cache");
                return None;
            }
        };
        match serde_json::from_str::<TokenRecord>(&content) {
            Ok(record) if record.version == TOKEN_CACHE_VERSION => Some(record),
            Ok(record) => {
                warn!(version = record.version, "ignoring token cache with unknown version");
                None
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "malformed token cache");
                None
            }
        }
    }

    fn write_record(&self, record: &TokenRecord) -> Result<(), TokenCacheError> {
        let content = serde_json::to_vec_pretty(record)?;
        write_private_file(&self.path, &content).map_err(|source| TokenCacheError::Write {
            path: self.path.clone(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn scopes(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_store_and_load() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = TokenCache::new(dir.path());
        assert!(cache.load("dev1", "operator").is_none());

        cache
            .store("dev1", "operator", "tok1", &scopes(&["operator.read"]))
            .expect("store");
        let entry = cache.load("dev1", "operator").expect("entry");
        assert_eq!(entry.token, "tok1");
        assert_eq!(entry.role, "operator");
        assert_eq!(entry.scopes, scopes(&["operator.read"]));
        assert!(cache.load("dev1", "node").is_none());
    }

    #[test]
    fn test_other_device_is_ignored() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = TokenCache::new(dir.path());
        cache.store("dev1", "operator", "tok1", &[]).expect("store");
        assert!(cache.load("dev2", "operator").is_none());

        cache.store("dev2", "operator", "tok2", &[]).expect("store");
        assert!(cache.load("dev1", "operator").is_none());
        assert_eq!(cache.load("dev2", "operator").expect("entry").token, "tok2");
    }

    #[test]
    fn test_clear_removes_only_one_role() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = TokenCache::new(dir.path());
        cache.store("dev1", "operator", "tok-op", &[]).expect("store");
        cache.store("dev1", "node", "tok-node", &[]).expect("store");

        assert!(cache.clear("dev1", "operator").expect("clear"));
        assert!(!cache.clear("dev1", "operator").expect("clear again"));
        assert!(cache.load("dev1", "operator").is_none());
        assert_eq!(cache.load("dev1", "node").expect("entry").token, "tok-node");
    }

    #[test]
    fn test_clear_without_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = TokenCache::new(dir.path());
        assert!(!cache.clear("dev1", "operator").expect("clear"));
        assert!(!cache.path().exists());
    }

    #[test]
    fn test_malformed_file_reads_as_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = TokenCache::new(dir.path());
        std::fs::create_dir_all(dir.path().join("identity")).expect("mkdir");
        std::fs::write(cache.path(), "[]").expect("write");
        assert!(cache.load("dev1", "operator").is_none());

        cache.store("dev1", "operator", "tok1", &[]).expect("store");
        assert_eq!(cache.load("dev1", "operator").expect("entry").token, "tok1");
    }

    #[test]
    fn test_record_layout() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = TokenCache::new(dir.path());
        cache
            .store("dev1", "operator", "tok1", &scopes(&["operator.read"]))
            .expect("store");

        let record: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(cache.path()).expect("read")).expect("json");
        assert_eq!(record["version"], 1);
        assert_eq!(record["deviceId"], "dev1");
        assert_eq!(record["tokens"]["operator"]["token"], "tok1");
        assert_eq!(record["tokens"]["operator"]["scopes"][0], "operator.read");
        assert!(record["tokens"]["operator"]["updatedAtMs"].as_u64().is_some());
    }
}
