//! Consultation cache — capability layer.
//!
//! TTL-keyed store of (provider, identifier) → prior result payload. The
//! same validity predicate guards both directions: poisoned payloads
//! (errors, indefinite outcomes, block signals) are never written, and a
//! poisoned or expired entry found on read is deleted so it cannot be
//! served again.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::Result;

/// Payload statuses that must never be served from cache.
const POISONED_STATUSES: [&str; 3] = ["error", "invalid", "indefinite"];

/// Substrings in message/debug that mark a block-tainted payload.
const BLOCK_MARKERS: [&str; 2] = ["captcha", "bloque"];

/// Whether a payload may be stored and later served.
pub fn is_cacheable_payload(payload: &JsonValue) -> bool {
    let status = payload
        .get("status")
        .and_then(JsonValue::as_str)
        .unwrap_or("")
        .to_lowercase();
    if POISONED_STATUSES.contains(&status.as_str()) {
        return false;
    }

    let message = payload
        .get("message")
        .and_then(JsonValue::as_str)
        .unwrap_or("")
        .to_lowercase();
    if BLOCK_MARKERS.iter().any(|m| message.contains(m)) {
        return false;
    }

    if let Some(debug) = payload.get("debug").and_then(JsonValue::as_object) {
        if debug
            .get("block_detected")
            .and_then(JsonValue::as_bool)
            .unwrap_or(false)
        {
            return false;
        }
        let error = debug
            .get("error")
            .and_then(JsonValue::as_str)
            .unwrap_or("")
            .to_lowercase();
        if BLOCK_MARKERS.iter().any(|m| error.contains(m)) {
            return false;
        }
    }

    true
}

/// Effective TTL in days: payload-embedded override, else the store default.
fn resolve_ttl_days(payload: &JsonValue, default_ttl_days: i64) -> i64 {
    payload
        .get("ttl_days")
        .and_then(JsonValue::as_i64)
        .filter(|d| *d > 0)
        .unwrap_or(default_ttl_days)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheDocument {
    provider: String,
    identifier: String,
    data: JsonValue,
    expires_at: DateTime<Utc>,
}

impl CacheDocument {
    fn is_live(&self) -> bool {
        self.expires_at > Utc::now() && is_cacheable_payload(&self.data)
    }
}

/// External result store keyed by (provider, identifier).
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Valid payload for the key, or None. Stale/poisoned entries found
    /// here are purged eagerly.
    async fn get(&self, provider: &str, identifier: &str) -> Result<Option<JsonValue>>;

    /// Upsert; silently skipped when the payload fails the validity
    /// predicate. Last writer wins.
    async fn set(&self, provider: &str, identifier: &str, data: JsonValue) -> Result<()>;
}

/// One JSON document per key under a cache directory.
pub struct FileCacheStore {
    dir: PathBuf,
    default_ttl_days: i64,
}

impl FileCacheStore {
    pub fn new(dir: impl Into<PathBuf>, default_ttl_days: i64) -> Self {
        Self {
            dir: dir.into(),
            default_ttl_days,
        }
    }

    fn path_for(&self, provider: &str, identifier: &str) -> PathBuf {
        self.dir.join(provider).join(format!("{identifier}.json"))
    }
}

#[async_trait]
impl CacheStore for FileCacheStore {
    async fn get(&self, provider: &str, identifier: &str) -> Result<Option<JsonValue>> {
        let path = self.path_for(provider, identifier);
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(_) => return Ok(None),
        };

        let document: CacheDocument = match serde_json::from_str(&content) {
            Ok(doc) => doc,
            Err(_) => {
                let _ = fs::remove_file(&path).await;
                return Ok(None);
            }
        };

        if !document.is_live() {
            debug!("[cache] removendo entrada inválida {provider}/{identifier}");
            let _ = fs::remove_file(&path).await;
            return Ok(None);
        }

        Ok(Some(document.data))
    }

    async fn set(&self, provider: &str, identifier: &str, data: JsonValue) -> Result<()> {
        if !is_cacheable_payload(&data) {
            debug!("[cache] payload não cacheável ignorado {provider}/{identifier}");
            return Ok(());
        }

        let ttl = resolve_ttl_days(&data, self.default_ttl_days);
        let document = CacheDocument {
            provider: provider.to_string(),
            identifier: identifier.to_string(),
            data,
            expires_at: Utc::now() + Duration::days(ttl),
        };

        let path = self.path_for(provider, identifier);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, serde_json::to_string(&document)?).await?;
        Ok(())
    }
}

/// In-memory store for tests and ephemeral runs.
pub struct MemoryCacheStore {
    default_ttl_days: i64,
    entries: RwLock<HashMap<(String, String), CacheDocument>>,
}

impl MemoryCacheStore {
    pub fn new(default_ttl_days: i64) -> Self {
        Self {
            default_ttl_days,
            entries: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, provider: &str, identifier: &str) -> Result<Option<JsonValue>> {
        let key = (provider.to_string(), identifier.to_string());
        let mut entries = self.entries.write().await;
        match entries.get(&key) {
            Some(document) if document.is_live() => Ok(Some(document.data.clone())),
            Some(_) => {
                entries.remove(&key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, provider: &str, identifier: &str, data: JsonValue) -> Result<()> {
        if !is_cacheable_payload(&data) {
            return Ok(());
        }
        let ttl = resolve_ttl_days(&data, self.default_ttl_days);
        let document = CacheDocument {
            provider: provider.to_string(),
            identifier: identifier.to_string(),
            data,
            expires_at: Utc::now() + Duration::days(ttl),
        };
        self.entries
            .write()
            .await
            .insert((provider.to_string(), identifier.to_string()), document);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn positive_payload() -> JsonValue {
        json!({
            "status": "positive",
            "plan": "Plano Top",
            "message": "Plano identificado",
        })
    }

    #[test]
    fn predicate_rejects_poisoned_payloads() {
        assert!(is_cacheable_payload(&positive_payload()));
        assert!(!is_cacheable_payload(&json!({"status": "error"})));
        assert!(!is_cacheable_payload(&json!({"status": "Indefinite"})));
        assert!(!is_cacheable_payload(
            &json!({"status": "positive", "message": "captcha requerido"})
        ));
        assert!(!is_cacheable_payload(
            &json!({"status": "positive", "debug": {"block_detected": true}})
        ));
        assert!(!is_cacheable_payload(
            &json!({"status": "negative", "debug": {"error": "acesso bloqueado"}})
        ));
    }

    #[tokio::test]
    async fn set_then_get_round_trips_within_ttl() {
        let store = MemoryCacheStore::new(7);
        store.set("amil", "111", positive_payload()).await.unwrap();
        let hit = store.get("amil", "111").await.unwrap().unwrap();
        assert_eq!(hit, positive_payload());
    }

    #[tokio::test]
    async fn expired_entry_is_absent_and_purged() {
        let store = MemoryCacheStore::new(-1);
        store.set("amil", "111", positive_payload()).await.unwrap();
        assert!(store.get("amil", "111").await.unwrap().is_none());
        // Entry is gone entirely after the purge.
        assert!(store.entries.read().await.is_empty());
    }

    #[tokio::test]
    async fn poisoned_set_is_a_no_op() {
        let store = MemoryCacheStore::new(7);
        store
            .set("amil", "111", json!({"status": "error", "message": "boom"}))
            .await
            .unwrap();
        assert!(store.get("amil", "111").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn payload_ttl_overrides_default() {
        let store = MemoryCacheStore::new(-1);
        let mut payload = positive_payload();
        payload["ttl_days"] = json!(30);
        store.set("amil", "111", payload).await.unwrap();
        // Default would have expired it immediately; the override keeps it.
        assert!(store.get("amil", "111").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn file_store_round_trips_and_purges() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileCacheStore::new(tmp.path(), 7);
        store.set("amil", "111", positive_payload()).await.unwrap();
        assert!(store.get("amil", "111").await.unwrap().is_some());

        let expired = FileCacheStore::new(tmp.path(), -1);
        expired.set("amil", "222", positive_payload()).await.unwrap();
        assert!(expired.get("amil", "222").await.unwrap().is_none());
        assert!(!expired.path_for("amil", "222").exists());
    }
}
