//! Redis-backed subscription set (spec §4.2 "Remote").
//!
//! Encoded as a single sorted set per endpoint: each member is
//! `key + '>' + JSON(value)` so one ZSET gives us both membership and
//! per-entry payload, and the score is the entry's expiry epoch
//! milliseconds so a sweep is just `ZREMRANGEBYSCORE 0 now`.
//!
//! `>` is therefore reserved and rejected in keys on `add` (spec §9 open
//! question): a key containing it would make two distinct entries
//! indistinguishable from their encoded member, silently corrupting reads.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use serde_json::Value;
use tracing::info;

use super::SubscriptionSet;
use crate::error::{AdapterError, Result};
use crate::time::now_ms;

const DELIMITER: char = '>';

/// Redis sorted-set-backed subscription set.
pub struct RemoteSubscriptionSet {
    conn: ConnectionManager,
    zset_key: String,
}

impl RemoteSubscriptionSet {
    /// # Errors
    ///
    /// Returns an error if the Redis client cannot be constructed or the
    /// initial connection fails.
    pub async fn new(redis_url: &str, zset_key: impl Into<String>) -> anyhow::Result<Self> {
        let client = Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        let zset_key = zset_key.into();
        info!(zset_key = %zset_key, "connecting remote subscription set");
        Ok(Self { conn, zset_key })
    }

    fn encode(key: &str, value: &Value) -> Result<String> {
        if key.contains(DELIMITER) {
            return Err(AdapterError::Internal(format!(
                "subscription key {key:?} contains the reserved delimiter '{DELIMITER}'"
            )));
        }
        let payload = serde_json::to_string(value)
            .map_err(|e| AdapterError::Internal(format!("failed to encode subscription value: {e}")))?;
        Ok(format!("{key}{DELIMITER}{payload}"))
    }

    fn decode(member: &str) -> Option<(&str, Value)> {
        let (key, payload) = member.split_once(DELIMITER)?;
        let value = serde_json::from_str(payload).ok()?;
        Some((key, value))
    }

    async fn sweep_expired(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let now = now_ms();
        let _: u64 = conn
            .zrembyscore(&self.zset_key, 0, now as f64)
            .await
            .map_err(|e| AdapterError::CacheUnavailable(e.to_string()))?;
        Ok(())
    }

    async fn all_members(&self) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        conn.zrange(&self.zset_key, 0, -1)
            .await
            .map_err(|e| AdapterError::CacheUnavailable(e.to_string()))
    }
}

#[async_trait]
impl SubscriptionSet for RemoteSubscriptionSet {
    async fn add(&self, key: &str, value: Value, ttl_ms: u64) -> Result<()> {
        let member = Self::encode(key, &value)?;
        self.sweep_expired().await?;

        let prefix = format!("{key}{DELIMITER}");
        let stale: Vec<String> = self
            .all_members()
            .await?
            .into_iter()
            .filter(|m| m.starts_with(&prefix))
            .collect();

        let mut conn = self.conn.clone();
        if !stale.is_empty() {
            let _: u64 = conn
                .zrem(&self.zset_key, stale)
                .await
                .map_err(|e| AdapterError::CacheUnavailable(e.to_string()))?;
        }

        let expires_at = now_ms() + ttl_ms;
        let _: u64 = conn
            .zadd(&self.zset_key, member, expires_at as f64)
            .await
            .map_err(|e| AdapterError::CacheUnavailable(e.to_string()))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Value>> {
        self.sweep_expired().await?;
        let prefix = format!("{key}{DELIMITER}");
        let members = self.all_members().await?;
        Ok(members
            .iter()
            .find(|m| m.starts_with(&prefix))
            .and_then(|m| Self::decode(m))
            .map(|(_, v)| v))
    }

    async fn get_all(&self) -> Result<Vec<Value>> {
        self.sweep_expired().await?;
        let members = self.all_members().await?;
        Ok(members.iter().filter_map(|m| Self::decode(m)).map(|(_, v)| v).collect())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let prefix = format!("{key}{DELIMITER}");
        let stale: Vec<String> = self
            .all_members()
            .await?
            .into_iter()
            .filter(|m| m.starts_with(&prefix))
            .collect();
        if stale.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let _: u64 = conn
            .zrem(&self.zset_key, stale)
            .await
            .map_err(|e| AdapterError::CacheUnavailable(e.to_string()))?;
        Ok(())
    }

    async fn len(&self) -> Result<usize> {
        self.sweep_expired().await?;
        let mut conn = self.conn.clone();
        let count: u64 = conn
            .zcard(&self.zset_key)
            .await
            .map_err(|e| AdapterError::CacheUnavailable(e.to_string()))?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn encode_rejects_keys_containing_the_delimiter() {
        let err = RemoteSubscriptionSet::encode("bad>key", &json!(1)).unwrap_err();
        assert!(matches!(err, AdapterError::Internal(_)));
    }

    #[test]
    fn encode_then_decode_round_trips() {
        let member = RemoteSubscriptionSet::encode("eth-usd", &json!({"base": "ETH"})).unwrap();
        let (key, value) = RemoteSubscriptionSet::decode(&member).unwrap();
        assert_eq!(key, "eth-usd");
        assert_eq!(value, json!({"base": "ETH"}));
    }
}
