use deadpool_redis::redis::AsyncCommands;

use crate::error::SwitchyardError;
use crate::storage_keys::StorageKeys;

/// Thin capability over the pooled Redis connection.
///
/// Every Redis command issued by the crate goes through here. Operations are
/// deliberately unretried: transport failures surface as
/// [`SwitchyardError::Transport`] and the caller decides what to do.
#[derive(Clone)]
pub(crate) struct KeyStore {
    pool: deadpool_redis::Pool,
    pub(crate) keys: StorageKeys,
}

impl KeyStore {
    pub(crate) fn new(pool: deadpool_redis::Pool, namespace: Option<String>) -> Self {
        Self {
            pool,
            keys: StorageKeys::new(namespace.unwrap_or_default()),
        }
    }

    pub(crate) async fn connection(&self) -> Result<deadpool_redis::Connection, SwitchyardError> {
        self.pool.get().await.map_err(SwitchyardError::Pool)
    }

    // Lists

    pub(crate) async fn rpush(&self, key: &str, value: &str) -> Result<(), SwitchyardError> {
        let mut conn = self.connection().await?;
        let _: () = conn.rpush(key, value).await?;
        Ok(())
    }

    pub(crate) async fn lpush(&self, key: &str, value: &str) -> Result<(), SwitchyardError> {
        let mut conn = self.connection().await?;
        let _: () = conn.lpush(key, value).await?;
        Ok(())
    }

    pub(crate) async fn lpop(&self, key: &str) -> Result<Option<String>, SwitchyardError> {
        let mut conn = self.connection().await?;
        let value: Option<String> = conn.lpop(key, None).await?;
        Ok(value)
    }

    /// Blocks up to `timeout` seconds across the supplied keys, returning
    /// the first `(key, value)` pair that becomes available.
    pub(crate) async fn blpop(
        &self,
        keys: &[String],
        timeout: f64,
    ) -> Result<Option<(String, String)>, SwitchyardError> {
        let mut conn = self.connection().await?;
        let value: Option<(String, String)> = conn.blpop(keys, timeout).await?;
        Ok(value)
    }

    pub(crate) async fn llen(&self, key: &str) -> Result<usize, SwitchyardError> {
        let mut conn = self.connection().await?;
        let count: i64 = conn.llen(key).await?;
        Ok(count as usize)
    }

    /// Removes every list element byte-equal to `value`; returns the count.
    pub(crate) async fn lrem(&self, key: &str, value: &str) -> Result<usize, SwitchyardError> {
        let mut conn = self.connection().await?;
        let removed: i64 = conn.lrem(key, 0, value).await?;
        Ok(removed as usize)
    }

    // Sorted sets

    pub(crate) async fn zadd(
        &self,
        key: &str,
        member: &str,
        score: i64,
    ) -> Result<(), SwitchyardError> {
        let mut conn = self.connection().await?;
        let _: () = conn.zadd(key, member, score).await?;
        Ok(())
    }

    /// Smallest member with a score at or below `max`.
    pub(crate) async fn zfirst_at_most(
        &self,
        key: &str,
        max: i64,
    ) -> Result<Option<String>, SwitchyardError> {
        let mut conn = self.connection().await?;
        let members: Vec<String> = conn.zrangebyscore_limit(key, "-inf", max, 0, 1).await?;
        Ok(members.into_iter().next())
    }

    pub(crate) async fn zrem(&self, key: &str, member: &str) -> Result<(), SwitchyardError> {
        let mut conn = self.connection().await?;
        let _: () = conn.zrem(key, member).await?;
        Ok(())
    }

    pub(crate) async fn zcard(&self, key: &str) -> Result<usize, SwitchyardError> {
        let mut conn = self.connection().await?;
        let count: i64 = conn.zcard(key).await?;
        Ok(count as usize)
    }

    // Strings

    pub(crate) async fn get(&self, key: &str) -> Result<Option<String>, SwitchyardError> {
        let mut conn = self.connection().await?;
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    pub(crate) async fn set(&self, key: &str, value: &str) -> Result<(), SwitchyardError> {
        let mut conn = self.connection().await?;
        let _: () = conn.set(key, value).await?;
        Ok(())
    }

    pub(crate) async fn set_ex(
        &self,
        key: &str,
        value: &str,
        ttl_secs: u64,
    ) -> Result<(), SwitchyardError> {
        let mut conn = self.connection().await?;
        let _: () = conn.set_ex(key, value, ttl_secs).await?;
        Ok(())
    }

    pub(crate) async fn del(&self, key: &str) -> Result<(), SwitchyardError> {
        let mut conn = self.connection().await?;
        let _: () = conn.del(key).await?;
        Ok(())
    }

    pub(crate) async fn del_many(&self, keys: &[String]) -> Result<(), SwitchyardError> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.connection().await?;
        let _: () = conn.del(keys).await?;
        Ok(())
    }

    pub(crate) async fn incr_by(&self, key: &str, by: u64) -> Result<u64, SwitchyardError> {
        let mut conn = self.connection().await?;
        let value: i64 = conn.incr(key, by).await?;
        Ok(value.max(0) as u64)
    }

    pub(crate) async fn exists(&self, key: &str) -> Result<bool, SwitchyardError> {
        let mut conn = self.connection().await?;
        let exists: bool = conn.exists(key).await?;
        Ok(exists)
    }

    // Sets

    pub(crate) async fn sadd(&self, key: &str, member: &str) -> Result<(), SwitchyardError> {
        let mut conn = self.connection().await?;
        let _: () = conn.sadd(key, member).await?;
        Ok(())
    }

    pub(crate) async fn srem(&self, key: &str, member: &str) -> Result<(), SwitchyardError> {
        let mut conn = self.connection().await?;
        let _: () = conn.srem(key, member).await?;
        Ok(())
    }

    pub(crate) async fn smembers(&self, key: &str) -> Result<Vec<String>, SwitchyardError> {
        let mut conn = self.connection().await?;
        let members: Vec<String> = conn.smembers(key).await?;
        Ok(members)
    }

    // Hashes

    pub(crate) async fn hset(
        &self,
        key: &str,
        field: &str,
        value: &str,
    ) -> Result<(), SwitchyardError> {
        let mut conn = self.connection().await?;
        let _: () = conn.hset(key, field, value).await?;
        Ok(())
    }

    pub(crate) async fn hget(
        &self,
        key: &str,
        field: &str,
    ) -> Result<Option<String>, SwitchyardError> {
        let mut conn = self.connection().await?;
        let value: Option<String> = conn.hget(key, field).await?;
        Ok(value)
    }

    pub(crate) async fn hdel(&self, key: &str, field: &str) -> Result<(), SwitchyardError> {
        let mut conn = self.connection().await?;
        let _: () = conn.hdel(key, field).await?;
        Ok(())
    }

    // Key enumeration

    pub(crate) async fn matching_keys(
        &self,
        pattern: &str,
    ) -> Result<Vec<String>, SwitchyardError> {
        let mut conn = self.connection().await?;
        let keys: Vec<String> = conn.keys(pattern).await?;
        Ok(keys)
    }

    pub(crate) async fn lrange(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<String>, SwitchyardError> {
        let mut conn = self.connection().await?;
        let values: Vec<String> = conn.lrange(key, start, stop).await?;
        Ok(values)
    }
}
