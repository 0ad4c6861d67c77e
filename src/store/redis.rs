//! Redis-backed coordination store
//!
//! Shared by every matchmaking instance in a deployment. Conditional writes
//! map onto `SET NX PX`, so a lock held by a dead worker lapses with its TTL.

use crate::error::{MatchmakingError, Result};
use crate::store::CoordinationStore;
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, RedisError, Script};
use std::time::Duration;
use tracing::info;

/// Coordination store over a multiplexed Redis connection
#[derive(Clone)]
pub struct RedisStore {
    connection: MultiplexedConnection,
}

fn store_error(e: RedisError) -> anyhow::Error {
    MatchmakingError::Store {
        message: e.to_string(),
    }
    .into()
}

// Owner checks run server side so the read and the write cannot interleave
// with another client.
const COMPARE_AND_DELETE: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;

const COMPARE_AND_SET: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    redis.call('SET', KEYS[1], ARGV[2], 'PX', ARGV[3])
    return 1
end
return 0
"#;

fn millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

impl RedisStore {
    /// Connect to the Redis server at `url`
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).map_err(store_error)?;
        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(store_error)?;
        info!("Connected to coordination store at {}", url);
        Ok(Self { connection })
    }
}

#[async_trait]
impl CoordinationStore for RedisStore {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.connection.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(millis(ttl))
            .query_async(&mut conn)
            .await
            .map_err(store_error)?;
        Ok(reply.is_some())
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let mut conn = self.connection.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(millis(ttl));
        }
        let _: () = cmd.query_async(&mut conn).await.map_err(store_error)?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.connection.clone();
        conn.get(key).await.map_err(store_error)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.connection.clone();
        let updated: i64 = redis::cmd("PEXPIRE")
            .arg(key)
            .arg(millis(ttl))
            .query_async(&mut conn)
            .await
            .map_err(store_error)?;
        Ok(updated == 1)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.connection.clone();
        let removed: i64 = conn.del(key).await.map_err(store_error)?;
        Ok(removed > 0)
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool> {
        let mut conn = self.connection.clone();
        let removed: i64 = Script::new(COMPARE_AND_DELETE)
            .key(key)
            .arg(expected)
            .invoke_async(&mut conn)
            .await
            .map_err(store_error)?;
        Ok(removed > 0)
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool> {
        let mut conn = self.connection.clone();
        let replaced: i64 = Script::new(COMPARE_AND_SET)
            .key(key)
            .arg(expected)
            .arg(value)
            .arg(millis(ttl))
            .invoke_async(&mut conn)
            .await
            .map_err(store_error)?;
        Ok(replaced == 1)
    }

    async fn sorted_add(&self, key: &str, member: &str, score: f64) -> Result<()> {
        let mut conn = self.connection.clone();
        let _: i64 = conn.zadd(key, member, score).await.map_err(store_error)?;
        Ok(())
    }

    async fn sorted_remove(&self, key: &str, member: &str) -> Result<bool> {
        let mut conn = self.connection.clone();
        let removed: i64 = conn.zrem(key, member).await.map_err(store_error)?;
        Ok(removed > 0)
    }

    async fn sorted_members_desc(&self, key: &str) -> Result<Vec<(String, f64)>> {
        let mut conn = self.connection.clone();
        conn.zrevrange_withscores(key, 0, -1)
            .await
            .map_err(store_error)
    }

    async fn sorted_len(&self, key: &str) -> Result<usize> {
        let mut conn = self.connection.clone();
        conn.zcard(key).await.map_err(store_error)
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<bool> {
        let mut conn = self.connection.clone();
        let added: i64 = conn.sadd(key, member).await.map_err(store_error)?;
        Ok(added > 0)
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<bool> {
        let mut conn = self.connection.clone();
        let removed: i64 = conn.srem(key, member).await.map_err(store_error)?;
        Ok(removed > 0)
    }

    async fn set_contains(&self, key: &str, member: &str) -> Result<bool> {
        let mut conn = self.connection.clone();
        conn.sismember(key, member).await.map_err(store_error)
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>> {
        let mut conn = self.connection.clone();
        let mut members: Vec<String> = conn.smembers(key).await.map_err(store_error)?;
        members.sort();
        Ok(members)
    }

    async fn set_len(&self, key: &str) -> Result<usize> {
        let mut conn = self.connection.clone();
        conn.scard(key).await.map_err(store_error)
    }
}
