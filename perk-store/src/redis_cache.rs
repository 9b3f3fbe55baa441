use async_trait::async_trait;
use perk_core::errors::CacheError;
use perk_core::gateway::CacheGateway;
use redis::AsyncCommands;
use tracing::debug;

const SCAN_COUNT: usize = 500;

fn cache_err(e: redis::RedisError) -> CacheError {
    CacheError::Backend(e.to_string())
}

#[derive(Clone)]
pub struct RedisCache {
    client: redis::Client,
}

impl RedisCache {
    pub async fn new(connection_string: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(connection_string)?;
        Ok(Self { client })
    }
}

#[async_trait]
impl CacheGateway for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(cache_err)?;
        let value: Option<Vec<u8>> = conn.get(key).await.map_err(cache_err)?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &[u8], ttl_seconds: u64) -> Result<(), CacheError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(cache_err)?;
        conn.set_ex::<_, _, ()>(key, value, ttl_seconds)
            .await
            .map_err(cache_err)?;
        Ok(())
    }

    async fn invalidate_pattern(&self, pattern: &str) -> Result<u64, CacheError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(cache_err)?;

        // Cursor SCAN instead of KEYS so invalidation never blocks the server.
        let mut cursor: u64 = 0;
        let mut removed: u64 = 0;
        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(&mut conn)
                .await
                .map_err(cache_err)?;

            if !keys.is_empty() {
                let deleted: u64 = conn.del(keys).await.map_err(cache_err)?;
                removed += deleted;
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        debug!("invalidated {} cache keys matching {}", removed, pattern);
        Ok(removed)
    }
}
