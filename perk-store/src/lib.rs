pub mod app_config;
pub mod database;
pub mod pg_store;
pub mod redis_cache;

pub use database::DbClient;
pub use pg_store::PostgresStore;
pub use redis_cache::RedisCache;
